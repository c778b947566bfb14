// per-target task table: at most one agent loop per target

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::agent::{Agent, AgentError, TaskReport};
use crate::cdp::TargetId;
use crate::storage::{timestamp, RunRecord, RunStore};

struct TaskHandle {
    cancel: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct Scheduler {
    agent: Arc<Agent>,
    tasks: Arc<Mutex<HashMap<TargetId, TaskHandle>>>,
    store: Option<Arc<RunStore>>,
}

impl Scheduler {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self {
            agent,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    async fn register(&self, target: &TargetId) -> Result<Arc<AtomicBool>, AgentError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(target) {
            return Err(AgentError::AlreadyRunning(target.clone()));
        }
        let cancel = Arc::new(AtomicBool::new(false));
        tasks.insert(
            target.clone(),
            TaskHandle {
                cancel: cancel.clone(),
            },
        );
        Ok(cancel)
    }

    // only remove our own entry; a cancel may already have made room for a new task
    async fn unregister(&self, target: &TargetId, cancel: &Arc<AtomicBool>) {
        let mut tasks = self.tasks.lock().await;
        if tasks.get(target).is_some_and(|t| Arc::ptr_eq(&t.cancel, cancel)) {
            tasks.remove(target);
        }
    }

    async fn execute(
        &self,
        target: TargetId,
        goal: String,
        cancel: Arc<AtomicBool>,
    ) -> Result<TaskReport, AgentError> {
        let run = RunRecord::new(&target, &goal, timestamp());
        let result = self.agent.run(&target, &goal, &cancel).await;
        self.unregister(&target, &cancel).await;

        if let Some(store) = &self.store {
            let run = match &result {
                Ok(report) => run.finish(report),
                Err(e) => run.fail(&e.to_string()),
            };
            if let Err(e) = store.record(&run) {
                tracing::warn!(%target, error = %e, "failed to save run");
            }
        }
        result
    }

    /// Run a task on `target` to completion on the current task.
    pub async fn run(&self, target: &TargetId, goal: &str) -> Result<TaskReport, AgentError> {
        let cancel = self.register(target).await?;
        self.execute(target.clone(), goal.to_string(), cancel).await
    }

    /// Spawn a task on `target` in the background.
    pub async fn start(
        &self,
        target: &TargetId,
        goal: &str,
    ) -> Result<JoinHandle<Result<TaskReport, AgentError>>, AgentError> {
        let cancel = self.register(target).await?;
        let this = self.clone();
        let target = target.clone();
        let goal = goal.to_string();
        Ok(tokio::spawn(async move { this.execute(target, goal, cancel).await }))
    }

    /// Stop the task on `target` and tear down its session.
    ///
    /// Returns false if nothing was running there. An attach still in flight
    /// is rolled back before this returns, so a new task may be started on
    /// the target right away.
    pub async fn cancel(&self, target: &TargetId) -> bool {
        let Some(task) = self.tasks.lock().await.remove(target) else {
            return false;
        };
        task.cancel.store(true, Ordering::SeqCst);
        self.agent.sessions().detach_target(target).await;
        tracing::info!(%target, "task cancelled");
        true
    }

    pub async fn cancel_all(&self) {
        let targets: Vec<_> = self.tasks.lock().await.keys().cloned().collect();
        for target in targets {
            self.cancel(&target).await;
        }
    }

    pub async fn is_running(&self, target: &TargetId) -> bool {
        self.tasks.lock().await.contains_key(target)
    }

    pub async fn running(&self) -> Vec<TargetId> {
        let mut targets: Vec<_> = self.tasks.lock().await.keys().cloned().collect();
        targets.sort();
        targets
    }
}
