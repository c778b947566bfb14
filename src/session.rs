// one debugging session per target

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, Mutex};

use crate::cdp::{BrowserHost, CdpError, TargetId};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A session is already attached to target {0}")]
    AlreadyAttached(TargetId),
    #[error("Attach to {0} cancelled")]
    Cancelled(TargetId),
    #[error("Attach to {target} rejected: {source}")]
    Protocol {
        target: TargetId,
        #[source]
        source: CdpError,
    },
}

/// Handle to an attached target.
///
/// Cloning shares the same attachment; once released every clone reports
/// `is_attached() == false`.
#[derive(Clone)]
pub struct Session {
    target: TargetId,
    host: Arc<dyn BrowserHost>,
    attached: Arc<AtomicBool>,
}

impl Session {
    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn host(&self) -> &dyn BrowserHost {
        self.host.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn same_attachment(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.attached, &other.attached)
    }
}

// a target is reserved while its attach is in flight so other targets never wait on it
enum Slot {
    Attaching {
        abort: Arc<AtomicBool>,
        settled: watch::Receiver<bool>,
    },
    Live(Session),
}

pub struct SessionManager {
    host: Arc<dyn BrowserHost>,
    slots: Mutex<HashMap<TargetId, Slot>>,
}

impl SessionManager {
    pub fn new(host: Arc<dyn BrowserHost>) -> Self {
        Self {
            host,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> Arc<dyn BrowserHost> {
        self.host.clone()
    }

    pub async fn attach(&self, target: &TargetId) -> Result<Session, SessionError> {
        self.attach_unless_cancelled(target, &AtomicBool::new(false)).await
    }

    /// Attach to `target` unless `cancel` is raised before the attach commits.
    ///
    /// A cancelled attach is rolled back on the host and reported as
    /// [`SessionError::Cancelled`].
    pub async fn attach_unless_cancelled(&self, target: &TargetId, cancel: &AtomicBool) -> Result<Session, SessionError> {
        let abort = Arc::new(AtomicBool::new(false));
        let (settled_tx, settled_rx) = watch::channel(false);
        {
            let mut slots = self.slots.lock().await;
            if cancel.load(Ordering::SeqCst) {
                return Err(SessionError::Cancelled(target.clone()));
            }
            if slots.contains_key(target) {
                return Err(SessionError::AlreadyAttached(target.clone()));
            }
            slots.insert(
                target.clone(),
                Slot::Attaching {
                    abort: abort.clone(),
                    settled: settled_rx,
                },
            );
        }

        let connected = self.connect(target).await;

        let mut slots = self.slots.lock().await;
        let result = match connected {
            Err(e) => {
                slots.remove(target);
                Err(e)
            }
            Ok(()) if abort.load(Ordering::SeqCst) || cancel.load(Ordering::SeqCst) => {
                drop(slots);
                if let Err(e) = self.host.detach(target).await {
                    tracing::warn!(%target, error = %e, "detach after cancelled attach");
                }
                self.slots.lock().await.remove(target);
                tracing::debug!(%target, "attach cancelled");
                Err(SessionError::Cancelled(target.clone()))
            }
            Ok(()) => {
                let session = Session {
                    target: target.clone(),
                    host: self.host.clone(),
                    attached: Arc::new(AtomicBool::new(true)),
                };
                slots.insert(target.clone(), Slot::Live(session.clone()));
                Ok(session)
            }
        };
        let _ = settled_tx.send(true);
        result
    }

    async fn connect(&self, target: &TargetId) -> Result<(), SessionError> {
        let rejected = |source| SessionError::Protocol {
            target: target.clone(),
            source,
        };

        self.host.attach(target).await.map_err(rejected)?;

        // make sure the page actually answers before handing it out
        match self.host.main_frame_id(target).await {
            Ok(frame_id) => {
                tracing::debug!(%target, %frame_id, "session attached");
                Ok(())
            }
            Err(e) => {
                if let Err(detach_err) = self.host.detach(target).await {
                    tracing::warn!(%target, error = %detach_err, "detach after failed attach");
                }
                Err(rejected(e))
            }
        }
    }

    pub async fn is_attached(&self, target: &TargetId) -> bool {
        matches!(self.slots.lock().await.get(target), Some(Slot::Live(_)))
    }

    /// Detach `session` if it is still the live session for its target.
    ///
    /// Never fails: a detach error is logged and dropped.
    pub async fn release(&self, session: &Session) {
        let current = {
            let mut slots = self.slots.lock().await;
            match slots.get(&session.target) {
                Some(Slot::Live(live)) if live.same_attachment(session) => slots.remove(&session.target),
                _ => None,
            }
        };
        if let Some(Slot::Live(live)) = current {
            self.detach_session(&live).await;
        }
    }

    /// Tear down whatever session is attached to `target`.
    ///
    /// An attach still in flight is aborted and waited for, so the target is
    /// free once this returns.
    pub async fn detach_target(&self, target: &TargetId) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.remove(target) {
            None => false,
            Some(Slot::Live(live)) => {
                drop(slots);
                self.detach_session(&live).await;
                true
            }
            Some(Slot::Attaching { abort, settled }) => {
                abort.store(true, Ordering::SeqCst);
                slots.insert(
                    target.clone(),
                    Slot::Attaching {
                        abort: abort.clone(),
                        settled: settled.clone(),
                    },
                );
                drop(slots);
                self.await_settled(target, &abort, settled).await;
                true
            }
        }
    }

    async fn await_settled(&self, target: &TargetId, abort: &Arc<AtomicBool>, mut settled: watch::Receiver<bool>) {
        let finished = settled.wait_for(|done| *done).await.is_ok();
        if finished {
            return;
        }
        // the attaching task went away without settling; free the target
        tracing::warn!(%target, "attach abandoned");
        let mut slots = self.slots.lock().await;
        if matches!(slots.get(target), Some(Slot::Attaching { abort: a, .. }) if Arc::ptr_eq(a, abort)) {
            slots.remove(target);
        }
    }

    async fn detach_session(&self, session: &Session) {
        session.attached.store(false, Ordering::SeqCst);
        match self.host.detach(&session.target).await {
            Ok(()) => tracing::debug!(target = %session.target, "session detached"),
            Err(e) => tracing::warn!(target = %session.target, error = %e, "detach failed"),
        }
    }
}
