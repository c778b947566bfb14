// storage module for agent run history using SQLite
// screenshots are stripped before saving, the history is kept for replay/inspection

use crate::agent::TaskReport;
use crate::api::{Content, Part};
use crate::cdp::TargetId;
use rusqlite::{params, Connection, Result as SqlResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("db error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to create db dir: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock error: {0}")]
    Lock(String),
}

/// run metadata for listing without loading the history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub id: String,
    pub target: String,
    pub goal: String,
    pub outcome: String,
    pub steps: u32,
    pub summary: String,
    pub started_at: i64,
    pub finished_at: i64,
}

/// full run with the conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub target: String,
    pub goal: String,
    /// "completed", "halted", "step_limit", "cancelled" or "error"
    pub outcome: String,
    pub steps: u32,
    pub summary: String,
    pub history: Vec<Content>,
    pub started_at: i64,
    pub finished_at: i64,
}

impl RunRecord {
    pub fn new(target: &TargetId, goal: &str, started_at: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target: target.to_string(),
            goal: goal.to_string(),
            outcome: String::new(),
            steps: 0,
            summary: String::new(),
            history: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    pub fn finish(mut self, report: &TaskReport) -> Self {
        self.outcome = report.outcome.as_str().to_string();
        self.steps = report.steps;
        self.summary.clone_from(&report.summary);
        self.history = strip_images(&report.history);
        self.finished_at = timestamp();
        self
    }

    pub fn fail(mut self, error: &str) -> Self {
        self.outcome = "error".to_string();
        self.summary = error.to_string();
        self.finished_at = timestamp();
        self
    }

    pub fn to_meta(&self) -> RunMeta {
        RunMeta {
            id: self.id.clone(),
            target: self.target.clone(),
            goal: self.goal.clone(),
            outcome: self.outcome.clone(),
            steps: self.steps,
            summary: self.summary.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// drop inline image payloads, they dwarf everything else in the history
pub fn strip_images(history: &[Content]) -> Vec<Content> {
    history
        .iter()
        .map(|content| {
            let parts = content
                .parts
                .iter()
                .filter(|p| !matches!(p, Part::InlineData { .. }))
                .cloned()
                .map(|part| match part {
                    Part::FunctionResponse { mut function_response } => {
                        function_response.parts.clear();
                        Part::FunctionResponse { function_response }
                    }
                    other => other,
                })
                .collect();
            Content {
                role: content.role.clone(),
                parts,
            }
        })
        .collect()
}

pub fn timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pagepilot")
        .join("runs.db")
}

pub struct RunStore {
    conn: Mutex<Connection>,
}

impl RunStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::debug!(path = %path.display(), "opening run store");
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                target TEXT NOT NULL,
                goal TEXT NOT NULL,
                outcome TEXT NOT NULL,
                steps INTEGER NOT NULL DEFAULT 0,
                summary TEXT NOT NULL,
                history_json TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at DESC);
            ",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn with_db<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> SqlResult<T>,
    {
        let guard = self.conn.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
        Ok(f(&guard)?)
    }

    /// save/update a run
    pub fn record(&self, run: &RunRecord) -> Result<(), StoreError> {
        let history_json = serde_json::to_string(&strip_images(&run.history))?;

        self.with_db(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO runs
                 (id, target, goal, outcome, steps, summary, history_json, started_at, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    run.id,
                    run.target,
                    run.goal,
                    run.outcome,
                    run.steps,
                    run.summary,
                    history_json,
                    run.started_at,
                    run.finished_at,
                ],
            )?;
            Ok(())
        })?;

        tracing::debug!(id = %run.id, outcome = %run.outcome, "saved run");
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Option<RunRecord>, StoreError> {
        let row = self.with_db(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, target, goal, outcome, steps, summary, history_json, started_at, finished_at
                 FROM runs WHERE id = ?1",
            )?;

            let result = stmt.query_row(params![id], |row| {
                let history_json: String = row.get(6)?;
                Ok((
                    RunRecord {
                        id: row.get(0)?,
                        target: row.get(1)?,
                        goal: row.get(2)?,
                        outcome: row.get(3)?,
                        steps: row.get(4)?,
                        summary: row.get(5)?,
                        history: Vec::new(),
                        started_at: row.get(7)?,
                        finished_at: row.get(8)?,
                    },
                    history_json,
                ))
            });

            match result {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })?;

        match row {
            Some((mut run, history_json)) => {
                run.history = serde_json::from_str(&history_json)?;
                Ok(Some(run))
            }
            None => Ok(None),
        }
    }

    /// list runs by recency
    pub fn list(&self, limit: usize, offset: usize) -> Result<Vec<RunMeta>, StoreError> {
        self.with_db(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, target, goal, outcome, steps, summary, started_at, finished_at
                 FROM runs ORDER BY started_at DESC, rowid DESC LIMIT ?1 OFFSET ?2",
            )?;

            let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
                Ok(RunMeta {
                    id: row.get(0)?,
                    target: row.get(1)?,
                    goal: row.get(2)?,
                    outcome: row.get(3)?,
                    steps: row.get(4)?,
                    summary: row.get(5)?,
                    started_at: row.get(6)?,
                    finished_at: row.get(7)?,
                })
            })?;

            rows.collect::<Result<Vec<_>, _>>()
        })
    }

    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let deleted = self.with_db(|conn| conn.execute("DELETE FROM runs WHERE id = ?1", params![id]))?;
        tracing::debug!(id, deleted, "deleted run");
        Ok(deleted > 0)
    }

    pub fn count(&self) -> Result<u32, StoreError> {
        self.with_db(|conn| {
            let mut stmt = conn.prepare("SELECT COUNT(*) FROM runs")?;
            stmt.query_row([], |row| {
                let count: i64 = row.get(0)?;
                Ok(count as u32)
            })
        })
    }
}
