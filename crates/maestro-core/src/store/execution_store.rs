//! Execution Registry: run id → live execution record.
//!
//! Each run has exactly one writer, its own orchestration task, and any number
//! of readers polling snapshots. Finished runs are retained up to
//! `max_retained_runs` (oldest evicted first) and optionally written to
//! `<run_log_dir>/<run_id>.json`.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::OrchestratorError;
use crate::models::ExecutionRecord;

pub struct RunEntry {
    record: RwLock<ExecutionRecord>,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

impl RunEntry {
    pub async fn snapshot(&self) -> ExecutionRecord {
        self.record.read().await.clone()
    }

    pub(crate) async fn update<R>(&self, f: impl FnOnce(&mut ExecutionRecord) -> R) -> R {
        let mut record = self.record.write().await;
        f(&mut record)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel unless the record already holds a final status. Checked under
    /// the record lock, the same lock the run takes to write its final status.
    async fn request_cancel(&self) -> bool {
        let record = self.record.write().await;
        if record.status.is_terminal() {
            return false;
        }
        self.cancel.cancel();
        true
    }
}

pub struct ExecutionStore {
    runs: RwLock<HashMap<String, Arc<RunEntry>>>,
    finished: Mutex<VecDeque<String>>,
    max_retained: usize,
    log_dir: Option<PathBuf>,
}

impl ExecutionStore {
    pub fn new(max_retained: usize, log_dir: Option<PathBuf>) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            finished: Mutex::new(VecDeque::new()),
            max_retained: max_retained.max(1),
            log_dir,
        }
    }

    pub(crate) async fn insert(&self, record: ExecutionRecord) -> Arc<RunEntry> {
        let run_id = record.run_id.clone();
        let (done, _) = watch::channel(false);
        let entry = Arc::new(RunEntry {
            record: RwLock::new(record),
            cancel: CancellationToken::new(),
            done,
        });
        self.runs.write().await.insert(run_id, entry.clone());
        entry
    }

    async fn entry(&self, run_id: &str) -> Result<Arc<RunEntry>, OrchestratorError> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownRun(run_id.to_string()))
    }

    /// Current snapshot of a run. Unknown ids are the only failure.
    pub async fn get(&self, run_id: &str) -> Result<ExecutionRecord, OrchestratorError> {
        Ok(self.entry(run_id).await?.snapshot().await)
    }

    /// Snapshots of every retained run, oldest first.
    pub async fn list(&self) -> Vec<ExecutionRecord> {
        let entries: Vec<Arc<RunEntry>> = self.runs.read().await.values().cloned().collect();
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            records.push(entry.snapshot().await);
        }
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        records
    }

    /// Request cancellation. Returns `false` if the run had already settled on
    /// its final status.
    pub async fn cancel(&self, run_id: &str) -> Result<bool, OrchestratorError> {
        let entry = self.entry(run_id).await?;
        if !entry.request_cancel().await {
            return Ok(false);
        }
        tracing::info!("[ExecutionStore] Cancelling run {}", run_id);
        Ok(true)
    }

    /// Resolve once the run has left `running`.
    pub async fn wait(&self, run_id: &str) -> Result<ExecutionRecord, OrchestratorError> {
        let entry = self.entry(run_id).await?;
        let mut done = entry.done.subscribe();
        // the sender lives in `entry`, so this only ends once `done` is true
        let _ = done.wait_for(|d| *d).await;
        Ok(entry.snapshot().await)
    }

    /// Mark a run finished: wake waiters, persist, evict old runs.
    pub(crate) async fn finish(&self, entry: &RunEntry) {
        let record = entry.snapshot().await;
        entry.done.send_replace(true);

        if let Some(dir) = &self.log_dir {
            if let Err(e) = write_log(dir, &record).await {
                tracing::warn!(
                    "[ExecutionStore] Failed to write log for run {}: {}",
                    record.run_id,
                    e
                );
            }
        }

        let evicted: Vec<String> = {
            let mut finished = self.finished.lock().await;
            finished.push_back(record.run_id.clone());
            let excess = finished.len().saturating_sub(self.max_retained);
            finished.drain(..excess).collect()
        };
        if !evicted.is_empty() {
            let mut runs = self.runs.write().await;
            for run_id in &evicted {
                runs.remove(run_id);
            }
            tracing::debug!("[ExecutionStore] Evicted {} finished runs", evicted.len());
        }
    }
}

async fn write_log(dir: &Path, record: &ExecutionRecord) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let json = serde_json::to_vec_pretty(record)?;
    tokio::fs::write(dir.join(format!("{}.json", record.run_id)), json).await
}
