//! 🎬 *[writes pile up in the staging map. somewhere, a timer ticks.]*
//!
//! 🗑️ The CommitWorker: it gets nudged, it naps for `commit_delay`, it drains everything
//! that was staged in the meantime and flushes it in one go. Then it tells anyone waiting
//! in `wait_for_commit` that their generation made it.
//!
//! It does not know who wrote what. It does not care. It only commits.
//! When the nudge channel closes it does one last flush and clocks out, handing the
//! result of that flush to whoever closed the store. 🦆

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use super::ledger::Ledger;
use super::{StoreEntry, StoreError};

/// 💾 What "flush" means for a given backend.
#[derive(Debug, Clone)]
pub(crate) enum Durability {
    /// RAM only. Committing just means "moved out of staging".
    Volatile,
    /// Rewrite the JSON snapshot at this path on every commit.
    Snapshot(PathBuf),
}

#[derive(Debug)]
pub(crate) struct CommitWorker {
    ledger: Arc<Ledger>,
    nudges: Receiver<()>,
    delay: Duration,
    durability: Durability,
}

impl CommitWorker {
    pub(crate) fn new(
        ledger: Arc<Ledger>,
        nudges: Receiver<()>,
        delay: Duration,
        durability: Durability,
    ) -> Self {
        Self {
            ledger,
            nudges,
            delay,
            durability,
        }
    }

    pub(crate) fn start(self) -> JoinHandle<Result<(), StoreError>> {
        tokio::spawn(async move {
            debug!("⏲️ CommitWorker started, batching window {:?}", self.delay);
            loop {
                match self.nudges.recv().await {
                    Ok(()) => {
                        // -- 😴 let the rest of the form land before we touch the disk
                        self.nap().await;
                        // -- 💀 the waiters time out and the caller warns; the next commit retries the snapshot
                        if let Err(err) = self.commit_once().await {
                            error!("💀 commit failed: {err}");
                        }
                    }
                    Err(_) => {
                        debug!("🏁 CommitWorker: nudge channel closed, final flush");
                        return self.commit_once().await;
                    }
                }
            }
        })
    }

    /// Sleeps out the batching window. Nudges arriving meanwhile are absorbed (their
    /// writes are already staged); a closed channel ends the nap early.
    async fn nap(&self) {
        let window = tokio::time::sleep(self.delay);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => return,
                nudge = self.nudges.recv() => {
                    if nudge.is_err() {
                        debug!("🔔 close requested mid-window, committing early");
                        return;
                    }
                }
            }
        }
    }

    /// Moves staging into committed, then makes it durable. A generation that failed
    /// to flush stays unmarked, so the next call rewrites the snapshot again.
    async fn commit_once(&self) -> Result<(), StoreError> {
        let wants_snapshot = matches!(self.durability, Durability::Snapshot(_));
        let batch = self.ledger.commit_staged(wants_snapshot).await;
        if batch.moved == 0 && batch.generation <= self.ledger.committed_generation() {
            trace!("🫥 nothing staged, nothing to commit");
            return Ok(());
        }
        self.flush(batch.snapshot.as_ref()).await?;
        debug!(
            "✅ committed {} entries (generation {})",
            batch.moved, batch.generation
        );
        self.ledger.mark_committed(batch.generation);
        Ok(())
    }

    async fn flush(
        &self,
        snapshot: Option<&BTreeMap<String, StoreEntry>>,
    ) -> Result<(), StoreError> {
        match (&self.durability, snapshot) {
            (Durability::Volatile, _) | (Durability::Snapshot(_), None) => Ok(()),
            (Durability::Snapshot(path), Some(snapshot)) => {
                let rendered = serde_json::to_vec_pretty(snapshot)?;
                // -- 📝 write-then-rename: whatever is at `path` is always a whole snapshot
                let staging_path = path.with_extension("json.tmp");
                tokio::fs::write(&staging_path, rendered).await?;
                tokio::fs::rename(&staging_path, path).await?;
                Ok(())
            }
        }
    }
}
