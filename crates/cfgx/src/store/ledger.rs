//! 📒 The Ledger: staged writes, committed writes, and a generation counter that
//! ties them together.
//!
//! 🧠 Knowledge graph:
//! - Every write bumps `written` while holding the staging lock, and is refused there
//!   once the store is closing.
//! - The commit worker moves staging into committed while holding both locks (always
//!   staging first), so a key is never missing from both maps. It reads `written` under
//!   the same locks: "generation N committed" means every write numbered <= N is flushed.
//! - `wait_for_commit` snapshots `written` and waits on a `watch` channel until the
//!   committed generation catches up, or the timeout wins.
//!
//! `StagedStore` is the shared engine behind both the in-memory and file stores.
//! They only differ in what the worker does at flush time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_channel::{Sender, TrySendError};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use super::commit_worker::{CommitWorker, Durability};
use super::{StoreEntry, StoreError, StoreType, StoreValue};

#[derive(Debug)]
pub(crate) struct Ledger {
    pending: Mutex<BTreeMap<String, StoreEntry>>,
    committed: Mutex<BTreeMap<String, StoreEntry>>,
    written: AtomicU64,
    committed_generation: watch::Sender<u64>,
}

impl Ledger {
    pub(crate) fn new(initial: BTreeMap<String, StoreEntry>) -> Self {
        let (committed_generation, _) = watch::channel(0);
        Self {
            pending: Mutex::new(BTreeMap::new()),
            committed: Mutex::new(initial),
            written: AtomicU64::new(0),
            committed_generation,
        }
    }

    async fn stage(
        &self,
        key: &str,
        entry: StoreEntry,
        nudge: &Sender<()>,
    ) -> Result<u64, StoreError> {
        let mut pending = self.pending.lock().await;
        // -- 🔒 checked under the lock: anything staged here is seen by the final drain
        if nudge.is_closed() {
            return Err(StoreError::Closed);
        }
        pending.insert(key.to_string(), entry);
        Ok(self.written.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Moves everything staged into committed. Returns how many entries moved, the
    /// generation they cover, and the full committed view when `snapshot` is set.
    pub(crate) async fn commit_staged(&self, snapshot: bool) -> StagedBatch {
        let mut pending = self.pending.lock().await;
        let mut committed = self.committed.lock().await;
        let generation = self.written.load(Ordering::SeqCst);
        let moved = pending.len();
        committed.extend(std::mem::take(&mut *pending));
        StagedBatch {
            moved,
            generation,
            snapshot: snapshot.then(|| committed.clone()),
        }
    }

    pub(crate) fn committed_generation(&self) -> u64 {
        *self.committed_generation.borrow()
    }

    pub(crate) fn mark_committed(&self, generation: u64) {
        self.committed_generation.send_modify(|current| {
            if generation > *current {
                *current = generation;
            }
        });
    }

    async fn get(&self, key: &str) -> Option<StoreEntry> {
        // -- 👀 read-your-writes: staging shadows committed
        let pending = self.pending.lock().await;
        if let Some(entry) = pending.get(key) {
            return Some(entry.clone());
        }
        self.committed.lock().await.get(key).cloned()
    }

    async fn wait_for_commit(&self, timeout: Duration) -> bool {
        let target = self.written.load(Ordering::SeqCst);
        let mut rx = self.committed_generation.subscribe();
        if *rx.borrow() >= target {
            return true;
        }
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|generation| *generation >= target)).await,
            Ok(Ok(_))
        )
    }
}

#[derive(Debug)]
pub(crate) struct StagedBatch {
    pub(crate) moved: usize,
    pub(crate) generation: u64,
    pub(crate) snapshot: Option<BTreeMap<String, StoreEntry>>,
}

/// 🏗️ Ledger + nudge channel + worker handle. The bit both stores share.
#[derive(Debug)]
pub(crate) struct StagedStore {
    ledger: Arc<Ledger>,
    nudge: Sender<()>,
    worker: Mutex<Option<JoinHandle<Result<(), StoreError>>>>,
}

impl StagedStore {
    pub(crate) fn spawn(
        initial: BTreeMap<String, StoreEntry>,
        commit_delay: Duration,
        durability: Durability,
    ) -> Self {
        let ledger = Arc::new(Ledger::new(initial));
        // -- 📮 capacity 1: one pending nudge already means "a commit is coming"
        let (nudge, nudges) = async_channel::bounded(1);
        let worker = CommitWorker::new(ledger.clone(), nudges, commit_delay, durability).start();
        Self {
            ledger,
            nudge,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub(crate) async fn set_value_forced(
        &self,
        kind: StoreType,
        key: &str,
        value: StoreValue,
    ) -> Result<(), StoreError> {
        let entry = StoreEntry::new(key, kind, value)?;
        let generation = self.ledger.stage(key, entry, &self.nudge).await?;
        trace!("✍️ staged `{key}` as {kind} (generation {generation})");
        if let Err(TrySendError::Closed(())) = self.nudge.try_send(()) {
            // -- 🏁 staged before the close, so the final flush still picks it up
            trace!("📪 `{key}` staged just ahead of close");
        }
        Ok(())
    }

    pub(crate) async fn wait_for_commit(&self, timeout: Duration) -> bool {
        self.ledger.wait_for_commit(timeout).await
    }

    pub(crate) async fn get(&self, key: &str) -> Option<StoreEntry> {
        self.ledger.get(key).await
    }

    pub(crate) async fn close(&self) -> Result<(), StoreError> {
        self.nudge.close();
        let Some(worker) = self.worker.lock().await.take() else {
            // -- 🔁 already closed, closing twice is fine
            return Ok(());
        };
        let final_flush = worker.await.map_err(|join_err| {
            warn!("💀 commit worker did not shut down cleanly: {join_err}");
            StoreError::Io(std::io::Error::other(join_err))
        })?;
        final_flush
            .inspect_err(|err| warn!("💀 final flush failed, settings are not durable: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_staged_writes_are_readable_before_the_commit() -> anyhow::Result<()> {
        let the_store = StagedStore::spawn(
            BTreeMap::new(),
            Duration::from_secs(3600),
            Durability::Volatile,
        );
        the_store
            .set_value_forced(StoreType::Str, "host_name", "kitchen".into())
            .await?;

        let the_entry = the_store.get("host_name").await;
        assert_eq!(the_entry.map(|e| e.value), Some("kitchen".into()));
        // -- ⏳ an hour-long batching window will not settle in 20ms
        assert!(!the_store.wait_for_commit(Duration::from_millis(20)).await);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_commit_worker_settles_the_waiters() -> anyhow::Result<()> {
        let the_store =
            StagedStore::spawn(BTreeMap::new(), Duration::from_millis(5), Durability::Volatile);
        the_store
            .set_value_forced(StoreType::I32, "gpio", StoreValue::Signed(12))
            .await?;
        assert!(the_store.wait_for_commit(Duration::from_secs(5)).await);
        assert_eq!(the_store.ledger.committed_generation(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nothing_pending_means_nothing_to_wait_for() {
        let the_store =
            StagedStore::spawn(BTreeMap::new(), Duration::from_secs(3600), Durability::Volatile);
        assert!(the_store.wait_for_commit(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn the_one_where_a_closed_store_refuses_new_writes() -> anyhow::Result<()> {
        let the_store =
            StagedStore::spawn(BTreeMap::new(), Duration::from_secs(3600), Durability::Volatile);
        the_store
            .set_value_forced(StoreType::Str, "stats", "y".into())
            .await?;
        the_store.close().await?;
        // -- 🏁 close flushes: the hour-long window does not matter anymore
        assert!(the_store.wait_for_commit(Duration::from_millis(1)).await);

        let the_late_write = the_store
            .set_value_forced(StoreType::Str, "stats", "n".into())
            .await;
        assert!(matches!(the_late_write, Err(StoreError::Closed)));
        // -- 🔁 and closing again is a no-op
        the_store.close().await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn the_one_where_a_commit_in_flight_never_hides_a_write() -> anyhow::Result<()> {
        for round in 0..500 {
            let the_store =
                StagedStore::spawn(BTreeMap::new(), Duration::ZERO, Durability::Volatile);
            the_store
                .set_value_forced(StoreType::U8, "volume", StoreValue::Unsigned(round % 100))
                .await?;
            // -- 👀 the worker is moving the entry across while we look for it
            for _ in 0..8 {
                assert!(
                    the_store.get("volume").await.is_some(),
                    "round {round}: the write vanished mid-commit"
                );
                tokio::task::yield_now().await;
            }
            the_store.close().await?;
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn the_one_where_a_write_racing_close_is_either_kept_or_never_seen() -> anyhow::Result<()> {
        let the_store = Arc::new(StagedStore::spawn(
            BTreeMap::new(),
            Duration::from_millis(1),
            Durability::Volatile,
        ));
        let the_writers: Vec<_> = (0..32)
            .map(|i| {
                let store = the_store.clone();
                tokio::spawn(async move {
                    let key = format!("key{i}");
                    let outcome = store
                        .set_value_forced(StoreType::I32, &key, StoreValue::Signed(i))
                        .await;
                    (key, outcome)
                })
            })
            .collect();
        the_store.close().await?;

        for writer in the_writers {
            let (key, outcome) = writer.await?;
            match outcome {
                Ok(()) => assert!(the_store.get(&key).await.is_some(), "{key} was accepted"),
                Err(StoreError::Closed) => {
                    assert!(the_store.get(&key).await.is_none(), "{key} was refused")
                }
                Err(other) => panic!("💀 unexpected failure for {key}: {other}"),
            }
        }
        // -- 🏁 everything that was accepted made it through the final flush
        assert!(the_store.wait_for_commit(Duration::from_millis(1)).await);
        Ok(())
    }
}
