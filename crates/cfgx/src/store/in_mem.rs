//! # Previously, on cfgx...
//!
//! 🎬 The settings were normalized. They needed somewhere to go. Somewhere quick.
//! Somewhere that forgets everything the moment the process exits.
//!
//! `InMemoryStore` is that somewhere: the [`PersistentStore`] for tests and dry runs.
//! It still has a real commit worker behind it, so `wait_for_commit` behaves exactly
//! like it does against the file store. Only the "flush" is imaginary. 🦆
//!
//! ✅ No disk I/O. No heartbeat. Just vibes and heap memory.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use super::commit_worker::Durability;
use super::ledger::StagedStore;
use super::{PersistentStore, StoreEntry, StoreError, StoreType, StoreValue, default_commit_delay_ms};

/// 🔧 Knobs for the in-memory store. There is exactly one knob.
#[derive(Debug, Deserialize, Clone)]
pub struct InMemoryStoreConfig {
    #[serde(default = "default_commit_delay_ms")]
    pub commit_delay_ms: u64,
}

impl Default for InMemoryStoreConfig {
    fn default() -> Self {
        Self {
            commit_delay_ms: default_commit_delay_ms(),
        }
    }
}

/// 📦 A store that never forgets. Until the process exits. Then it forgets everything.
#[derive(Debug)]
pub struct InMemoryStore {
    staged: StagedStore,
}

impl InMemoryStore {
    /// 🚀 Spins up the store and its commit worker. Needs a tokio runtime.
    pub async fn new(config: InMemoryStoreConfig) -> Result<Self> {
        Ok(Self {
            staged: StagedStore::spawn(
                BTreeMap::new(),
                Duration::from_millis(config.commit_delay_ms),
                Durability::Volatile,
            ),
        })
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn set_value_forced(
        &self,
        kind: StoreType,
        key: &str,
        value: StoreValue,
    ) -> Result<(), StoreError> {
        self.staged.set_value_forced(kind, key, value).await
    }

    async fn wait_for_commit(&self, timeout: Duration) -> bool {
        self.staged.wait_for_commit(timeout).await
    }

    async fn get(&self, key: &str) -> Option<StoreEntry> {
        self.staged.get(key).await
    }

    /// 🗑️ Nothing to release but the worker. It leaves quietly.
    async fn close(&self) -> Result<(), StoreError> {
        self.staged.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_the_last_forced_write_wins() -> Result<()> {
        let the_store = InMemoryStore::new(InMemoryStoreConfig { commit_delay_ms: 1 }).await?;
        the_store
            .set_value_forced(StoreType::Str, "loudness", "5".into())
            .await?;
        the_store
            .set_value_forced(StoreType::Str, "loudness", "9".into())
            .await?;
        assert!(the_store.wait_for_commit(Duration::from_secs(5)).await);

        let the_survivor = the_store.get("loudness").await;
        assert_eq!(the_survivor.map(|e| e.value), Some(StoreValue::from("9")));
        the_store.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_type_checks_happen_at_the_door() -> Result<()> {
        let the_store = InMemoryStore::new(InMemoryStoreConfig::default()).await?;
        let the_bouncer_says_no = the_store
            .set_value_forced(StoreType::U8, "volume", StoreValue::Signed(1000))
            .await;
        assert!(matches!(the_bouncer_says_no, Err(StoreError::Rejected { .. })));
        assert!(the_store.get("volume").await.is_none());
        Ok(())
    }
}
