//! 📁 FileStore: the in-memory store's responsible older sibling who writes things down.
//!
//! Every commit rewrites a JSON snapshot of the whole store. On open, an existing
//! snapshot is loaded back in, so settings survive a restart of the CLI.
//!
//! ⚠️ The snapshot layout is ours, not a contract. Something like:
//!
//! ```json
//! { "i2c_config": { "type": "string", "value": "scl=22,sda=21" } }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::commit_worker::Durability;
use super::ledger::StagedStore;
use super::{PersistentStore, StoreEntry, StoreError, StoreType, StoreValue, default_commit_delay_ms};

// -- 🚰 FileStoreConfig lives next to FileStore. One backend = one config = one file.
#[derive(Debug, Deserialize, Clone)]
pub struct FileStoreConfig {
    pub path: PathBuf,
    #[serde(default = "default_commit_delay_ms")]
    pub commit_delay_ms: u64,
}

#[derive(Debug)]
pub struct FileStore {
    staged: StagedStore,
}

impl FileStore {
    /// 🚀 Loads the snapshot if there is one, starts the commit worker either way.
    pub async fn open(config: FileStoreConfig) -> Result<Self> {
        let initial = match tokio::fs::read(&config.path).await {
            Ok(bytes) => serde_json::from_slice::<BTreeMap<String, StoreEntry>>(&bytes)
                .with_context(|| {
                    format!(
                        "💀 The store snapshot '{}' exists but is not a snapshot we wrote. \
                         Either it was edited by hand or it was never ours. Move it aside and retry.",
                        config.path.display()
                    )
                })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "💀 Could not read the store snapshot '{}'",
                        config.path.display()
                    )
                });
            }
        };
        info!(
            "📂 Opened file store '{}' with {} existing entries",
            config.path.display(),
            initial.len()
        );

        Ok(Self {
            staged: StagedStore::spawn(
                initial,
                Duration::from_millis(config.commit_delay_ms),
                Durability::Snapshot(config.path),
            ),
        })
    }
}

#[async_trait]
impl PersistentStore for FileStore {
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

    /// 🗑️ Final snapshot, then the worker goes home. Call this. Always.
    async fn close(&self) -> Result<(), StoreError> {
        self.staged.close().await
    }
}
