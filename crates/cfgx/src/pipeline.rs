//! 🚂 Pipeline: one settings form in, a handful of store writes out.
//!
//! ```text
//!   Parse ──▶ RunComposites ──▶ RunGeneric ──▶ AwaitCommit ──▶ Respond
//!     │             │                │               │
//!     💀 nothing    💀 partial       💀 partial      ⏳ timeout is a warning,
//!     written       writes stay      writes stay        not a failure
//! ```
//!
//! Each request is processed start to finish on the calling task. There is no
//! cancellation and no rollback: a failure halfway through leaves the earlier writes
//! in the store, and the caller is told the request failed. The tests pin that down.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::document::ConfigurationDocument;
use crate::error::PipelineError;
use crate::rules::RuleSet;
use crate::store::{PersistentStore, StoreType, StoreValue};
use crate::translate::{GenericTranslator, TableRemap, UpdateTrigger};

// -- 🔧 PipelineConfig lives next to the pipeline, same as every store config lives next to its store.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// ⏳ How long AwaitCommit waits before shrugging.
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,
    /// 📏 Documents bigger than this are rejected before parsing.
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
    /// 🗺️ `legacy_key = "store_key"` renames for the generic pass.
    #[serde(default)]
    pub key_remaps: HashMap<String, String>,
}

fn default_commit_timeout_ms() -> u64 {
    2000
}

fn default_max_document_bytes() -> usize {
    16 * 1024
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            commit_timeout_ms: default_commit_timeout_ms(),
            max_document_bytes: default_max_document_bytes(),
            key_remaps: HashMap::new(),
        }
    }
}

/// 🧾 One matched rule, for the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleReport {
    pub subsystem: &'static str,
    pub claimed: usize,
    pub writes: usize,
}

/// 📊 Everything a caller might want to know after a successful apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub rules: Vec<RuleReport>,
    pub generic_writes: usize,
    /// Every store key written, composites first, in write order.
    pub written_keys: Vec<String>,
    /// `false` when AwaitCommit timed out. The writes still happened.
    pub committed: bool,
    pub update: Option<UpdateTrigger>,
}

/// 🚀 Whoever actually downloads and flashes firmware.
#[async_trait]
pub trait UpdateHandoff: Send + Sync {
    async fn hand_off(&self, trigger: &UpdateTrigger) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub struct Pipeline {
    rules: RuleSet,
    translator: GenericTranslator,
    commit_timeout: Duration,
    max_document_bytes: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl Pipeline {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let translator = if config.key_remaps.is_empty() {
            GenericTranslator::default()
        } else {
            GenericTranslator::new(Box::new(TableRemap::new(config.key_remaps.clone())))
        };
        Self {
            rules: RuleSet::standard(),
            translator,
            commit_timeout: Duration::from_millis(config.commit_timeout_ms),
            max_document_bytes: config.max_document_bytes,
        }
    }

    /// 🚂 Apply one document to `store`.
    pub async fn apply<S>(&self, store: &S, text: &str) -> Result<ApplyReport, PipelineError>
    where
        S: PersistentStore + ?Sized,
    {
        // -- Parse
        let mut doc = ConfigurationDocument::parse(text, self.max_document_bytes)?;
        let mut report = ApplyReport::default();

        // -- RunComposites
        info!("🧩 Processing complex configurations...");
        for outcome in self.rules.apply(&mut doc) {
            for write in &outcome.writes {
                store
                    .set_value_forced(StoreType::Str, &write.key, StoreValue::from(write.value.as_str()))
                    .await
                    .map_err(|source| PipelineError::StoreWriteFailure {
                        field: outcome.subsystem.to_string(),
                        key: write.key.to_string(),
                        source,
                    })?;
                report.written_keys.push(write.key.to_string());
            }
            report.rules.push(RuleReport {
                subsystem: outcome.subsystem,
                claimed: outcome.claimed,
                writes: outcome.writes.len(),
            });
        }

        // -- RunGeneric
        let generic = self.translator.translate(&mut doc, store).await?;
        report.generic_writes = generic.written.len();
        report.written_keys.extend(generic.written);
        report.update = generic.update;

        // -- AwaitCommit
        info!("⏳ Waiting for config commit...");
        report.committed = store.wait_for_commit(self.commit_timeout).await;
        if report.committed {
            info!("✅ Config committed successfully");
        } else {
            warn!(
                "⏰ Timeout waiting for config commit after {:?}, the writes are still pending",
                self.commit_timeout
            );
        }

        // -- Respond
        Ok(report)
    }
}
