//! 🎛️ cfgx: settings forms in, normalized device settings out.
//!
//! A remote UI posts `{"config": {...}}`. Composite rules fold related fields into
//! single per-subsystem strings (`i2c_config`, `display_config`, ...), the generic
//! pass writes whatever is left straight through, and a `fwurl` field turns into a
//! firmware update request instead of a setting.

pub mod app_config;
pub mod document;
pub mod error;
pub mod pipeline;
pub mod rules;
pub mod store;
pub mod translate;

use anyhow::{Context, Result};
use tracing::info;

pub use app_config::{AppConfig, load_config};
pub use document::ConfigurationDocument;
pub use error::PipelineError;
pub use pipeline::{ApplyReport, Pipeline, PipelineConfig, RuleReport, UpdateHandoff};
pub use store::{PersistentStore, StoreBackend, StoreConfig};
pub use translate::UpdateTrigger;

/// 🚀 Open the store, apply one document, close the store, then hand off any update.
///
/// The store is closed even when the document fails, so whatever was written before
/// the failure still reaches durable storage.
pub async fn run(
    app_config: AppConfig,
    document_text: &str,
    handoff: &dyn UpdateHandoff,
) -> Result<ApplyReport> {
    let store = StoreBackend::from_config(&app_config.store)
        .await
        .context("💀 Could not open the settings store")?;
    let pipeline = Pipeline::from_config(&app_config.pipeline);

    let applied = pipeline.apply(&store, document_text).await;
    let closed = store.close().await;

    let report = applied.context("💀 The settings document was not applied")?;
    closed.context("💀 The settings store did not close cleanly")?;
    info!(
        "✅ Applied {} composite rules and {} generic writes",
        report.rules.len(),
        report.generic_writes
    );

    if let Some(trigger) = &report.update {
        handoff
            .hand_off(trigger)
            .await
            .with_context(|| format!("💀 Firmware update from {} could not be started", trigger.url))?;
    }
    Ok(report)
}
