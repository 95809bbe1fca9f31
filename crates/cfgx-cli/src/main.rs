//! 🚀 cfgx-cli: apply one settings document from disk, print what happened.
//!
//! 🎬 *[narrator voice]* "It all started with a JSON file and a vague sense of dread..."
//! Thin wrapper: logging, args, config, run, table. The library does the real work. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use cfgx::{ApplyReport, UpdateHandoff, UpdateTrigger};

/// 🎛️ Normalize a settings form into device settings.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// The document to apply: `{"config": {...}}`.
    document: PathBuf,

    /// TOML configuration. Without it, only `CFGX_*` environment variables are read.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pretend the updater is already running, so an update starts in place.
    #[arg(long)]
    recovery: bool,
}

/// 📣 Logs what a real updater would do. Downloading and flashing is someone else's job.
struct LoggingHandoff {
    recovery_running: bool,
}

#[async_trait]
impl UpdateHandoff for LoggingHandoff {
    async fn hand_off(&self, trigger: &UpdateTrigger) -> Result<()> {
        if self.recovery_running {
            warn!("🚀 Starting process OTA for url {}", trigger.url);
        } else {
            warn!("🔁 Restarting system to process OTA for url {}", trigger.url);
        }
        Ok(())
    }
}

fn summary(report: &ApplyReport) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["", "result"]);
    for rule in &report.rules {
        table.add_row(vec![
            format!("rule {}", rule.subsystem),
            format!("{} fields claimed, {} writes", rule.claimed, rule.writes),
        ]);
    }
    table.add_row(vec!["generic writes".to_string(), report.generic_writes.to_string()]);
    table.add_row(vec!["keys written".to_string(), report.written_keys.join(", ")]);
    table.add_row(vec![
        "commit".to_string(),
        if report.committed { "settled" } else { "timed out (still pending)" }.to_string(),
    ]);
    if let Some(update) = &report.update {
        table.add_row(vec!["firmware update".to_string(), update.url.clone()]);
    }
    table
}

async fn apply(args: Args) -> Result<ApplyReport> {
    let app_config = cfgx::load_config(args.config.as_deref())
        .context("💀 In cfgx-cli, we couldn't load the config file. Check the table names and the TOML syntax.")?;
    let document = tokio::fs::read_to_string(&args.document)
        .await
        .with_context(|| {
            format!(
                "💀 Could not read the settings document '{}'. Relative paths are resolved from the current directory.",
                args.document.display()
            )
        })?;
    let handoff = LoggingHandoff {
        recovery_running: args.recovery,
    };
    cfgx::run(app_config, &document, &handoff).await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match apply(args).await {
        Ok(report) => {
            println!("{}", summary(&report));
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion, one cause at a time
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
            }
            std::process::exit(1);
        }
    }
}
