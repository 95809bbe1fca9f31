//! 🔧 App Configuration: TOML and env vars in, one `AppConfig` out.
//!
//! 📡 "Where does the store live?" "How long do we wait for a commit?" "Which legacy
//! keys need renaming?" All answered here, or defaulted here. 🦆

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::pipeline::PipelineConfig;
use crate::store::StoreConfig;

/// 📦 Everything `cfgx::run` needs to know before it sees a document.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// 🚀 Merge `CFGX_*` environment variables with an optional TOML file.
///
/// - `None` → env vars only. No implicit `cfgx.toml`.
/// - `Some(path)` → env vars + TOML, merged. TOML wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("CFGX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (CFGX_*). \
             Check the table names: it's [store.File] / [store.InMemory] and [pipeline].",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (CFGX_*). \
                 No file was provided, so this one is all on the environment."
            .to_string(),
    };
    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> anyhow::Result<tempfile::NamedTempFile> {
        let mut the_file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        the_file.write_all(contents.as_bytes())?;
        Ok(the_file)
    }

    #[test]
    fn the_one_where_a_file_store_and_remaps_come_from_toml() -> anyhow::Result<()> {
        let the_file = write_test_config(
            r#"
            [store.File]
            path = "/data/settings.json"
            commit_delay_ms = 50

            [pipeline]
            commit_timeout_ms = 500

            [pipeline.key_remaps]
            bt_sink = "a2dp_sink_name"
            "#,
        )?;

        let the_config = load_config(Some(the_file.path()))?;

        match &the_config.store {
            StoreConfig::File(file) => {
                assert_eq!(file.path, Path::new("/data/settings.json"));
                assert_eq!(file.commit_delay_ms, 50);
            }
            honestly_who_knows => panic!("💀 expected a File store, got {honestly_who_knows:?}"),
        }
        assert_eq!(the_config.pipeline.commit_timeout_ms, 500);
        assert_eq!(the_config.pipeline.max_document_bytes, 16 * 1024);
        assert_eq!(
            the_config.pipeline.key_remaps.get("bt_sink").map(String::as_str),
            Some("a2dp_sink_name")
        );
        Ok(())
    }

    #[test]
    fn the_one_where_an_empty_file_means_all_defaults() -> anyhow::Result<()> {
        let the_file = write_test_config("")?;
        let the_config = load_config(Some(the_file.path()))?;

        match the_config.store {
            StoreConfig::InMemory(mem) => assert_eq!(mem.commit_delay_ms, 250),
            honestly_who_knows => panic!("💀 expected the in-memory default, got {honestly_who_knows:?}"),
        }
        assert_eq!(the_config.pipeline.commit_timeout_ms, 2000);
        assert!(the_config.pipeline.key_remaps.is_empty());
        Ok(())
    }

    #[test]
    fn the_one_where_a_store_without_a_path_is_refused() -> anyhow::Result<()> {
        let the_file = write_test_config(
            r#"
            [store.File]
            commit_delay_ms = 50
            "#,
        )?;
        assert!(load_config(Some(the_file.path())).is_err());
        Ok(())
    }
}
