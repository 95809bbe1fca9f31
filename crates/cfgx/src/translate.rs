//! 🔁 Generic translation: everything no composite rule wanted, written straight through.
//!
//! Walks the unconsumed fields in document order. Each one gets a store type, an
//! optional rename, and a forced write. One field, `fwurl`, is not a setting at all:
//! it's a request to go fetch new firmware, so it becomes an [`UpdateTrigger`]
//! instead of a store entry.
//!
//! Unlike the composite rules, this pass is strict. A field with no value, or a
//! value with no sensible type, fails the whole request. The first failure stops
//! the walk. Whatever was already written stays written.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::document::{CellValue, ConfigurationDocument, Field, FieldCell, Scalar, render_integer};
use crate::error::PipelineError;
use crate::store::{PersistentStore, StoreType, StoreValue};

/// 🔒 The firmware-source field. Intercepted, never stored.
pub const RESERVED_UPDATE_KEY: &str = "fwurl";

/// 🚀 "Go flash the firmware at this URL." Handed to whoever owns updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTrigger {
    pub url: String,
}

// ===== Remapping =====

/// 🗺️ Rename a legacy form key before it hits the store.
///
/// Only string-typed values are offered for remapping.
pub trait KeyRemap: std::fmt::Debug + Send + Sync {
    /// `Some((key, value))` to rewrite the write, `None` to leave it alone.
    fn remap(&self, key: &str, value: &str) -> Option<(String, String)>;
}

/// The default: every key is already the right key.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemap;

impl KeyRemap for NoRemap {
    fn remap(&self, _key: &str, _value: &str) -> Option<(String, String)> {
        None
    }
}

/// 📋 `legacy_key -> store_key` renames from configuration. Values pass through.
#[derive(Debug, Default, Clone)]
pub struct TableRemap {
    renames: HashMap<String, String>,
}

impl TableRemap {
    pub fn new(renames: HashMap<String, String>) -> Self {
        Self { renames }
    }
}

impl KeyRemap for TableRemap {
    fn remap(&self, key: &str, value: &str) -> Option<(String, String)> {
        self.renames
            .get(key)
            .map(|store_key| (store_key.clone(), value.to_string()))
    }
}

// ===== Type resolution =====

fn fits(kind: StoreType, n: i128) -> bool {
    kind.integer_bounds()
        .is_some_and(|(lo, hi)| n >= lo && n <= hi)
}

fn to_store_integer(n: i128) -> StoreValue {
    match i64::try_from(n) {
        Ok(signed) => StoreValue::Signed(signed),
        // -- only u64 values above i64::MAX land here, and they were range-checked
        Err(_) => StoreValue::Unsigned(n as u64),
    }
}

/// 🔬 Decide what type a field is stored as, and produce the value to store.
pub(crate) fn resolve(field: &Field) -> Result<(StoreType, StoreValue), PipelineError> {
    let name = field.name.as_str();
    let scalar = match field.cell.value() {
        CellValue::Scalar(scalar) => scalar,
        CellValue::Missing => {
            return Err(PipelineError::MissingFieldValue {
                field: name.to_string(),
            });
        }
        CellValue::Unsupported(kind) => {
            return Err(PipelineError::ambiguous(name, format!("a {kind} is neither text nor a number")));
        }
    };

    let tagged = match &field.cell {
        FieldCell::Wrapped { tag: Some(tag), .. } => {
            let code = tag
                .as_ref()
                .map_err(|kind| PipelineError::ambiguous(name, format!("type tag is a {kind}, not a type code")))?;
            Some(
                StoreType::from_code(*code)
                    .ok_or_else(|| PipelineError::ambiguous(name, format!("unsupported type code {code:#04x}")))?,
            )
        }
        _ => None,
    };

    match (tagged, scalar) {
        (Some(StoreType::Str), Scalar::Text(text)) => Ok((StoreType::Str, text.clone().into())),
        (Some(StoreType::Str), Scalar::Number(n)) => Ok((StoreType::Str, render_integer(n).into())),
        (Some(kind), scalar) => {
            let n = match scalar {
                Scalar::Number(n) => n
                    .as_i64()
                    .map(i128::from)
                    .or_else(|| n.as_u64().map(i128::from))
                    .ok_or_else(|| PipelineError::ambiguous(name, format!("{n} is not an integer")))?,
                Scalar::Text(text) => text
                    .trim()
                    .parse::<i128>()
                    .map_err(|_| PipelineError::ambiguous(name, format!("`{text}` is not an integer")))?,
            };
            if !fits(kind, n) {
                return Err(PipelineError::ambiguous(name, format!("{n} does not fit in {kind}")));
            }
            Ok((kind, to_store_integer(n)))
        }
        (None, Scalar::Text(text)) => Ok((StoreType::Str, text.clone().into())),
        (None, Scalar::Number(n)) => {
            if let Some(signed) = n.as_i64() {
                let kind = if fits(StoreType::I32, i128::from(signed)) {
                    StoreType::I32
                } else {
                    StoreType::I64
                };
                Ok((kind, StoreValue::Signed(signed)))
            } else if let Some(unsigned) = n.as_u64() {
                Ok((StoreType::U64, StoreValue::Unsigned(unsigned)))
            } else {
                Err(PipelineError::ambiguous(name, format!("{n} is not an integer")))
            }
        }
    }
}

// ===== Translator =====

/// 📊 What the generic pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericReport {
    /// Store keys written, in order (after remapping).
    pub written: Vec<String>,
    pub update: Option<UpdateTrigger>,
}

/// 🧹 The residual pass.
#[derive(Debug)]
pub struct GenericTranslator {
    remap: Box<dyn KeyRemap>,
}

impl Default for GenericTranslator {
    fn default() -> Self {
        Self::new(Box::new(NoRemap))
    }
}

impl GenericTranslator {
    pub fn new(remap: Box<dyn KeyRemap>) -> Self {
        Self { remap }
    }

    /// 🚶 One pass over the unconsumed fields. Stops at the first error.
    pub async fn translate<S>(
        &self,
        doc: &mut ConfigurationDocument,
        store: &S,
    ) -> Result<GenericReport, PipelineError>
    where
        S: PersistentStore + ?Sized,
    {
        let mut report = GenericReport::default();

        for index in 0..doc.fields().len() {
            let field = &doc.fields()[index];
            if field.is_consumed() {
                debug!("⏭️ Skipping already processed key: {}", field.name);
                continue;
            }
            let (kind, value) = resolve(field)?;
            let name = field.name.clone();

            if name == RESERVED_UPDATE_KEY {
                let StoreValue::Str(url) = value else {
                    return Err(PipelineError::ReservedKeyTypeMismatch { field: name, found: kind });
                };
                warn!("🚀 Found firmware update request for {url}");
                report.update = Some(UpdateTrigger { url });
                doc.consume_at(index);
                continue;
            }

            let remapped = value.as_str().and_then(|s| self.remap.remap(&name, s));
            let (key, value) = match remapped {
                Some((key, remapped)) => {
                    debug!("🗺️ Remapped {name} -> {key}");
                    (key, StoreValue::Str(remapped))
                }
                None => (name.clone(), value),
            };

            info!("✍️ Setting config value [{key}] = [{value}] as {kind}");
            store
                .set_value_forced(kind, &key, value)
                .await
                .map_err(|source| PipelineError::StoreWriteFailure {
                    field: name.clone(),
                    key: key.clone(),
                    source,
                })?;
            doc.consume_at(index);
            report.written.push(key);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, InMemoryStoreConfig};
    use serde_json::{Value, json};

    fn doc(config: Value) -> ConfigurationDocument {
        match config {
            Value::Object(map) => ConfigurationDocument::from_map(map),
            _ => panic!("💀 test fixture must be an object"),
        }
    }

    fn resolved(config: Value) -> Result<(StoreType, StoreValue), PipelineError> {
        let the_doc = doc(config);
        resolve(&the_doc.fields()[0])
    }

    async fn store() -> anyhow::Result<InMemoryStore> {
        InMemoryStore::new(InMemoryStoreConfig { commit_delay_ms: 1 }).await
    }

    #[test]
    fn the_one_where_untagged_values_pick_the_obvious_type() -> Result<(), PipelineError> {
        assert_eq!(resolved(json!({"x": "hi"}))?, (StoreType::Str, "hi".into()));
        assert_eq!(resolved(json!({"x": 42}))?, (StoreType::I32, StoreValue::Signed(42)));
        assert_eq!(
            resolved(json!({"x": 5_000_000_000_i64}))?,
            (StoreType::I64, StoreValue::Signed(5_000_000_000))
        );
        assert!(matches!(
            resolved(json!({"x": 1.5})),
            Err(PipelineError::AmbiguousType { .. })
        ));
        Ok(())
    }

    #[test]
    fn the_one_where_type_tags_are_obeyed_and_range_checked() -> Result<(), PipelineError> {
        assert_eq!(
            resolved(json!({"x": {"value": "200", "type": 0x01}}))?,
            (StoreType::U8, StoreValue::Signed(200))
        );
        assert_eq!(
            resolved(json!({"x": {"value": 7, "type": 0x21}}))?,
            (StoreType::Str, "7".into())
        );
        assert!(matches!(
            resolved(json!({"x": {"value": 300, "type": 0x01}})),
            Err(PipelineError::AmbiguousType { .. })
        ));
        assert!(matches!(
            resolved(json!({"x": {"value": "loud", "type": 0x14}})),
            Err(PipelineError::AmbiguousType { .. })
        ));
        assert!(matches!(
            resolved(json!({"x": {"value": "blob", "type": 0x42}})),
            Err(PipelineError::AmbiguousType { .. })
        ));
        Ok(())
    }

    #[test]
    fn the_one_where_nothing_is_not_a_value() {
        assert!(matches!(
            resolved(json!({"x": null})),
            Err(PipelineError::MissingFieldValue { .. })
        ));
        assert!(matches!(
            resolved(json!({"x": {"type": 33}})),
            Err(PipelineError::MissingFieldValue { .. })
        ));
        assert!(matches!(
            resolved(json!({"x": true})),
            Err(PipelineError::AmbiguousType { .. })
        ));
    }

    #[tokio::test]
    async fn the_one_where_leftovers_are_written_verbatim() -> anyhow::Result<()> {
        let the_store = store().await?;
        let mut the_doc = doc(json!({"autoexec": "1", "volume": 80}));
        the_doc.consume("autoexec");

        let the_report = GenericTranslator::default()
            .translate(&mut the_doc, &the_store)
            .await?;

        assert_eq!(the_report.written, vec!["volume".to_string()]);
        assert!(the_store.get("autoexec").await.is_none());
        let the_volume = the_store.get("volume").await.map(|e| (e.kind, e.value));
        assert_eq!(the_volume, Some((StoreType::I32, StoreValue::Signed(80))));
        assert_eq!(the_doc.unconsumed().count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_firmware_url_is_a_trigger_not_a_setting() -> anyhow::Result<()> {
        let the_store = store().await?;
        let mut the_doc = doc(json!({"fwurl": "http://firmware/squeezelite.bin"}));

        let the_report = GenericTranslator::default()
            .translate(&mut the_doc, &the_store)
            .await?;

        assert_eq!(
            the_report.update,
            Some(UpdateTrigger {
                url: "http://firmware/squeezelite.bin".to_string()
            })
        );
        assert!(the_report.written.is_empty());
        assert!(the_store.get(RESERVED_UPDATE_KEY).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_numeric_firmware_url_is_fatal() -> anyhow::Result<()> {
        let the_store = store().await?;
        let mut the_doc = doc(json!({"fwurl": {"value": 12, "type": 0x04}}));

        let the_err = GenericTranslator::default()
            .translate(&mut the_doc, &the_store)
            .await
            .err();

        assert!(matches!(
            the_err,
            Some(PipelineError::ReservedKeyTypeMismatch { found: StoreType::U32, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_table_remaps_rename_strings_only() -> anyhow::Result<()> {
        let the_store = store().await?;
        let the_translator = GenericTranslator::new(Box::new(TableRemap::new(HashMap::from([
            ("sink".to_string(), "a2dp_sink_name".to_string()),
            ("gain".to_string(), "amp_gain".to_string()),
        ]))));
        let mut the_doc = doc(json!({"sink": "Speaker", "gain": 3}));

        let the_report = the_translator.translate(&mut the_doc, &the_store).await?;

        assert_eq!(
            the_report.written,
            vec!["a2dp_sink_name".to_string(), "gain".to_string()]
        );
        assert!(the_store.get("sink").await.is_none());
        assert!(the_store.get("amp_gain").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_walk_stops_at_the_first_bad_field() -> anyhow::Result<()> {
        let the_store = store().await?;
        let mut the_doc = doc(json!({"first": "ok", "broken": null, "third": "never"}));

        let the_err = GenericTranslator::default()
            .translate(&mut the_doc, &the_store)
            .await
            .err();

        assert_eq!(the_err.as_ref().and_then(|e| e.field()), Some("broken"));
        assert!(the_store.get("first").await.is_some());
        assert!(the_store.get("third").await.is_none());
        Ok(())
    }
}
