//! 💾 Store: where normalized settings go to live forever (or until the next form).
//!
//! 🎭 This module is the casting agency for persistence. Need the settings in RAM
//! for a test? In a JSON snapshot on disk for the CLI? We've got a backend for that.
//! The pipeline doesn't care which one it gets. It only knows [`PersistentStore`].
//!
//! 🧠 Knowledge graph:
//! - `PersistentStore`: the contract the pipeline consumes. Forced overwrite writes,
//!   a bounded `wait_for_commit`, reads for reporting, and `close`.
//! - `ledger::Ledger`: shared staging/committed state + the commit worker handle.
//! - `commit_worker::CommitWorker`: the background task that batches writes and
//!   flushes them after `commit_delay_ms`.
//! - `StoreBackend`: enum dispatch over `InMemoryStore` / `FileStore`, resolved from
//!   `StoreConfig`. Same trick the rest of the crate uses: trait -> impls -> enum.
//!
//! ⚠️ Two requests writing the same key race. Last write wins. Nobody arbitrates.
//! Every `set_value_forced` is individually safe; that's all we promise. 🦆

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub(crate) mod commit_worker;
pub mod file;
pub mod in_mem;
pub(crate) mod ledger;

pub use file::{FileStore, FileStoreConfig};
pub use in_mem::{InMemoryStore, InMemoryStoreConfig};

// ===== Types =====

/// 🏷️ The store's native type vocabulary.
///
/// The numeric codes are the ones the settings UI sends in `{"value": .., "type": 33}`
/// wrappers. `0x21` is a string. Everything else is an integer of some width.
/// Blobs exist on the device but nothing in a settings form is a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    #[serde(rename = "string")]
    Str,
}

impl StoreType {
    /// 🔢 Decode a UI type tag. Unknown codes (blob included) are `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0x01 => Some(StoreType::U8),
            0x11 => Some(StoreType::I8),
            0x02 => Some(StoreType::U16),
            0x12 => Some(StoreType::I16),
            0x04 => Some(StoreType::U32),
            0x14 => Some(StoreType::I32),
            0x08 => Some(StoreType::U64),
            0x18 => Some(StoreType::I64),
            0x21 => Some(StoreType::Str),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            StoreType::U8 => 0x01,
            StoreType::I8 => 0x11,
            StoreType::U16 => 0x02,
            StoreType::I16 => 0x12,
            StoreType::U32 => 0x04,
            StoreType::I32 => 0x14,
            StoreType::U64 => 0x08,
            StoreType::I64 => 0x18,
            StoreType::Str => 0x21,
        }
    }

    /// 📏 Inclusive bounds for integer types, as i128 so u64 and i64 both fit.
    pub(crate) fn integer_bounds(self) -> Option<(i128, i128)> {
        match self {
            StoreType::U8 => Some((0, u8::MAX as i128)),
            StoreType::I8 => Some((i8::MIN as i128, i8::MAX as i128)),
            StoreType::U16 => Some((0, u16::MAX as i128)),
            StoreType::I16 => Some((i16::MIN as i128, i16::MAX as i128)),
            StoreType::U32 => Some((0, u32::MAX as i128)),
            StoreType::I32 => Some((i32::MIN as i128, i32::MAX as i128)),
            StoreType::U64 => Some((0, u64::MAX as i128)),
            StoreType::I64 => Some((i64::MIN as i128, i64::MAX as i128)),
            StoreType::Str => None,
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreType::U8 => "u8",
            StoreType::I8 => "i8",
            StoreType::U16 => "u16",
            StoreType::I16 => "i16",
            StoreType::U32 => "u32",
            StoreType::I32 => "i32",
            StoreType::U64 => "u64",
            StoreType::I64 => "i64",
            StoreType::Str => "string",
        };
        write!(f, "{name}")
    }
}

/// 📦 A value on its way into (or out of) the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreValue {
    Signed(i64),
    Unsigned(u64),
    Str(String),
}

impl StoreValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoreValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            StoreValue::Signed(n) => Some(*n as i128),
            StoreValue::Unsigned(n) => Some(*n as i128),
            StoreValue::Str(_) => None,
        }
    }
}

impl fmt::Display for StoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreValue::Signed(n) => write!(f, "{n}"),
            StoreValue::Unsigned(n) => write!(f, "{n}"),
            StoreValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for StoreValue {
    fn from(s: &str) -> Self {
        StoreValue::Str(s.to_string())
    }
}

impl From<String> for StoreValue {
    fn from(s: String) -> Self {
        StoreValue::Str(s)
    }
}

/// 🗃️ One typed entry, exactly as the store keeps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    #[serde(rename = "type")]
    pub kind: StoreType,
    pub value: StoreValue,
}

impl StoreEntry {
    /// 🔒 Typed construction. A string in an integer slot (or a 300 in a u8) is rejected here,
    /// before it gets anywhere near the staging map.
    pub fn new(key: &str, kind: StoreType, value: StoreValue) -> Result<Self, StoreError> {
        match (kind.integer_bounds(), value.as_i128()) {
            (None, None) => Ok(Self { kind, value }),
            (Some((lo, hi)), Some(n)) if n >= lo && n <= hi => Ok(Self { kind, value }),
            (Some(_), Some(n)) => Err(StoreError::Rejected {
                key: key.to_string(),
                reason: format!("{n} does not fit in {kind}"),
            }),
            _ => Err(StoreError::Rejected {
                key: key.to_string(),
                reason: format!("value `{value}` is not a {kind}"),
            }),
        }
    }
}

/// 💀 How the store says no.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store rejected `{key}`: {reason}")]
    Rejected { key: String, reason: String },
    #[error("store i/o failed")]
    Io(#[from] std::io::Error),
    #[error("store snapshot could not be encoded or decoded")]
    Serialize(#[from] serde_json::Error),
    #[error("store is closed")]
    Closed,
}

// ===== Trait =====

/// 💾 A typed key-value store with forced overwrites and a lazy committer.
///
/// # Contract
/// - `set_value_forced` replaces whatever was there. No compare, no merge.
/// - Writes are visible to `get` immediately; durability happens later, in batches.
/// - `wait_for_commit` waits, at most `timeout`, for everything written so far to be
///   flushed. `false` means "not yet", never "lost".
/// - `close` flushes one last time and stops the committer, returning the error if that
///   flush did not land. Writes after `close` fail.
#[async_trait]
pub trait PersistentStore: fmt::Debug + Send + Sync {
    /// ✍️ Write `value` under `key`, overwriting unconditionally.
    async fn set_value_forced(
        &self,
        kind: StoreType,
        key: &str,
        value: StoreValue,
    ) -> Result<(), StoreError>;

    /// ⏳ Bounded rendezvous with the background commit.
    async fn wait_for_commit(&self, timeout: Duration) -> bool;

    /// 🔍 Read back an entry (staged writes included).
    async fn get(&self, key: &str) -> Option<StoreEntry>;

    /// 🗑️ Final flush, then no more writes.
    async fn close(&self) -> Result<(), StoreError>;
}

// ===== Config + Backend enum =====

/// 🔧 Which store to open. Externally tagged, so TOML reads `[store.File]`.
#[derive(Debug, Deserialize, Clone)]
pub enum StoreConfig {
    InMemory(InMemoryStoreConfig),
    File(FileStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::InMemory(InMemoryStoreConfig::default())
    }
}

// 🕰️ 250ms: long enough to batch a whole form, short enough that nobody notices.
pub(crate) fn default_commit_delay_ms() -> u64 {
    250
}

/// 🎭 The many faces of a store. Callers hold this and never learn which one they got.
#[derive(Debug)]
pub enum StoreBackend {
    InMemory(InMemoryStore),
    File(FileStore),
}

impl StoreBackend {
    /// 🚀 Open whatever the config asked for. Must be called inside a tokio runtime,
    /// because the commit worker needs somewhere to live.
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        Ok(match config {
            StoreConfig::InMemory(c) => StoreBackend::InMemory(InMemoryStore::new(c.clone()).await?),
            StoreConfig::File(c) => StoreBackend::File(FileStore::open(c.clone()).await?),
        })
    }
}

#[async_trait]
impl PersistentStore for StoreBackend {
    async fn set_value_forced(
        &self,
        kind: StoreType,
        key: &str,
        value: StoreValue,
    ) -> Result<(), StoreError> {
        match self {
            StoreBackend::InMemory(s) => s.set_value_forced(kind, key, value).await,
            StoreBackend::File(s) => s.set_value_forced(kind, key, value).await,
        }
    }

    async fn wait_for_commit(&self, timeout: Duration) -> bool {
        match self {
            StoreBackend::InMemory(s) => s.wait_for_commit(timeout).await,
            StoreBackend::File(s) => s.wait_for_commit(timeout).await,
        }
    }

    async fn get(&self, key: &str) -> Option<StoreEntry> {
        match self {
            StoreBackend::InMemory(s) => s.get(key).await,
            StoreBackend::File(s) => s.get(key).await,
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        match self {
            StoreBackend::InMemory(s) => s.close().await,
            StoreBackend::File(s) => s.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_ui_type_codes_decode_both_ways() {
        for kind in [
            StoreType::U8,
            StoreType::I8,
            StoreType::U16,
            StoreType::I16,
            StoreType::U32,
            StoreType::I32,
            StoreType::U64,
            StoreType::I64,
            StoreType::Str,
        ] {
            assert_eq!(StoreType::from_code(kind.code() as i64), Some(kind));
        }
        // -- 🫧 blob: real on the device, unwelcome in a form
        assert_eq!(StoreType::from_code(0x42), None);
        assert_eq!(StoreType::from_code(33), Some(StoreType::Str));
    }

    #[test]
    fn the_one_where_a_u8_refuses_to_hold_three_hundred() {
        let the_overflow = StoreEntry::new("volume", StoreType::U8, StoreValue::Signed(300));
        assert!(matches!(the_overflow, Err(StoreError::Rejected { .. })));

        let the_negative = StoreEntry::new("volume", StoreType::U16, StoreValue::Signed(-1));
        assert!(matches!(the_negative, Err(StoreError::Rejected { .. })));

        let the_fine_one = StoreEntry::new("volume", StoreType::U8, StoreValue::Signed(255));
        assert!(the_fine_one.is_ok());
    }

    #[test]
    fn the_one_where_strings_and_integers_stay_in_their_lanes() {
        let the_string_in_an_int = StoreEntry::new("gpio", StoreType::I32, "twelve".into());
        assert!(matches!(the_string_in_an_int, Err(StoreError::Rejected { .. })));

        let the_int_in_a_string = StoreEntry::new("name", StoreType::Str, StoreValue::Signed(12));
        assert!(matches!(the_int_in_a_string, Err(StoreError::Rejected { .. })));
    }

    #[test]
    fn the_one_where_entries_serialize_with_a_type_label() -> anyhow::Result<()> {
        let the_entry = StoreEntry::new("i2c_config", StoreType::Str, "scl=22,sda=21".into())?;
        let the_json = serde_json::to_value(&the_entry)?;
        assert_eq!(the_json["type"], "string");
        assert_eq!(the_json["value"], "scl=22,sda=21");

        let the_number = StoreEntry::new("port", StoreType::U16, StoreValue::Unsigned(9090))?;
        let the_json = serde_json::to_value(&the_number)?;
        assert_eq!(the_json["type"], "u16");
        assert_eq!(the_json["value"], 9090);
        Ok(())
    }
}
