//! 💀 Errors: the five ways a settings form can ruin your afternoon.
//!
//! 🎬 *[a POST arrives. it is 4KB of JSON. it has opinions.]*
//!
//! The pipeline only ever fails in the generic pass, at parse time, or when the
//! store refuses a write. A composite rule that can't build its value is NOT an
//! error: it quietly eats its fields and moves on. Half a display config is no
//! display config. 🦆
//!
//! ⚠️ Nothing here is retried. Writes issued before the failure stay written.
//! The caller hears "failed" even though some settings already changed. That's
//! the contract, and the tests hold us to it.

use thiserror::Error;

use crate::store::{StoreError, StoreType};

/// 🚨 Everything that can abort a request.
///
/// Every variant except [`PipelineError::MalformedDocument`] names the field that
/// broke things, because "something in your form is wrong" is not a bug report.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 📭 Unparsable, too big, or no `config` object. Nothing was written.
    #[error("malformed config document: {reason}")]
    MalformedDocument { reason: String },

    /// 🕳️ The field has a name and nothing else.
    #[error("missing value for config entry `{field}`")]
    MissingFieldValue { field: String },

    /// 🤷 Neither a string nor a number the store knows how to keep.
    #[error("cannot determine the store type of config entry `{field}`: {reason}")]
    AmbiguousType { field: String, reason: String },

    /// 🔒 The firmware URL showed up wearing a number costume.
    #[error("config entry `{field}` must be a string, found {found} (type code {:#04x})", .found.code())]
    ReservedKeyTypeMismatch { field: String, found: StoreType },

    /// 💾 The store said no. Everything before this write stays written.
    #[error("unable to store value for `{key}` (from config entry `{field}`)")]
    StoreWriteFailure {
        field: String,
        key: String,
        #[source]
        source: StoreError,
    },
}

impl PipelineError {
    /// 🎯 The offending field, when there is one.
    pub fn field(&self) -> Option<&str> {
        match self {
            PipelineError::MalformedDocument { .. } => None,
            PipelineError::MissingFieldValue { field }
            | PipelineError::AmbiguousType { field, .. }
            | PipelineError::ReservedKeyTypeMismatch { field, .. }
            | PipelineError::StoreWriteFailure { field, .. } => Some(field),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        PipelineError::MalformedDocument {
            reason: reason.into(),
        }
    }

    pub(crate) fn ambiguous(field: &str, reason: impl Into<String>) -> Self {
        PipelineError::AmbiguousType {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_every_error_but_the_malformed_one_knows_who_did_it() {
        let the_usual_suspects = vec![
            PipelineError::MissingFieldValue {
                field: "width".to_string(),
            },
            PipelineError::ambiguous("width", "booleans are not settings"),
            PipelineError::ReservedKeyTypeMismatch {
                field: "fwurl".to_string(),
                found: StoreType::I32,
            },
            PipelineError::StoreWriteFailure {
                field: "width".to_string(),
                key: "width".to_string(),
                source: StoreError::Closed,
            },
        ];
        for suspect in &the_usual_suspects {
            assert!(suspect.field().is_some(), "{suspect} should name its field");
        }

        let the_anonymous_one = PipelineError::malformed("not json");
        assert_eq!(the_anonymous_one.field(), None);
        assert_eq!(
            the_anonymous_one.to_string(),
            "malformed config document: not json"
        );
    }

    #[test]
    fn the_one_where_the_store_failure_keeps_its_cause() {
        let the_failure = PipelineError::StoreWriteFailure {
            field: "name".to_string(),
            key: "host_name".to_string(),
            source: StoreError::Closed,
        };
        let the_cause = std::error::Error::source(&the_failure)
            .expect("💀 store failure lost its source, the paper trail ends here");
        assert_eq!(the_cause.to_string(), StoreError::Closed.to_string());
    }

    #[test]
    fn the_one_where_the_firmware_url_mismatch_shows_the_type_code() {
        let the_mismatch = PipelineError::ReservedKeyTypeMismatch {
            field: "fwurl".to_string(),
            found: StoreType::I32,
        };
        assert_eq!(
            the_mismatch.to_string(),
            "config entry `fwurl` must be a string, found i32 (type code 0x14)"
        );
    }
}
