//! 📄 The Configuration Document: one settings form, parsed, in order, with a memory.
//!
//! 🎬 COLD OPEN: INT. DEVICE WEB UI, SOMEONE CLICKS "SAVE"
//!
//! What arrives is a `{"config": {...}}` object. Some fields are bare scalars.
//! Some are `{"value": .., "type": 33}` wrappers, because checkboxes and selects
//! want to tell us what store type they are. Some are garbage. We find out which
//! later, in the generic pass, where garbage is fatal.
//!
//! ## Knowledge Graph 🧠
//! - `ConfigurationDocument`: ordered fields + a `consumed` flag per field.
//! - FieldAccessor: [`ConfigurationDocument::get_string`] / [`ConfigurationDocument::has`].
//!   Both treat consumed fields as gone.
//! - ConsumptionTracker: [`ConfigurationDocument::consume`] /
//!   [`ConfigurationDocument::is_consumed`]. Idempotent. Never renames anything.
//! - Number rendering hands back `Cow::Owned`, text hands back `Cow::Borrowed`.
//!   No shared scratch buffers, nothing to hold "too long".
//!
//! ⚠️ Once consumed, a field is invisible to every later rule AND to the generic
//! translator. That's the whole trick that keeps anything from being written twice. 🦆

use std::borrow::Cow;

use serde_json::{Map, Number, Value};

use crate::error::PipelineError;

/// 🔑 The command hint field. Read once, consumed, never stored.
pub const COMMAND_HINT_FIELD: &str = "__cmdname__";

/// A scalar the store could plausibly keep.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Number(Number),
}

/// 🧪 What we found inside a field, before anyone decides what it means.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Scalar(Scalar),
    /// `null`, or a wrapper with no `value`.
    Missing,
    /// Booleans, arrays, nested objects. The JSON kind is kept for the error message.
    Unsupported(&'static str),
}

/// One field's payload: bare, or wrapped with a UI type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldCell {
    Bare(CellValue),
    Wrapped {
        value: CellValue,
        /// Raw `type` from the wrapper. `Some(Err(kind))` when it wasn't an integer.
        tag: Option<Result<i64, &'static str>>,
    },
}

impl FieldCell {
    /// 🔬 Classify a raw JSON value.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(mut map) if map.contains_key("value") || map.contains_key("type") => {
                let tag = map.remove("type").map(|tag| match tag {
                    Value::Number(n) => n.as_i64().ok_or("fractional number"),
                    other => Err(json_kind(&other)),
                });
                let value = map.remove("value").map_or(CellValue::Missing, cell_value);
                FieldCell::Wrapped { value, tag }
            }
            other => FieldCell::Bare(cell_value(other)),
        }
    }

    pub fn value(&self) -> &CellValue {
        match self {
            FieldCell::Bare(value) | FieldCell::Wrapped { value, .. } => value,
        }
    }

    /// 📝 The normalized text of this cell, regardless of wrapping.
    ///
    /// Numbers come out as integer decimal text. Fractions are truncated, because the
    /// device only ever renders the integer part of a number into a composite string.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self.value() {
            CellValue::Scalar(Scalar::Text(s)) => Some(Cow::Borrowed(s.as_str())),
            CellValue::Scalar(Scalar::Number(n)) => Some(Cow::Owned(render_integer(n))),
            CellValue::Missing | CellValue::Unsupported(_) => None,
        }
    }
}

fn cell_value(value: Value) -> CellValue {
    match value {
        Value::String(s) => CellValue::Scalar(Scalar::Text(s)),
        Value::Number(n) => CellValue::Scalar(Scalar::Number(n)),
        Value::Null => CellValue::Missing,
        other => CellValue::Unsupported(json_kind(&other)),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn render_integer(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else {
        // -- 🔪 f64 -> i64 saturates, which is as good as anything for a form value
        (n.as_f64().unwrap_or_default().trunc() as i64).to_string()
    }
}

/// 🏷️ One named field and whether something already claimed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub cell: FieldCell,
    consumed: bool,
}

impl Field {
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }
}

/// 📄 The parsed `config` object, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationDocument {
    fields: Vec<Field>,
}

impl ConfigurationDocument {
    /// 🚪 Parse a request body. Everything that goes wrong here is `MalformedDocument`,
    /// and nothing has been written yet.
    pub fn parse(text: &str, max_bytes: usize) -> Result<Self, PipelineError> {
        if text.len() > max_bytes {
            return Err(PipelineError::malformed(format!(
                "content too long ({} bytes, limit is {max_bytes})",
                text.len()
            )));
        }
        let root: Value = serde_json::from_str(text)
            .map_err(|err| PipelineError::malformed(format!("unable to parse content: {err}")))?;
        let Value::Object(mut root) = root else {
            return Err(PipelineError::malformed("document root is not an object"));
        };
        match root.remove("config") {
            Some(Value::Object(config)) => Ok(Self::from_map(config)),
            Some(other) => Err(PipelineError::malformed(format!(
                "`config` is {}, expected an object",
                json_kind(&other)
            ))),
            None => Err(PipelineError::malformed("missing `config` object")),
        }
    }

    /// Builds a document straight from the `config` map (names are unique by construction).
    pub fn from_map(config: Map<String, Value>) -> Self {
        let fields = config
            .into_iter()
            .map(|(name, value)| Field {
                name,
                cell: FieldCell::from_json(value),
                consumed: false,
            })
            .collect();
        Self { fields }
    }

    fn live(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| field.name == name && !field.consumed)
    }

    // ===== FieldAccessor =====

    /// 📝 Normalized text of an unconsumed field. `None` if absent, consumed, or valueless.
    pub fn get_string(&self, name: &str) -> Option<Cow<'_, str>> {
        self.live(name).and_then(|field| field.cell.as_text())
    }

    /// Like [`Self::get_string`], but empty strings count as absent.
    pub fn get_non_empty(&self, name: &str) -> Option<Cow<'_, str>> {
        self.get_string(name).filter(|value| !value.is_empty())
    }

    /// 👀 Is there an unconsumed field by this name? The value doesn't matter.
    pub fn has(&self, name: &str) -> bool {
        self.live(name).is_some()
    }

    // ===== ConsumptionTracker =====

    /// 🍽️ Claim a field. Returns `true` only if this call did the claiming.
    pub fn consume(&mut self, name: &str) -> bool {
        match self
            .fields
            .iter_mut()
            .find(|field| field.name == name && !field.consumed)
        {
            Some(field) => {
                field.consumed = true;
                true
            }
            None => false,
        }
    }

    /// Claims the field at `index` in document order. Out-of-range is a no-op.
    pub(crate) fn consume_at(&mut self, index: usize) -> bool {
        match self.fields.get_mut(index) {
            Some(field) if !field.consumed => {
                field.consumed = true;
                true
            }
            _ => false,
        }
    }

    /// `true` for consumed fields; absent fields were never consumed.
    pub fn is_consumed(&self, name: &str) -> bool {
        self.fields
            .iter()
            .any(|field| field.name == name && field.consumed)
    }

    /// Every field, consumed or not, in document order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn unconsumed(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|field| !field.consumed)
    }
}

/// ✅ The one true definition of "yes" for checkbox-ish fields: `1`, `true`, `y`, any case.
pub fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("y")
}
