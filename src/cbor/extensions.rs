//! Process-wide registry of CBOR tag extensions.
//!
//! The registry is initialised exactly once, either explicitly at startup through
//! [register_default_extensions] or lazily on first use through [registry]. Both calls are
//! idempotent and hand back the same immutable registry, so redundant initialisation from
//! several threads is harmless.
//!
//! One extension ships with the crate: `full-date` (RFC 8943, tag 1004), an ISO calendar date
//! carried as a `YYYY-MM-DD` text string.
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use ciborium::Value;
use time::{format_description::FormatItem, macros::format_description, Date};

use super::CborError;

/// RFC 8943 `full-date`.
pub const FULL_DATE_TAG: u64 = 1004;
/// RFC 8949 standard date/time string.
pub const TDATE_TAG: u64 = 0;

const FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Behaviour attached to a CBOR tag number.
pub trait TagExtension: fmt::Debug + Send + Sync {
    fn tag(&self) -> u64;

    /// Check that `content` (the item under the tag) is well formed.
    fn validate(&self, content: &Value) -> Result<(), CborError>;

    /// Render `content` for JSON consumers.
    fn to_json(&self, content: &Value) -> Option<serde_json::Value>;
}

#[derive(Debug)]
pub struct Registry {
    extensions: Vec<Box<dyn TagExtension>>,
}

impl Registry {
    pub fn get(&self, tag: u64) -> Option<&dyn TagExtension> {
        self.extensions
            .iter()
            .find(|ext| ext.tag() == tag)
            .map(|ext| ext.as_ref())
    }

    pub fn tags(&self) -> impl Iterator<Item = u64> + '_ {
        self.extensions.iter().map(|ext| ext.tag())
    }

    /// Walk `value` and validate every tagged item that has a registered extension.
    pub fn validate(&self, value: &Value) -> Result<(), CborError> {
        match value {
            Value::Tag(tag, content) => {
                if let Some(ext) = self.get(*tag) {
                    ext.validate(content)?;
                }
                self.validate(content)
            }
            Value::Array(items) => items.iter().try_for_each(|item| self.validate(item)),
            Value::Map(entries) => entries.iter().try_for_each(|(k, v)| {
                self.validate(k)?;
                self.validate(v)
            }),
            _ => Ok(()),
        }
    }
}

/// Install the built-in extensions. Safe to call any number of times.
pub fn register_default_extensions() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        tracing::debug!("registering default CBOR tag extensions");
        Registry {
            extensions: vec![Box::new(FullDateExtension)],
        }
    })
}

/// The process-wide registry, initialised on first access.
pub fn registry() -> &'static Registry {
    register_default_extensions()
}

#[derive(Debug)]
struct FullDateExtension;

impl TagExtension for FullDateExtension {
    fn tag(&self) -> u64 {
        FULL_DATE_TAG
    }

    fn validate(&self, content: &Value) -> Result<(), CborError> {
        FullDate::try_from(content).map(|_| ())
    }

    fn to_json(&self, content: &Value) -> Option<serde_json::Value> {
        FullDate::try_from(content)
            .ok()
            .map(|date| serde_json::Value::String(date.to_string()))
    }
}

/// An ISO calendar date, encoded as `#6.1004(tstr)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FullDate(pub Date);

impl fmt::Display for FullDate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = self.0.format(FORMAT).map_err(|_| fmt::Error)?;
        f.write_str(&s)
    }
}

impl FromStr for FullDate {
    type Err = CborError;

    fn from_str(s: &str) -> Result<Self, CborError> {
        Date::parse(s, FORMAT)
            .map(FullDate)
            .map_err(|e| CborError::InvalidTaggedItem(FULL_DATE_TAG, e.to_string()))
    }
}

impl From<FullDate> for Value {
    fn from(d: FullDate) -> Value {
        Value::Tag(FULL_DATE_TAG, Box::new(Value::Text(d.to_string())))
    }
}

impl TryFrom<&Value> for FullDate {
    type Error = CborError;

    /// Accepts either the tagged item or its bare text content.
    fn try_from(value: &Value) -> Result<Self, CborError> {
        match value {
            Value::Tag(FULL_DATE_TAG, inner) => FullDate::try_from(inner.as_ref()),
            Value::Text(s) => s.parse(),
            _ => Err(CborError::InvalidTaggedItem(
                FULL_DATE_TAG,
                "expected a text string".to_string(),
            )),
        }
    }
}

/// Render a CBOR value as JSON, consulting the registry for tagged items.
///
/// Byte strings become base16 text, maps with non-text keys become arrays of `[key, value]`
/// pairs, and tags without an extension render their content.
pub fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(i) => {
            let i = i128::from(*i);
            if let Ok(i) = i64::try_from(i) {
                Json::from(i)
            } else if let Ok(u) = u64::try_from(i) {
                Json::from(u)
            } else {
                Json::String(i.to_string())
            }
        }
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Text(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(hex::encode(b)),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(entries) => {
            if entries.iter().all(|(k, _)| k.is_text()) {
                Json::Object(
                    entries
                        .iter()
                        .filter_map(|(k, v)| k.as_text().map(|k| (k.to_string(), to_json(v))))
                        .collect(),
                )
            } else {
                Json::Array(
                    entries
                        .iter()
                        .map(|(k, v)| Json::Array(vec![to_json(k), to_json(v)]))
                        .collect(),
                )
            }
        }
        Value::Tag(tag, content) => registry()
            .get(*tag)
            .and_then(|ext| ext.to_json(content))
            .unwrap_or_else(|| to_json(content)),
        _ => Json::Null,
    }
}
