//! The normalization chain: canonical → permissive → nested unwrap → default.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::Aspect;

/// How deep JSON-in-a-string payloads are unwrapped before giving up.
pub const MAX_UNWRAP_DEPTH: u8 = 3;

/// Generic container fields that older writers used to stash a JSON payload in.
pub const WRAPPER_FIELDS: &[&str] = &["note", "notes", "data", "payload"];

/// Which step of the chain produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum NormalizationSource {
    Canonical,
    Permissive,
    Unwrapped { depth: u8 },
    /// Nothing matched and the record is the empty default. This is lenient on
    /// purpose but callers can see it happened.
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub value: T,
    pub source: NormalizationSource,
}

impl<T> Normalized<T> {
    pub fn is_default_fallback(&self) -> bool {
        self.source == NormalizationSource::Default
    }
}

pub fn run_chain<T: Aspect>(raw: &Value) -> Normalized<T> {
    match attempt::<T>(raw, 0) {
        Some(found) => found,
        None => {
            if !raw.is_null() {
                warn!(
                    aspect = %T::KEY,
                    "no extractor matched stored value; using default record"
                );
            }
            Normalized {
                value: T::default(),
                source: NormalizationSource::Default,
            }
        }
    }
}

fn attempt<T: Aspect>(raw: &Value, depth: u8) -> Option<Normalized<T>> {
    for (index, extract) in T::extractors().into_iter().enumerate() {
        if let Some(mut value) = extract(raw) {
            value.canonicalize();
            let source = match (depth, index) {
                (0, 0) => NormalizationSource::Canonical,
                (0, _) => NormalizationSource::Permissive,
                (d, _) => NormalizationSource::Unwrapped { depth: d },
            };
            debug!(aspect = %T::KEY, ?source, "normalized stored value");
            return Some(Normalized { value, source });
        }
    }

    if depth >= MAX_UNWRAP_DEPTH {
        return None;
    }

    unwrap_candidates(raw)
        .into_iter()
        .find_map(|inner| attempt::<T>(&inner, depth + 1))
}

/// Values nested one level inside `raw`: a JSON-encoded string, or a payload
/// stored under one of the generic wrapper fields.
pub fn unwrap_candidates(raw: &Value) -> Vec<Value> {
    match raw {
        Value::String(s) => parse_embedded(s).into_iter().collect(),
        Value::Object(map) => WRAPPER_FIELDS
            .iter()
            .filter_map(|field| map.get(*field))
            .filter_map(|inner| match inner {
                Value::String(s) => parse_embedded(s),
                Value::Object(_) | Value::Array(_) => Some(inner.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_embedded(s: &str) -> Option<Value> {
    let trimmed = s.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[') || trimmed.starts_with('"')) {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Reads a string-ish field, accepting numbers and booleans as text.
pub(crate) fn text(raw: &Value, keys: &[&str]) -> Option<String> {
    let map = raw.as_object()?;
    keys.iter().find_map(|k| match map.get(*k)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

/// Reads a boolean field, accepting `"true"`/`"1"`/`1` style encodings.
pub(crate) fn flag(raw: &Value, keys: &[&str]) -> Option<bool> {
    let map = raw.as_object()?;
    keys.iter().find_map(|k| match map.get(*k)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    })
}
