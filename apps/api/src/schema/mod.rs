//! Aspect schemas: canonical record shapes, field-scoped validation, and the
//! tolerant normalization chain that coerces stored values into them.
//!
//! Every aspect of a draft (basic info, status, education, experience,
//! location, self-PR, summary) has exactly one canonical in-memory shape.
//! Storage may hand back older field names, remote `{id, fields}` records or
//! JSON stuffed into a `note` column; `normalize` absorbs all of that and never
//! fails, degrading to the default record instead.

pub mod basic_info;
pub mod dates;
pub mod entries;
pub mod location;
pub mod normalize;
pub mod self_pr;
pub mod status;
pub mod summary;

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use basic_info::BasicInfo;
pub use entries::{Education, EducationItem, Entries, Experience, ExperienceItem, ListItem};
pub use location::{Location, PREFECTURES};
pub use normalize::{NormalizationSource, Normalized};
pub use self_pr::{QaAnswer, SelfPr};
pub use status::StatusInfo;
pub use summary::Summary;

// ────────────────────────────────────────────────────────────────────────────
// Aspect keys
// ────────────────────────────────────────────────────────────────────────────

/// One named section of a draft. Each aspect is persisted and autosaved on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectKey {
    BasicInfo,
    Status,
    Education,
    Experience,
    Location,
    SelfPr,
    Summary,
}

impl AspectKey {
    pub const ALL: [AspectKey; 7] = [
        AspectKey::BasicInfo,
        AspectKey::Status,
        AspectKey::Education,
        AspectKey::Experience,
        AspectKey::Location,
        AspectKey::SelfPr,
        AspectKey::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectKey::BasicInfo => "basic_info",
            AspectKey::Status => "status",
            AspectKey::Education => "education",
            AspectKey::Experience => "experience",
            AspectKey::Location => "location",
            AspectKey::SelfPr => "self_pr",
            AspectKey::Summary => "summary",
        }
    }

    /// List aspects hold many items, each with an optional store-assigned id.
    pub fn is_list(&self) -> bool {
        matches!(self, AspectKey::Education | AspectKey::Experience)
    }

    /// Accepts the snake_case wire name as well as kebab-case and camelCase spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        let folded: String = raw
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match folded.as_str() {
            "basicinfo" => Some(AspectKey::BasicInfo),
            "status" => Some(AspectKey::Status),
            "education" => Some(AspectKey::Education),
            "experience" | "workexperience" => Some(AspectKey::Experience),
            "location" | "address" => Some(AspectKey::Location),
            "selfpr" => Some(AspectKey::SelfPr),
            "summary" | "jobsummary" => Some(AspectKey::Summary),
            _ => None,
        }
    }
}

impl fmt::Display for AspectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Validation errors
// ────────────────────────────────────────────────────────────────────────────

/// Field-scoped validation failures, keyed by canonical field name.
///
/// Single-record aspects only use `fields`. List aspects use `rows` (one map per
/// item, empty when the row is fine) plus an optional list-level message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Error)]
#[error("validation failed: {}", self.summary())]
pub struct ValidationErrors {
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub fields: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub rows: Vec<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub list: Option<String>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.rows.iter().all(BTreeMap::is_empty) && self.list.is_none()
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    fn summary(&self) -> String {
        let mut parts: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        for (i, row) in self.rows.iter().enumerate() {
            for (k, v) in row {
                parts.push(format!("[{i}].{k}: {v}"));
            }
        }
        if let Some(list) = &self.list {
            parts.push(list.clone());
        }
        parts.join("; ")
    }
}

/// Records a "required" error when `value` is blank.
pub(crate) fn require(errors: &mut BTreeMap<String, String>, field: &str, value: &str, label: &str) {
    if value.trim().is_empty() {
        errors.insert(field.to_string(), format!("{label} is required"));
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Aspect trait
// ────────────────────────────────────────────────────────────────────────────

/// A candidate extractor: a pure attempt at reading one raw shape.
pub type Extractor<T> = fn(&Value) -> Option<T>;

/// Implemented by every canonical aspect record.
pub trait Aspect:
    Serialize + DeserializeOwned + Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static
{
    const KEY: AspectKey;

    /// Extractors tried in order before nested unwrapping. The first entry is
    /// the strict canonical reader, the rest are permissive/legacy readers.
    fn extractors() -> Vec<Extractor<Self>>;

    /// Enforces structural invariants (trimming, `present` clearing `endDate`).
    fn canonicalize(&mut self) {}

    fn validate(&self) -> Result<(), ValidationErrors>;

    fn normalize(raw: &Value) -> Normalized<Self> {
        normalize::run_chain::<Self>(raw)
    }
}

/// Strict canonical extractor shared by all aspects.
pub(crate) fn strict<T: DeserializeOwned>(raw: &Value) -> Option<T> {
    if raw.is_null() {
        return None;
    }
    serde_json::from_value(raw.clone()).ok()
}

// ────────────────────────────────────────────────────────────────────────────
// Dynamic record
// ────────────────────────────────────────────────────────────────────────────

/// An aspect record whose kind is only known at runtime (routes, sessions).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AspectRecord {
    BasicInfo(BasicInfo),
    Status(StatusInfo),
    Education(Education),
    Experience(Experience),
    Location(Location),
    SelfPr(SelfPr),
    Summary(Summary),
}

macro_rules! each_record {
    ($record:expr, $inner:ident => $body:expr) => {
        match $record {
            AspectRecord::BasicInfo($inner) => $body,
            AspectRecord::Status($inner) => $body,
            AspectRecord::Education($inner) => $body,
            AspectRecord::Experience($inner) => $body,
            AspectRecord::Location($inner) => $body,
            AspectRecord::SelfPr($inner) => $body,
            AspectRecord::Summary($inner) => $body,
        }
    };
}

fn lift<T: Aspect>(n: Normalized<T>, wrap: fn(T) -> AspectRecord) -> Normalized<AspectRecord> {
    Normalized {
        value: wrap(n.value),
        source: n.source,
    }
}

impl AspectRecord {
    pub fn key(&self) -> AspectKey {
        match self {
            AspectRecord::BasicInfo(_) => AspectKey::BasicInfo,
            AspectRecord::Status(_) => AspectKey::Status,
            AspectRecord::Education(_) => AspectKey::Education,
            AspectRecord::Experience(_) => AspectKey::Experience,
            AspectRecord::Location(_) => AspectKey::Location,
            AspectRecord::SelfPr(_) => AspectKey::SelfPr,
            AspectRecord::Summary(_) => AspectKey::Summary,
        }
    }

    pub fn default_for(key: AspectKey) -> Self {
        match key {
            AspectKey::BasicInfo => AspectRecord::BasicInfo(BasicInfo::default()),
            AspectKey::Status => AspectRecord::Status(StatusInfo::default()),
            AspectKey::Education => AspectRecord::Education(Education::default()),
            AspectKey::Experience => AspectRecord::Experience(Experience::default()),
            AspectKey::Location => AspectRecord::Location(Location::default()),
            AspectKey::SelfPr => AspectRecord::SelfPr(SelfPr::default()),
            AspectKey::Summary => AspectRecord::Summary(Summary::default()),
        }
    }

    /// Runs the aspect's extractor chain over a raw stored value.
    pub fn normalize(key: AspectKey, raw: &Value) -> Normalized<AspectRecord> {
        match key {
            AspectKey::BasicInfo => lift(BasicInfo::normalize(raw), AspectRecord::BasicInfo),
            AspectKey::Status => lift(StatusInfo::normalize(raw), AspectRecord::Status),
            AspectKey::Education => lift(Education::normalize(raw), AspectRecord::Education),
            AspectKey::Experience => lift(Experience::normalize(raw), AspectRecord::Experience),
            AspectKey::Location => lift(Location::normalize(raw), AspectRecord::Location),
            AspectKey::SelfPr => lift(SelfPr::normalize(raw), AspectRecord::SelfPr),
            AspectKey::Summary => lift(Summary::normalize(raw), AspectRecord::Summary),
        }
    }

    pub fn canonicalize(&mut self) {
        each_record!(self, r => r.canonicalize())
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        each_record!(self, r => r.validate())
    }

    pub fn to_value(&self) -> Value {
        each_record!(self, r => serde_json::to_value(r).unwrap_or(Value::Null))
    }
}
