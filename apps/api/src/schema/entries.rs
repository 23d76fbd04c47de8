//! List aspects (education, experience).
//!
//! Both share one container, `Entries<I>`, and one extractor chain. Items may
//! carry a store-assigned `id`; items without one have not been persisted yet.
//! An item marked `present` never keeps an end date.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::dates::{canonical_year_month, parse_year_month};
use super::normalize::{flag, text, unwrap_candidates, MAX_UNWRAP_DEPTH};
use super::{require, strict, Aspect, AspectKey, Extractor, ValidationErrors};

pub const MAX_ITEMS: usize = 20;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;

/// Words older clients wrote into the end-date column instead of ticking `present`.
const PRESENT_MARKERS: &[&str] = &["present", "current", "現在", "在学中", "在職中"];

pub trait ListItem:
    Serialize + DeserializeOwned + Clone + Default + PartialEq + Debug + Send + Sync + 'static
{
    const KEY: AspectKey;
    /// Object keys a wrapped list may be stored under, besides `items`/`records`.
    const WRAPPER_KEYS: &'static [&'static str];
    const MIN_ITEMS: usize;

    fn permissive(raw: &Value) -> Option<Self>;
    fn id(&self) -> Option<&str>;
    fn set_id(&mut self, id: Option<String>);
    fn canonicalize(&mut self);
    fn validate_row(&self) -> BTreeMap<String, String>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entries<I>(pub Vec<I>);

pub type Education = Entries<EducationItem>;
pub type Experience = Entries<ExperienceItem>;

impl<I> Entries<I> {
    pub fn items(&self) -> &[I] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Reads one list item: remote `{id, fields}` record, canonical, permissive,
/// then JSON nested in a string or wrapper field.
pub fn extract_item<I: ListItem>(raw: &Value, depth: u8) -> Option<I> {
    if let Some(fields) = raw.get("fields").filter(|f| f.is_object()) {
        let mut item = extract_item::<I>(fields, depth)?;
        if item.id().is_none() {
            item.set_id(raw.get("id").and_then(Value::as_str).map(str::to_string));
        }
        return Some(item);
    }
    if let Some(item) = strict::<I>(raw).or_else(|| I::permissive(raw)) {
        return Some(item);
    }
    if depth >= MAX_UNWRAP_DEPTH {
        return None;
    }
    unwrap_candidates(raw)
        .into_iter()
        .find_map(|inner| extract_item::<I>(&inner, depth + 1))
}

fn find_array<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    if let Some(items) = raw.as_array() {
        return Some(items);
    }
    let map = raw.as_object()?;
    ["items", "records"]
        .iter()
        .chain(keys.iter())
        .find_map(|k| map.get(*k).and_then(Value::as_array))
}

fn permissive_list<I: ListItem>(raw: &Value) -> Option<Entries<I>> {
    let raw_items = find_array(raw, I::WRAPPER_KEYS)?;
    let items: Vec<I> = raw_items
        .iter()
        .filter_map(|v| extract_item::<I>(v, 0))
        .collect();
    let dropped = raw_items.len() - items.len();
    if dropped > 0 {
        warn!(aspect = %I::KEY, dropped, "dropped unreadable list items");
    }
    Some(Entries(items))
}

impl<I: ListItem> Aspect for Entries<I> {
    const KEY: AspectKey = I::KEY;

    fn extractors() -> Vec<Extractor<Self>> {
        vec![strict::<Entries<I>> as Extractor<Self>, permissive_list::<I>]
    }

    fn canonicalize(&mut self) {
        self.0.iter_mut().for_each(ListItem::canonicalize);
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let list = if self.0.len() < I::MIN_ITEMS {
            Some("At least one entry is required".to_string())
        } else if self.0.len() > MAX_ITEMS {
            Some(format!("At most {MAX_ITEMS} entries are allowed"))
        } else if has_repeated_id(&self.0) {
            Some("Two entries share the same id".to_string())
        } else {
            None
        };
        ValidationErrors {
            rows: self.0.iter().map(ListItem::validate_row).collect(),
            list,
            ..Default::default()
        }
        .into_result()
    }
}

fn has_repeated_id<I: ListItem>(items: &[I]) -> bool {
    let mut seen = HashSet::new();
    items.iter().filter_map(ListItem::id).any(|id| !seen.insert(id))
}

// ────────────────────────────────────────────────────────────────────────────
// Shared period handling
// ────────────────────────────────────────────────────────────────────────────

/// Applies the `present` invariant and tidies both dates.
fn canonical_period(start: &mut String, end: &mut String, present: &mut bool) {
    *start = canonical_year_month(start);
    let end_lower = end.trim().to_lowercase();
    if PRESENT_MARKERS.contains(&end_lower.as_str()) {
        *present = true;
    }
    if *present {
        end.clear();
    } else {
        *end = canonical_year_month(end);
    }
}

fn validate_period(errors: &mut BTreeMap<String, String>, start: &str, end: &str, present: bool) {
    require(errors, "startDate", start, "Start date");
    let start_date = parse_year_month(start);
    if !start.is_empty() && start_date.is_none() {
        errors.insert("startDate".to_string(), "Start date must be YYYY-MM".to_string());
    }

    if present {
        if !end.is_empty() {
            errors.insert(
                "endDate".to_string(),
                "End date must be empty while this entry is current".to_string(),
            );
        }
        return;
    }

    require(errors, "endDate", end, "End date");
    if end.is_empty() {
        return;
    }
    match (start_date, parse_year_month(end)) {
        (_, None) => {
            errors.insert("endDate".to_string(), "End date must be YYYY-MM".to_string());
        }
        (Some(s), Some(e)) if e < s => {
            errors.insert(
                "endDate".to_string(),
                "End date cannot be before the start date".to_string(),
            );
        }
        _ => {}
    }
}

const ID_KEYS: &[&str] = &["id", "recordId", "record_id"];
const START_KEYS: &[&str] = &["startDate", "start_date", "start", "from"];
const END_KEYS: &[&str] = &["endDate", "end_date", "end", "to"];
const PRESENT_KEYS: &[&str] = &["present", "isCurrent", "is_current", "current"];

// ────────────────────────────────────────────────────────────────────────────
// Education
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EducationItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub school_name: String,
    pub faculty: String,
    /// `YYYY-MM`
    pub start_date: String,
    /// `YYYY-MM`, empty while `present`.
    pub end_date: String,
    pub present: bool,
}

impl ListItem for EducationItem {
    const KEY: AspectKey = AspectKey::Education;
    const WRAPPER_KEYS: &'static [&'static str] = &["education", "educations", "schools"];
    const MIN_ITEMS: usize = 1;

    fn permissive(raw: &Value) -> Option<Self> {
        let school_name = text(raw, &["schoolName", "school_name", "school", "institution"]);
        let faculty = text(raw, &["faculty", "department", "major"]);
        let start_date = text(raw, START_KEYS);
        let end_date = text(raw, END_KEYS);
        let present = flag(raw, &["present", "isCurrent", "is_current", "current", "enrolled"]);
        if school_name.is_none() && faculty.is_none() && start_date.is_none() && end_date.is_none() {
            return None;
        }
        Some(EducationItem {
            id: text(raw, ID_KEYS),
            school_name: school_name.unwrap_or_default(),
            faculty: faculty.unwrap_or_default(),
            start_date: start_date.unwrap_or_default(),
            end_date: end_date.unwrap_or_default(),
            present: present.unwrap_or(false),
        })
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    fn canonicalize(&mut self) {
        self.school_name = self.school_name.trim().to_string();
        self.faculty = self.faculty.trim().to_string();
        canonical_period(&mut self.start_date, &mut self.end_date, &mut self.present);
    }

    fn validate_row(&self) -> BTreeMap<String, String> {
        let mut errors = BTreeMap::new();
        require(&mut errors, "schoolName", &self.school_name, "School name");
        validate_period(&mut errors, &self.start_date, &self.end_date, self.present);
        errors
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Experience
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub company_name: String,
    pub position: String,
    pub start_date: String,
    pub end_date: String,
    pub present: bool,
    pub description: String,
}

impl ListItem for ExperienceItem {
    const KEY: AspectKey = AspectKey::Experience;
    const WRAPPER_KEYS: &'static [&'static str] = &["experience", "experiences", "jobs", "workHistory"];
    const MIN_ITEMS: usize = 0;

    fn permissive(raw: &Value) -> Option<Self> {
        let company_name = text(raw, &["companyName", "company_name", "company", "employer"]);
        let position = text(raw, &["position", "role", "title", "jobTitle"]);
        let start_date = text(raw, START_KEYS);
        let end_date = text(raw, END_KEYS);
        let description = text(raw, &["description", "details", "duties"]);
        if company_name.is_none() && position.is_none() && start_date.is_none() && description.is_none() {
            return None;
        }
        Some(ExperienceItem {
            id: text(raw, ID_KEYS),
            company_name: company_name.unwrap_or_default(),
            position: position.unwrap_or_default(),
            start_date: start_date.unwrap_or_default(),
            end_date: end_date.unwrap_or_default(),
            present: flag(raw, PRESENT_KEYS).unwrap_or(false),
            description: description.unwrap_or_default(),
        })
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    fn canonicalize(&mut self) {
        self.company_name = self.company_name.trim().to_string();
        self.position = self.position.trim().to_string();
        self.description = self.description.trim().to_string();
        canonical_period(&mut self.start_date, &mut self.end_date, &mut self.present);
    }

    fn validate_row(&self) -> BTreeMap<String, String> {
        let mut errors = BTreeMap::new();
        require(&mut errors, "companyName", &self.company_name, "Company name");
        require(&mut errors, "position", &self.position, "Position");
        validate_period(&mut errors, &self.start_date, &self.end_date, self.present);
        if self.description.chars().count() > DESCRIPTION_MAX_CHARS {
            errors.insert(
                "description".to_string(),
                format!("Description must be at most {DESCRIPTION_MAX_CHARS} characters"),
            );
        }
        errors
    }
}
