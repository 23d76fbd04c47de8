use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dates::{canonical_year_month, parse_year_month};
use super::normalize::text;
use super::{require, strict, Aspect, AspectKey, Extractor, ValidationErrors};

pub const CURRENT_STATUSES: &[&str] = &["employed", "unemployed", "student", "other"];

/// Current employment status and what the applicant is looking for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub current_status: String,
    pub desired_job_type: String,
    /// `YYYY-MM`, may be empty.
    pub available_from: String,
}

fn permissive(raw: &Value) -> Option<StatusInfo> {
    let current_status = text(raw, &["currentStatus", "current_status", "status", "employmentStatus"]);
    let desired_job_type = text(raw, &["desiredJobType", "desired_job_type", "desiredJob", "jobType"]);
    let available_from = text(raw, &["availableFrom", "available_from", "startAvailability"]);
    if current_status.is_none() && desired_job_type.is_none() && available_from.is_none() {
        return None;
    }
    Some(StatusInfo {
        current_status: current_status.unwrap_or_default(),
        desired_job_type: desired_job_type.unwrap_or_default(),
        available_from: available_from.unwrap_or_default(),
    })
}

impl Aspect for StatusInfo {
    const KEY: AspectKey = AspectKey::Status;

    fn extractors() -> Vec<Extractor<Self>> {
        vec![strict::<StatusInfo> as Extractor<Self>, permissive]
    }

    fn canonicalize(&mut self) {
        self.current_status = self.current_status.trim().to_ascii_lowercase();
        self.desired_job_type = self.desired_job_type.trim().to_string();
        self.available_from = canonical_year_month(&self.available_from);
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut fields = BTreeMap::new();
        require(&mut fields, "currentStatus", &self.current_status, "Current status");
        if !self.current_status.is_empty() && !CURRENT_STATUSES.contains(&self.current_status.as_str()) {
            fields.insert(
                "currentStatus".to_string(),
                format!("Current status must be one of {}", CURRENT_STATUSES.join(", ")),
            );
        }
        if !self.available_from.is_empty() && parse_year_month(&self.available_from).is_none() {
            fields.insert(
                "availableFrom".to_string(),
                "Available-from must be YYYY-MM".to_string(),
            );
        }
        ValidationErrors {
            fields,
            ..Default::default()
        }
        .into_result()
    }
}
