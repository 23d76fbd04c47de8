use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::normalize::text;
use super::{strict, Aspect, AspectKey, Extractor, ValidationErrors};

pub const SUMMARY_MAX_CHARS: usize = 400;

/// Job-history summary paragraph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
}

fn permissive(raw: &Value) -> Option<Summary> {
    text(raw, &["text", "summary", "jobSummary", "job_summary", "content", "body"])
        .map(|text| Summary { text })
}

impl Aspect for Summary {
    const KEY: AspectKey = AspectKey::Summary;

    fn extractors() -> Vec<Extractor<Self>> {
        vec![strict::<Summary> as Extractor<Self>, permissive]
    }

    fn canonicalize(&mut self) {
        self.text = self.text.trim().to_string();
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut fields = BTreeMap::new();
        if self.text.chars().count() > SUMMARY_MAX_CHARS {
            fields.insert(
                "text".to_string(),
                format!("Summary must be at most {SUMMARY_MAX_CHARS} characters"),
            );
        }
        ValidationErrors {
            fields,
            ..Default::default()
        }
        .into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_summary_field() {
        let n = Summary::normalize(&json!({ "jobSummary": "  Backend engineer.  " }));
        assert_eq!(n.value.text, "Backend engineer.");
    }

    #[test]
    fn test_nested_note_payload_two_levels_deep() {
        let level2 = json!({ "text": "deep" }).to_string();
        let level1 = json!({ "note": level2 }).to_string();
        let n = Summary::normalize(&json!({ "note": level1 }));
        assert_eq!(n.value.text, "deep");
        assert_eq!(
            n.source,
            crate::schema::NormalizationSource::Unwrapped { depth: 2 }
        );
    }

    #[test]
    fn test_unwrap_depth_is_bounded() {
        let mut raw = json!({ "text": "too deep" });
        for _ in 0..5 {
            raw = json!({ "note": raw.to_string() });
        }
        assert!(Summary::normalize(&raw).is_default_fallback());
    }
}
