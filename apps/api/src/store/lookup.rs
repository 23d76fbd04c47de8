use serde::{Deserialize, Serialize};

use crate::schema::PREFECTURES;

/// Reference lists offered to the form as select options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    Prefectures,
    Certifications,
}

impl OptionKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "prefectures" | "prefecture" => Some(OptionKind::Prefectures),
            "certifications" | "certification" | "licenses" => Some(OptionKind::Certifications),
            _ => None,
        }
    }
}

/// Served when the store has no certification table (or it is empty).
pub const DEFAULT_CERTIFICATIONS: &[&str] = &[
    "普通自動車第一種運転免許",
    "TOEIC Listening & Reading",
    "実用英語技能検定 2級",
    "実用英語技能検定 準1級",
    "日商簿記検定 2級",
    "日商簿記検定 3級",
    "ITパスポート",
    "基本情報技術者試験",
    "応用情報技術者試験",
    "宅地建物取引士",
    "MOS (Microsoft Office Specialist)",
    "秘書技能検定 2級",
];

pub fn builtin_options(kind: OptionKind) -> Vec<String> {
    let source = match kind {
        OptionKind::Prefectures => PREFECTURES,
        OptionKind::Certifications => DEFAULT_CERTIFICATIONS,
    };
    source.iter().map(|s| s.to_string()).collect()
}
