use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::normalize::text;
use super::{require, strict, Aspect, AspectKey, Extractor, ValidationErrors};

/// The 47 prefectures, in JIS code order. Also served as a lookup option list.
pub const PREFECTURES: &[&str] = &[
    "北海道", "青森県", "岩手県", "宮城県", "秋田県", "山形県", "福島県",
    "茨城県", "栃木県", "群馬県", "埼玉県", "千葉県", "東京都", "神奈川県",
    "新潟県", "富山県", "石川県", "福井県", "山梨県", "長野県", "岐阜県",
    "静岡県", "愛知県", "三重県", "滋賀県", "京都府", "大阪府", "兵庫県",
    "奈良県", "和歌山県", "鳥取県", "島根県", "岡山県", "広島県", "山口県",
    "徳島県", "香川県", "愛媛県", "高知県", "福岡県", "佐賀県", "長崎県",
    "熊本県", "大分県", "宮崎県", "鹿児島県", "沖縄県",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// `NNN-NNNN`
    pub postal_code: String,
    pub prefecture: String,
    pub city: String,
    pub address_line: String,
}

fn permissive(raw: &Value) -> Option<Location> {
    let postal_code = text(raw, &["postalCode", "postal_code", "zip", "zipCode"]);
    let prefecture = text(raw, &["prefecture", "pref", "state"]);
    let city = text(raw, &["city", "municipality"]);
    let address_line = text(raw, &["addressLine", "address_line", "address", "street"]);
    if postal_code.is_none() && prefecture.is_none() && city.is_none() && address_line.is_none() {
        return None;
    }
    Some(Location {
        postal_code: postal_code.unwrap_or_default(),
        prefecture: prefecture.unwrap_or_default(),
        city: city.unwrap_or_default(),
        address_line: address_line.unwrap_or_default(),
    })
}

/// `1000001` and `100-0001` both become `100-0001`; anything else is left alone.
fn canonical_postal_code(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let only_digits_and_hyphen = raw.trim().chars().all(|c| c.is_ascii_digit() || c == '-');
    if digits.len() == 7 && only_digits_and_hyphen {
        format!("{}-{}", &digits[..3], &digits[3..])
    } else {
        raw.trim().to_string()
    }
}

fn is_postal_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == 8
        && bytes[3] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 3 || b.is_ascii_digit())
}

impl Aspect for Location {
    const KEY: AspectKey = AspectKey::Location;

    fn extractors() -> Vec<Extractor<Self>> {
        vec![strict::<Location> as Extractor<Self>, permissive]
    }

    fn canonicalize(&mut self) {
        self.postal_code = canonical_postal_code(&self.postal_code);
        self.prefecture = self.prefecture.trim().to_string();
        self.city = self.city.trim().to_string();
        self.address_line = self.address_line.trim().to_string();
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut fields = BTreeMap::new();
        require(&mut fields, "prefecture", &self.prefecture, "Prefecture");
        require(&mut fields, "city", &self.city, "City");
        if !self.prefecture.is_empty() && !PREFECTURES.contains(&self.prefecture.as_str()) {
            fields.insert(
                "prefecture".to_string(),
                "Prefecture is not recognised".to_string(),
            );
        }
        if !self.postal_code.is_empty() && !is_postal_code(&self.postal_code) {
            fields.insert(
                "postalCode".to_string(),
                "Postal code must look like 123-4567".to_string(),
            );
        }
        ValidationErrors {
            fields,
            ..Default::default()
        }
        .into_result()
    }
}
