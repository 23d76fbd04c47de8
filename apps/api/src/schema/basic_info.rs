use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dates::parse_date;
use super::normalize::text;
use super::{require, strict, Aspect, AspectKey, Extractor, ValidationErrors};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicInfo {
    pub last_name: String,
    pub first_name: String,
    pub last_name_kana: String,
    pub first_name_kana: String,
    /// `YYYY-MM-DD`
    pub birth_date: String,
    pub gender: String,
    pub email: String,
    pub phone: String,
}

const LAST_NAME: &[&str] = &["lastName", "last_name", "familyName"];
const FIRST_NAME: &[&str] = &["firstName", "first_name", "givenName"];
const LAST_NAME_KANA: &[&str] = &["lastNameKana", "last_name_kana", "nameKanaLast"];
const FIRST_NAME_KANA: &[&str] = &["firstNameKana", "first_name_kana", "nameKanaFirst"];
const BIRTH_DATE: &[&str] = &["birthDate", "birth_date", "birthday", "dob"];
const GENDER: &[&str] = &["gender", "sex"];
const EMAIL: &[&str] = &["email", "mail", "emailAddress"];
const PHONE: &[&str] = &["phone", "tel", "phoneNumber"];

fn permissive(raw: &Value) -> Option<BasicInfo> {
    let read = |keys: &[&str]| text(raw, keys);
    let fields = [
        read(LAST_NAME),
        read(FIRST_NAME),
        read(LAST_NAME_KANA),
        read(FIRST_NAME_KANA),
        read(BIRTH_DATE),
        read(GENDER),
        read(EMAIL),
        read(PHONE),
    ];
    if fields.iter().all(Option::is_none) {
        return None;
    }
    let [last_name, first_name, last_name_kana, first_name_kana, birth_date, gender, email, phone] =
        fields.map(Option::unwrap_or_default);
    Some(BasicInfo {
        last_name,
        first_name,
        last_name_kana,
        first_name_kana,
        birth_date,
        gender,
        email,
        phone,
    })
}

/// Deliberately shallow check: one `@` with text on both sides and a dot in the domain.
fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

impl Aspect for BasicInfo {
    const KEY: AspectKey = AspectKey::BasicInfo;

    fn extractors() -> Vec<Extractor<Self>> {
        vec![strict::<BasicInfo> as Extractor<Self>, permissive]
    }

    fn canonicalize(&mut self) {
        for field in [
            &mut self.last_name,
            &mut self.first_name,
            &mut self.last_name_kana,
            &mut self.first_name_kana,
            &mut self.birth_date,
            &mut self.gender,
            &mut self.email,
            &mut self.phone,
        ] {
            let trimmed = field.trim();
            if trimmed.len() != field.len() {
                *field = trimmed.to_string();
            }
        }
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut fields = BTreeMap::new();
        require(&mut fields, "lastName", &self.last_name, "Last name");
        require(&mut fields, "firstName", &self.first_name, "First name");
        require(&mut fields, "birthDate", &self.birth_date, "Birth date");
        require(&mut fields, "email", &self.email, "Email");

        if !self.birth_date.trim().is_empty() && parse_date(&self.birth_date).is_none() {
            fields.insert(
                "birthDate".to_string(),
                "Birth date must be YYYY-MM-DD".to_string(),
            );
        }
        if !self.email.trim().is_empty() && !looks_like_email(self.email.trim()) {
            fields.insert("email".to_string(), "Email address is invalid".to_string());
        }
        if !self.phone.trim().is_empty()
            && !self
                .phone
                .chars()
                .all(|c| c.is_ascii_digit() || c == '-' || c == '+' || c == ' ')
        {
            fields.insert(
                "phone".to_string(),
                "Phone number may only contain digits and hyphens".to_string(),
            );
        }

        ValidationErrors {
            fields,
            ..Default::default()
        }
        .into_result()
    }
}
