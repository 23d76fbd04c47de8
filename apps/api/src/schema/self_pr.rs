use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::normalize::text;
use super::{strict, Aspect, AspectKey, Extractor, ValidationErrors};

pub const SELF_PR_MAX_CHARS: usize = 800;
pub const ANSWER_MAX_CHARS: usize = 400;

/// One guided question and the applicant's answer; the answers feed AI drafting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaAnswer {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfPr {
    pub text: String,
    pub answers: Vec<QaAnswer>,
}

fn read_answer(raw: &Value) -> Option<QaAnswer> {
    let question = text(raw, &["question", "q", "prompt"]);
    let answer = text(raw, &["answer", "a", "response"]);
    if question.is_none() && answer.is_none() {
        return None;
    }
    Some(QaAnswer {
        question: question.unwrap_or_default(),
        answer: answer.unwrap_or_default(),
    })
}

fn read_answers(raw: &Value) -> Option<Vec<QaAnswer>> {
    let map = raw.as_object()?;
    ["answers", "qa", "questions", "note"]
        .iter()
        .filter_map(|k| map.get(*k))
        .find_map(|v| {
            let parsed;
            let list = match v {
                Value::Array(items) => items,
                Value::String(s) => {
                    parsed = serde_json::from_str::<Value>(s).ok()?;
                    parsed.as_array()?
                }
                _ => return None,
            };
            Some(list.iter().filter_map(read_answer).collect())
        })
}

fn permissive(raw: &Value) -> Option<SelfPr> {
    let body = text(raw, &["text", "selfPr", "self_pr", "selfPR", "content", "body"]);
    let answers = read_answers(raw);
    if body.is_none() && answers.is_none() {
        return None;
    }
    Some(SelfPr {
        text: body.unwrap_or_default(),
        answers: answers.unwrap_or_default(),
    })
}

impl Aspect for SelfPr {
    const KEY: AspectKey = AspectKey::SelfPr;

    fn extractors() -> Vec<Extractor<Self>> {
        vec![strict::<SelfPr> as Extractor<Self>, permissive]
    }

    fn canonicalize(&mut self) {
        self.text = self.text.trim().to_string();
        self.answers
            .retain(|a| !a.question.trim().is_empty() || !a.answer.trim().is_empty());
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut fields = BTreeMap::new();
        if self.text.chars().count() > SELF_PR_MAX_CHARS {
            fields.insert(
                "text".to_string(),
                format!("Self-PR must be at most {SELF_PR_MAX_CHARS} characters"),
            );
        }
        for (i, qa) in self.answers.iter().enumerate() {
            if qa.answer.chars().count() > ANSWER_MAX_CHARS {
                fields.insert(
                    format!("answers[{i}].answer"),
                    format!("Answer must be at most {ANSWER_MAX_CHARS} characters"),
                );
            }
        }
        ValidationErrors {
            fields,
            ..Default::default()
        }
        .into_result()
    }
}
