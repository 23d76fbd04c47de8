// Prompt constants for AI drafting. Placeholders in `{braces}` are replaced
// before sending.

use crate::generation::{GenerationInput, GenerationTarget};

/// System prompt shared by both drafting targets: JSON-only output.
pub const DRAFT_SYSTEM: &str = "You help job seekers in Japan write résumé sections. \
    Write in natural, polite Japanese. \
    You MUST respond with valid JSON only, shaped as {\"text\": \"...\"}. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences.";

pub const SELF_PR_PROMPT_TEMPLATE: &str = r#"Write a self-PR paragraph of at most {max_chars} characters.
Base it only on the applicant's answers and work history below. Do not invent facts.

Answers:
{answers}

Work history:
{experience}"#;

pub const SUMMARY_PROMPT_TEMPLATE: &str = r#"Write a job-history summary of at most {max_chars} characters.
Summarize the work history below in chronological order. Do not invent facts.

Work history:
{experience}

Applicant notes:
{answers}"#;

const NONE_GIVEN: &str = "(none given)";

fn answers_block(input: &GenerationInput) -> String {
    let lines: Vec<String> = input
        .self_pr
        .answers
        .iter()
        .filter(|a| !a.answer.trim().is_empty())
        .map(|a| format!("- Q: {}\n  A: {}", a.question, a.answer))
        .collect();
    if lines.is_empty() {
        NONE_GIVEN.to_string()
    } else {
        lines.join("\n")
    }
}

fn experience_block(input: &GenerationInput) -> String {
    let lines: Vec<String> = input
        .experience
        .items()
        .iter()
        .map(|job| {
            let end = if job.present { "present" } else { job.end_date.as_str() };
            let mut line = format!("- {} ({} – {})", job.company_name, job.start_date, end);
            if !job.position.is_empty() {
                line.push_str(&format!(", {}", job.position));
            }
            if !job.description.is_empty() {
                line.push_str(&format!(": {}", job.description));
            }
            line
        })
        .collect();
    if lines.is_empty() {
        NONE_GIVEN.to_string()
    } else {
        lines.join("\n")
    }
}

/// Fills the template for `target`.
pub fn build_prompt(target: GenerationTarget, input: &GenerationInput) -> String {
    let template = match target {
        GenerationTarget::SelfPr => SELF_PR_PROMPT_TEMPLATE,
        GenerationTarget::Summary => SUMMARY_PROMPT_TEMPLATE,
    };
    template
        .replace("{max_chars}", &target.max_chars().to_string())
        .replace("{answers}", &answers_block(input))
        .replace("{experience}", &experience_block(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Entries, ExperienceItem, QaAnswer, SelfPr};
    use crate::store::DraftId;

    fn input() -> GenerationInput {
        GenerationInput {
            draft_id: DraftId::new("d1").unwrap(),
            basic_info: Default::default(),
            experience: Entries(vec![ExperienceItem {
                company_name: "Acme".into(),
                position: "Engineer".into(),
                start_date: "2019-04".into(),
                present: true,
                ..Default::default()
            }]),
            self_pr: SelfPr {
                text: String::new(),
                answers: vec![
                    QaAnswer {
                        question: "Strength?".into(),
                        answer: "Persistence".into(),
                    },
                    QaAnswer {
                        question: "Skipped".into(),
                        answer: " ".into(),
                    },
                ],
            },
        }
    }

    #[test]
    fn test_self_pr_prompt_includes_answers_and_history() {
        let prompt = build_prompt(GenerationTarget::SelfPr, &input());
        assert!(prompt.contains("at most 800 characters"));
        assert!(prompt.contains("A: Persistence"));
        assert!(!prompt.contains("Skipped"));
        assert!(prompt.contains("Acme (2019-04 – present), Engineer"));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn test_empty_input_is_marked() {
        let mut empty = input();
        empty.experience = Entries(Vec::new());
        empty.self_pr = SelfPr::default();
        let prompt = build_prompt(GenerationTarget::Summary, &empty);
        assert_eq!(prompt.matches(NONE_GIVEN).count(), 2);
        assert!(prompt.contains("at most 400 characters"));
    }
}
