//! AI drafting of the free-text aspects (self-PR, job summary).
//!
//! This layer only supplies inputs: the resolved draft id and the saved,
//! normalized aspects. Prompt wording lives in `prompts`; the model call goes
//! through `llm_client`.

pub mod handlers;
pub mod prompts;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm_client::{LlmClient, LlmError};
use crate::schema::self_pr::SELF_PR_MAX_CHARS;
use crate::schema::summary::SUMMARY_MAX_CHARS;
use crate::schema::{Aspect, AspectKey, BasicInfo, Experience, SelfPr};
use crate::store::{DraftId, Repository, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTarget {
    SelfPr,
    Summary,
}

impl GenerationTarget {
    pub fn parse(raw: &str) -> Option<Self> {
        match AspectKey::parse(raw)? {
            AspectKey::SelfPr => Some(GenerationTarget::SelfPr),
            AspectKey::Summary => Some(GenerationTarget::Summary),
            _ => None,
        }
    }

    pub fn max_chars(&self) -> usize {
        match self {
            GenerationTarget::SelfPr => SELF_PR_MAX_CHARS,
            GenerationTarget::Summary => SUMMARY_MAX_CHARS,
        }
    }
}

/// Everything the generator may look at, taken from what is already saved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationInput {
    pub draft_id: DraftId,
    pub basic_info: BasicInfo,
    pub experience: Experience,
    pub self_pr: SelfPr,
}

async fn saved<T: Aspect>(repo: &dyn Repository, draft: &DraftId) -> Result<T, StoreError> {
    match repo.load_aspect(draft, T::KEY).await {
        Ok(raw) => {
            let mut value = T::normalize(&raw).value;
            value.canonicalize();
            Ok(value)
        }
        Err(e) if e.is_not_found() => Ok(T::default()),
        Err(e) => Err(e),
    }
}

impl GenerationInput {
    pub async fn collect(repo: &dyn Repository, draft: &DraftId) -> Result<Self, StoreError> {
        let (basic_info, experience, self_pr) = tokio::try_join!(
            saved::<BasicInfo>(repo, draft),
            saved::<Experience>(repo, draft),
            saved::<SelfPr>(repo, draft),
        )?;
        Ok(Self {
            draft_id: draft.clone(),
            basic_info,
            experience,
            self_pr,
        })
    }
}

/// Produces draft text for one target. Carried as `Arc<dyn TextGenerator>`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, target: GenerationTarget, input: &GenerationInput) -> Result<String, LlmError>;
}

#[derive(Debug, Deserialize)]
struct Drafted {
    text: String,
}

/// Clips to the target's limit so the result always passes validation.
fn clip(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect()
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, target: GenerationTarget, input: &GenerationInput) -> Result<String, LlmError> {
        let prompt = prompts::build_prompt(target, input);
        let drafted: Drafted = self.call_json(&prompt, prompts::DRAFT_SYSTEM).await?;
        if drafted.text.trim().is_empty() {
            return Err(LlmError::EmptyContent);
        }
        debug!(draft_id = %input.draft_id, target = ?target, "Generated draft text");
        Ok(clip(&drafted.text, target.max_chars()))
    }
}
