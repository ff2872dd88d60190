//! Achievement generator.
//!
//! Every achievement, whether logged by hand or produced by a quest
//! transition, is built here. Flavor text comes from the external narrator
//! when it was requested and the user has a credential; any failure there
//! drops to local phrase tables, so generation itself never fails.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use questvault_narrator::{CompletionRequest, LlmBackend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::{Result, VaultError};
use crate::types::{validate_title, Achievement, Dimension, User};

/// Openers for locally generated descriptions.
pub const INTROS: [&str; 3] = [
    "NEW ACHIEVEMENT!",
    "CONGRATULATIONS, CRAWLER!",
    "OH LOOK, YOU DID SOMETHING.",
];

/// Closers for locally generated descriptions.
pub const INSULTS: [&str; 4] = [
    "I suppose that's adequate, for a hairless ape.",
    "Don't let it go to your head. You're still squishy.",
    "My grandmother could do that, and she's a subroutine.",
    "You want a cookie? Too bad.",
];

/// Locally generated rewards.
pub const REWARDS: [&str; 4] = [
    "A Silver Loot Box (It's empty).",
    "+500 XP and a sense of impending doom.",
    "A pat on the back. Not really.",
    "The realization that this is all meaningless.",
];

/// Stand-in when the context is blank.
pub const EMPTY_CONTEXT_PHRASE: &str = "do something nobody can quite put into words";

const SYSTEM_PROMPT: &str = "You are the System AI of a deadly dungeon, announcing achievements \
to a crawler. You are sarcastic, theatrical, and mildly condescending, but never cruel. \
Always answer with a single JSON object and nothing else.";

/// Source of randomness for phrase selection.
pub trait RandomSource: Send + Sync {
    /// Pick an index in `0..len`. `len` is never zero.
    fn pick(&self, len: usize) -> usize;
}

/// Thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Reproducible RNG from a fixed seed.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn pick(&self, len: usize) -> usize {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..len),
            Err(poisoned) => poisoned.into_inner().gen_range(0..len),
        }
    }
}

/// Always picks the same index (wrapped to the table length).
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub usize);

impl RandomSource for FixedRandom {
    fn pick(&self, len: usize) -> usize {
        self.0 % len
    }
}

/// What caused an achievement to be generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AchievementSource {
    /// Logged by the user
    Manual,
    /// A quest moved from backlog to active
    QuestStarted,
    /// A quest moved from active to completed
    QuestCompleted,
}

impl AchievementSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementSource::Manual => "manual",
            AchievementSource::QuestStarted => "quest_started",
            AchievementSource::QuestCompleted => "quest_completed",
        }
    }

    fn prompt_hint(&self) -> &'static str {
        match self {
            AchievementSource::Manual => "The crawler logged this deed themselves.",
            AchievementSource::QuestStarted => "The crawler has only just started this quest.",
            AchievementSource::QuestCompleted => "The crawler has finished this quest.",
        }
    }
}

/// Input to the generator.
#[derive(Debug, Clone)]
pub struct AchievementDraft {
    pub title: String,
    pub context: String,
    pub dimension: Option<Dimension>,
    pub quest_id: Option<String>,
    /// Ask for external generation
    pub use_genai: bool,
    pub image_url: Option<String>,
    /// Caller-supplied texts are kept when non-blank
    pub ai_description: Option<String>,
    pub ai_reward: Option<String>,
    pub date_completed: Option<DateTime<Utc>>,
    pub is_hidden: bool,
    pub source: AchievementSource,
}

impl AchievementDraft {
    /// A manually logged achievement.
    pub fn manual(title: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            context: context.into(),
            dimension: None,
            quest_id: None,
            use_genai: false,
            image_url: None,
            ai_description: None,
            ai_reward: None,
            date_completed: None,
            is_hidden: false,
            source: AchievementSource::Manual,
        }
    }

    pub fn with_dimension(mut self, dimension: Option<Dimension>) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_quest(mut self, quest_id: impl Into<String>) -> Self {
        self.quest_id = Some(quest_id.into());
        self
    }

    pub fn with_genai(mut self, use_genai: bool) -> Self {
        self.use_genai = use_genai;
        self
    }

    pub fn with_source(mut self, source: AchievementSource) -> Self {
        self.source = source;
        self
    }
}

/// Description and reward text for one achievement.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlavorText {
    pub description: String,
    pub reward: String,
}

/// Builds achievement records.
pub struct AchievementGenerator {
    narrator: Option<Arc<dyn LlmBackend>>,
    random: Arc<dyn RandomSource>,
    config: GenerationConfig,
}

impl AchievementGenerator {
    /// A generator with no external narrator and thread-local randomness.
    pub fn new(config: GenerationConfig) -> Self {
        Self {
            narrator: None,
            random: Arc::new(ThreadRandom),
            config,
        }
    }

    /// Attach an external narrator.
    pub fn with_narrator(mut self, narrator: Arc<dyn LlmBackend>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    /// Replace the random source.
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Build an achievement for `user` from `draft`.
    ///
    /// Fails only on field validation; text generation always succeeds.
    pub async fn generate(&self, user: &User, draft: AchievementDraft) -> Result<Achievement> {
        let title = validate_title(&draft.title)?;

        let image_url = draft
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(String::from)
            .unwrap_or_else(|| self.config.placeholder_image_url.clone());

        let supplied_description = non_blank(draft.ai_description.as_deref());
        let supplied_reward = non_blank(draft.ai_reward.as_deref());

        let flavor = match (supplied_description, supplied_reward) {
            (Some(description), Some(reward)) => FlavorText {
                description,
                reward,
            },
            (description, reward) => {
                let generated = self.flavor_text(user, &title, &draft).await;
                FlavorText {
                    description: description.unwrap_or(generated.description),
                    reward: reward.unwrap_or(generated.reward),
                }
            }
        };

        Ok(Achievement {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            title,
            context: draft.context.trim().to_string(),
            date_completed: draft.date_completed.unwrap_or_else(Utc::now),
            dimension: draft.dimension,
            is_hidden: draft.is_hidden,
            image_url,
            ai_description: flavor.description,
            ai_reward: flavor.reward,
            use_genai: draft.use_genai,
            quest_id: draft.quest_id,
        })
    }

    /// External text when requested and possible, local text otherwise.
    async fn flavor_text(&self, user: &User, title: &str, draft: &AchievementDraft) -> FlavorText {
        if draft.use_genai {
            match self.external_text(user, title, draft).await {
                Ok(text) => return text,
                Err(err) => warn!(
                    user_id = %user.id,
                    source = draft.source.as_str(),
                    error = %err,
                    "Achievement generation fell back to local text"
                ),
            }
        }
        self.fallback_text(&draft.context)
    }

    /// Ask the narrator for text. Every failure is a `GenerationFallback`.
    async fn external_text(
        &self,
        user: &User,
        title: &str,
        draft: &AchievementDraft,
    ) -> Result<FlavorText> {
        let narrator = self
            .narrator
            .as_ref()
            .ok_or_else(|| VaultError::GenerationFallback("no narrator configured".into()))?;
        let credential = user
            .credential()
            .ok_or_else(|| VaultError::GenerationFallback("user has no credential".into()))?;

        let request = CompletionRequest::user(build_prompt(title, draft))
            .with_system(SYSTEM_PROMPT)
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature)
            .with_json_output()
            .with_api_key(credential);

        debug!(narrator = narrator.id(), source = draft.source.as_str(), "Requesting flavor text");

        let response = tokio::time::timeout(self.config.timeout(), narrator.complete(request))
            .await
            .map_err(|_| {
                VaultError::GenerationFallback(format!(
                    "narrator timed out after {}ms",
                    self.config.timeout_ms
                ))
            })?
            .map_err(|e| VaultError::GenerationFallback(e.to_string()))?;

        parse_flavor_text(&response.content)
    }

    /// Local text from the phrase tables. Never empty.
    pub fn fallback_text(&self, context: &str) -> FlavorText {
        let intro = INTROS[self.random.pick(INTROS.len())];
        let insult = INSULTS[self.random.pick(INSULTS.len())];
        let reward = REWARDS[self.random.pick(REWARDS.len())];

        FlavorText {
            description: format!(
                "{} You have managed to {}. {}",
                intro,
                fix_context_grammar(context),
                insult
            ),
            reward: reward.to_string(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn build_prompt(title: &str, draft: &AchievementDraft) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("Achievement: {}\n", title));
    prompt.push_str(&format!("What the crawler did: {}\n", draft.context.trim()));
    if let Some(dimension) = draft.dimension {
        prompt.push_str(&format!("Life dimension: {}\n", dimension));
    }
    prompt.push_str(draft.source.prompt_hint());
    prompt.push_str(
        "\n\nRespond with a JSON object with exactly two string fields:\n\
         \"description\": one or two sentences announcing the achievement in your voice,\n\
         \"reward\": a short, absurd loot reward.\n",
    );
    prompt
}

/// Parse `{"description": ..., "reward": ...}`, tolerating a Markdown code
/// fence around the object.
pub fn parse_flavor_text(content: &str) -> Result<FlavorText> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let text: FlavorText = serde_json::from_str(body)
        .map_err(|e| VaultError::GenerationFallback(format!("malformed narrator response: {}", e)))?;

    // Used verbatim; whitespace only counts as empty
    if text.description.trim().is_empty() || text.reward.trim().is_empty() {
        return Err(VaultError::GenerationFallback(
            "narrator returned an empty field".into(),
        ));
    }

    Ok(text)
}

/// Make a context read naturally after "You have managed to".
///
/// Drops one trailing period and lower-cases a leading capital unless the
/// first word looks like an acronym. Blank contexts get a stock phrase.
pub fn fix_context_grammar(context: &str) -> String {
    let trimmed = context.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed).trim_end();
    if trimmed.is_empty() {
        return EMPTY_CONTEXT_PHRASE.to_string();
    }

    let mut chars = trimmed.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return EMPTY_CONTEXT_PHRASE.to_string(),
    };
    let second_is_upper = chars.next().is_some_and(char::is_uppercase);

    if first.is_uppercase() && !second_is_upper {
        let mut fixed: String = first.to_lowercase().collect();
        fixed.push_str(&trimmed[first.len_utf8()..]);
        fixed
    } else {
        trimmed.to_string()
    }
}
