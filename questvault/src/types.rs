//! Core record types for the gamification engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::error::VaultError;

/// Maximum length of quest and achievement titles, in characters.
pub const TITLE_MAX_LEN: usize = 200;

/// XP awarded by a quest that carries no explicit reward.
pub const DEFAULT_XP_REWARD: u32 = 10;

/// XP needed per level step.
pub const XP_PER_LEVEL: u64 = 100;

/// One of the eight life categories XP is bucketed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Intellectual,
    Physical,
    Financial,
    Environmental,
    Vocational,
    Social,
    Emotional,
    Spiritual,
}

impl Dimension {
    /// All dimensions in canonical order.
    pub const ALL: [Dimension; 8] = [
        Dimension::Intellectual,
        Dimension::Physical,
        Dimension::Financial,
        Dimension::Environmental,
        Dimension::Vocational,
        Dimension::Social,
        Dimension::Emotional,
        Dimension::Spiritual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Intellectual => "intellectual",
            Dimension::Physical => "physical",
            Dimension::Financial => "financial",
            Dimension::Environmental => "environmental",
            Dimension::Vocational => "vocational",
            Dimension::Social => "social",
            Dimension::Emotional => "emotional",
            Dimension::Spiritual => "spiritual",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dimension::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| VaultError::Validation(format!("unknown dimension '{}'", s)))
    }
}

/// Lifecycle status of a quest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum QuestStatus {
    Backlog,
    Active,
    Completed,
}

impl QuestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestStatus::Backlog => "backlog",
            QuestStatus::Active => "active",
            QuestStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for QuestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backlog" => Ok(QuestStatus::Backlog),
            "active" => Ok(QuestStatus::Active),
            "completed" => Ok(QuestStatus::Completed),
            other => Err(VaultError::Validation(format!("unknown status '{}'", other))),
        }
    }
}

/// A registered user.
///
/// The password hash is opaque here; it belongs to the auth collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    /// Credential for the external text generator
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub disabled: bool,
}

impl User {
    /// Create a user with a fresh id.
    pub fn new(username: impl Into<String>, hashed_password: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.into(),
            display_name: None,
            openai_api_key: None,
            hashed_password: hashed_password.into(),
            disabled: false,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// The generation credential, if one is set and non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// A trackable task owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Quest {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub dimension: Option<Dimension>,
    pub status: QuestStatus,
    pub tags: Vec<String>,
    pub victory_condition: Option<String>,
    pub is_hidden: bool,
    pub due_date: Option<DateTime<Utc>>,
    /// Progress percentage (0-100)
    pub progress: u8,
    pub difficulty: u32,
    /// Absent on rows written before rewards existed; counts as the default
    pub xp_reward: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Quest {
    /// XP this quest is worth on completion.
    pub fn xp_value(&self) -> u32 {
        self.xp_reward.unwrap_or(DEFAULT_XP_REWARD)
    }

    pub fn is_completed(&self) -> bool {
        self.status == QuestStatus::Completed
    }
}

/// A record of something accomplished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Achievement {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub context: String,
    pub date_completed: DateTime<Utc>,
    pub dimension: Option<Dimension>,
    pub is_hidden: bool,
    pub image_url: String,
    pub ai_description: String,
    pub ai_reward: String,
    /// Whether external generation was requested for this record
    pub use_genai: bool,
    /// Weak link to the producing quest; may dangle after quest deletion
    pub quest_id: Option<String>,
}

/// Accumulated XP for one (user, dimension) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct DimensionStat {
    pub user_id: String,
    pub dimension: Dimension,
    pub total_xp: u64,
    pub level: u32,
}

/// Validate and normalize a title.
pub(crate) fn validate_title(title: &str) -> Result<String, VaultError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(VaultError::Validation("title must not be empty".into()));
    }
    if trimmed.chars().count() > TITLE_MAX_LEN {
        return Err(VaultError::Validation(format!(
            "title exceeds {} characters",
            TITLE_MAX_LEN
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_parse() {
        assert_eq!("Physical".parse::<Dimension>().unwrap(), Dimension::Physical);
        assert_eq!(" spiritual ".parse::<Dimension>().unwrap(), Dimension::Spiritual);
        assert!(matches!(
            "cosmic".parse::<Dimension>(),
            Err(VaultError::Validation(_))
        ));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("ACTIVE".parse::<QuestStatus>().unwrap(), QuestStatus::Active);
        assert!("maybe".parse::<QuestStatus>().is_err());
    }

    #[test]
    fn test_dimension_serde_lowercase() {
        let json = serde_json::to_string(&Dimension::Vocational).unwrap();
        assert_eq!(json, "\"vocational\"");
    }

    #[test]
    fn test_user_hides_secrets() {
        let mut user = User::new("veteran", "$argon2id$hash");
        user.openai_api_key = Some("sk-secret".into());
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(!json.contains("argon2id"));
    }

    #[test]
    fn test_blank_credential_is_none() {
        let mut user = User::new("noob", "hash");
        user.openai_api_key = Some("   ".into());
        assert_eq!(user.credential(), None);
    }

    #[test]
    fn test_title_bounds() {
        assert_eq!(validate_title("  Slay  ").unwrap(), "Slay");
        assert!(validate_title("   ").is_err());
        assert!(validate_title(&"x".repeat(TITLE_MAX_LEN)).is_ok());
        assert!(validate_title(&"x".repeat(TITLE_MAX_LEN + 1)).is_err());
    }
}
