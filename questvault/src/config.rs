//! Configuration for the gamification service.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::query::DEFAULT_PAGE_SIZE;

/// Configuration for a [`GamificationService`](crate::service::GamificationService).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Achievement text generation
    pub generation: GenerationConfig,
    /// Listing defaults
    pub listing: ListingConfig,
    /// Number of achievements shown on a profile
    pub recent_achievements: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            generation: GenerationConfig::default(),
            listing: ListingConfig::default(),
            recent_achievements: 5,
        }
    }
}

impl ServiceConfig {
    /// Load config from a TOML document.
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Achievement generation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Upper bound on one external generation call (ms)
    pub timeout_ms: u64,
    /// Image used when an achievement is created without one
    pub placeholder_image_url: String,
    /// Request external text for transition-generated achievements
    pub narrate_transitions: bool,
    /// Token budget for the external call
    pub max_tokens: u32,
    /// Sampling temperature for the external call
    pub temperature: f32,
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            placeholder_image_url: "https://source.unsplash.com/random/300x400?fantasy,card"
                .to_string(),
            narrate_transitions: true,
            max_tokens: 300,
            temperature: 0.9,
        }
    }
}

/// Listing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Page size for public profile listings
    pub public_page_size: u32,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            public_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}
