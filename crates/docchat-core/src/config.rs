use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DocchatError, Result};

/// Top-level configuration for a docchat client.
///
/// Loaded from `~/.docchat/config.toml` by default. Every section falls back
/// to its defaults when missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocchatConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub references: ReferenceConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

impl DocchatConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DocchatConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| DocchatError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Conversation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum user message length in characters.
    pub max_message_length: usize,
    /// Assistant greeting seeded as the first turn of a new conversation.
    pub prologue: Option<String>,
    /// Prompts offered to the user until the first user turn is sent.
    pub predefined_prompts: Vec<String>,
    /// Annotation shown on an answer that was cut short by a failure.
    pub error_marker: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 2000,
            prologue: None,
            predefined_prompts: vec![
                "What are the best practices for API error handling?".to_string(),
                "How can I optimize my website's performance?".to_string(),
                "Explain the differences between REST and GraphQL.".to_string(),
                "What are the key principles of responsive web design?".to_string(),
            ],
            error_marker: "The answer was interrupted".to_string(),
        }
    }
}

/// How an excluded document name is compared against a citation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// The document name must equal the excluded name.
    #[default]
    Exact,
    /// The document name must contain the excluded name.
    Substring,
}

/// Citation display policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// Document names that never surface as a citation.
    pub excluded_doc_names: Vec<String>,
    /// Comparison used for `excluded_doc_names`.
    pub match_mode: MatchMode,
    /// The leading assistant greeting has no entry in the conversation's
    /// reference list.
    pub skip_prologue: bool,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            excluded_doc_names: vec!["who-are-you.pdf".to_string()],
            match_mode: MatchMode::Exact,
            skip_prologue: true,
        }
    }
}

/// Shape of the `answer` field in streamed frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    /// Each frame carries the whole answer so far.
    #[default]
    Cumulative,
    /// Each frame carries only the newly generated text.
    Delta,
}

/// Streaming settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub answer_mode: AnswerMode,
}
