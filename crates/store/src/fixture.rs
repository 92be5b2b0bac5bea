//! TOML description of the bots, models and providers an in-memory store
//! starts with.
//!
//! ```toml
//! [[providers]]
//! id = "openai"
//! client_type = "openai"
//! api_key = "sk-..."
//!
//! [[models]]
//! id = "m-gpt"
//! model_id = "gpt-4o"
//! provider_id = "openai"
//! context_window = 128000
//!
//! [[bots]]
//! id = "bot-1"
//! [bots.settings]
//! chat_model_id = "gpt-4o"
//! ```

use std::path::Path;

use flowgate_core::bot::BotPrompts;
use flowgate_core::model::{ChatModel, LlmProvider};
use flowgate_core::settings::BotSettings;
use flowgate_core::skill::SkillEntry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Failed to read fixture {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse fixture: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid fixture: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub providers: Vec<LlmProvider>,
    pub models: Vec<ChatModel>,
    pub bots: Vec<BotFixture>,
    pub identities: Vec<IdentityFixture>,
    pub chats: Vec<ChatFixture>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotFixture {
    pub id: String,
    pub settings: BotSettings,
    pub prompts: BotPrompts,
    pub container_id: String,
    /// Returned by the knowledge context loader for every query
    pub knowledge: String,
    pub skills: Vec<SkillEntry>,
}

/// A channel identity and the name it is shown with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityFixture {
    pub id: String,
    pub display_name: String,
}

/// Per-chat overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatFixture {
    pub id: String,
    /// Owner of the seeded summary
    pub bot_id: String,
    pub model_id: String,
    pub summary: String,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        let content = std::fs::read_to_string(path).map_err(|source| FixtureError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, FixtureError> {
        let fixture: Fixture = toml::from_str(content)?;
        fixture.validate()?;
        Ok(fixture)
    }

    /// Every model must name a known provider, and ids must be set.
    pub fn validate(&self) -> Result<(), FixtureError> {
        if let Some(p) = self.providers.iter().find(|p| p.id.trim().is_empty()) {
            return Err(FixtureError::Invalid(format!("provider {:?} has no id", p.name)));
        }
        for model in &self.models {
            if model.id.trim().is_empty() {
                return Err(FixtureError::Invalid(format!("model {:?} has no id", model.model_id)));
            }
            if !self.providers.iter().any(|p| p.id == model.provider_id) {
                return Err(FixtureError::Invalid(format!(
                    "model {} references unknown provider {:?}",
                    model.id, model.provider_id
                )));
            }
        }
        if self.bots.iter().any(|b| b.id.trim().is_empty()) {
            return Err(FixtureError::Invalid("bot without id".into()));
        }
        Ok(())
    }

    /// A single-bot fixture around one provider and model.
    pub fn single_bot(bot_id: &str, provider: LlmProvider, model: ChatModel) -> Self {
        let bot = BotFixture {
            id: bot_id.to_string(),
            settings: BotSettings {
                chat_model_id: model.model_id.clone(),
                ..Default::default()
            },
            ..Default::default()
        };
        Self {
            providers: vec![provider],
            models: vec![model],
            bots: vec![bot],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[providers]]
id = "p1"
name = "OpenAI"
client_type = "openai"
api_key = "sk-test"

[[models]]
id = "m1"
model_id = "gpt-4o"
provider_id = "p1"
context_window = 128000
fallback_model_id = "m2"

[[models]]
id = "m2"
model_id = "gpt-4o-mini"
provider_id = "p1"

[[bots]]
id = "bot-1"
container_id = "ctr-1"
[bots.settings]
chat_model_id = "gpt-4o"
dm_history_limit = 5
[bots.prompts]
identity = "You are Ada."
[[bots.skills]]
name = "weather"
description = "Look up forecasts"

[[identities]]
id = "ci-1"
display_name = "Grace"
"#;

    #[test]
    fn parses_sample() {
        let fixture = Fixture::parse(SAMPLE).unwrap();
        assert_eq!(fixture.providers.len(), 1);
        assert_eq!(fixture.models[0].fallback_model_id, "m2");
        let bot = &fixture.bots[0];
        assert_eq!(bot.settings.dm_history_limit, 5);
        assert_eq!(bot.prompts.identity, "You are Ada.");
        assert!(bot.prompts.allow_self_evolution);
        assert_eq!(bot.skills[0].name, "weather");
        assert_eq!(fixture.identities[0].display_name, "Grace");
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = Fixture::parse(
            r#"
[[models]]
id = "m1"
model_id = "x"
provider_id = "missing"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, FixtureError::Invalid(msg) if msg.contains("missing")));
    }

    #[test]
    fn load_reports_path() {
        let err = Fixture::load(Path::new("/nonexistent/fixture.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/fixture.toml"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let fixture = Fixture::load(&path).unwrap();
        assert_eq!(fixture.bots[0].container_id, "ctr-1");
    }
}
