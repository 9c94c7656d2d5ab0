use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context::ValueEnvironment;
use crate::error::{GuildError, Result};
use crate::types::RequirementId;

/// Top-level Guild configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub events: EventsConfig,
    /// Credential requirement catalog. Empty means the built-in catalog.
    #[serde(default)]
    pub credentials: Vec<CredentialRequirement>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            events: EventsConfig::default(),
            credentials: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Maximum agent nodes executing at once (1 = strictly sequential).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-node executor timeout in seconds (0 = no timeout).
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
    /// Initial values visible to conditions and agents.
    #[serde(default)]
    pub inputs: ValueEnvironment,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            node_timeout_secs: default_node_timeout_secs(),
            inputs: ValueEnvironment::default(),
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}

fn default_node_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

fn default_event_capacity() -> usize {
    256
}

/// A credential the Guild needs before it can be simulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRequirement {
    pub id: RequirementId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default)]
    pub instructions: Vec<String>,
    /// Blueprint tool names that need this credential.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub rule: CredentialRule,
}

impl CredentialRequirement {
    pub fn new(id: impl Into<String>, name: impl Into<String>, rule: CredentialRule) -> Self {
        Self {
            id: RequirementId::new(id),
            name: name.into(),
            description: String::new(),
            placeholder: String::new(),
            instructions: vec![],
            tools: vec![],
            rule,
        }
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn with_instructions(mut self, steps: &[&str]) -> Self {
        self.instructions = steps.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Whether a blueprint tool name maps to this requirement (case-insensitive).
    pub fn covers_tool(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t.eq_ignore_ascii_case(tool.trim()))
    }

    pub fn validate(&self, value: &str) -> bool {
        self.rule.validate(value)
    }
}

/// Format rule for a credential value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialRule {
    /// Any non-empty value.
    #[default]
    NonEmpty,
    /// Strictly longer than `min_length` characters.
    MinLength { min_length: usize },
    /// Starts with `prefix` and is strictly longer than `min_length` characters.
    Prefix {
        prefix: String,
        #[serde(default)]
        min_length: usize,
    },
    /// Matches the regular expression.
    Pattern { regex: CredentialPattern },
}

/// A credential pattern, compiled once when the rule is built or loaded.
///
/// Serialized as its source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CredentialPattern(regex::Regex);

impl CredentialPattern {
    pub fn new(source: &str) -> std::result::Result<Self, regex::Error> {
        regex::Regex::new(source).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.0.is_match(value)
    }
}

impl PartialEq for CredentialPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl TryFrom<String> for CredentialPattern {
    type Error = String;

    fn try_from(source: String) -> std::result::Result<Self, Self::Error> {
        Self::new(&source).map_err(|e| format!("invalid credential pattern `{source}`: {e}"))
    }
}

impl From<CredentialPattern> for String {
    fn from(pattern: CredentialPattern) -> Self {
        pattern.as_str().to_string()
    }
}

impl CredentialRule {
    pub fn validate(&self, value: &str) -> bool {
        match self {
            Self::NonEmpty => !value.trim().is_empty(),
            Self::MinLength { min_length } => value.chars().count() > *min_length,
            Self::Prefix { prefix, min_length } => {
                value.starts_with(prefix.as_str()) && value.chars().count() > *min_length
            }
            Self::Pattern { regex } => regex.is_match(value),
        }
    }
}

/// The catalog used when the config does not define one.
pub fn builtin_requirements() -> Vec<CredentialRequirement> {
    vec![
        CredentialRequirement::new(
            "stripe_api_key",
            "Stripe API Key",
            CredentialRule::Prefix {
                prefix: "sk_".into(),
                min_length: 20,
            },
        )
        .with_description("To fetch MRR and revenue data")
        .with_placeholder("sk_test_...")
        .with_instructions(&[
            "Go to Stripe Dashboard -> Developers -> API Keys",
            "Copy your \"Secret key\" (starts with sk_)",
            "Use test key for development, live key for production",
        ])
        .with_tools(&["Stripe API", "Stripe Customer API"]),
        CredentialRequirement::new(
            "slack_webhook_url",
            "Slack Webhook URL",
            CredentialRule::Prefix {
                prefix: "https://hooks.slack.com/services/".into(),
                min_length: 0,
            },
        )
        .with_description("To send notifications to your team channel")
        .with_placeholder("https://hooks.slack.com/services/...")
        .with_instructions(&[
            "Go to your Slack workspace -> Apps -> Incoming Webhooks",
            "Click \"Add to Slack\" and choose your channel",
            "Copy the webhook URL provided",
        ])
        .with_tools(&["Slack API"]),
        CredentialRequirement::new(
            "elevenlabs_voice_id",
            "ElevenLabs Voice ID",
            CredentialRule::MinLength { min_length: 10 },
        )
        .with_description("For agent voice synthesis")
        .with_placeholder("21m00Tcm4TlvDq8ikWAM")
        .with_instructions(&[
            "Sign up at ElevenLabs.io",
            "Go to VoiceLab and choose a voice",
            "Copy the Voice ID from the voice settings",
        ])
        .with_tools(&["ElevenLabs API", "ElevenLabs Voice API"]),
    ]
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| GuildError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        let config: AppConfig =
            toml::from_str(&expanded).map_err(|e| GuildError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// The effective credential catalog.
    pub fn requirements(&self) -> Vec<CredentialRequirement> {
        if self.credentials.is_empty() {
            builtin_requirements()
        } else {
            self.credentials.clone()
        }
    }

    fn check(&self) -> Result<()> {
        if self.simulation.max_concurrency == 0 {
            return Err(GuildError::Config(
                "simulation.max_concurrency must be at least 1".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for req in &self.credentials {
            if !seen.insert(req.id.clone()) {
                return Err(GuildError::Config(format!(
                    "duplicate credential requirement: {}",
                    req.id
                )));
            }
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
