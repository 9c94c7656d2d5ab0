use std::io::Write;

use guild_core::config::{AppConfig, CredentialRule};
use guild_core::error::GuildError;
use guild_core::types::RequirementId;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[simulation]
max_concurrency = 2
node_timeout_secs = 15

[simulation.inputs]
region = "emea"
score = 75

[events]
capacity = 64

[[credentials]]
id = "stripe_api_key"
name = "Stripe API Key"
description = "To read revenue data"
placeholder = "sk_test_..."
tools = ["Stripe API"]
rule = { type = "prefix", prefix = "sk_", min_length = 20 }

[[credentials]]
id = "hubspot_token"
name = "HubSpot Token"
tools = ["HubSpot API"]
rule = { type = "pattern", regex = "^pat-[a-z0-9-]+$" }
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.simulation.max_concurrency, 2);
    assert_eq!(config.simulation.node_timeout_secs, 15);
    assert_eq!(
        config.simulation.inputs.get("region"),
        Some(&serde_json::json!("emea"))
    );
    assert_eq!(config.events.capacity, 64);

    let reqs = config.requirements();
    assert_eq!(reqs.len(), 2);
    assert_eq!(reqs[0].id, RequirementId::new("stripe_api_key"));
    assert!(reqs[0].covers_tool("stripe api"));
    assert!(reqs[0].validate("sk_test_12345678901234"));
    assert!(!reqs[0].validate("pk_live_x"));
    assert!(reqs[1].validate("pat-na1-abc"));
    assert!(!reqs[1].validate("token"));
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("GUILD_TEST_REGION", "apac");

    let toml_content = r#"
[simulation.inputs]
region = "${GUILD_TEST_REGION}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(
        config.simulation.inputs.get("region"),
        Some(&serde_json::json!("apac"))
    );

    std::env::remove_var("GUILD_TEST_REGION");
}

#[test]
fn test_minimal_config_uses_builtin_catalog() {
    let toml_content = r#"
[events]
capacity = 128
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.simulation.max_concurrency, 4);
    assert_eq!(config.simulation.node_timeout_secs, 60);
    assert!(config.simulation.inputs.is_empty());
    assert!(config.credentials.is_empty());

    let ids: Vec<String> = config
        .requirements()
        .iter()
        .map(|r| r.id.as_str().to_string())
        .collect();
    assert_eq!(
        ids,
        vec!["stripe_api_key", "slack_webhook_url", "elevenlabs_voice_id"]
    );
}

#[test]
fn test_missing_rule_defaults_to_non_empty() {
    let config = AppConfig::parse(
        r#"
[[credentials]]
id = "notion_token"
name = "Notion Token"
"#,
    )
    .expect("parse config");

    assert_eq!(config.credentials[0].rule, CredentialRule::NonEmpty);
    assert!(config.credentials[0].validate("x"));
    assert!(!config.credentials[0].validate("   "));
}

#[test]
fn test_missing_file_is_reported() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/guild.toml")).unwrap_err();
    assert!(matches!(err, GuildError::ConfigNotFound(_)));
}

#[test]
fn test_zero_concurrency_is_rejected() {
    let err = AppConfig::parse("[simulation]\nmax_concurrency = 0\n").unwrap_err();
    assert!(matches!(err, GuildError::Config(msg) if msg.contains("max_concurrency")));
}

#[test]
fn test_bad_pattern_is_rejected() {
    let err = AppConfig::parse(
        r#"
[[credentials]]
id = "broken"
name = "Broken"
rule = { type = "pattern", regex = "([a-z" }
"#,
    )
    .unwrap_err();
    assert!(matches!(err, GuildError::Config(msg) if msg.contains("([a-z")));
}

#[test]
fn test_duplicate_requirement_is_rejected() {
    let err = AppConfig::parse(
        r#"
[[credentials]]
id = "stripe_api_key"
name = "Stripe"

[[credentials]]
id = "stripe_api_key"
name = "Stripe again"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, GuildError::Config(msg) if msg.contains("duplicate")));
}
