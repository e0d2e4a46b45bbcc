//! Unit tests for configuration parsing and validation.

use std::io::Write;
use std::time::Duration;

use acp_agent::config::{GlobalConfig, LlmProvider};
use acp_agent::mode::TransportMode;
use acp_agent::rpc::codec::DEFAULT_MAX_LINE_BYTES;
use acp_agent::rpc::message::FieldCasing;
use acp_agent::AppError;

// ── Defaults ────────────────────────────────────────────────────────────────

/// An empty file yields the documented defaults.
#[test]
fn empty_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty config is valid");

    assert_eq!(config, GlobalConfig::default());
    assert_eq!(config.agent.max_turns, 10);
    assert_eq!(config.transport, TransportMode::Tcp);
    assert_eq!(config.field_casing, FieldCasing::Camel);
    assert_eq!(config.reverse_request_timeout(), Duration::from_secs(60));
    assert_eq!(config.limits.max_line_bytes, DEFAULT_MAX_LINE_BYTES);
    assert_eq!(config.llm.provider, LlmProvider::Echo);
    assert_eq!(
        config.listen_addr().expect("default addr").to_string(),
        "127.0.0.1:9090"
    );
}

// ── Parsing ─────────────────────────────────────────────────────────────────

/// Every section can be overridden.
#[test]
fn full_config_parses() {
    let toml = r#"
listen_addr = "0.0.0.0:7000"
transport = "stdio"
field_casing = "snake"

[agent]
max_turns = 4
system_prompt = "Be terse."

[timeouts]
reverse_request_seconds = 5

[limits]
max_line_bytes = 4096
outbound_queue = 8

[llm]
provider = "openai"
base_url = "http://localhost:8080/v1"
model = "local-model"
api_key_env = "LOCAL_KEY"
request_timeout_seconds = 30
"#;

    let config = GlobalConfig::from_toml_str(toml).expect("valid config");

    assert_eq!(config.transport, TransportMode::Stdio);
    assert_eq!(config.field_casing, FieldCasing::Snake);
    assert_eq!(config.agent.max_turns, 4);
    assert_eq!(config.agent.system_prompt, "Be terse.");
    assert_eq!(config.reverse_request_timeout(), Duration::from_secs(5));
    assert_eq!(config.llm.provider, LlmProvider::OpenAi);
    assert_eq!(config.llm.model, "local-model");

    let endpoint = config.endpoint_config();
    assert_eq!(endpoint.casing, FieldCasing::Snake);
    assert_eq!(endpoint.max_line_bytes, 4096);
    assert_eq!(endpoint.queue_depth, 8);
}

/// Configuration loads from a file on disk.
#[test]
fn config_loads_from_path() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "[agent]\nmax_turns = 3").expect("write config");

    let config = GlobalConfig::load_from_path(file.path()).expect("load");

    assert_eq!(config.agent.max_turns, 3);
}

// ── Validation ──────────────────────────────────────────────────────────────

/// Zero limits and malformed values are rejected as config errors.
#[test]
fn invalid_values_are_rejected() {
    for toml in [
        "[agent]\nmax_turns = 0",
        "[timeouts]\nreverse_request_seconds = 0",
        "[limits]\nmax_line_bytes = 0",
        "[limits]\noutbound_queue = 0",
        "[llm]\nrequest_timeout_seconds = 0",
        "[llm]\nprovider = \"openai\"\nbase_url = \"  \"",
        "listen_addr = \"not an address\"",
        "transport = \"carrier-pigeon\"",
        "[agent]\nmax_turns = \"ten\"",
    ] {
        let err = GlobalConfig::from_toml_str(toml).expect_err(toml);
        assert!(matches!(err, AppError::Config(_)), "{toml}: {err:?}");
    }
}

/// A missing file is a config error.
#[test]
fn missing_file_is_config_error() {
    let err = GlobalConfig::load_from_path("/definitely/not/here.toml").expect_err("must fail");

    assert!(matches!(err, AppError::Config(_)));
}

// ── Credentials ─────────────────────────────────────────────────────────────

/// The echo provider never asks for a key.
#[tokio::test]
async fn echo_provider_needs_no_key() {
    let config = GlobalConfig::default();

    let key = config.load_llm_api_key().await.expect("no key needed");

    assert_eq!(key, None);
}
