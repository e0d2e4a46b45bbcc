//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::mode::TransportMode;
use crate::rpc::codec::DEFAULT_MAX_LINE_BYTES;
use crate::rpc::endpoint::{EndpointConfig, DEFAULT_QUEUE_DEPTH};
use crate::rpc::message::FieldCasing;
use crate::{AppError, Result};

/// Keychain service holding runtime credentials.
pub const KEYRING_SERVICE: &str = "acp-agent";

/// Agent loop settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct AgentConfig {
    /// Maximum LLM calls that may request tools within one prompt.
    pub max_turns: u32,
    /// Instructions placed before the tool list in every new session.
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_max_turns() -> u32 {
    10
}

fn default_system_prompt() -> String {
    "You are a helpful coding assistant. Use the available tools to inspect and \
     change files in the user's workspace when the request needs it."
        .into()
}

/// Timeout values in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Upper bound on waiting for the client to answer a reverse request.
    pub reverse_request_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            reverse_request_seconds: 60,
        }
    }
}

/// Connection resource limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct LimitsConfig {
    /// Longest accepted inbound line in bytes.
    pub max_line_bytes: usize,
    /// Depth of each connection's outbound queue.
    pub outbound_queue: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            outbound_queue: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Which language model backs the agent.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// Offline echo model.
    #[default]
    Echo,
    /// OpenAI-compatible chat-completions endpoint.
    #[serde(rename = "openai")]
    OpenAi,
}

/// Language-model settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct LlmConfig {
    /// Provider selection.
    pub provider: LlmProvider,
    /// Base URL of the chat-completions API.
    pub base_url: String,
    /// Model name sent with each request.
    pub model: String,
    /// Environment variable consulted when the keychain has no API key.
    pub api_key_env: String,
    /// HTTP timeout per completion.
    pub request_timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Echo,
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            request_timeout_seconds: 120,
        }
    }
}

/// Global configuration parsed from `config.toml`. Every key is optional.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct GlobalConfig {
    /// TCP address the agent listens on.
    pub listen_addr: String,
    /// Transport used when no CLI flag overrides it.
    pub transport: TransportMode,
    /// Payload key casing on the wire.
    pub field_casing: FieldCasing,
    /// Agent loop settings.
    pub agent: AgentConfig,
    /// Timeout settings.
    pub timeouts: TimeoutConfig,
    /// Connection limits.
    pub limits: LimitsConfig,
    /// Language-model settings.
    pub llm: LlmConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9090".into(),
            transport: TransportMode::default(),
            field_casing: FieldCasing::default(),
            agent: AgentConfig::default(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed listen address.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `listen_addr` is not `host:port`.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|err| AppError::Config(format!("listen_addr invalid: {err}")))
    }

    /// Upper bound on a single reverse request.
    #[must_use]
    pub fn reverse_request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.reverse_request_seconds)
    }

    /// Connection tunables derived from this configuration.
    #[must_use]
    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            casing: self.field_casing,
            max_line_bytes: self.limits.max_line_bytes,
            queue_depth: self.limits.outbound_queue,
        }
    }

    /// Load the language-model API key when the provider needs one.
    ///
    /// Tries the `acp-agent` keyring service first, then falls back to the
    /// environment variable named by `llm.api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither source provides the key.
    pub async fn load_llm_api_key(&self) -> Result<Option<String>> {
        match self.llm.provider {
            LlmProvider::Echo => Ok(None),
            LlmProvider::OpenAi => load_credential("llm_api_key", &self.llm.api_key_env)
                .await
                .map(Some),
        }
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_turns == 0 {
            return Err(AppError::Config(
                "agent.max_turns must be greater than zero".into(),
            ));
        }

        if self.timeouts.reverse_request_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.reverse_request_seconds must be greater than zero".into(),
            ));
        }

        if self.limits.max_line_bytes == 0 || self.limits.outbound_queue == 0 {
            return Err(AppError::Config(
                "limits.max_line_bytes and limits.outbound_queue must be greater than zero".into(),
            ));
        }

        if self.llm.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "llm.request_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.llm.provider == LlmProvider::OpenAi && self.llm.base_url.trim().is_empty() {
            return Err(AppError::Config(
                "llm.base_url must be set for the openai provider".into(),
            ));
        }

        self.listen_addr()?;
        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}
