//! Runtime settings for the provider call and the relay itself

use std::{fs, path::Path, time::Duration};

use crate::{errors::ConfigError, relay_stream::RelayOptions};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_CONTEXT_LABEL: &str = "Context";
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// How to reach the chat-completion provider and what to send it
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamConfig {
    /// Checked per request, so a missing key turns into an `error` event rather than a crash
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    /// Extra system message sent between the prompt and the user message
    pub context: Option<String>,
    pub temperature: f32,
    pub stream_max_tokens: u32,
    pub complete_max_tokens: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_owned(),
            model: DEFAULT_MODEL.to_owned(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            context: None,
            temperature: 0.2,
            stream_max_tokens: 600,
            complete_max_tokens: 500,
        }
    }
}

impl UpstreamConfig {
    /// Reads `path` and installs it as the context block, prefixed with `label`.
    /// Blank files are ignored.
    pub fn load_context(&mut self, path: &Path, label: &str) -> Result<(), ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::ContextFile {
            path: path.to_owned(),
            source,
        })?;
        self.context = context_block(label, &text);
        Ok(())
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }
}

pub fn context_block(label: &str, text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(format!("{label}:\n{text}"))
}

/// Everything a running relay server needs
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub upstream: UpstreamConfig,
    pub relay: RelayOptions,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            relay: RelayOptions {
                idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
                ..RelayOptions::default()
            },
        }
    }
}

/// `0` switches the idle timeout off
pub fn idle_timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
