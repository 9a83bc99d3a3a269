//! Error types used across the crate.
//!
//! Every one of these ends up as text in an `error` event (or a JSON error body for the one-shot
//! route); nothing here ever reaches the client as a bare protocol failure.

use thiserror::Error;

/// Bad configuration, reported per request rather than at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVariable(&'static str),

    #[error("failed to read context file {path}: {source}")]
    ContextFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The client body could not be understood, nothing is sent upstream
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Invalid JSON body")]
    InvalidJson(#[from] serde_json::Error),
}

/// Failures talking to the chat-completion provider
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Connection refused, reset mid-body, TLS failure, ...
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// Non-success status, `detail` is the provider's own error text
    #[error("{detail}")]
    Status {
        status: reqwest::StatusCode,
        detail: String,
    },

    /// A one-shot response body that doesn't look like a chat completion
    #[error("unexpected completion body: {0}")]
    Decode(#[from] serde_path_to_error::Error<serde_json::Error>),
}

impl UpstreamError {
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Connect, timeout and body read failures, as opposed to the provider answering with an error
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport_failure() -> UpstreamError {
        reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err()
            .into()
    }

    #[test]
    fn classification() {
        let missing: UpstreamError = ConfigError::MissingVariable("OPENAI_API_KEY").into();
        assert!(missing.is_config());
        assert!(!missing.is_transport());

        let transport = transport_failure();
        assert!(transport.is_transport());
        assert!(!transport.is_config());

        let rejected = UpstreamError::Status {
            status: reqwest::StatusCode::BAD_GATEWAY,
            detail: "upstream down".to_owned(),
        };
        assert!(!rejected.is_config());
        assert!(!rejected.is_transport());
        assert_eq!(rejected.to_string(), "upstream down");
    }
}
