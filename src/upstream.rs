//! The chat-completion provider, reached over [`reqwest`]

use std::sync::Arc;

use bytes::Bytes;
use futures_core::{
    future::BoxFuture,
    stream::BoxStream,
};
use futures_util::{FutureExt, StreamExt, TryStreamExt};
use http_body_util::BodyDataStream;
use reqwest::{
    Body, Client, RequestBuilder, Response,
    header::{ACCEPT, HeaderValue},
};
use serde::{Deserialize, Serialize};

use crate::{
    config::UpstreamConfig,
    constants::GENERIC_UPSTREAM_ERROR,
    errors::{ConfigError, UpstreamError},
};

/// Raw SSE bytes of an upstream response body
pub type UpstreamBody = BoxStream<'static, Result<Bytes, UpstreamError>>;

/// Where relays get their bytes from. The server only talks to the provider through this.
pub trait ChatUpstream: Send + Sync + 'static {
    /// Start a streaming completion for `message`. Resolves once the provider has answered with a
    /// success status; the body is read by the caller.
    fn open_stream(&self, message: &str) -> BoxFuture<'static, Result<UpstreamBody, UpstreamError>>;

    /// One-shot completion, returns the whole assistant message
    fn complete(&self, message: &str) -> BoxFuture<'static, Result<String, UpstreamError>>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` endpoint
#[derive(Debug, Clone)]
pub struct OpenAiUpstream {
    client: Client,
    config: Arc<UpstreamConfig>,
}

impl OpenAiUpstream {
    pub fn new(config: UpstreamConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: UpstreamConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn messages<'a>(&'a self, message: &'a str) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(3);
        messages.push(ChatMessage {
            role: "system",
            content: &self.config.system_prompt,
        });
        if let Some(context) = &self.config.context {
            messages.push(ChatMessage {
                role: "system",
                content: context,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: message,
        });
        messages
    }

    /// Builds the provider request, failing early when there is no credential to send
    pub fn request(&self, message: &str, stream: bool) -> Result<RequestBuilder, ConfigError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingVariable("OPENAI_API_KEY"))?;

        let body = ChatRequest {
            model: &self.config.model,
            messages: self.messages(message),
            temperature: self.config.temperature,
            max_tokens: if stream {
                self.config.stream_max_tokens
            } else {
                self.config.complete_max_tokens
            },
            stream,
        };

        let mut request = self.client.post(self.endpoint()).bearer_auth(api_key).json(&body);
        if stream {
            request = request.header(ACCEPT, HeaderValue::from_static("text/event-stream"));
        }
        Ok(request)
    }
}

// Turns a non-success status into an error carrying the provider's own text
async fn check_status(response: Response) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let detail = response.text().await.unwrap_or_default();
    let detail = if detail.trim().is_empty() {
        GENERIC_UPSTREAM_ERROR.to_owned()
    } else {
        detail
    };
    tracing::warn!(%status, "upstream rejected request");
    Err(UpstreamError::Status { status, detail })
}

fn response_to_stream(response: Response) -> UpstreamBody {
    BodyDataStream::new(Body::from(response))
        .map_err(UpstreamError::Transport)
        .boxed()
}

impl ChatUpstream for OpenAiUpstream {
    fn open_stream(&self, message: &str) -> BoxFuture<'static, Result<UpstreamBody, UpstreamError>> {
        let request = self.request(message, true);
        async move {
            let response = request?.send().await?;
            let response = check_status(response).await?;
            Ok(response_to_stream(response))
        }
        .boxed()
    }

    fn complete(&self, message: &str) -> BoxFuture<'static, Result<String, UpstreamError>> {
        let request = self.request(message, false);
        async move {
            let response = request?.send().await?;
            let body = check_status(response).await?.bytes().await?;

            let mut deserializer = serde_json::Deserializer::from_slice(&body);
            let completion: ChatCompletion = serde_path_to_error::deserialize(&mut deserializer)?;

            Ok(completion
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message)
                .and_then(|message| message.content)
                .unwrap_or_default())
        }
        .boxed()
    }
}
