//! HTTP surface: the streaming relay route and the one-shot completion route

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{
        StatusCode,
        header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::post,
};
use futures_util::StreamExt;
use serde_json::{Value, json};

use crate::{
    constants::PLACEHOLDER_MESSAGE,
    controller::Relay,
    errors::{RequestError, UpstreamError},
    relay_stream::RelayOptions,
    upstream::ChatUpstream,
};

/// Shared application state.
pub struct AppState<U> {
    pub upstream: Arc<U>,
    pub options: RelayOptions,
}

impl<U> AppState<U> {
    pub fn new(upstream: U, options: RelayOptions) -> Self {
        Self {
            upstream: Arc::new(upstream),
            options,
        }
    }
}

// derive(Clone) would want U: Clone
impl<U> Clone for AppState<U> {
    fn clone(&self) -> Self {
        Self {
            upstream: Arc::clone(&self.upstream),
            options: self.options,
        }
    }
}

pub fn build_router<U: ChatUpstream>(state: AppState<U>) -> Router {
    Router::new()
        .route("/api/agent/stream", post(stream_reply::<U>))
        .route("/api/agent", post(complete_reply::<U>))
        .with_state(state)
}

/// Pulls the user message out of a request body. Anything that isn't a non-blank string falls
/// back to the placeholder. The message comes back as sent, each route decides on trimming.
pub fn parse_message(body: &[u8]) -> Result<String, RequestError> {
    let value: Value = serde_json::from_slice(body)?;
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or(PLACEHOLDER_MESSAGE);
    Ok(message.to_owned())
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        tracing::debug!(error = %self, "rejecting request");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// `POST /api/agent/stream`: relays the provider's stream as `data`/`error`/`done` events.
/// Once the body starts, failures travel as events and the status stays 200.
pub async fn stream_reply<U: ChatUpstream>(
    State(state): State<AppState<U>>,
    body: Bytes,
) -> Response {
    let message = match parse_message(&body) {
        Ok(message) => message,
        Err(e) => return e.into_response(),
    };
    let message = message.trim();
    tracing::debug!(chars = message.chars().count(), "opening relay");

    let relay = Relay::new(state.upstream.open_stream(message), state.options);
    let frames = relay.map(|event| Ok::<_, Infallible>(event.to_frame()));

    (
        [
            (CONTENT_TYPE, "text/event-stream; charset=utf-8"),
            (CACHE_CONTROL, "no-cache, no-transform"),
            (CONNECTION, "keep-alive"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

fn completion_error(e: UpstreamError) -> Response {
    let (status, error) = if e.is_config() {
        (StatusCode::INTERNAL_SERVER_ERROR, "OpenAI Configuration error")
    } else if e.is_transport() {
        (StatusCode::GATEWAY_TIMEOUT, "Network error")
    } else if matches!(e, UpstreamError::Decode(_)) {
        (StatusCode::BAD_GATEWAY, "LLM error")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "LLM error")
    };
    tracing::warn!(%status, error = %e, "completion failed");
    (status, Json(json!({ "error": error, "detail": e.to_string() }))).into_response()
}

/// `POST /api/agent`: one non-streamed completion as `{"text": ...}`. The message goes upstream
/// untrimmed.
pub async fn complete_reply<U: ChatUpstream>(
    State(state): State<AppState<U>>,
    body: Bytes,
) -> Response {
    let message = match parse_message(&body) {
        Ok(message) => message,
        Err(e) => return e.into_response(),
    };

    match state.upstream.complete(&message).await {
        Ok(text) => Json(json!({ "text": text })).into_response(),
        Err(e) => completion_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use futures_core::future::BoxFuture;
    use futures_util::FutureExt;
    use std::sync::Mutex;
    use tower::ServiceExt;

    use crate::{
        errors::ConfigError,
        upstream::UpstreamBody,
    };

    /// Canned provider: fixed chunks, or a fixed failure
    #[derive(Default)]
    struct FakeUpstream {
        chunks: Vec<&'static str>,
        fail_with: Option<fn() -> UpstreamError>,
        seen: Mutex<Vec<String>>,
    }

    impl FakeUpstream {
        fn streaming(chunks: &[&'static str]) -> Self {
            Self {
                chunks: chunks.to_vec(),
                ..Self::default()
            }
        }

        fn failing(fail_with: fn() -> UpstreamError) -> Self {
            Self {
                fail_with: Some(fail_with),
                ..Self::default()
            }
        }
    }

    impl ChatUpstream for FakeUpstream {
        fn open_stream(
            &self,
            message: &str,
        ) -> BoxFuture<'static, Result<UpstreamBody, UpstreamError>> {
            self.seen.lock().unwrap().push(message.to_owned());
            let result = match self.fail_with {
                Some(fail) => Err(fail()),
                None => Ok(futures_util::stream::iter(
                    self.chunks
                        .iter()
                        .map(|chunk| Ok::<_, UpstreamError>(Bytes::from_static(chunk.as_bytes())))
                        .collect::<Vec<_>>(),
                )
                .boxed()),
            };
            futures_util::future::ready(result).boxed()
        }

        fn complete(&self, message: &str) -> BoxFuture<'static, Result<String, UpstreamError>> {
            self.seen.lock().unwrap().push(message.to_owned());
            let result = match self.fail_with {
                Some(fail) => Err(fail()),
                None => Ok(self.chunks.concat()),
            };
            futures_util::future::ready(result).boxed()
        }
    }

    fn missing_key() -> UpstreamError {
        ConfigError::MissingVariable("OPENAI_API_KEY").into()
    }

    fn unauthorized() -> UpstreamError {
        UpstreamError::Status {
            status: reqwest::StatusCode::UNAUTHORIZED,
            detail: "invalid api key".to_owned(),
        }
    }

    fn bad_body() -> UpstreamError {
        let mut deserializer = serde_json::Deserializer::from_str("{\"choices\":7}");
        serde_path_to_error::deserialize::<_, Vec<u8>>(&mut deserializer)
            .unwrap_err()
            .into()
    }

    fn unreachable() -> UpstreamError {
        reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err()
            .into()
    }

    /// Send a request and return (status, content type, body text).
    async fn post_to(
        upstream: Arc<FakeUpstream>,
        uri: &str,
        body: &str,
    ) -> (StatusCode, Option<String>, String) {
        let app = build_router(AppState {
            upstream,
            options: RelayOptions::default(),
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_owned()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .map(|value| value.to_str().unwrap().to_owned());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, String::from_utf8_lossy(&body).into_owned())
    }

    #[test]
    fn message_defaults() {
        assert_eq!(parse_message(b"{\"message\":\"  hi  \"}").unwrap(), "  hi  ");
        assert_eq!(parse_message(b"{\"message\":\"   \"}").unwrap(), "Hello");
        assert_eq!(parse_message(b"{\"message\":42}").unwrap(), "Hello");
        assert_eq!(parse_message(b"{}").unwrap(), "Hello");
        assert_eq!(parse_message(b"[1,2]").unwrap(), "Hello");
        assert!(parse_message(b"{nope").is_err());
        assert!(parse_message(b"").is_err());
    }

    #[tokio::test]
    async fn stream_route_relays_fragments() {
        let upstream = Arc::new(FakeUpstream::streaming(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"cho",
            "ices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]));
        let (status, content_type, text) =
            post_to(upstream.clone(), "/api/agent/stream", "{\"message\":\" hi \"}").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/event-stream; charset=utf-8"));
        assert_eq!(
            text,
            "data: {\"text\":\"Hel\"}\n\ndata: {\"text\":\"lo\"}\n\nevent: done\ndata: {}\n\n"
        );
        assert_eq!(*upstream.seen.lock().unwrap(), vec!["hi".to_owned()]);
    }

    #[tokio::test]
    async fn stream_route_sends_sse_headers() {
        let app = build_router(AppState::new(
            FakeUpstream::streaming(&["data: [DONE]\n"]),
            RelayOptions::default(),
        ));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/agent/stream")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(headers[CACHE_CONTROL], "no-cache, no-transform");
        assert_eq!(headers[CONNECTION], "keep-alive");
    }

    #[tokio::test]
    async fn stream_route_invalid_json_is_400() {
        let upstream = Arc::new(FakeUpstream::streaming(&[]));
        let (status, _, text) = post_to(upstream.clone(), "/api/agent/stream", "{oops").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, "{\"error\":\"Invalid JSON body\"}");
        assert!(upstream.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stream_route_upstream_rejection_is_error_then_done() {
        let upstream = Arc::new(FakeUpstream::failing(unauthorized));
        let (status, _, text) = post_to(upstream, "/api/agent/stream", "{}").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            text,
            "event: error\ndata: {\"detail\":\"invalid api key\"}\n\nevent: done\ndata: {}\n\n"
        );
    }

    #[tokio::test]
    async fn stream_route_missing_key_is_error_then_done() {
        let upstream = Arc::new(FakeUpstream::failing(missing_key));
        let (_, _, text) = post_to(upstream, "/api/agent/stream", "{\"message\":\"hi\"}").await;

        assert_eq!(
            text,
            "event: error\ndata: {\"detail\":\"Missing required environment variable: OPENAI_API_KEY\"}\n\nevent: done\ndata: {}\n\n"
        );
    }

    #[tokio::test]
    async fn complete_route_returns_text() {
        let upstream = Arc::new(FakeUpstream::streaming(&["The answer", " is 4."]));
        let (status, _, text) = post_to(upstream, "/api/agent", "{\"message\":\"2+2?\"}").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "{\"text\":\"The answer is 4.\"}");
    }

    #[tokio::test]
    async fn complete_route_sends_message_untrimmed() {
        let upstream = Arc::new(FakeUpstream::streaming(&["ok"]));
        post_to(upstream.clone(), "/api/agent", "{\"message\":\"  2+2?\\n\"}").await;
        post_to(upstream.clone(), "/api/agent", "{\"message\":\" \\t \"}").await;

        assert_eq!(
            *upstream.seen.lock().unwrap(),
            vec!["  2+2?\n".to_owned(), "Hello".to_owned()]
        );
    }

    #[tokio::test]
    async fn complete_route_status_mapping() {
        let cases: [(fn() -> UpstreamError, StatusCode, &str); 4] = [
            (missing_key, StatusCode::INTERNAL_SERVER_ERROR, "OpenAI Configuration error"),
            (unauthorized, StatusCode::INTERNAL_SERVER_ERROR, "LLM error"),
            (bad_body, StatusCode::BAD_GATEWAY, "LLM error"),
            (unreachable, StatusCode::GATEWAY_TIMEOUT, "Network error"),
        ];

        for (fail, expected_status, expected_error) in cases {
            let upstream = Arc::new(FakeUpstream::failing(fail));
            let (status, _, text) = post_to(upstream, "/api/agent", "{}").await;
            let body: Value = serde_json::from_str(&text).unwrap();

            assert_eq!(status, expected_status);
            assert_eq!(body["error"], expected_error);
            assert!(body["detail"].as_str().is_some_and(|d| !d.is_empty()));
        }

        let (status, _, _) = post_to(
            Arc::new(FakeUpstream::streaming(&[])),
            "/api/agent",
            "not json",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
