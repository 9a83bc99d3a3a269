//! Relay streamed chat completions from an OpenAI-compatible provider to browsers as
//! [Server-Sent Events](https://html.spec.whatwg.org/multipage/server-sent-events.html).
//!
//! Upstream providers stream loosely shaped JSON over SSE; this crate turns that into a small,
//! fixed vocabulary for the client:
//!
//! ```text
//! data: {"text":"<fragment>"}          zero or more, in arrival order
//! event: error
//! data: {"detail":"<message>"}         at most one, only on failure
//! event: done
//! data: {}                             exactly one, always last
//! ```
//!
//! The crate is layered so each piece can be used on its own:
//!
//! - [`LineBuffer`] - reassembles arbitrarily split upstream chunks into complete lines,
//!   tolerating `\r\n` and multi-byte UTF-8 sequences cut at a chunk boundary.
//! - [`Decoder`] - turns one line into a [`DecodedSignal`], matching the payload against an
//!   ordered table of known response shapes and falling back to the raw text.
//! - [`normalizer`] - maps signals onto [`OutboundEvent`]s.
//! - [`RelayStream`] - a [`Stream`][futures_core::Stream] adapter from any
//!   `Stream<Item = Result<impl AsRef<[u8]>, E>>` to [`OutboundEvent`]s, guaranteeing the terminal
//!   `done` exactly once and releasing the upstream as soon as it is no longer needed.
//! - [`Relay`] - adds the connect step in front of [`RelayStream`], so a failed upstream call ends
//!   the same way as a failure half way through the body.
//! - [`upstream::OpenAiUpstream`] - the [`reqwest`] client for `/chat/completions`.
//! - [`server`] (requires `server` feature) - the [`axum`] routes.
//!
//! # Relaying a byte stream
//!
//! ```rust
//! use bytes::Bytes;
//! use chat_relay::{OutboundEvent, RelayOptions, RelayStream};
//! use futures::StreamExt;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let chunks = vec![
//!     Ok::<_, std::io::Error>(Bytes::from("data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n")),
//!     Ok(Bytes::from("\ndata: [DONE]\n\n")),
//! ];
//! let events: Vec<_> = RelayStream::new(futures::stream::iter(chunks), RelayOptions::default())
//!     .collect()
//!     .await;
//!
//! assert_eq!(events, vec![OutboundEvent::Data("Hi".into()), OutboundEvent::Done]);
//! # }
//! ```
//!
//! Dropping the stream drops the upstream with it, which is how a client disconnect cancels
//! the provider call.
//!
//! # Feature flags
//!
//! | Feature | Default | Description |
//! | --- | --- | --- |
//! | `server` | on | Provides the [`axum`] router in `server` and the `chat-relay` binary. Pulls in `tokio`, `clap` and `tracing-subscriber`. |
//!
//! Without `server` the crate is just the relay pipeline and the [`reqwest`] upstream, usable
//! from any async runtime.

pub mod config;
pub(crate) mod constants;
pub mod controller;
pub mod decoder;
pub mod errors;
pub mod event;
pub mod framing;
pub mod normalizer;
pub mod relay_stream;
#[cfg(feature = "server")]
pub mod server;
pub mod upstream;

pub use controller::Relay;
pub use decoder::{Decoder, SegmentOrder};
pub use event::{DecodedSignal, OutboundEvent};
pub use framing::LineBuffer;
pub use relay_stream::{RelayOptions, RelayStream};
