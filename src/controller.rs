//! One relay per client request, from the upstream call to the last `done`.
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Terminating -> Closed
//!            |                            ^
//!            +---- error / bad status ----+
//! ```
//!
//! [`Relay`] is lazy: nothing goes upstream until the downstream transport first polls it.
//! Streaming and the terminal guarantees are delegated to [`RelayStream`].

use core::{
    fmt::Display,
    future::Future,
    pin::Pin,
    task::{Context, Poll, ready},
};
use std::collections::VecDeque;

use futures_core::Stream;
use pin_project_lite::pin_project;

use crate::{
    event::OutboundEvent,
    normalizer::failure,
    relay_stream::{RelayOptions, RelayStream},
};

pin_project! {
    #[project = RelayStateProjection]
    enum RelayState<F, S> {
        Connecting {
            #[pin]
            future: F,
        },
        Streaming {
            #[pin]
            stream: RelayStream<S>,
        },
        // only reached without ever streaming, RelayStream terminates itself
        Terminating {
            pending: VecDeque<OutboundEvent>,
        },
        Closed,
    }
}

pin_project! {
    /// [`Stream`] of [`OutboundEvent`]s for a single client request.
    ///
    /// `F` opens the upstream and resolves to its byte stream `S`; a failed connect becomes an
    /// `error` event followed by `done`, the same as a failure half way through the body.
    pub struct Relay<F, S> {
        #[pin]
        state: RelayState<F, S>,
        options: RelayOptions,
    }
}

impl<F, S> Relay<F, S> {
    pub fn new<CE>(connect: F, options: RelayOptions) -> Self
    where
        F: Future<Output = Result<S, CE>>,
    {
        Self {
            state: RelayState::Connecting { future: connect },
            options,
        }
    }

    /// A relay that never goes upstream, e.g. because the credential is missing.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            state: RelayState::Terminating {
                pending: VecDeque::from(failure(detail)),
            },
            options: RelayOptions::default(),
        }
    }
}

impl<F, S, E, B, CE> Stream for Relay<F, S>
where
    F: Future<Output = Result<S, CE>>,
    CE: Display,
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    type Item = OutboundEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            match this.state.as_mut().project() {
                RelayStateProjection::Connecting { future } => match ready!(future.poll(cx)) {
                    Ok(stream) => {
                        tracing::debug!("upstream connected, streaming");
                        let stream = RelayStream::new(stream, *this.options);
                        this.state.set(RelayState::Streaming { stream });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "upstream call failed");
                        this.state.set(RelayState::Terminating {
                            pending: VecDeque::from(failure(e.to_string())),
                        });
                    }
                },
                RelayStateProjection::Streaming { stream } => {
                    return match ready!(stream.poll_next(cx)) {
                        Some(event) => Poll::Ready(Some(event)),
                        None => {
                            this.state.set(RelayState::Closed);
                            Poll::Ready(None)
                        }
                    };
                }
                RelayStateProjection::Terminating { pending } => match pending.pop_front() {
                    Some(event) => return Poll::Ready(Some(event)),
                    None => this.state.set(RelayState::Closed),
                },
                RelayStateProjection::Closed => return Poll::Ready(None),
            }
        }
    }
}
