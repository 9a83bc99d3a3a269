use core::{
    fmt::Display,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use std::collections::VecDeque;

use futures_core::Stream;
use futures_timer::Delay;

use crate::{
    decoder::Decoder,
    event::OutboundEvent,
    framing::LineBuffer,
    normalizer::{failure, normalize},
};

/// Knobs shared by every relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOptions {
    pub decoder: Decoder,
    /// Give up on an upstream that goes quiet for this long. [None] waits forever.
    pub idle_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayPhase {
    Streaming,
    /// Terminal events are queued, the upstream is already released
    Terminating,
    Closed,
}

pin_project_lite::pin_project! {
    #[project = UpstreamProjection]
    enum Upstream<S> {
        Active { #[pin] stream: S },
        Released,
    }
}

pin_project_lite::pin_project! {
    /// [`Stream`] of [`OutboundEvent`]s read from an upstream stream of SSE bytes.
    ///
    /// Every relay ends with exactly one [`OutboundEvent::Done`], possibly preceded by one
    /// [`OutboundEvent::Error`], whichever way the upstream ends: completion sentinel, end of body,
    /// transport error or idle timeout. The upstream is dropped as soon as the terminal events are
    /// decided, and dropping the relay drops it too.
    #[project = RelayStreamProjection]
    pub struct RelayStream<S> {
        #[pin]
        upstream: Upstream<S>,
        lines: LineBuffer,
        decoder: Decoder,
        phase: RelayPhase,
        pending: VecDeque<OutboundEvent>,
        idle_timeout: Option<Duration>,
        idle: Option<Delay>,
    }
}

impl<S> RelayStream<S> {
    pub fn new(stream: S, options: RelayOptions) -> Self {
        Self {
            upstream: Upstream::Active { stream },
            lines: LineBuffer::new(),
            decoder: options.decoder,
            phase: RelayPhase::Streaming,
            pending: VecDeque::with_capacity(2),
            idle_timeout: options.idle_timeout,
            idle: options.idle_timeout.map(Delay::new),
        }
    }

    /// True once the final `done` has been handed out
    pub fn is_closed(&self) -> bool {
        self.phase == RelayPhase::Closed
    }

    /// Bytes received after the last complete line
    pub fn pending_bytes(&self) -> &[u8] {
        self.lines.pending()
    }
}

impl<S> RelayStreamProjection<'_, S> {
    // Streaming -> Terminating. Only the first caller gets to queue anything, which is what keeps
    // the terminal event unique when an error and a completion race.
    fn terminate(&mut self, error: Option<String>) {
        if *self.phase != RelayPhase::Streaming {
            return;
        }
        match error {
            Some(detail) => self.pending.extend(failure(detail)),
            None => self.pending.push_back(OutboundEvent::Done),
        }
        self.lines.clear();
        *self.idle = None;
        self.upstream.set(Upstream::Released);
        *self.phase = RelayPhase::Terminating;
    }

    // Decodes buffered lines until one produces something for the client
    fn next_buffered(&mut self) -> Option<OutboundEvent> {
        while let Some(line) = self.lines.next_line() {
            let Some(event) = self.decoder.decode(&line).and_then(normalize) else {
                continue;
            };
            return Some(event);
        }
        None
    }

    fn restart_idle_timer(&mut self) {
        if let (Some(delay), Some(timeout)) = (self.idle.as_mut(), *self.idle_timeout) {
            delay.reset(timeout);
        }
    }

    fn idle_expired(&mut self, cx: &mut Context<'_>) -> bool {
        match self.idle.as_mut() {
            Some(delay) => Pin::new(delay).poll(cx).is_ready(),
            None => false,
        }
    }
}

impl<S, E, B> Stream for RelayStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    type Item = OutboundEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(event) = this.pending.pop_front() {
                if event.is_done() {
                    *this.phase = RelayPhase::Closed;
                }
                return Poll::Ready(Some(event));
            }

            match *this.phase {
                RelayPhase::Streaming => {}
                RelayPhase::Terminating | RelayPhase::Closed => {
                    *this.phase = RelayPhase::Closed;
                    return Poll::Ready(None);
                }
            }

            match this.next_buffered() {
                Some(OutboundEvent::Done) => {
                    // anything still buffered after the sentinel is ignored
                    this.terminate(None);
                    continue;
                }
                Some(event) => return Poll::Ready(Some(event)),
                None => {}
            }

            let polled = match this.upstream.as_mut().project() {
                UpstreamProjection::Active { stream } => stream.poll_next(cx),
                UpstreamProjection::Released => Poll::Ready(None),
            };

            match polled {
                Poll::Pending => {
                    if this.idle_expired(cx) {
                        let timeout = this.idle_timeout.unwrap_or_default();
                        tracing::warn!(?timeout, "upstream went idle, closing relay");
                        this.terminate(Some(format!("upstream idle for {timeout:?}")));
                        continue;
                    }
                    return Poll::Pending;
                }
                Poll::Ready(Some(Ok(chunk))) => {
                    this.restart_idle_timer();
                    this.lines.push(chunk.as_ref());
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::warn!(error = %e, "upstream read failed");
                    this.terminate(Some(e.to_string()));
                }
                Poll::Ready(None) => {
                    // the tail may hold a final line that never got its line break
                    let tail = this
                        .lines
                        .finish()
                        .and_then(|line| this.decoder.decode(&line))
                        .and_then(normalize);
                    match tail {
                        Some(OutboundEvent::Done) | None => {}
                        Some(event) => this.pending.push_back(event),
                    }
                    tracing::debug!("upstream finished");
                    this.terminate(None);
                }
            }
        }
    }
}
