//! Maps decoded upstream signals onto [`OutboundEvent`]s

use crate::{
    constants::GENERIC_UPSTREAM_ERROR,
    event::{DecodedSignal, OutboundEvent},
};

/// Returns [None] for signals the client has no use for, which today is only an empty fragment.
pub fn normalize(signal: DecodedSignal) -> Option<OutboundEvent> {
    match signal {
        DecodedSignal::Completion => Some(OutboundEvent::Done),
        DecodedSignal::Fragment(text) if text.is_empty() => None,
        DecodedSignal::Fragment(text) => Some(OutboundEvent::Data(text)),
        DecodedSignal::Unrecognized(raw) => Some(OutboundEvent::Data(raw)),
    }
}

/// The terminal pair for a failed request: one `error` event, then `done`.
/// An empty detail is replaced with a generic marker so the client always gets some text.
pub fn failure(detail: impl Into<String>) -> [OutboundEvent; 2] {
    let mut detail = detail.into();
    if detail.trim().is_empty() {
        detail = GENERIC_UPSTREAM_ERROR.to_owned();
    }
    [OutboundEvent::Error(detail), OutboundEvent::Done]
}
