//! Signals read from the upstream and the events the relay writes downstream

use bytes::Bytes;
use serde::Serialize;

use crate::constants::DONE_FRAME;

/// What one upstream data line turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedSignal {
    /// Text gathered from a single payload, segments already joined. May be empty when the
    /// payload had the expected shape but carried no text.
    Fragment(String),
    /// The sentinel completion token
    Completion,
    /// A payload none of the shape rules understood, kept verbatim
    Unrecognized(String),
}

/// The relay's own wire vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    Data(String),
    Done,
    Error(String),
}

#[derive(Serialize)]
struct TextPayload<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct DetailPayload<'a> {
    detail: &'a str,
}

impl OutboundEvent {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Encodes the event as one SSE frame, blank line included
    ///
    /// ```text
    /// data: {"text":"..."}
    ///
    /// event: error
    /// data: {"detail":"..."}
    ///
    /// event: done
    /// data: {}
    /// ```
    pub fn to_frame(&self) -> Bytes {
        match self {
            OutboundEvent::Data(text) => {
                let payload = json_payload(&TextPayload { text });
                Bytes::from(format!("data: {payload}\n\n"))
            }
            OutboundEvent::Error(detail) => {
                let payload = json_payload(&DetailPayload { detail });
                Bytes::from(format!("event: error\ndata: {payload}\n\n"))
            }
            OutboundEvent::Done => Bytes::from_static(DONE_FRAME),
        }
    }
}

fn json_payload<T: Serialize>(value: &T) -> String {
    // a struct holding one &str has no way to fail serialisation
    serde_json::to_string(value).unwrap_or_else(|_| String::from("{}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames() {
        assert_eq!(
            OutboundEvent::Data("Hi".into()).to_frame(),
            Bytes::from_static(b"data: {\"text\":\"Hi\"}\n\n")
        );
        assert_eq!(
            OutboundEvent::Error("boom".into()).to_frame(),
            Bytes::from_static(b"event: error\ndata: {\"detail\":\"boom\"}\n\n")
        );
        assert_eq!(
            OutboundEvent::Done.to_frame(),
            Bytes::from_static(b"event: done\ndata: {}\n\n")
        );
    }

    #[test]
    fn data_frame_escapes_line_breaks() {
        // a raw newline inside the text would end the frame early
        let frame = OutboundEvent::Data("line one\nline \"two\"".into()).to_frame();
        assert_eq!(
            frame,
            Bytes::from_static(b"data: {\"text\":\"line one\\nline \\\"two\\\"\"}\n\n")
        );
    }
}
