//! Turns upstream data lines into [`DecodedSignal`]s.
//!
//! Providers disagree on where the streamed text lives, so the payload is matched against an
//! ordered table of shape rules. Each rule is a plain function from the parsed payload to the
//! text it found.

use core::{fmt, str::FromStr};

use serde_json::Value;

use crate::{
    constants::{DATA_PREFIX, DONE_SENTINEL},
    event::DecodedSignal,
};

/// A shape matcher, returns the joined text it found or [None]
pub type ShapeRule = fn(&Value) -> Option<String>;

/// Content rules, tried in order until one produces text
pub const CONTENT_RULES: &[ShapeRule] = &[delta_text, delta_parts, delta_messages];

/// Where reasoning text goes relative to content text when a payload carries both
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SegmentOrder {
    #[default]
    ContentFirst,
    ReasoningFirst,
    /// Reasoning steps are never forwarded
    ContentOnly,
}

impl FromStr for SegmentOrder {
    type Err = UnknownSegmentOrder;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content-first" => Ok(Self::ContentFirst),
            "reasoning-first" => Ok(Self::ReasoningFirst),
            "content-only" => Ok(Self::ContentOnly),
            other => Err(UnknownSegmentOrder(other.to_owned())),
        }
    }
}

impl fmt::Display for SegmentOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ContentFirst => "content-first",
            Self::ReasoningFirst => "reasoning-first",
            Self::ContentOnly => "content-only",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown segment order `{0}`, expected content-first, reasoning-first or content-only")]
pub struct UnknownSegmentOrder(String);

/// Stateless line decoder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decoder {
    order: SegmentOrder,
    drop_empty_envelopes: bool,
}

impl Decoder {
    pub fn new(order: SegmentOrder) -> Self {
        Self {
            order,
            drop_empty_envelopes: false,
        }
    }

    /// Opt in to dropping chat-completion chunks that carry no text (role announcements,
    /// `finish_reason` chunks). Off by default, where they are relayed raw like any other payload
    /// the shape rules can't read.
    pub fn drop_empty_envelopes(mut self, drop: bool) -> Self {
        self.drop_empty_envelopes = drop;
        self
    }

    pub fn order(&self) -> SegmentOrder {
        self.order
    }

    pub fn drops_empty_envelopes(&self) -> bool {
        self.drop_empty_envelopes
    }

    /// Decode one logical line. Returns [None] for anything that isn't a data line with a
    /// payload (event names, comments, blank separators).
    pub fn decode(&self, line: &str) -> Option<DecodedSignal> {
        let payload = line.trim().strip_prefix(DATA_PREFIX)?.trim();
        if payload.is_empty() {
            return None;
        }
        Some(self.decode_payload(payload))
    }

    /// Decode the text after the `data:` marker
    pub fn decode_payload(&self, payload: &str) -> DecodedSignal {
        if payload == DONE_SENTINEL {
            return DecodedSignal::Completion;
        }

        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "payload is not json, relaying it as text");
                return DecodedSignal::Fragment(payload.to_owned());
            }
        };

        if let Some(text) = self.extract(&value) {
            return DecodedSignal::Fragment(text);
        }

        if self.drop_empty_envelopes && has_envelope(&value) {
            return DecodedSignal::Fragment(String::new());
        }
        tracing::debug!(payload, "unrecognized payload shape");
        DecodedSignal::Unrecognized(payload.to_owned())
    }

    fn extract(&self, value: &Value) -> Option<String> {
        let content = CONTENT_RULES.iter().find_map(|rule| rule(value));
        let reasoning = reasoning_steps(value);

        match (content, reasoning, self.order) {
            (Some(content), Some(reasoning), SegmentOrder::ContentFirst) => {
                Some(content + &reasoning)
            }
            (Some(content), Some(reasoning), SegmentOrder::ReasoningFirst) => {
                Some(reasoning + &content)
            }
            (Some(content), _, _) => Some(content),
            (None, Some(reasoning), SegmentOrder::ContentFirst | SegmentOrder::ReasoningFirst) => {
                Some(reasoning)
            }
            // reasoning was found but is not forwarded, which still counts as a match
            (None, Some(_), SegmentOrder::ContentOnly) => {
                finished_message(value).or_else(|| Some(String::new()))
            }
            (None, None, _) => finished_message(value),
        }
    }
}

fn first_choice(value: &Value) -> Option<&Value> {
    value.get("choices")?.get(0)
}

fn delta(value: &Value) -> Option<&Value> {
    first_choice(value)
        .and_then(|choice| choice.get("delta"))
        .or_else(|| value.get("delta"))
        .filter(|delta| delta.is_object())
}

fn has_envelope(value: &Value) -> bool {
    delta(value).is_some()
        || first_choice(value).is_some_and(|choice| choice.get("message").is_some())
}

// joins the segments, treating "nothing but empty strings" as no match
fn join<'a>(segments: impl Iterator<Item = &'a str>) -> Option<String> {
    let joined: String = segments.collect();
    (!joined.is_empty()).then_some(joined)
}

/// `delta.content` is a plain string
pub fn delta_text(value: &Value) -> Option<String> {
    let content = delta(value)?.get("content")?.as_str()?;
    join(core::iter::once(content))
}

/// `delta.content` is a list of parts, each a string or an object with a `text` field
pub fn delta_parts(value: &Value) -> Option<String> {
    let parts = delta(value)?.get("content")?.as_array()?;
    join(parts.iter().filter_map(|part| match part {
        Value::String(text) => Some(text.as_str()),
        Value::Object(object) => object.get("text").and_then(Value::as_str),
        _ => None,
    }))
}

/// No `delta.content` at all, but a list of sub-messages with string content
pub fn delta_messages(value: &Value) -> Option<String> {
    let delta = delta(value)?;
    if !delta.get("content").is_none_or(Value::is_null) {
        return None;
    }
    let messages = delta.get("messages")?.as_array()?;
    join(
        messages
            .iter()
            .filter_map(|message| message.get("content").and_then(Value::as_str)),
    )
}

/// Reasoning steps with a `text` field, under `delta.reasoning_details` or a list-valued
/// `delta.reasoning`
pub fn reasoning_steps(value: &Value) -> Option<String> {
    let delta = delta(value)?;
    let steps = delta
        .get("reasoning_details")
        .and_then(Value::as_array)
        .or_else(|| delta.get("reasoning").and_then(Value::as_array))?;
    join(
        steps
            .iter()
            .filter_map(|step| step.get("text").and_then(Value::as_str)),
    )
}

/// A finished, non-streaming message embedded in a streaming response
pub fn finished_message(value: &Value) -> Option<String> {
    let content = first_choice(value)?.get("message")?.get("content")?.as_str()?;
    join(core::iter::once(content))
}
