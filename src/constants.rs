use bytes_utils::Str;

pub(crate) const LF: u8 = b'\n';
pub(crate) const CR: u8 = b'\r';

/// Field marker of an SSE data line
pub const DATA_PREFIX: &str = "data:";
/// Sentinel payload that ends an upstream chat-completion stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Message used when the client sends an absent or blank `message`
pub const PLACEHOLDER_MESSAGE: &str = "Hello";
/// Error detail used when the upstream rejects a request with an empty body
pub const GENERIC_UPSTREAM_ERROR: &str = "Upstream error";

pub(crate) const EMPTY_STR: Str = Str::from_static("");

// outbound wire frames that never change
pub(crate) const DONE_FRAME: &[u8] = b"event: done\ndata: {}\n\n";
