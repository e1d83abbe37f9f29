//! Server-sent-events decoding for the fleet and session streams.

use crate::error::{Error, Result};
use crate::events::EventEnvelope;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tracing::warn;

const BUFFER_CAPACITY: usize = 8192;

/// Longest line kept while waiting for its newline.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Decode a chunked byte stream into event envelopes.
///
/// Lines are split on `\n`, `data:` payloads are decoded as JSON. Payloads
/// that fail to decode are logged and skipped. A transport error, or a line
/// longer than [`MAX_LINE_LENGTH`], is yielded once and ends the stream.
pub fn decode_events<S>(
    byte_stream: S,
    origin: String,
) -> impl Stream<Item = Result<EventEnvelope>> + Send + 'static
where
    S: Stream<Item = Result<Bytes>> + Send + Unpin + 'static,
{
    decode_with_limit(byte_stream, origin, MAX_LINE_LENGTH)
}

fn decode_with_limit<S>(
    byte_stream: S,
    origin: String,
    max_line: usize,
) -> impl Stream<Item = Result<EventEnvelope>> + Send + 'static
where
    S: Stream<Item = Result<Bytes>> + Send + Unpin + 'static,
{
    futures_util::stream::unfold(
        (byte_stream, BytesMut::with_capacity(BUFFER_CAPACITY), false),
        move |(mut stream, mut buffer, done)| {
            let origin = origin.clone();
            async move {
                if done {
                    return None;
                }
                loop {
                    if let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                        let mut line = buffer.split_to(newline + 1);
                        line.truncate(line.len() - 1);
                        if line.last() == Some(&b'\r') {
                            line.truncate(line.len() - 1);
                        }
                        let Ok(line) = std::str::from_utf8(&line) else {
                            continue;
                        };
                        if let Some(event) = extract_data(line).and_then(|d| parse_event(d, &origin)) {
                            return Some((Ok(event), (stream, buffer, false)));
                        }
                        continue;
                    }

                    if buffer.len() > max_line {
                        warn!(source = %origin, buffered = buffer.len(), "event line too long");
                        let err = Error::LineTooLong {
                            origin: origin.clone(),
                            limit: max_line,
                        };
                        buffer.clear();
                        return Some((Err(err), (stream, buffer, true)));
                    }

                    match stream.next().await {
                        Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                        Some(Err(e)) => return Some((Err(e), (stream, buffer, true))),
                        None => {
                            // A final line without a trailing newline.
                            let tail = std::str::from_utf8(&buffer).ok().map(str::trim);
                            let event = tail
                                .and_then(extract_data)
                                .and_then(|d| parse_event(d, &origin));
                            buffer.clear();
                            return event.map(|event| (Ok(event), (stream, buffer, true)));
                        }
                    }
                }
            }
        },
    )
}

/// The payload of a `data:` line. Comments, blank lines and other fields
/// yield `None`.
fn extract_data(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let data = trimmed
        .strip_prefix("data:")
        .map(str::trim)
        .filter(|data| !data.is_empty())?;
    Some(data)
}

fn parse_event(data: &str, origin: &str) -> Option<EventEnvelope> {
    match serde_json::from_str(data) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(source = %origin, error = %e, "skipping undecodable event payload");
            None
        }
    }
}
