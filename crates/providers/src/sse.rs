//! Shared SSE streaming plumbing for LLM adapters.
//!
//! The adapter hands a `reqwest::Response` and a parser closure; this
//! module buffers body chunks, splits the buffer on `\n\n` event
//! boundaries, extracts `data:` payloads, and feeds each payload to the
//! parser. The parser is `FnMut` so it can keep tool-call assembly state
//! across payloads.

use futures_util::StreamExt;

use vg_domain::error::Result;
use vg_domain::stream::{BoxStream, StreamEvent};

use crate::util::from_reqwest;

/// Pull complete `data:` payloads out of an SSE buffer.
///
/// Consumed bytes are drained in place; a trailing partial event stays in
/// the buffer for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
    }

    payloads
}

/// Build a [`BoxStream`] of [`StreamEvent`]s from an SSE response.
///
/// Guarantees a terminating `Done` event even when the upstream closes
/// without one.
pub(crate) fn sse_event_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut body = response.bytes_stream();
        let mut buffer = String::new();
        let mut done_emitted = false;

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for payload in drain_data_lines(&mut buffer) {
                        for event in parse_data(&payload) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        // Flush a trailing partial event once the body closes.
        if !buffer.trim().is_empty() {
            buffer.push_str("\n\n");
            for payload in drain_data_lines(&mut buffer) {
                for event in parse_data(&payload) {
                    if matches!(&event, Ok(StreamEvent::Done { .. })) {
                        done_emitted = true;
                    }
                    yield event;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done {
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_single_event() {
        let mut buf = String::from("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["{\"a\":1}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_keeps_partial_event_buffered() {
        let mut buf = String::from("data: whole\n\ndata: part");
        assert_eq!(drain_data_lines(&mut buf), vec!["whole"]);
        assert_eq!(buf, "data: part");

        buf.push_str("ial\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["partial"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_ignores_non_data_fields() {
        let mut buf = String::from("event: ping\nid: 7\nretry: 100\ndata: payload\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["payload"]);
    }

    #[test]
    fn drain_skips_empty_data() {
        let mut buf = String::from("data:\n\ndata:   \n\n");
        assert!(drain_data_lines(&mut buf).is_empty());
    }

    #[test]
    fn drain_preserves_done_sentinel() {
        let mut buf = String::from("data: [DONE]\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["[DONE]"]);
    }
}
