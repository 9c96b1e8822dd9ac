use std::convert::Infallible;

use eventsource_stream::Eventsource;
use futures_util::{FutureExt, StreamExt, stream};

/// Data of the last event in an event-stream body that carries any, or
/// `None` when no event does. Only the final event matters: earlier events
/// are superseded snapshots of the same job.
///
/// The body is already fully read, so the parser stream is always ready and
/// resolves without an executor. A closing blank line is appended so an
/// unterminated final event still dispatches.
pub fn last_data_payload(body: &[u8]) -> Option<String> {
    let mut framed = Vec::with_capacity(body.len() + 2);
    framed.extend_from_slice(body);
    framed.extend_from_slice(b"\n\n");

    let events = stream::iter([Ok::<_, Infallible>(framed)])
        .eventsource()
        .filter_map(|event| async move {
            match event {
                Ok(event) => Some(event.data),
                Err(e) => {
                    tracing::debug!("skipping malformed event-stream event: {e}");
                    None
                }
            }
        })
        .collect::<Vec<_>>()
        .now_or_never()?;

    events
        .into_iter()
        .rev()
        .map(|data| data.trim_end().to_string())
        .find(|data| !data.is_empty())
}

#[cfg(test)]
mod tests {
    use super::last_data_payload;

    #[test]
    fn picks_last_event() {
        let body = b"event: status\ndata: {\"n\":1}\n\ndata: {\"n\":2}\n\n";
        assert_eq!(last_data_payload(body).as_deref(), Some("{\"n\":2}"));
    }

    #[test]
    fn handles_crlf_and_missing_space() {
        let body = b"data:{\"n\":1}\r\n\r\ndata:{\"n\":3}\r\n\r\n";
        assert_eq!(last_data_payload(body).as_deref(), Some("{\"n\":3}"));
    }

    #[test]
    fn handles_bare_cr_line_endings() {
        let body = b"data: {\"n\":1}\r\rdata: {\"n\":4}\r\r";
        assert_eq!(last_data_payload(body).as_deref(), Some("{\"n\":4}"));
    }

    #[test]
    fn unterminated_final_event_still_counts() {
        let body = b"data: {\"n\":1}\n\ndata: {\"n\":5}";
        assert_eq!(last_data_payload(body).as_deref(), Some("{\"n\":5}"));
    }

    #[test]
    fn multi_line_data_is_joined() {
        let body = b"data: {\"n\":\ndata: 6}\n\n";
        assert_eq!(last_data_payload(body).as_deref(), Some("{\"n\":\n6}"));
    }

    #[test]
    fn ignores_comments_and_empty_events() {
        let body = b": keep-alive\ndata: {\"n\":1}\n\ndata:\n\n: ping\n\n";
        assert_eq!(last_data_payload(body).as_deref(), Some("{\"n\":1}"));
    }

    #[test]
    fn no_data_lines() {
        assert_eq!(last_data_payload(b"event: ping\n: comment\n"), None);
        assert_eq!(last_data_payload(b""), None);
    }
}
