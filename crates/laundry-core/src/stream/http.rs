//! Minimal HTTP/1.1 handling for the event stream endpoint.
//!
//! Only a request head is ever parsed: the method, the path and the
//! `Last-Event-ID` header. Everything else is ignored.

use super::EventId;

/// Path of the event stream.
pub const EVENTS_PATH: &str = "/events";

/// Response head opening an event stream.
pub const STREAM_RESPONSE_HEAD: &str = "HTTP/1.1 200 OK\r\n\
Content-Type: text/event-stream\r\n\
Cache-Control: no-cache\r\n\
Connection: keep-alive\r\n\
Access-Control-Allow-Origin: *\r\n\
\r\n";

pub const NOT_FOUND_RESPONSE: &str = "HTTP/1.1 404 Not Found\r\n\
Content-Type: text/plain\r\n\
Content-Length: 9\r\n\
Connection: close\r\n\
\r\n\
Not found";

const LAST_EVENT_ID_HEADER: &str = "last-event-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SseRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Id the client last received, when reconnecting
    pub last_event_id: Option<EventId>,
}

impl SseRequest<'_> {
    /// Whether this request opens the event stream.
    pub fn is_event_stream(&self) -> bool {
        let path = self.path.split('?').next().unwrap_or(self.path);
        self.method == "GET" && path == EVENTS_PATH
    }
}

/// Offset just past the blank line ending the request head, if it has arrived.
pub fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Parse a request head. Returns `None` if the request line is malformed.
///
/// An unparsable `Last-Event-ID` is treated as absent.
pub fn parse_request(head: &str) -> Option<SseRequest<'_>> {
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_ascii_whitespace();
    let method = request_line.next()?;
    let path = request_line.next()?;
    request_line.next()?.strip_prefix("HTTP/")?;

    let last_event_id = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case(LAST_EVENT_ID_HEADER))
        .and_then(|(_, value)| value.trim().parse().ok())
        .map(EventId);

    Some(SseRequest {
        method,
        path,
        last_event_id,
    })
}
