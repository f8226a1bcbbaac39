//! Gateway event stream
//!
//! Status records are republished to observers as Server-Sent Events. Every
//! event carries a strictly increasing id so that an observer can tell the
//! gateway where it left off when it reconnects. The gateway keeps no
//! backlog: a reconnecting observer always gets a fresh `hello` baseline
//! instead of a replay.

mod channel_sink;
mod fanout;
pub mod http;

pub use channel_sink::*;
pub use fanout::*;

use alloc::string::String;
use core::fmt::{self, Write};

use embassy_time::Instant;
use serde::{Deserialize, Serialize};

use crate::message::StatusMessage;

/// Event name of status updates.
pub const MACHINE_STATUS_EVENT: &str = "machine_status";

/// Payload of the baseline event sent to every new subscriber.
pub const HELLO_DATA: &str = "hello!";

/// Payload of the keep-alive event.
pub const KEEPALIVE_DATA: &str = "ping";

/// Id of one stream event. Strictly increasing for the gateway's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues event ids from the gateway's millisecond clock.
///
/// The clock reading is used as-is while it moves forward. Two events within
/// the same millisecond (or a clock that stalls) get `last + 1` instead, so
/// ids never repeat or go backwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventClock {
    last: Option<EventId>,
}

impl EventClock {
    pub const fn new() -> Self {
        Self { last: None }
    }

    pub fn next(&mut self, now: Instant) -> EventId {
        let candidate = now.as_millis();
        let id = match self.last {
            Some(EventId(last)) if candidate <= last => EventId(last + 1),
            _ => EventId(candidate),
        };

        self.last = Some(id);
        id
    }

    pub fn last(&self) -> Option<EventId> {
        self.last
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    MachineStatus,
    Hello,
    KeepAlive,
}

impl EventKind {
    /// SSE `event:` field. Hello and keep-alive use the implicit default.
    pub const fn name(self) -> Option<&'static str> {
        match self {
            Self::MachineStatus => Some(MACHINE_STATUS_EVENT),
            Self::Hello | Self::KeepAlive => None,
        }
    }
}

/// JSON body of a `machine_status` event.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct MachineStatusPayload<'a> {
    pub id: &'a str,
    pub status: bool,
}

/// One event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub id: EventId,
    pub kind: EventKind,
    pub data: String,
    /// Reconnect delay hint in milliseconds
    pub retry: Option<u32>,
}

impl StreamEvent {
    pub fn machine_status(id: EventId, message: &StatusMessage) -> Result<Self, serde_json::Error> {
        let payload = MachineStatusPayload {
            id: message.id(),
            status: message.machine_on(),
        };

        Ok(Self {
            id,
            kind: EventKind::MachineStatus,
            data: serde_json::to_string(&payload)?,
            retry: None,
        })
    }

    pub fn hello(id: EventId, retry_ms: u32) -> Self {
        Self {
            id,
            kind: EventKind::Hello,
            data: String::from(HELLO_DATA),
            retry: Some(retry_ms),
        }
    }

    pub fn keep_alive(id: EventId) -> Self {
        Self {
            id,
            kind: EventKind::KeepAlive,
            data: String::from(KEEPALIVE_DATA),
            retry: None,
        }
    }

    /// Write the event in SSE wire format, including the blank terminator line.
    pub fn write_sse<W: Write>(&self, out: &mut W) -> fmt::Result {
        if let Some(retry) = self.retry {
            writeln!(out, "retry: {retry}")?;
        }
        writeln!(out, "id: {}", self.id)?;
        if let Some(name) = self.kind.name() {
            writeln!(out, "event: {name}")?;
        }
        for line in self.data.split('\n') {
            writeln!(out, "data: {line}")?;
        }
        out.write_char('\n')
    }

    pub fn to_sse(&self) -> String {
        let mut frame = String::new();
        // Writing into a String cannot fail
        let _ = self.write_sse(&mut frame);
        frame
    }
}
