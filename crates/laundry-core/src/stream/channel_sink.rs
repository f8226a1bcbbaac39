//! Queue-backed subscribers for connections served by separate tasks.
//!
//! Each HTTP connection task owns one slot. The gateway loop pushes events
//! into the slot's queue and the connection task writes them to its socket.
//! Connection tasks announce themselves through a [`CommandQueue`].

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use super::{EventId, EventSink, SinkClosed, StreamEvent};

/// Per-subscriber event queue depth.
/// A connection that falls this many events behind is disconnected.
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 8;

/// Pending subscriber commands.
pub const COMMAND_QUEUE_DEPTH: usize = 4;

pub type SubscriberQueue = Channel<CriticalSectionRawMutex, StreamEvent, SUBSCRIBER_QUEUE_DEPTH>;

/// Sent by connection tasks to the gateway loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberCommand {
    Connect {
        slot: usize,
        last_event_id: Option<EventId>,
    },
    Disconnect {
        slot: usize,
    },
}

pub type CommandQueue = Channel<CriticalSectionRawMutex, SubscriberCommand, COMMAND_QUEUE_DEPTH>;

/// [`EventSink`] that forwards into a connection slot's queue.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSink<'a> {
    slot: usize,
    queue: &'a SubscriberQueue,
}

impl<'a> ChannelSink<'a> {
    /// Take over a slot, discarding anything a previous connection left behind.
    pub fn attach(slot: usize, queue: &'a SubscriberQueue) -> Self {
        queue.clear();
        Self { slot, queue }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl EventSink for ChannelSink<'_> {
    fn deliver(&mut self, event: &StreamEvent) -> Result<(), SinkClosed> {
        self.queue.try_send(event.clone()).map_err(|_| SinkClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_forwards_events() {
        let queue = SubscriberQueue::new();
        let mut sink = ChannelSink::attach(0, &queue);

        sink.deliver(&StreamEvent::keep_alive(EventId(1))).unwrap();

        assert_eq!(queue.try_receive().unwrap().id, EventId(1));
    }

    #[test]
    fn test_full_queue_closes_sink() {
        let queue = SubscriberQueue::new();
        let mut sink = ChannelSink::attach(3, &queue);

        for i in 0..SUBSCRIBER_QUEUE_DEPTH as u64 {
            sink.deliver(&StreamEvent::keep_alive(EventId(i))).unwrap();
        }

        assert_eq!(
            sink.deliver(&StreamEvent::keep_alive(EventId(99))),
            Err(SinkClosed)
        );
    }

    #[test]
    fn test_attach_discards_stale_events() {
        let queue = SubscriberQueue::new();
        queue.try_send(StreamEvent::keep_alive(EventId(5))).unwrap();

        let sink = ChannelSink::attach(1, &queue);

        assert_eq!(sink.slot(), 1);
        assert!(queue.try_receive().is_err());
    }
}
