use core::fmt;

use embassy_time::Instant;
use heapless::Vec;
use log::{debug, error, info};
use thiserror_no_std::Error;

use super::{EventClock, EventId, StreamEvent};
use crate::config::GatewayConfig;
use crate::message::StatusMessage;
use crate::timing::Periodic;

/// Returned by an [`EventSink`] that can no longer take events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Where a subscriber's events go (an SSE connection, a queue, a test buffer).
///
/// `deliver` must not block. A sink that cannot keep up reports
/// [`SinkClosed`] and is dropped.
pub trait EventSink {
    fn deliver(&mut self, event: &StreamEvent) -> Result<(), SinkClosed>;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOutError {
    #[error("subscriber table is full")]
    SubscribersFull,
    #[error("subscriber went away before the hello event")]
    SinkClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u32);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A connected observer and the last event it received.
#[derive(Debug)]
pub struct Subscriber<S> {
    id: SubscriberId,
    sink: S,
    last_event_id: Option<EventId>,
}

impl<S> Subscriber<S> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Id of the last event accepted by this subscriber's sink.
    pub fn last_event_id(&self) -> Option<EventId> {
        self.last_event_id
    }
}

/// One-to-many delivery of stream events.
///
/// Events reach every subscriber in the order they were published. There is
/// no backlog: a subscriber sees only events published after it connected,
/// starting with its own `hello`.
pub struct FanOut<S: EventSink, const N: usize> {
    subscribers: Vec<Subscriber<S>, N>,
    clock: EventClock,
    keepalive: Periodic,
    hello_retry_ms: u32,
    next_subscriber: u32,
}

impl<S: EventSink, const N: usize> FanOut<S, N> {
    pub fn new(config: &GatewayConfig, start: Instant) -> Self {
        Self {
            subscribers: Vec::new(),
            clock: EventClock::new(),
            keepalive: Periodic::new(config.keepalive_period(), start),
            hello_retry_ms: config.hello_retry_ms,
            next_subscriber: 0,
        }
    }

    /// Add a subscriber and send it a fresh `hello` baseline.
    ///
    /// `last_event_id` is what the observer reports having seen before a
    /// reconnect. It is logged only; missed events are not replayed.
    pub fn connect(
        &mut self,
        mut sink: S,
        last_event_id: Option<EventId>,
        now: Instant,
    ) -> Result<SubscriberId, FanOutError> {
        if self.subscribers.is_full() {
            error!("Refusing subscriber: {}", FanOutError::SubscribersFull);
            return Err(FanOutError::SubscribersFull);
        }

        let id = SubscriberId(self.next_subscriber);
        self.next_subscriber = self.next_subscriber.wrapping_add(1);

        match last_event_id {
            Some(last) => info!(
                "Client {} reconnected! Last message ID received is: {}",
                id, last
            ),
            None => info!("Client {} connected", id),
        }

        let hello = StreamEvent::hello(self.clock.next(now), self.hello_retry_ms);
        sink.deliver(&hello).map_err(|_| FanOutError::SinkClosed)?;

        self.subscribers
            .push(Subscriber {
                id,
                sink,
                last_event_id: Some(hello.id),
            })
            .map_err(|_| FanOutError::SubscribersFull)?;

        Ok(id)
    }

    /// Remove a subscriber, returning its sink.
    pub fn disconnect(&mut self, id: SubscriberId) -> Option<S> {
        let index = self.subscribers.iter().position(|s| s.id == id)?;
        let subscriber = self.subscribers.remove(index);
        info!("Client {} disconnected", id);
        Some(subscriber.sink)
    }

    /// Deliver a `machine_status` event to every subscriber.
    pub fn publish_status(&mut self, message: &StatusMessage, now: Instant) -> Option<EventId> {
        let id = self.clock.next(now);
        let event = match StreamEvent::machine_status(id, message) {
            Ok(event) => event,
            Err(e) => {
                error!("Failed to serialize status of {}: {:?}", message.id(), e);
                return None;
            }
        };

        self.broadcast(&event);
        self.keepalive.restart(now);
        Some(id)
    }

    /// Send a keep-alive if no event went out for a full keep-alive period.
    pub fn poll_keepalive(&mut self, now: Instant) -> Option<EventId> {
        if !self.keepalive.poll(now) {
            return None;
        }

        let event = StreamEvent::keep_alive(self.clock.next(now));
        debug!("Keep-alive {} to {} subscribers", event.id, self.subscribers.len());
        self.broadcast(&event);
        Some(event.id)
    }

    /// Time until the next keep-alive is due.
    pub fn keepalive_remaining(&self, now: Instant) -> embassy_time::Duration {
        self.keepalive.remaining(now)
    }

    fn broadcast(&mut self, event: &StreamEvent) {
        self.subscribers
            .retain_mut(|subscriber| match subscriber.sink.deliver(event) {
                Ok(()) => {
                    subscriber.last_event_id = Some(event.id);
                    true
                }
                Err(SinkClosed) => {
                    info!(
                        "Client {} dropped at event {}",
                        subscriber.id, event.id
                    );
                    false
                }
            });
    }

    pub fn subscriber(&self, id: SubscriberId) -> Option<&Subscriber<S>> {
        self.subscribers.iter().find(|s| s.id == id)
    }

    pub fn subscribers(&self) -> impl Iterator<Item = &Subscriber<S>> {
        self.subscribers.iter()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Id of the most recent event issued to anyone.
    pub fn last_event_id(&self) -> Option<EventId> {
        self.clock.last()
    }
}
