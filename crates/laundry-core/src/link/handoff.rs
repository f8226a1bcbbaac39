//! Bounded queues between the radio driver context and the node's main loop.
//!
//! The radio delivers inbound datagrams and send completions from its own
//! execution context (an interrupt-like callback or a driver task). These
//! queues are the only state shared with that context: the driver is the
//! single producer, the main loop the single consumer, and neither side ever
//! blocks the other. Overflow drops the newest item and is counted.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;

use super::MacAddress;

/// Largest payload a single broadcast-link datagram can carry.
pub const MAX_DATAGRAM_LEN: usize = 250;

/// Datagram queue depth.
/// Set to 8 to absorb a burst from several senders between two loop passes.
pub const DATAGRAM_QUEUE_DEPTH: usize = 8;

/// Delivery report queue depth. The sender has one message in flight per
/// evaluation cycle, so this only needs to cover a few missed drains.
pub const DELIVERY_QUEUE_DEPTH: usize = 4;

/// A datagram together with the remote peer (source for inbound, destination
/// for outbound traffic).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub peer: MacAddress,
    pub data: Vec<u8, MAX_DATAGRAM_LEN>,
}

impl Datagram {
    /// Returns `None` if `bytes` exceeds [`MAX_DATAGRAM_LEN`].
    pub fn new(peer: MacAddress, bytes: &[u8]) -> Option<Self> {
        let data = Vec::from_slice(bytes).ok()?;
        Some(Self { peer, data })
    }
}

/// Asynchronous outcome of one send attempt. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub peer: MacAddress,
    pub delivered: bool,
}

/// Single-producer/single-consumer datagram handoff.
pub struct DatagramQueue {
    channel: Channel<CriticalSectionRawMutex, Datagram, DATAGRAM_QUEUE_DEPTH>,
    dropped: AtomicU32,
}

impl Default for DatagramQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DatagramQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Hand a datagram over without blocking.
    ///
    /// Safe to call from the radio's receive context. Returns `false` if the
    /// datagram was dropped (queue full or oversized).
    pub fn offer(&self, peer: MacAddress, bytes: &[u8]) -> bool {
        let Some(datagram) = Datagram::new(peer, bytes) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        if self.channel.try_send(datagram).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        true
    }

    pub fn try_take(&self) -> Option<Datagram> {
        self.channel.try_receive().ok()
    }

    /// Wait for the next datagram.
    pub async fn take(&self) -> Datagram {
        self.channel.receive().await
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Number of datagrams dropped since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Send-completion handoff from the radio driver to the sender loop.
pub struct DeliveryQueue {
    channel: Channel<CriticalSectionRawMutex, DeliveryReport, DELIVERY_QUEUE_DEPTH>,
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Record a completion. A full queue drops the report.
    pub fn report(&self, report: DeliveryReport) {
        if self.channel.try_send(report).is_err() {
            log::debug!("Delivery report for {} dropped", report.peer);
        }
    }

    pub fn try_take(&self) -> Option<DeliveryReport> {
        self.channel.try_receive().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: MacAddress = MacAddress::new([0x94, 0xB9, 0x7E, 0xFA, 0x5A, 0x3C]);

    #[test]
    fn test_offer_and_take_preserve_order() {
        let queue = DatagramQueue::new();

        assert!(queue.offer(PEER, b"first"));
        assert!(queue.offer(PEER, b"second"));

        assert_eq!(queue.try_take().unwrap().data.as_slice(), b"first");
        assert_eq!(queue.try_take().unwrap().data.as_slice(), b"second");
        assert!(queue.try_take().is_none());
    }

    #[test]
    fn test_overflow_drops_newest() {
        let queue = DatagramQueue::new();
        for i in 0..DATAGRAM_QUEUE_DEPTH as u8 {
            assert!(queue.offer(PEER, &[i]));
        }

        assert!(!queue.offer(PEER, &[0xFF]));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_take().unwrap().data.as_slice(), &[0]);
    }

    #[test]
    fn test_oversized_datagram_is_dropped() {
        let queue = DatagramQueue::new();

        assert!(!queue.offer(PEER, &[0u8; MAX_DATAGRAM_LEN + 1]));
        assert_eq!(queue.dropped(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_async_take() {
        let queue = DatagramQueue::new();
        queue.offer(PEER, b"status");

        let datagram = embassy_futures::block_on(queue.take());
        assert_eq!(datagram.peer, PEER);
    }

    #[test]
    fn test_delivery_reports() {
        let queue = DeliveryQueue::new();
        queue.report(DeliveryReport {
            peer: PEER,
            delivered: false,
        });

        let report = queue.try_take().unwrap();
        assert!(!report.delivered);
        assert!(queue.try_take().is_none());
    }
}
