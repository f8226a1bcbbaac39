//! Gateway node control loop
//!
//! The radio's receive handler pushes raw datagrams into a [`DatagramQueue`].
//! [`GatewayNode`] drains that queue in arrival order, decodes each record
//! and republishes it to every subscriber of the event stream.

use embassy_time::Instant;
use log::{info, warn};

use crate::config::GatewayConfig;
use crate::link::{Datagram, DatagramQueue, LinkError, LinkManager, Radio, ReceiveHandler};
use crate::message::StatusMessage;
use crate::stream::{
    ChannelSink, EventId, EventSink, FanOut, FanOutError, SubscriberCommand, SubscriberId,
    SubscriberQueue,
};

/// Inbound traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub received: u32,
    pub malformed: u32,
    pub published: u32,
}

/// Gateway node state: the subscriber fan-out fed from the inbound queue.
pub struct GatewayNode<'a, S: EventSink, const N: usize> {
    fanout: FanOut<S, N>,
    inbound: &'a DatagramQueue,
    stats: GatewayStats,
}

impl<'a, S: EventSink, const N: usize> GatewayNode<'a, S, N> {
    pub fn new(config: &GatewayConfig, inbound: &'a DatagramQueue, start: Instant) -> Self {
        Self {
            fanout: FanOut::new(config, start),
            inbound,
            stats: GatewayStats::default(),
        }
    }

    /// Decode one datagram and publish it. Malformed records are dropped.
    pub fn handle(&mut self, datagram: &Datagram, now: Instant) -> Option<EventId> {
        self.stats.received += 1;

        let message = match StatusMessage::from_bytes(&datagram.data) {
            Ok(message) => message,
            Err(e) => {
                self.stats.malformed += 1;
                warn!("Dropping datagram from {}: {}", datagram.peer, e);
                return None;
            }
        };

        info!(
            "Received from {}: {} is {}",
            datagram.peer,
            message.id(),
            if message.machine_on() { "on" } else { "off" }
        );

        let id = self.fanout.publish_status(&message, now)?;
        self.stats.published += 1;
        Some(id)
    }

    /// Publish everything queued so far, then send a keep-alive if idle.
    ///
    /// Returns the number of events emitted.
    pub fn poll(&mut self, now: Instant) -> usize {
        let mut emitted = 0;

        while let Some(datagram) = self.inbound.try_take() {
            if self.handle(&datagram, now).is_some() {
                emitted += 1;
            }
        }

        if self.fanout.poll_keepalive(now).is_some() {
            emitted += 1;
        }

        emitted
    }

    /// Earliest time at which a keep-alive may be due.
    pub fn next_wake(&self, now: Instant) -> Instant {
        now + self.fanout.keepalive_remaining(now)
    }

    pub fn connect(
        &mut self,
        sink: S,
        last_event_id: Option<EventId>,
        now: Instant,
    ) -> Result<SubscriberId, FanOutError> {
        self.fanout.connect(sink, last_event_id, now)
    }

    pub fn disconnect(&mut self, id: SubscriberId) -> Option<S> {
        self.fanout.disconnect(id)
    }

    pub fn fanout(&self) -> &FanOut<S, N> {
        &self.fanout
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats
    }

    pub fn inbound_dropped(&self) -> u32 {
        self.inbound.dropped()
    }
}

impl<'a, const N: usize> GatewayNode<'a, ChannelSink<'a>, N> {
    /// Apply a connection task's command. `queues` holds one queue per slot.
    pub fn apply(
        &mut self,
        command: SubscriberCommand,
        queues: &'a [SubscriberQueue],
        now: Instant,
    ) -> Result<(), FanOutError> {
        match command {
            SubscriberCommand::Connect {
                slot,
                last_event_id,
            } => {
                let queue = queues.get(slot).ok_or(FanOutError::SubscribersFull)?;
                // A slot is reused only after its previous subscriber is gone
                self.drop_slot(slot, queue);
                self.fanout
                    .connect(ChannelSink::attach(slot, queue), last_event_id, now)?;
            }
            SubscriberCommand::Disconnect { slot } => {
                if let Some(queue) = queues.get(slot) {
                    self.drop_slot(slot, queue);
                }
            }
        }
        Ok(())
    }

    /// Forget the slot's subscriber along with anything still queued for it.
    fn drop_slot(&mut self, slot: usize, queue: &SubscriberQueue) {
        let id = self
            .fanout
            .subscribers()
            .find(|s| s.sink().slot() == slot)
            .map(|s| s.id());

        if let Some(id) = id {
            self.fanout.disconnect(id);
        }
        queue.clear();
    }
}

/// Open the gateway's side of the link on the radio's default channel and
/// route inbound datagrams to `handler`.
///
/// The gateway follows whatever channel its own network join put the radio
/// on, so no channel lookup happens here.
pub fn start_gateway<R: Radio>(
    link: &mut LinkManager<'_, R>,
    handler: ReceiveHandler,
) -> Result<(), LinkError> {
    link.open(None)?;
    link.on_receive(handler);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::SampleReading;
    use crate::config::SenderConfig;
    use crate::link::{
        DeliveryQueue, DeliveryReport, MacAddress, PeerDescriptor, ScannedNetwork, WifiChannel,
    };
    use crate::message::RECORD_SIZE;
    use crate::sender::{SenderLoop, dispatch, start_sender};
    use crate::sensors::{MotionSampler, SamplerError};
    use crate::stream::{EventKind, SinkClosed, StreamEvent, SUBSCRIBER_QUEUE_DEPTH};
    use alloc::vec::Vec;
    use core::str::FromStr;
    use embassy_futures::block_on;
    use std::cell::RefCell;
    use std::rc::Rc;

    const SENDER: MacAddress = MacAddress::new([0x24, 0x6F, 0x28, 0x11, 0x22, 0x33]);
    const GATEWAY: MacAddress = MacAddress::new([0x94, 0xB9, 0x7E, 0xFA, 0x5A, 0x3C]);

    #[derive(Clone, Default)]
    struct RecordingSink(Rc<RefCell<Vec<StreamEvent>>>);

    impl EventSink for RecordingSink {
        fn deliver(&mut self, event: &StreamEvent) -> Result<(), SinkClosed> {
            self.0.borrow_mut().push(event.clone());
            Ok(())
        }
    }

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn test_malformed_datagram_dropped_stream_continues() {
        let inbound = DatagramQueue::new();
        let mut node: GatewayNode<'_, RecordingSink, 2> =
            GatewayNode::new(&GatewayConfig::default(), &inbound, at(0));
        let sink = RecordingSink::default();
        node.connect(sink.clone(), None, at(1)).unwrap();

        inbound.offer(SENDER, &[0u8; RECORD_SIZE - 1]);
        inbound.offer(SENDER, &StatusMessage::new("dryer", true).to_bytes());

        assert_eq!(node.poll(at(10)), 1);
        assert_eq!(
            node.stats(),
            GatewayStats {
                received: 2,
                malformed: 1,
                published: 1
            }
        );
        assert_eq!(sink.0.borrow().len(), 2);
    }

    #[test]
    fn test_events_follow_arrival_order() {
        let inbound = DatagramQueue::new();
        let mut node: GatewayNode<'_, RecordingSink, 2> =
            GatewayNode::new(&GatewayConfig::default(), &inbound, at(0));
        let sink = RecordingSink::default();
        node.connect(sink.clone(), None, at(1)).unwrap();

        for id in ["washer", "dryer", "washer"] {
            inbound.offer(SENDER, &StatusMessage::new(id, true).to_bytes());
        }
        node.poll(at(10));

        let ids: Vec<_> = sink.0.borrow()[1..]
            .iter()
            .map(|e| {
                let value: serde_json::Value = serde_json::from_str(&e.data).unwrap();
                std::string::String::from(value["id"].as_str().unwrap())
            })
            .collect();
        assert_eq!(ids, ["washer", "dryer", "washer"]);
    }

    #[test]
    fn test_keepalive_when_no_traffic() {
        let inbound = DatagramQueue::new();
        let mut node: GatewayNode<'_, RecordingSink, 2> =
            GatewayNode::new(&GatewayConfig::default(), &inbound, at(0));
        let sink = RecordingSink::default();
        node.connect(sink.clone(), None, at(0)).unwrap();

        assert_eq!(node.poll(at(4000)), 0);
        assert_eq!(node.poll(at(5001)), 1);
        assert_eq!(sink.0.borrow()[1].kind, EventKind::KeepAlive);
    }

    #[test]
    fn test_channel_slots_connect_and_reuse() {
        let inbound = DatagramQueue::new();
        let queues = [SubscriberQueue::new(), SubscriberQueue::new()];
        let mut node: GatewayNode<'_, ChannelSink<'_>, 2> =
            GatewayNode::new(&GatewayConfig::default(), &inbound, at(0));

        node.apply(
            SubscriberCommand::Connect {
                slot: 0,
                last_event_id: None,
            },
            &queues,
            at(1),
        )
        .unwrap();
        assert_eq!(queues[0].try_receive().unwrap().kind, EventKind::Hello);

        // Reconnect on the same slot replaces the old subscriber
        node.apply(
            SubscriberCommand::Connect {
                slot: 0,
                last_event_id: Some(EventId(1)),
            },
            &queues,
            at(2),
        )
        .unwrap();
        assert_eq!(node.fanout().subscriber_count(), 1);

        node.apply(SubscriberCommand::Disconnect { slot: 0 }, &queues, at(3))
            .unwrap();
        assert_eq!(node.fanout().subscriber_count(), 0);

        assert_eq!(
            node.apply(
                SubscriberCommand::Connect {
                    slot: 7,
                    last_event_id: None
                },
                &queues,
                at(4),
            ),
            Err(FanOutError::SubscribersFull)
        );
    }

    #[test]
    fn test_reused_slot_starts_with_hello() {
        let inbound = DatagramQueue::new();
        let queues = [SubscriberQueue::new()];
        let mut node: GatewayNode<'_, ChannelSink<'_>, 1> =
            GatewayNode::new(&GatewayConfig::default(), &inbound, at(0));
        let connect = SubscriberCommand::Connect {
            slot: 0,
            last_event_id: None,
        };

        node.apply(connect, &queues, at(1)).unwrap();
        assert_eq!(queues[0].try_receive().unwrap().kind, EventKind::Hello);

        for (i, on) in [true, false].into_iter().enumerate() {
            inbound.offer(SENDER, &StatusMessage::new("washer", on).to_bytes());
            node.poll(at(10 + i as u64));
        }
        // The client wrote one status, then its socket failed
        assert_eq!(
            queues[0].try_receive().unwrap().kind,
            EventKind::MachineStatus
        );
        node.apply(SubscriberCommand::Disconnect { slot: 0 }, &queues, at(20))
            .unwrap();

        assert!(queues[0].try_receive().is_err());

        node.apply(connect, &queues, at(30)).unwrap();
        assert_eq!(queues[0].try_receive().unwrap().kind, EventKind::Hello);
        assert!(queues[0].try_receive().is_err());
    }

    #[test]
    fn test_stalled_slot_is_dropped() {
        let inbound = DatagramQueue::new();
        let queues = [SubscriberQueue::new()];
        let mut node: GatewayNode<'_, ChannelSink<'_>, 1> =
            GatewayNode::new(&GatewayConfig::default(), &inbound, at(0));
        node.apply(
            SubscriberCommand::Connect {
                slot: 0,
                last_event_id: None,
            },
            &queues,
            at(1),
        )
        .unwrap();

        for i in 0..SUBSCRIBER_QUEUE_DEPTH as u64 {
            let message = StatusMessage::new("washer", i % 2 == 0);
            inbound.offer(SENDER, &message.to_bytes());
            node.poll(at(10 + i));
        }

        assert_eq!(node.fanout().subscriber_count(), 0);
    }

    /// In-memory air: every submitted datagram lands in the gateway's queue.
    struct LoopbackRadio<'a> {
        own: MacAddress,
        air: &'a DatagramQueue,
        reports: &'a DeliveryQueue,
    }

    impl Radio for LoopbackRadio<'_> {
        type Error = ();

        async fn scan(&mut self) -> Result<Vec<ScannedNetwork>, ()> {
            Ok(alloc::vec![ScannedNetwork {
                ssid: heapless::String::from_str("The High Cs").unwrap(),
                channel: 6,
                rssi: -40,
            }])
        }

        fn init(&mut self, _channel: Option<WifiChannel>) -> Result<(), ()> {
            Ok(())
        }

        fn add_peer(&mut self, _peer: &PeerDescriptor) -> Result<(), ()> {
            Ok(())
        }

        fn submit(&mut self, to: &MacAddress, bytes: &[u8]) -> Result<(), ()> {
            let delivered = self.air.offer(self.own, bytes);
            self.reports.report(DeliveryReport {
                peer: *to,
                delivered,
            });
            Ok(())
        }

        fn set_receive_handler(&mut self, _handler: ReceiveHandler) {}
    }

    struct Magnitudes(f32);

    impl MotionSampler for Magnitudes {
        async fn read_acceleration(&mut self) -> Result<SampleReading, SamplerError> {
            Ok(SampleReading::new(0.0, 0.0, self.0))
        }
    }

    #[test]
    fn test_end_to_end_vibration_reaches_subscriber() {
        let air = DatagramQueue::new();
        let reports = DeliveryQueue::new();
        let config = SenderConfig::new("FARRIS_WASHER_1", "The High Cs", "94:B9:7E:FA:5A:3C")
            .unwrap()
            .with_periods(100, 550)
            .unwrap();

        let radio = LoopbackRadio {
            own: SENDER,
            air: &air,
            reports: &reports,
        };
        let mut link = LinkManager::new(radio, &reports);
        block_on(start_sender(&mut link, &config)).unwrap();

        let mut gateway: GatewayNode<'_, RecordingSink, 4> =
            GatewayNode::new(&GatewayConfig::default(), &air, at(0));
        let early = RecordingSink::default();
        gateway.connect(early.clone(), None, at(0)).unwrap();

        // Five readings at 9.8 m/s^2, then calibration at 560 ms
        let mut sender = SenderLoop::new(&config, at(0));
        let mut motion = Magnitudes(9.8);
        for ms in (0..=600).step_by(10) {
            assert!(block_on(sender.poll(at(ms), &mut motion)).is_none());
        }
        assert!(sender.classifier().is_calibrated());

        // Agitation window averaging 11.0 m/s^2
        motion.0 = 11.0;
        let mut sent = 0;
        for ms in (610..=1150).step_by(10) {
            if let Some(message) = block_on(sender.poll(at(ms), &mut motion)) {
                assert!(message.machine_on());
                assert!(dispatch(&mut link, &config.gateway, &message));
                sent += 1;
            }
        }
        assert_eq!(sent, 1);
        assert_eq!(link.drain_delivery_reports().delivered, 1);

        let before = early.0.borrow().last().unwrap().id;
        assert_eq!(gateway.poll(at(1200)), 1);

        let events = early.0.borrow();
        let status = events.last().unwrap();
        assert_eq!(status.kind, EventKind::MachineStatus);
        assert!(status.id > before);
        let value: serde_json::Value = serde_json::from_str(&status.data).unwrap();
        assert_eq!(value["id"], "FARRIS_WASHER_1");
        assert_eq!(value["status"], true);
        drop(events);

        // A subscriber arriving mid-stream sees hello before the next status
        let late = RecordingSink::default();
        gateway
            .connect(late.clone(), Some(before), at(1300))
            .unwrap();
        air.offer(SENDER, &StatusMessage::new("FARRIS_WASHER_1", false).to_bytes());
        gateway.poll(at(1400));

        let kinds: Vec<_> = late.0.borrow().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [EventKind::Hello, EventKind::MachineStatus]);
    }

    #[test]
    fn test_start_gateway_installs_handler() {
        fn forward(_source: &MacAddress, _bytes: &[u8]) {}

        let air = DatagramQueue::new();
        let reports = DeliveryQueue::new();
        let radio = LoopbackRadio {
            own: GATEWAY,
            air: &air,
            reports: &reports,
        };
        let mut link = LinkManager::new(radio, &reports);

        start_gateway(&mut link, forward).unwrap();

        assert!(link.is_open());
        assert_eq!(link.channel(), None);
    }
}
