//! Desktop simulator for the laundry monitor.
//!
//! Runs a washer sender, a dryer sender and a gateway against a virtual
//! clock. Senders reach the gateway through an in-memory "air" that only
//! delivers when both ends are tuned to the same channel. The gateway's event
//! stream is printed to stdout in SSE wire format, one prefix per subscriber.
//!
//! Set `RUST_LOG=debug` to also see every sample, send outcome and keep-alive.

use std::ops::Range;
use std::str::FromStr;
use std::sync::Mutex;

use embassy_futures::block_on;
use embassy_time::Instant;
use log::{error, info, warn};

use laundry_core::app_state::AppError;
use laundry_core::config::{GatewayConfig, SenderConfig};
use laundry_core::gateway::{GatewayNode, start_gateway};
use laundry_core::link::{
    DatagramQueue, DeliveryQueue, DeliveryReport, LinkManager, MacAddress, PeerDescriptor, Radio,
    ReceiveHandler, ScannedNetwork, WifiChannel,
};
use laundry_core::message::RECORD_SIZE;
use laundry_core::sender::{SenderLoop, dispatch, start_sender};
use laundry_core::sensors::{MotionSampler, SampleReading, SamplerError};
use laundry_core::stream::http::parse_request;
use laundry_core::stream::{EventSink, SinkClosed, StreamEvent, SubscriberId};

// ---------------------------------------------------------------------------
// Scenario constants
// ---------------------------------------------------------------------------

const REFERENCE_SSID: &str = "The High Cs";
const REFERENCE_CHANNEL: u8 = 6;

/// Channel a radio sits on when opened without one.
const DEFAULT_CHANNEL: u8 = 1;

const GATEWAY_MAC: &str = "94:B9:7E:FA:5A:3C";

/// Virtual time step of the main loop.
const TICK_MS: u64 = 50;

/// Total simulated time.
const RUN_MS: u64 = 40_000;

const SUBSCRIBER_SLOTS: usize = 4;

const STANDARD_GRAVITY: f32 = 9.806_65;

// ---------------------------------------------------------------------------
// Simulated radio
// ---------------------------------------------------------------------------

/// The shared medium: whoever installed a receive handler, and on which channel.
struct Air {
    handler: Option<ReceiveHandler>,
    channel: Option<WifiChannel>,
}

static AIR: Mutex<Air> = Mutex::new(Air {
    handler: None,
    channel: None,
});

/// Gateway side of the inbound handoff.
static INBOUND: DatagramQueue = DatagramQueue::new();

fn forward(source: &MacAddress, bytes: &[u8]) {
    if !INBOUND.offer(*source, bytes) {
        warn!("Inbound queue full, dropped datagram from {}", source);
    }
}

struct SimRadio<'a> {
    own: MacAddress,
    /// Channel used when the link is opened without an explicit one
    home_channel: Option<WifiChannel>,
    channel: Option<WifiChannel>,
    reports: &'a DeliveryQueue,
}

impl<'a> SimRadio<'a> {
    fn new(own: MacAddress, home_channel: u8, reports: &'a DeliveryQueue) -> Self {
        Self {
            own,
            home_channel: WifiChannel::new(home_channel),
            channel: None,
            reports,
        }
    }
}

fn network(ssid: &str, channel: u8, rssi: i8) -> Option<ScannedNetwork> {
    Some(ScannedNetwork {
        ssid: heapless::String::from_str(ssid).ok()?,
        channel,
        rssi,
    })
}

impl Radio for SimRadio<'_> {
    type Error = &'static str;

    async fn scan(&mut self) -> Result<Vec<ScannedNetwork>, Self::Error> {
        Ok([
            network("Neighbours", 1, -81),
            network("The High Cs 5G", 36, -60),
            network(REFERENCE_SSID, REFERENCE_CHANNEL, -52),
        ]
        .into_iter()
        .flatten()
        .collect())
    }

    fn init(&mut self, channel: Option<WifiChannel>) -> Result<(), Self::Error> {
        self.channel = channel.or(self.home_channel);
        Ok(())
    }

    fn add_peer(&mut self, _peer: &PeerDescriptor) -> Result<(), Self::Error> {
        Ok(())
    }

    fn submit(&mut self, to: &MacAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        let (handler, channel) = {
            let air = AIR.lock().map_err(|_| "air is poisoned")?;
            (air.handler, air.channel)
        };

        let delivered = match handler {
            Some(handler) if channel == self.channel => {
                handler(&self.own, bytes);
                true
            }
            _ => false,
        };

        self.reports.report(DeliveryReport {
            peer: *to,
            delivered,
        });
        Ok(())
    }

    fn set_receive_handler(&mut self, handler: ReceiveHandler) {
        if let Ok(mut air) = AIR.lock() {
            air.handler = Some(handler);
            air.channel = self.channel;
        }
    }
}

// ---------------------------------------------------------------------------
// Simulated accelerometer
// ---------------------------------------------------------------------------

/// Gravity plus a little sensor noise, and a drum-like wobble while the
/// machine runs.
struct SimMotion {
    elapsed_ms: u64,
    running: Range<u64>,
    /// Per-machine offset so the two senders do not read identical values
    phase: f32,
}

impl MotionSampler for SimMotion {
    async fn read_acceleration(&mut self) -> Result<SampleReading, SamplerError> {
        let t = self.elapsed_ms as f32 / 1000.0;
        let noise = 0.02 * (t * 7.3 + self.phase).sin();

        let (dx, dy, dz) = if self.running.contains(&self.elapsed_ms) {
            (
                1.8 * (t * 11.0 + self.phase).sin(),
                1.2 * (t * 9.0).cos(),
                1.5 * (t * 13.0).sin().abs(),
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        Ok(SampleReading::new(
            noise + dx,
            noise + dy,
            STANDARD_GRAVITY + noise + dz,
        ))
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

struct SimSender<'a> {
    config: SenderConfig,
    link: LinkManager<'a, SimRadio<'a>>,
    node: SenderLoop,
    motion: SimMotion,
}

impl<'a> SimSender<'a> {
    fn start(
        board_id: &str,
        own: MacAddress,
        motion: SimMotion,
        reports: &'a DeliveryQueue,
    ) -> Result<Self, AppError> {
        let config = SenderConfig::new(board_id, REFERENCE_SSID, GATEWAY_MAC)?;
        let mut link = LinkManager::new(SimRadio::new(own, DEFAULT_CHANNEL, reports), reports);
        block_on(start_sender(&mut link, &config))?;

        Ok(Self {
            node: SenderLoop::new(&config, Instant::from_millis(0)),
            config,
            link,
            motion,
        })
    }

    fn tick(&mut self, ms: u64) {
        self.motion.elapsed_ms = ms;

        if let Some(message) = block_on(self.node.poll(Instant::from_millis(ms), &mut self.motion))
        {
            dispatch(&mut self.link, &self.config.gateway, &message);
        }
        self.link.drain_delivery_reports();
    }
}

/// Prints every event it receives, prefixed with the subscriber's name.
struct StdoutSink {
    name: &'static str,
}

impl EventSink for StdoutSink {
    fn deliver(&mut self, event: &StreamEvent) -> Result<(), SinkClosed> {
        for line in event.to_sse().lines() {
            println!("[{}] {}", self.name, line);
        }
        println!();
        Ok(())
    }
}

type Gateway<'a> = GatewayNode<'a, StdoutSink, SUBSCRIBER_SLOTS>;

/// Connect a subscriber the way the HTTP server would, from a raw request head.
fn connect_http(
    gateway: &mut Gateway<'_>,
    name: &'static str,
    head: &str,
    now: Instant,
) -> Result<Option<SubscriberId>, AppError> {
    match parse_request(head) {
        Some(request) if request.is_event_stream() => {
            let id = gateway.connect(StdoutSink { name }, request.last_event_id, now)?;
            Ok(Some(id))
        }
        _ => {
            warn!("{}: not an event stream request, answering 404", name);
            Ok(None)
        }
    }
}

fn run() -> Result<(), AppError> {
    let gateway_mac = MacAddress::from_str(GATEWAY_MAC).map_err(|e| {
        error!("Bad gateway address: {}", e);
        laundry_core::config::ConfigError::InvalidAddress(e)
    })?;

    let gateway_reports = DeliveryQueue::new();
    let mut gateway_link = LinkManager::new(
        SimRadio::new(gateway_mac, REFERENCE_CHANNEL, &gateway_reports),
        &gateway_reports,
    );
    start_gateway(&mut gateway_link, forward)?;

    let gateway_config = GatewayConfig::default();
    let mut gateway: Gateway<'_> = GatewayNode::new(&gateway_config, &INBOUND, Instant::from_millis(0));

    let washer_reports = DeliveryQueue::new();
    let dryer_reports = DeliveryQueue::new();
    let mut senders = [
        SimSender::start(
            "FARRIS_WASHER_1",
            MacAddress::new([0x24, 0x6F, 0x28, 0x0A, 0x00, 0x01]),
            SimMotion {
                elapsed_ms: 0,
                running: 6_000..24_000,
                phase: 0.0,
            },
            &washer_reports,
        )?,
        SimSender::start(
            "FARRIS_DRYER_1",
            MacAddress::new([0x24, 0x6F, 0x28, 0x0A, 0x00, 0x02]),
            SimMotion {
                elapsed_ms: 0,
                running: 16_000..36_000,
                phase: 1.3,
            },
            &dryer_reports,
        )?,
    ];

    let mut dashboard = connect_http(
        &mut gateway,
        "dashboard",
        "GET /events HTTP/1.1\r\nHost: gateway.local\r\n\r\n",
        Instant::from_millis(0),
    )?;
    let mut reconnect: Option<String> = None;

    for ms in (0..=RUN_MS).step_by(TICK_MS as usize) {
        let now = Instant::from_millis(ms);

        match ms {
            9_000 => {
                connect_http(&mut gateway, "phone", "GET / HTTP/1.1\r\n\r\n", now)?;
                connect_http(&mut gateway, "phone", "GET /events HTTP/1.1\r\n\r\n", now)?;
            }
            15_000 => {
                // Someone else's record format on the same channel
                forward(&MacAddress::new([0x3C, 0x71, 0xBF, 0, 0, 9]), &[0xA5; RECORD_SIZE - 1]);
            }
            20_000 => {
                if let Some(id) = dashboard.take() {
                    let seen = gateway
                        .fanout()
                        .subscriber(id)
                        .and_then(|subscriber| subscriber.last_event_id());
                    gateway.disconnect(id);

                    // Comes back a few seconds later quoting the last id it saw
                    reconnect = seen.map(|seen| {
                        format!(
                            "GET /events HTTP/1.1\r\nHost: gateway.local\r\nLast-Event-ID: {seen}\r\n\r\n"
                        )
                    });
                }
            }
            23_000 => {
                if let Some(head) = reconnect.take() {
                    dashboard = connect_http(&mut gateway, "dashboard", &head, now)?;
                }
            }
            _ => {}
        }

        for sender in &mut senders {
            sender.tick(ms);
        }
        gateway.poll(now);
    }

    if let Some(subscriber) = dashboard.and_then(|id| gateway.fanout().subscriber(id)) {
        info!(
            "dashboard is at event {:?} after reconnecting",
            subscriber.last_event_id()
        );
    }

    let stats = gateway.stats();
    info!(
        "Simulation finished: {} received, {} malformed, {} published, {} dropped at handoff",
        stats.received,
        stats.malformed,
        stats.published,
        gateway.inbound_dropped()
    );
    for sender in &senders {
        let delivery = sender.link.stats();
        info!(
            "{}: {} delivered, {} failed",
            sender.config.board_id, delivery.delivered, delivery.failed
        );
    }

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting laundry monitor simulator");

    if let Err(e) = run() {
        error!("Simulation stopped: {}", e);
        std::process::exit(1);
    }
}
