//! Point-to-point broadcast radio link
//!
//! The link carries fixed-size status records from senders to the gateway
//! without any per-message handshake. Both ends must share a radio channel;
//! senders pick theirs by looking up the channel of a named reference Wi-Fi
//! network (the one the gateway is joined to).
//!
//! [`LinkManager`] owns the bookkeeping (channel, peer table, delivery
//! reporting) and talks to hardware only through the [`Radio`] trait.

mod handoff;
mod peers;

pub use handoff::*;
pub use peers::*;

use alloc::vec::Vec;
use core::fmt;
use core::str::FromStr;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// 6-byte hardware (MAC) address of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const BROADCAST: Self = Self([0xFF; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Whether this address may be registered as a link peer.
    ///
    /// Broadcast is allowed; the all-zero address and other group addresses
    /// are not.
    pub fn is_valid_peer(&self) -> bool {
        self.is_broadcast() || !(self.is_unspecified() || self.is_multicast())
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("expected a MAC address like AA:BB:CC:DD:EE:FF")]
pub struct ParseMacError;

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);

        for octet in octets.iter_mut() {
            let part = parts.next().ok_or(ParseMacError)?;
            if part.len() != 2 {
                return Err(ParseMacError);
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError)?;
        }

        if parts.next().is_some() {
            return Err(ParseMacError);
        }

        Ok(Self(octets))
    }
}

/// A 2.4 GHz Wi-Fi channel number (1..=14).
///
/// "Unknown" is expressed as `Option<WifiChannel>::None`, never as 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct WifiChannel(u8);

impl WifiChannel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 14;

    pub const fn new(channel: u8) -> Option<Self> {
        if channel >= Self::MIN && channel <= Self::MAX {
            Some(Self(channel))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for WifiChannel {
    type Error = InvalidChannel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidChannel(value))
    }
}

impl From<WifiChannel> for u8 {
    fn from(channel: WifiChannel) -> Self {
        channel.0
    }
}

impl fmt::Display for WifiChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{0} is not a 2.4 GHz channel (1-14)")]
pub struct InvalidChannel(pub u8);

/// A configured link peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub address: MacAddress,
    /// `None` means "whatever channel the link was opened on"
    pub channel: Option<WifiChannel>,
}

impl PeerDescriptor {
    pub const fn new(address: MacAddress, channel: Option<WifiChannel>) -> Self {
        Self { address, channel }
    }
}

/// One access point seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedNetwork {
    pub ssid: heapless::String<32>,
    /// Raw channel number as reported by the radio
    pub channel: u8,
    pub rssi: i8,
}

/// Find the channel of the network named exactly `reference`.
///
/// The first exact match wins. Returns `None` when no network matches or the
/// matching entry reports an invalid channel.
pub fn resolve_channel<'a, I>(networks: I, reference: &str) -> Option<WifiChannel>
where
    I: IntoIterator<Item = &'a ScannedNetwork>,
{
    networks
        .into_iter()
        .find(|network| network.ssid.as_str() == reference)
        .and_then(|network| WifiChannel::new(network.channel))
}

/// Why a peer could not be registered.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRejection {
    #[error("peer table is full")]
    TableFull,
    #[error("{0} is not a valid peer address")]
    InvalidAddress(MacAddress),
    #[error("radio refused the peer")]
    Radio,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("radio initialization failed")]
    RadioInit,
    #[error("peer registration failed: {0}")]
    PeerRegistration(PeerRejection),
    #[error("reference network not found, using the default channel")]
    ChannelUnresolved,
    #[error("link is not open")]
    NotOpen,
    #[error("{0} is not a registered peer")]
    UnknownPeer(MacAddress),
    #[error("radio refused the datagram")]
    Send,
}

/// Called once per inbound datagram with the sender's address and payload.
///
/// Runs in the radio's receive context and must not block; hand the data to
/// a [`DatagramQueue`] and return.
pub type ReceiveHandler = fn(&MacAddress, &[u8]);

/// Hardware seam for the broadcast-capable radio.
///
/// Implementations must deliver send completions to the [`DeliveryQueue`]
/// the [`LinkManager`] was created with, and invoke the registered
/// [`ReceiveHandler`] for every inbound datagram.
pub trait Radio {
    type Error: fmt::Debug;

    /// List the networks currently visible.
    fn scan(&mut self) -> impl Future<Output = Result<Vec<ScannedNetwork>, Self::Error>>;

    /// Bring the radio up in broadcast-link mode, tuned to `channel` if given.
    fn init(&mut self, channel: Option<WifiChannel>) -> Result<(), Self::Error>;

    fn add_peer(&mut self, peer: &PeerDescriptor) -> Result<(), Self::Error>;

    /// Queue `bytes` for transmission to `to` without waiting for delivery.
    fn submit(&mut self, to: &MacAddress, bytes: &[u8]) -> Result<(), Self::Error>;

    fn set_receive_handler(&mut self, handler: ReceiveHandler);
}

/// Running totals of asynchronous delivery outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u32,
    pub failed: u32,
}

/// Bookkeeping around a [`Radio`]: channel, peers and delivery outcomes.
pub struct LinkManager<'a, R: Radio> {
    radio: R,
    peers: PeerTable,
    channel: Option<WifiChannel>,
    open: bool,
    reports: &'a DeliveryQueue,
    stats: DeliveryStats,
}

impl<'a, R: Radio> LinkManager<'a, R> {
    pub fn new(radio: R, reports: &'a DeliveryQueue) -> Self {
        Self {
            radio,
            peers: PeerTable::new(),
            channel: None,
            open: false,
            reports,
            stats: DeliveryStats::default(),
        }
    }

    /// Look up the channel of the reference network.
    ///
    /// Unresolved is not fatal: it is logged and the caller opens the link on
    /// the radio's default channel.
    pub async fn resolve_channel(&mut self, reference: &str) -> Option<WifiChannel> {
        let networks = match self.radio.scan().await {
            Ok(networks) => networks,
            Err(e) => {
                warn!("Network scan failed: {:?}", e);
                return None;
            }
        };

        debug!("Scan found {} networks", networks.len());

        match resolve_channel(&networks, reference) {
            Some(channel) => {
                info!("Reference network '{}' is on channel {}", reference, channel);
                Some(channel)
            }
            None => {
                warn!("'{}': {}", reference, LinkError::ChannelUnresolved);
                None
            }
        }
    }

    /// Initialize the radio in broadcast-link mode.
    pub fn open(&mut self, channel: Option<WifiChannel>) -> Result<(), LinkError> {
        self.radio.init(channel).map_err(|e| {
            error!("Error initializing the radio link: {:?}", e);
            LinkError::RadioInit
        })?;

        self.channel = channel;
        self.open = true;

        match channel {
            Some(channel) => info!("Radio link open on channel {}", channel),
            None => info!("Radio link open on the default channel"),
        }
        Ok(())
    }

    /// Register a fixed peer. Re-registering a known address is a no-op.
    pub fn register_peer(&mut self, peer: PeerDescriptor) -> Result<(), LinkError> {
        if !self.open {
            return Err(LinkError::NotOpen);
        }

        let added = self.peers.insert(peer).map_err(|rejection| {
            error!("Failed to add peer {}: {}", peer.address, rejection);
            LinkError::PeerRegistration(rejection)
        })?;

        if !added {
            debug!("Peer {} already registered", peer.address);
            return Ok(());
        }

        if let Err(e) = self.radio.add_peer(&peer) {
            error!("Radio refused peer {}: {:?}", peer.address, e);
            self.peers.remove(&peer.address);
            return Err(LinkError::PeerRegistration(PeerRejection::Radio));
        }

        info!("Registered peer {}", peer.address);
        Ok(())
    }

    /// Hand `bytes` to the radio for `peer`.
    ///
    /// `Ok` means the radio accepted the datagram, not that it arrived. The
    /// delivery outcome shows up later in
    /// [`drain_delivery_reports`](Self::drain_delivery_reports). Nothing is
    /// retried.
    pub fn send(&mut self, peer: &MacAddress, bytes: &[u8]) -> Result<(), LinkError> {
        if !self.open {
            return Err(LinkError::NotOpen);
        }

        if !self.peers.contains(peer) {
            return Err(LinkError::UnknownPeer(*peer));
        }

        self.radio.submit(peer, bytes).map_err(|e| {
            warn!("Error sending the data to {}: {:?}", peer, e);
            LinkError::Send
        })
    }

    /// Route every inbound datagram to `handler`.
    pub fn on_receive(&mut self, handler: ReceiveHandler) {
        self.radio.set_receive_handler(handler);
    }

    /// Log and count every delivery report that arrived since the last call.
    pub fn drain_delivery_reports(&mut self) -> DeliveryStats {
        let mut drained = DeliveryStats::default();

        while let Some(report) = self.reports.try_take() {
            if report.delivered {
                debug!("Last packet to {}: delivery success", report.peer);
                drained.delivered += 1;
            } else {
                warn!("Last packet to {}: delivery fail", report.peer);
                drained.failed += 1;
            }
        }

        self.stats.delivered += drained.delivered;
        self.stats.failed += drained.failed;
        drained
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn channel(&self) -> Option<WifiChannel> {
        self.channel
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Lifetime delivery totals.
    pub fn stats(&self) -> DeliveryStats {
        self.stats
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}
