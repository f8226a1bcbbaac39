//! ESP-NOW implementation of the link [`Radio`] seam.
//!
//! esp-radio exposes ESP-NOW as a manager (peers, channel), a sender and a
//! receiver. Sends are fire-and-forget from the link's point of view:
//! [`EspNowRadio::submit`] only queues the datagram and [`transmit_task`]
//! performs the actual send, reporting each outcome to [`DELIVERY`].
//! [`receive_task`] hands every inbound datagram to the installed
//! [`ReceiveHandler`].

use alloc::vec::Vec;
use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use esp_radio::esp_now::{EspNowManager, EspNowReceiver, EspNowSender, EspNowWifiInterface, PeerInfo};
use esp_radio::wifi::{ScanConfig, WifiController};
use log::{debug, error};
use thiserror_no_std::Error;

use laundry_core::link::{
    DatagramQueue, DeliveryQueue, DeliveryReport, MacAddress, PeerDescriptor, Radio,
    ReceiveHandler, ScannedNetwork, WifiChannel,
};

/// Datagrams accepted by [`EspNowRadio::submit`], waiting for [`transmit_task`].
pub static OUTBOUND: DatagramQueue = DatagramQueue::new();

/// Send outcomes, drained by the link manager.
pub static DELIVERY: DeliveryQueue = DeliveryQueue::new();

static RECEIVE_HANDLER: Mutex<CriticalSectionRawMutex, Cell<Option<ReceiveHandler>>> =
    Mutex::new(Cell::new(None));

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    #[error("no Wi-Fi controller available for scanning")]
    ScanUnavailable,
    #[error("Wi-Fi scan failed")]
    Scan,
    #[error("could not switch ESP-NOW channel")]
    Channel,
    #[error("ESP-NOW rejected the peer")]
    Peer,
    #[error("outbound queue is full")]
    QueueFull,
}

pub struct EspNowRadio<'d> {
    manager: EspNowManager<'d>,
    /// Needed for scanning. Nodes that never scan may leave it out.
    controller: Option<WifiController<'d>>,
}

impl<'d> EspNowRadio<'d> {
    pub fn new(manager: EspNowManager<'d>) -> Self {
        Self {
            manager,
            controller: None,
        }
    }

    pub fn with_scanner(mut self, controller: WifiController<'d>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn controller_mut(&mut self) -> Option<&mut WifiController<'d>> {
        self.controller.as_mut()
    }
}

impl Radio for EspNowRadio<'_> {
    type Error = RadioError;

    async fn scan(&mut self) -> Result<Vec<ScannedNetwork>, RadioError> {
        let controller = self.controller.as_mut().ok_or(RadioError::ScanUnavailable)?;

        let found = controller
            .scan_with_config_async(ScanConfig::default())
            .await
            .map_err(|e| {
                error!("Wi-Fi scan failed: {:?}", e);
                RadioError::Scan
            })?;

        Ok(found
            .iter()
            .filter_map(|ap| {
                Some(ScannedNetwork {
                    ssid: heapless::String::try_from(ap.ssid.as_str()).ok()?,
                    channel: ap.channel,
                    rssi: ap.signal_strength,
                })
            })
            .collect())
    }

    fn init(&mut self, channel: Option<WifiChannel>) -> Result<(), RadioError> {
        if let Some(channel) = channel {
            self.manager.set_channel(channel.get()).map_err(|e| {
                error!("Failed to set ESP-NOW channel {}: {:?}", channel, e);
                RadioError::Channel
            })?;
        }
        Ok(())
    }

    fn add_peer(&mut self, peer: &PeerDescriptor) -> Result<(), RadioError> {
        self.manager
            .add_peer(PeerInfo {
                interface: EspNowWifiInterface::Sta,
                peer_address: peer.address.octets(),
                lmk: None,
                channel: peer.channel.map(WifiChannel::get),
                encrypt: false,
            })
            .map_err(|e| {
                error!("ESP-NOW add_peer failed: {:?}", e);
                RadioError::Peer
            })
    }

    fn submit(&mut self, to: &MacAddress, bytes: &[u8]) -> Result<(), RadioError> {
        if OUTBOUND.offer(*to, bytes) {
            Ok(())
        } else {
            Err(RadioError::QueueFull)
        }
    }

    fn set_receive_handler(&mut self, handler: ReceiveHandler) {
        RECEIVE_HANDLER.lock(|slot| slot.set(Some(handler)));
    }
}

#[embassy_executor::task]
pub async fn transmit_task(mut sender: EspNowSender<'static>) {
    loop {
        let datagram = OUTBOUND.take().await;

        let delivered = match sender.send_async(&datagram.peer.octets(), &datagram.data).await {
            Ok(()) => true,
            Err(e) => {
                debug!("ESP-NOW send to {} failed: {:?}", datagram.peer, e);
                false
            }
        };

        DELIVERY.report(DeliveryReport {
            peer: datagram.peer,
            delivered,
        });
    }
}

#[embassy_executor::task]
pub async fn receive_task(mut receiver: EspNowReceiver<'static>) {
    loop {
        let received = receiver.receive_async().await;
        let source = MacAddress::new(received.info.src_address);

        match RECEIVE_HANDLER.lock(Cell::get) {
            Some(handler) => handler(&source, received.data()),
            None => debug!("Datagram from {} before a handler was installed", source),
        }
    }
}
