//! Sender node control loop
//!
//! A sender samples its accelerometer on a short period and decides on a
//! longer one. The first decision tick calibrates instead of deciding; every
//! later one produces a [`StatusMessage`] for the gateway, whether or not the
//! status changed since the last tick.

use embassy_time::Instant;
use log::{debug, info, warn};

use crate::classifier::StatusClassifier;
use crate::config::SenderConfig;
use crate::link::{LinkError, LinkManager, PeerDescriptor, Radio, WifiChannel};
use crate::message::{BoardId, StatusMessage};
use crate::sensors::MotionSampler;
use crate::timing::Periodic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderPhase {
    Uncalibrated,
    Calibrated,
}

/// Sender node state. Owned by the loop and passed nowhere else.
pub struct SenderLoop {
    classifier: StatusClassifier,
    phase: SenderPhase,
    sampling: Periodic,
    evaluation: Periodic,
    board_id: BoardId,
}

impl SenderLoop {
    pub fn new(config: &SenderConfig, start: Instant) -> Self {
        Self {
            classifier: StatusClassifier::new(config.threshold),
            phase: SenderPhase::Uncalibrated,
            sampling: Periodic::new(config.sample_period(), start),
            evaluation: Periodic::new(config.evaluation_period(), start),
            board_id: config.board_id.clone(),
        }
    }

    /// Run whichever periodic actions are due at `now`.
    ///
    /// Sampling runs before evaluation so a tick where both are due counts
    /// the fresh reading. A failed read is logged and skipped. Returns the
    /// message to send when an evaluation happened.
    pub async fn poll<M: MotionSampler>(
        &mut self,
        now: Instant,
        sampler: &mut M,
    ) -> Option<StatusMessage> {
        if self.sampling.poll(now) {
            match sampler.read_acceleration().await {
                Ok(reading) => {
                    debug!(
                        "Acceleration x={} y={} z={} m/s^2",
                        reading.x, reading.y, reading.z
                    );
                    self.classifier.add_reading(reading);
                }
                Err(e) => warn!("Skipping sample: {}", e),
            }
        }

        if !self.evaluation.poll(now) {
            return None;
        }

        match self.phase {
            SenderPhase::Uncalibrated => {
                let baseline = self.classifier.calibrate();
                info!("Baseline magnitude {} m/s^2", baseline.magnitude);
                self.phase = SenderPhase::Calibrated;
                None
            }
            SenderPhase::Calibrated => {
                let evaluation = self.classifier.determine_status();
                info!(
                    "{} is {}",
                    self.board_id,
                    if evaluation.machine_on { "on" } else { "off" }
                );
                Some(StatusMessage::new(&self.board_id, evaluation.machine_on))
            }
        }
    }

    /// Earliest time at which [`poll`](Self::poll) has something to do.
    pub fn next_wake(&self, now: Instant) -> Instant {
        now + self.sampling.remaining(now).min(self.evaluation.remaining(now))
    }

    pub fn phase(&self) -> SenderPhase {
        self.phase
    }

    pub fn classifier(&self) -> &StatusClassifier {
        &self.classifier
    }
}

/// Bring up the sender's side of the link: sync to the reference network's
/// channel, open the radio and register the gateway.
///
/// An unresolved channel falls back to the radio default. Radio and peer
/// errors are returned; the caller must not enter the send loop after one.
pub async fn start_sender<R: Radio>(
    link: &mut LinkManager<'_, R>,
    config: &SenderConfig,
) -> Result<Option<WifiChannel>, LinkError> {
    let channel = link.resolve_channel(&config.reference_network).await;
    link.open(channel)?;

    let gateway = PeerDescriptor {
        channel: config.gateway.channel.or(channel),
        ..config.gateway
    };
    link.register_peer(gateway)?;

    Ok(channel)
}

/// Encode and send one status record to `gateway`. Failures are logged only;
/// the next evaluation tick sends a fresh record anyway.
pub fn dispatch<R: Radio>(
    link: &mut LinkManager<'_, R>,
    gateway: &PeerDescriptor,
    message: &StatusMessage,
) -> bool {
    match link.send(&gateway.address, &message.to_bytes()) {
        Ok(()) => {
            debug!("Sent status of {} to {}", message.id(), gateway.address);
            true
        }
        Err(e) => {
            warn!("Status of {} not sent: {}", message.id(), e);
            false
        }
    }
}
