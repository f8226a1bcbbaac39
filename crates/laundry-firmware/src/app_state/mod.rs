//! Firmware-specific application state extensions
//!
//! Re-exports the hardware-independent lifecycle types from `laundry_core`
//! and adds the halt path used when a node cannot take part in the system.

use embassy_time::{Duration, Timer};
use log::error;

pub use laundry_core::app_state::*;

/// How often a halted node repeats why it stopped.
const HALT_REMINDER: Duration = Duration::from_secs(30);

/// Park the node after a startup failure.
///
/// The node stops participating but keeps running so the reason stays
/// visible on the debug console.
pub async fn halt(reached: AppRunState, reason: AppError) -> ! {
    loop {
        error!(
            "Node halted during {} ({}): {}",
            reached.label(),
            AppRunState::Halted.label(),
            reason
        );
        Timer::after(HALT_REMINDER).await;
    }
}
