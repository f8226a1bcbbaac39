//! Motion sensing seam
//!
//! The accelerometer itself is an external collaborator. Drivers implement
//! [`MotionSampler`] and the sender loop only ever sees [`SampleReading`]s.

use thiserror_no_std::Error;

pub use crate::classifier::SampleReading;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerError {
    #[error("{sensor}: failed to {operation} ({details})")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor}: initialization failed ({details})")]
    InitializationFailed {
        sensor: &'static str,
        details: &'static str,
    },
}

/// Anything that can produce a 3-axis acceleration vector on demand.
pub trait MotionSampler {
    /// Read the current acceleration in m/s².
    fn read_acceleration(&mut self) -> impl Future<Output = Result<SampleReading, SamplerError>>;
}
