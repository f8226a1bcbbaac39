mod mpu6050;

pub use laundry_core::sensors::{MotionSampler, SamplerError};
pub use mpu6050::Mpu6050;
