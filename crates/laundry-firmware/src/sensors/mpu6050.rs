use embedded_hal_async::i2c::I2c;
use laundry_core::sensors::{MotionSampler, SampleReading, SamplerError};

const SENSOR: &str = "MPU6050";

/// I2C address with AD0 pulled low.
pub const DEFAULT_ADDRESS: u8 = 0x68;

const REG_ACCEL_CONFIG: u8 = 0x1C;
const REG_ACCEL_XOUT_H: u8 = 0x3B;
const REG_TEMP_OUT_H: u8 = 0x41;
const REG_PWR_MGMT_1: u8 = 0x6B;
const REG_WHO_AM_I: u8 = 0x75;

const WHO_AM_I_VALUE: u8 = 0x68;

/// PLL with X axis gyroscope reference, sleep disabled
const CLOCK_PLL_XGYRO: u8 = 0x01;

/// ±8 g full scale
const ACCEL_RANGE_8G: u8 = 0b10 << 3;
const LSB_PER_G: f32 = 4096.0;

const STANDARD_GRAVITY: f32 = 9.806_65;

/// InvenSense MPU6050 accelerometer, used for its accelerometer only.
pub struct Mpu6050<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Mpu6050<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            address: DEFAULT_ADDRESS,
        }
    }

    /// Check the chip identity, wake it up and set the ±8 g range.
    pub async fn init(&mut self) -> Result<(), SamplerError> {
        let mut id = [0u8; 1];
        self.i2c
            .write_read(self.address, &[REG_WHO_AM_I], &mut id)
            .await
            .map_err(|e| {
                log::error!("MPU6050 probe failed: {:?}", e);
                SamplerError::InitializationFailed {
                    sensor: SENSOR,
                    details: "no response on the I2C bus",
                }
            })?;

        if id[0] != WHO_AM_I_VALUE {
            log::error!("Unexpected MPU6050 WHO_AM_I 0x{:02X}", id[0]);
            return Err(SamplerError::InitializationFailed {
                sensor: SENSOR,
                details: "device at the address is not an MPU6050",
            });
        }

        for (register, value) in [
            (REG_PWR_MGMT_1, CLOCK_PLL_XGYRO),
            (REG_ACCEL_CONFIG, ACCEL_RANGE_8G),
        ] {
            self.i2c
                .write(self.address, &[register, value])
                .await
                .map_err(|e| {
                    log::error!("MPU6050 write to 0x{:02X} failed: {:?}", register, e);
                    SamplerError::InitializationFailed {
                        sensor: SENSOR,
                        details: "configuration write failed",
                    }
                })?;
        }

        log::info!("MPU6050 Found!");
        Ok(())
    }

    /// Die temperature in °C.
    pub async fn read_temperature(&mut self) -> Result<f32, SamplerError> {
        let mut raw = [0u8; 2];
        self.i2c
            .write_read(self.address, &[REG_TEMP_OUT_H], &mut raw)
            .await
            .map_err(|e| {
                log::error!("MPU6050 temperature read failed: {:?}", e);
                SamplerError::ReadFailed {
                    sensor: SENSOR,
                    operation: "read temperature",
                    details: "I2C communication error or sensor not responding",
                }
            })?;

        Ok(f32::from(i16::from_be_bytes(raw)) / 340.0 + 36.53)
    }
}

impl<I: I2c> MotionSampler for Mpu6050<I> {
    async fn read_acceleration(&mut self) -> Result<SampleReading, SamplerError> {
        let mut raw = [0u8; 6];
        self.i2c
            .write_read(self.address, &[REG_ACCEL_XOUT_H], &mut raw)
            .await
            .map_err(|e| {
                log::error!("MPU6050 acceleration read failed: {:?}", e);
                SamplerError::ReadFailed {
                    sensor: SENSOR,
                    operation: "read acceleration",
                    details: "I2C communication error or sensor not responding",
                }
            })?;

        let axis = |hi: u8, lo: u8| {
            f32::from(i16::from_be_bytes([hi, lo])) / LSB_PER_G * STANDARD_GRAVITY
        };

        Ok(SampleReading::new(
            axis(raw[0], raw[1]),
            axis(raw[2], raw[3]),
            axis(raw[4], raw[5]),
        ))
    }
}
