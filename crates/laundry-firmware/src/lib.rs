//! ESP32-S3 firmware-specific modules for the laundry monitor
//!
//! This crate contains the hardware-facing halves of the two node roles: the
//! ESP-NOW radio adapter, the MPU6050 accelerometer driver and the gateway's
//! HTTP event stream server. Everything else lives in `laundry_core`.

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod radio;
pub mod secrets;
pub mod sensors;
pub mod sse_server;
