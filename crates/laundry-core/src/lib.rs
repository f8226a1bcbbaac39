//! Hardware-independent core library for the laundry monitor
//!
//! This crate contains all platform-agnostic logic for the two node roles of
//! the system: the vibration *sender* that decides whether a washer or dryer
//! is running, and the *gateway* that republishes those decisions as a
//! resumable event stream.
//!
//! It is `no_std` with `extern crate alloc` so it compiles on both embedded
//! targets (ESP32-S3) and desktop hosts (for the simulator and tests). Unit
//! tests build against `std`.
//!
//! Radios and accelerometers are reached only through the [`link::Radio`] and
//! [`sensors::MotionSampler`] traits.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod app_state;
pub mod classifier;
pub mod config;
pub mod gateway;
pub mod link;
pub mod message;
pub mod sender;
pub mod sensors;
pub mod stream;
pub mod timing;
