//! Deployment settings baked in by `build.rs`

pub const BOARD_ID: &str = env!("LAUNDRY_BOARD_ID");

/// Network whose channel ESP-NOW traffic is synchronized to. The gateway
/// joins it, senders only look up its channel.
pub const REFERENCE_SSID: &str = env!("LAUNDRY_REFERENCE_SSID");

pub const WIFI_PASSWORD: &str = env!("LAUNDRY_WIFI_PASSWORD");

pub const GATEWAY_MAC: &str = env!("LAUNDRY_GATEWAY_MAC");
