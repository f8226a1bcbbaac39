//! Bakes deployment settings into the firmware.
//!
//! Values come from the environment or from a `.env` file next to this
//! crate. Anything missing gets a placeholder that the node rejects at
//! startup with a configuration error.

const SETTINGS: &[(&str, &str)] = &[
    ("LAUNDRY_BOARD_ID", "LAUNDRY_SENDER"),
    ("LAUNDRY_REFERENCE_SSID", ""),
    ("LAUNDRY_WIFI_PASSWORD", ""),
    ("LAUNDRY_GATEWAY_MAC", "00:00:00:00:00:00"),
];

fn main() {
    println!("cargo:rerun-if-changed=.env");
    println!("cargo:rustc-link-arg=-Tlinkall.x");

    // A missing .env is fine, the process environment may carry everything
    let _ = dotenvy::dotenv();

    for (key, placeholder) in SETTINGS {
        println!("cargo:rerun-if-env-changed={key}");
        let value = std::env::var(key).unwrap_or_else(|_| {
            println!("cargo:warning={key} is not set, using \"{placeholder}\"");
            placeholder.to_string()
        });
        println!("cargo:rustc-env={key}={value}");
    }
}
