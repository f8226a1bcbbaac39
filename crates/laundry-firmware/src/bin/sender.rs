//! Vibration sender node
//!
//! Samples an MPU6050, decides whether the machine it is strapped to is
//! running and reports that to the gateway over ESP-NOW every evaluation
//! period.

#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use core::convert::Infallible;

use embassy_executor::Spawner;
use embassy_time::{Instant, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::peripherals::Peripherals;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::wifi::{ClientConfig, ModeConfig};
use log::{error, info};
use static_cell::StaticCell;

use laundry_core::config::SenderConfig;
use laundry_core::link::{LinkError, LinkManager};
use laundry_core::sender::{SenderLoop, dispatch, start_sender};
use laundry_firmware::app_state::{AppError, AppRunState, halt};
use laundry_firmware::radio::{DELIVERY, EspNowRadio, transmit_task};
use laundry_firmware::secrets;
use laundry_firmware::sensors::{Mpu6050, SamplerError};

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
esp_bootloader_esp_idf::esp_app_desc!();

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Embassy initialized!");

    let mut state = AppRunState::Uninitialized;
    let reason = match run(spawner, peripherals, &mut state).await {
        Ok(never) => match never {},
        Err(e) => e,
    };

    halt(state, reason).await
}

async fn run(
    spawner: Spawner,
    peripherals: Peripherals,
    state: &mut AppRunState,
) -> Result<Infallible, AppError> {
    let config = SenderConfig::new(
        secrets::BOARD_ID,
        secrets::REFERENCE_SSID,
        secrets::GATEWAY_MAC,
    )?;
    info!("Board {} reporting to {}", config.board_id, config.gateway.address);

    let i2c = I2c::new(peripherals.I2C0, I2cConfig::default())
        .map_err(|_| SamplerError::InitializationFailed {
            sensor: "MPU6050",
            details: "I2C bus configuration rejected",
        })?
        .with_sda(peripherals.GPIO8)
        .with_scl(peripherals.GPIO9)
        .into_async();

    let mut motion = Mpu6050::new(i2c);
    motion.init().await?;
    if let Ok(celsius) = motion.read_temperature().await {
        info!("MPU6050 die temperature {} C", celsius);
    }

    let radio = RADIO.init(esp_radio::init().map_err(|e| {
        error!("Failed to initialize the radio: {:?}", e);
        LinkError::RadioInit
    })?);

    let (mut wifi, interfaces) = esp_radio::wifi::new(radio, peripherals.WIFI, Default::default())
        .map_err(|e| {
            error!("Failed to initialize the Wi-Fi controller: {:?}", e);
            LinkError::RadioInit
        })?;

    // ESP-NOW needs the station interface running, but not connected
    wifi.set_config(&ModeConfig::Client(ClientConfig::default()))
        .map_err(|e| {
            error!("Failed to configure station mode: {:?}", e);
            LinkError::RadioInit
        })?;
    wifi.start_async().await.map_err(|e| {
        error!("Failed to start Wi-Fi: {:?}", e);
        LinkError::RadioInit
    })?;

    let (manager, sender, _receiver) = interfaces.esp_now.split();
    spawner.spawn(transmit_task(sender)).map_err(|e| {
        error!("Failed to spawn the transmit task: {:?}", e);
        LinkError::RadioInit
    })?;

    let mut link = LinkManager::new(EspNowRadio::new(manager).with_scanner(wifi), &DELIVERY);

    *state = AppRunState::ChannelSync;
    if let Err(e) = start_sender(&mut link, &config).await {
        if link.is_open() {
            *state = AppRunState::LinkOpen;
        }
        return Err(e.into());
    }

    *state = AppRunState::PeersRegistered;
    info!("Sender {}", state.label());

    *state = AppRunState::Running;
    let mut node = SenderLoop::new(&config, Instant::now());

    loop {
        if let Some(message) = node.poll(Instant::now(), &mut motion).await {
            dispatch(&mut link, &config.gateway, &message);
        }
        link.drain_delivery_reports();

        Timer::at(node.next_wake(Instant::now())).await;
    }
}
