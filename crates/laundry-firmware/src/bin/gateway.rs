//! Gateway node
//!
//! Joins the reference Wi-Fi network, listens for sender records over
//! ESP-NOW on that network's channel and republishes them as a Server-Sent
//! Events stream at `http://<gateway>/events`.

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
use embassy_futures::select::{Either3, select3};
use embassy_net::{Runner, StackResources};
use embassy_time::{Duration, Instant, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::peripherals::Peripherals;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiDevice};
use log::{error, info, warn};
use static_cell::StaticCell;

use laundry_core::config::{ConfigError, GatewayConfig};
use laundry_core::gateway::{GatewayNode, start_gateway};
use laundry_core::link::{DatagramQueue, LinkError, LinkManager, MacAddress};
use laundry_core::stream::ChannelSink;
use laundry_firmware::app_state::{AppError, AppRunState, halt};
use laundry_firmware::radio::{DELIVERY, EspNowRadio, receive_task};
use laundry_firmware::secrets;
use laundry_firmware::sse_server::{COMMANDS, SSE_SLOTS, SUBSCRIBER_QUEUES, sse_connection_task};

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
esp_bootloader_esp_idf::esp_app_desc!();

const CONNECT_RETRY: Duration = Duration::from_secs(1);

/// Sockets for the SSE slots plus DHCP.
const SOCKET_COUNT: usize = SSE_SLOTS + 1;

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static NET_RESOURCES: StaticCell<StackResources<SOCKET_COUNT>> = StaticCell::new();

/// Inbound sender records, filled by the ESP-NOW receive task.
static INBOUND: DatagramQueue = DatagramQueue::new();

fn forward(source: &MacAddress, bytes: &[u8]) {
    if !INBOUND.offer(*source, bytes) {
        warn!(
            "Inbound queue full, dropped datagram from {} ({} dropped so far)",
            source,
            INBOUND.dropped()
        );
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

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
    let gateway_config = GatewayConfig::default();
    gateway_config.validate()?;
    if secrets::REFERENCE_SSID.is_empty() {
        return Err(ConfigError::InvalidNetworkName.into());
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

    let client = ClientConfig::default()
        .with_ssid(secrets::REFERENCE_SSID.into())
        .with_password(secrets::WIFI_PASSWORD.into());
    wifi.set_config(&ModeConfig::Client(client)).map_err(|e| {
        error!("Failed to configure station mode: {:?}", e);
        LinkError::RadioInit
    })?;
    wifi.start_async().await.map_err(|e| {
        error!("Failed to start Wi-Fi: {:?}", e);
        LinkError::RadioInit
    })?;

    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::new()),
        seed,
    );
    spawner.spawn(net_task(runner)).map_err(|e| {
        error!("Failed to spawn the network task: {:?}", e);
        LinkError::RadioInit
    })?;

    let (manager, _sender, receiver) = interfaces.esp_now.split();
    let mut link = LinkManager::new(EspNowRadio::new(manager).with_scanner(wifi), &DELIVERY);

    *state = AppRunState::ChannelSync;
    // Informational: ESP-NOW follows the channel of the joined network
    link.resolve_channel(secrets::REFERENCE_SSID).await;

    if let Some(wifi) = link.radio_mut().controller_mut() {
        info!("Connecting to WiFi...");
        while let Err(e) = wifi.connect_async().await {
            warn!("Wi-Fi connect failed: {:?}, retrying", e);
            Timer::after(CONNECT_RETRY).await;
        }
    }

    stack.wait_config_up().await;
    if let Some(ip) = stack.config_v4() {
        info!("Station IP Address: {}", ip.address);
    }

    start_gateway(&mut link, forward)?;
    *state = AppRunState::LinkOpen;

    spawner.spawn(receive_task(receiver)).map_err(|e| {
        error!("Failed to spawn the receive task: {:?}", e);
        LinkError::RadioInit
    })?;

    for slot in 0..SSE_SLOTS {
        if let Err(e) = spawner.spawn(sse_connection_task(stack, gateway_config.listen_port, slot)) {
            error!("Failed to spawn SSE slot {}: {:?}", slot, e);
        }
    }
    info!(
        "Serving events on port {} for up to {} subscribers",
        gateway_config.listen_port, SSE_SLOTS
    );

    *state = AppRunState::Running;
    let mut node: GatewayNode<'static, ChannelSink<'static>, SSE_SLOTS> =
        GatewayNode::new(&gateway_config, &INBOUND, Instant::now());

    loop {
        let wake = node.next_wake(Instant::now());

        match select3(COMMANDS.receive(), INBOUND.take(), Timer::at(wake)).await {
            Either3::First(command) => {
                if let Err(e) = node.apply(command, &SUBSCRIBER_QUEUES, Instant::now()) {
                    warn!("Subscriber command {:?} failed: {}", command, e);
                }
            }
            Either3::Second(datagram) => {
                node.handle(&datagram, Instant::now());
            }
            Either3::Third(()) => {}
        }

        node.poll(Instant::now());
    }
}
