//! Gateway HTTP event stream over embassy-net TCP.
//!
//! A fixed pool of connection tasks, one per subscriber slot. Each task
//! accepts a connection, answers `GET /events` with an SSE stream fed from
//! its slot queue and registers itself with the gateway loop through
//! [`COMMANDS`]. Anything else gets a 404.

use embassy_net::Stack;
use embassy_net::tcp::{self, TcpSocket};
use embassy_time::{Duration, with_timeout};
use log::{debug, info, warn};

use laundry_core::stream::http::{
    NOT_FOUND_RESPONSE, STREAM_RESPONSE_HEAD, header_end, parse_request,
};
use laundry_core::stream::{CommandQueue, EventKind, SubscriberCommand, SubscriberQueue};

/// Simultaneous event stream subscribers.
pub const SSE_SLOTS: usize = 4;

const REQUEST_BUFFER_SIZE: usize = 1024;
const SOCKET_BUFFER_SIZE: usize = 1536;

/// Time a client gets to send its request head.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A slot that sees nothing, not even keep-alives, for this long has been
/// dropped by the gateway loop.
const STALL_TIMEOUT: Duration =
    Duration::from_millis(3 * laundry_core::config::DEFAULT_KEEPALIVE_PERIOD_MS as u64);

pub static SUBSCRIBER_QUEUES: [SubscriberQueue; SSE_SLOTS] =
    [const { SubscriberQueue::new() }; SSE_SLOTS];

pub static COMMANDS: CommandQueue = CommandQueue::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestOutcome {
    Stream,
    Rejected,
    Closed,
}

#[embassy_executor::task(pool_size = SSE_SLOTS)]
pub async fn sse_connection_task(stack: Stack<'static>, port: u16, slot: usize) {
    let mut rx_buffer = [0u8; SOCKET_BUFFER_SIZE];
    let mut tx_buffer = [0u8; SOCKET_BUFFER_SIZE];
    let queue = &SUBSCRIBER_QUEUES[slot];

    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);

        if let Err(e) = socket.accept(port).await {
            warn!("Slot {} accept failed: {:?}", slot, e);
            continue;
        }
        debug!("Slot {} accepted {:?}", slot, socket.remote_endpoint());

        if read_request(&mut socket, slot).await == RequestOutcome::Stream {
            stream_events(&mut socket, queue, slot).await;
        }

        socket.close();
        // Let the FIN go out before the buffers are reused
        let _ = socket.flush().await;
    }
}

async fn read_request(socket: &mut TcpSocket<'_>, slot: usize) -> RequestOutcome {
    let mut buffer = [0u8; REQUEST_BUFFER_SIZE];
    let mut filled = 0;

    socket.set_timeout(Some(REQUEST_TIMEOUT));
    let end = loop {
        if filled == buffer.len() {
            warn!("Slot {}: request head too large", slot);
            return RequestOutcome::Closed;
        }
        match socket.read(&mut buffer[filled..]).await {
            Ok(0) | Err(_) => return RequestOutcome::Closed,
            Ok(n) => filled += n,
        }
        if let Some(end) = header_end(&buffer[..filled]) {
            break end;
        }
    };
    socket.set_timeout(None);

    let request = core::str::from_utf8(&buffer[..end])
        .ok()
        .and_then(parse_request);

    let Some(request) = request.filter(|r| r.is_event_stream()) else {
        let _ = write_all(socket, NOT_FOUND_RESPONSE.as_bytes()).await;
        return RequestOutcome::Rejected;
    };

    if write_all(socket, STREAM_RESPONSE_HEAD.as_bytes())
        .await
        .is_err()
    {
        return RequestOutcome::Closed;
    }

    COMMANDS
        .send(SubscriberCommand::Connect {
            slot,
            last_event_id: request.last_event_id,
        })
        .await;
    RequestOutcome::Stream
}

async fn stream_events(socket: &mut TcpSocket<'_>, queue: &SubscriberQueue, slot: usize) {
    let mut greeted = false;

    loop {
        let Ok(event) = with_timeout(STALL_TIMEOUT, queue.receive()).await else {
            info!("Slot {}: no events, closing", slot);
            break;
        };

        // Until the gateway handles our Connect, the slot may still be fed
        // for the previous subscriber
        if !greeted {
            if event.kind != EventKind::Hello {
                debug!("Slot {}: skipping event {} queued before hello", slot, event.id);
                continue;
            }
            greeted = true;
        }

        let frame = event.to_sse();
        let frame = event.to_sse();

        if write_all(socket, frame.as_bytes()).await.is_err() || socket.flush().await.is_err() {
            info!("Slot {}: client went away", slot);
            break;
        }
    }

    COMMANDS.send(SubscriberCommand::Disconnect { slot }).await;
}

async fn write_all(socket: &mut TcpSocket<'_>, mut bytes: &[u8]) -> Result<(), tcp::Error> {
    while !bytes.is_empty() {
        match socket.write(bytes).await? {
            0 => return Err(tcp::Error::ConnectionReset),
            n => bytes = &bytes[n..],
        }
    }
    Ok(())
}
