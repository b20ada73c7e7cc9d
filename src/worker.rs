//! Channel workers (spec §4.4) — the forwarding loops that move datagrams
//! between the public listener, the per-slot relay sockets, and (on
//! CLIENT) the local game server.
//!
//! Each loop is a `tokio::select!` between the supervisor's cancellation
//! token and a timed receive, mirroring the teacher's `run_peer_session`
//! loop in `runtime/lan/peer.rs`. The timeout has no semantic meaning of
//! its own here — `UdpSocket::recv` already reports timeout distinctly
//! from a datagram — it just bounds how long a loop iteration can take
//! so cancellation is noticed promptly (spec §5 "Suspension and
//! blocking").

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::protocol::{ControlMessage, Opcode};
use crate::registry::{BindOutcome, PeerRegistry};
use crate::slot::{Slot, SlotState};
use crate::socket::{RecvOutcome, UdpSocket};

/// How often a receive loop wakes up even with nothing to do, so it can
/// check the cancellation token and let the supervisor's timers run.
pub const RECV_TICK: Duration = Duration::from_millis(250);

/// `None` means the cancellation token fired; the caller should stop its
/// loop. A transient I/O error is still `Some` so the caller logs and
/// keeps going — only cancellation ends the loop (spec §7 "transient
/// send/recv failure; logged, retried").
async fn recv_or_cancel(
    socket: &UdpSocket,
    buf_size: usize,
    cancel: &CancellationToken,
) -> Option<Result<RecvOutcome, crate::error::EngineError>> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        outcome = socket.recv(buf_size, RECV_TICK) => Some(outcome),
    }
}

/// SERVER: the single reader on the public-facing listener (spec §4.4
/// "SERVER-ingress worker", fanned out across slots via the registry —
/// spec §5 calls this "the only fan-out point").
pub async fn server_public_listener(
    registry: Arc<PeerRegistry>,
    public_socket: Arc<UdpSocket>,
    buf_size: usize,
    cancel: CancellationToken,
) {
    loop {
        let Some(outcome) = recv_or_cancel(&public_socket, buf_size, &cancel).await else {
            break;
        };
        let (data, from) = match outcome {
            Ok(RecvOutcome::Datagram { data, from }) => (data, from),
            Ok(RecvOutcome::Timeout) => continue,
            Err(e) => {
                log::error!("public listener: transient recv error: {e}");
                continue;
            }
        };

        // Observed on the public listener regardless of admission outcome —
        // spec §4.5 item 3 keys `server_peer_connection_timeout` off traffic
        // from *any* remote peer, not just traffic that lands in a slot.
        registry.global_activity.touch();

        match registry.bind_or_assign(from) {
            BindOutcome::Full => {
                log::warn!("peer table full ({} slots); dropping datagram from {from}", registry.slots().len());
            }
            BindOutcome::Assigned(i) => {
                log::info!("slot {i} assigned to peer {from}");
                let slot = registry.slot(i);
                slot.ingress.touch();
                if !slot.to_client.try_push(data) {
                    log::warn!("slot {i}: to-client queue full, dropping datagram from {from}");
                }
            }
            BindOutcome::Existing(i) => {
                let slot = registry.slot(i);
                slot.ingress.touch();
                if !slot.to_client.try_push(data) {
                    log::warn!("slot {i}: to-client queue full, dropping datagram from {from}");
                }
            }
        }
    }
}

/// SERVER: per-slot reader on the relay channel socket (spec §4.4
/// "SERVER-egress worker"). Handles the control opcodes that arrive from
/// CLIENT and forwards payload back to the peer recorded in the registry.
pub async fn server_channel_reader(
    registry: Arc<PeerRegistry>,
    slot_index: u8,
    channel_socket: Arc<UdpSocket>,
    public_socket: Arc<UdpSocket>,
    buf_size: usize,
    cancel: CancellationToken,
) {
    loop {
        let Some(outcome) = recv_or_cancel(&channel_socket, buf_size, &cancel).await else {
            break;
        };
        let (data, from) = match outcome {
            Ok(RecvOutcome::Datagram { data, from }) => (data, from),
            Ok(RecvOutcome::Timeout) => continue,
            Err(e) => {
                log::error!("slot {slot_index}: transient recv error: {e}");
                continue;
            }
        };
        let slot = registry.slot(slot_index);

        match ControlMessage::decode(&data) {
            Some(Ok(ControlMessage { opcode: Opcode::Reset, .. })) => {
                log::info!("slot {slot_index}: RESET received from CLIENT");
                // Goes through the registry, not `slot.reset()` directly, so
                // the address index entry for the departing peer is removed
                // in the same step — otherwise a later rebind of this slot
                // to a new peer would leave the old peer's stale mapping in
                // place (spec §4.5 "Reset semantics").
                registry.reset_slot(slot_index);
            }
            Some(Ok(msg)) => handle_control_from_client(&slot, &channel_socket, from, msg).await,
            Some(Err(())) => {
                log::warn!("slot {slot_index}: malformed control message from {from}");
            }
            None => {
                slot.egress.touch();
                match slot.peer_addr() {
                    Some(peer) => {
                        if let Err(e) = public_socket.send(&data, peer).await {
                            log::error!("slot {slot_index}: failed to forward to peer {peer}: {e}");
                        }
                    }
                    None => {
                        log::warn!("slot {slot_index}: payload from CLIENT but no peer bound; dropping");
                    }
                }
            }
        }
    }
}

async fn handle_control_from_client(
    slot: &Slot,
    channel_socket: &UdpSocket,
    from: SocketAddr,
    msg: ControlMessage,
) {
    match msg.opcode {
        Opcode::Hello | Opcode::Ka => {
            slot.set_client_endpoint(from);
            slot.activate();
            slot.egress.touch();
            let ack = ControlMessage::new(Opcode::KaAck, slot.index).encode();
            if let Err(e) = channel_socket.send(&ack, from).await {
                log::error!("slot {}: failed to send KA-ACK to {from}: {e}", slot.index);
            }
        }
        Opcode::Reset => {
            // `server_channel_reader` intercepts RESET before calling this
            // function so the registry's address index stays in sync; this
            // arm is defensive only and should not be reachable.
            log::warn!("slot {}: RESET reached handle_control_from_client unexpectedly", slot.index);
        }
        Opcode::KaAck => {
            // SERVER never sends KA, so an incoming KA-ACK here is unexpected
            // but harmless — ignore it.
        }
    }
}

/// SERVER: drains a slot's `to_client` queue toward the CLIENT endpoint
/// learned from HELLO/KA. Payload that arrives before the endpoint is
/// known simply waits in the queue.
pub async fn server_channel_sender(slot: Arc<Slot>, channel_socket: Arc<UdpSocket>, cancel: CancellationToken) {
    loop {
        let data = tokio::select! {
            _ = cancel.cancelled() => break,
            data = slot.to_client.pop() => data,
        };
        let Some(endpoint) = slot.client_endpoint() else {
            continue;
        };
        if let Err(e) = channel_socket.send(&data, endpoint).await {
            log::error!("slot {}: failed to send to CLIENT {endpoint}: {e}", slot.index);
        }
    }
}

/// CLIENT: per-slot reader on the socket facing SERVER (spec §4.4
/// "CLIENT-server-side worker"). Forwards payload to the local game
/// server and reacts to KA-ACK.
pub async fn client_server_side_worker(
    slot: Arc<Slot>,
    keepalive: Arc<KeepAlive>,
    server_socket: Arc<UdpSocket>,
    game_socket: Arc<UdpSocket>,
    game_addr: SocketAddr,
    buf_size: usize,
    cancel: CancellationToken,
) {
    loop {
        let Some(outcome) = recv_or_cancel(&server_socket, buf_size, &cancel).await else {
            break;
        };
        let data = match outcome {
            Ok(RecvOutcome::Datagram { data, .. }) => data,
            Ok(RecvOutcome::Timeout) => continue,
            Err(e) => {
                log::error!("slot {}: transient recv error: {e}", slot.index);
                continue;
            }
        };

        match ControlMessage::decode(&data) {
            Some(Ok(ControlMessage { opcode: Opcode::KaAck, .. })) => {
                slot.activate();
                keepalive.mark_acked();
            }
            Some(Ok(ControlMessage { opcode: Opcode::Reset, .. })) => {
                log::info!("slot {}: RESET received from SERVER", slot.index);
                slot.reset();
            }
            Some(Ok(_)) | Some(Err(())) => {
                log::warn!("slot {}: unexpected control message from SERVER", slot.index);
            }
            None => {
                slot.ingress.touch();
                if let Err(e) = game_socket.send(&data, game_addr).await {
                    log::error!("slot {}: failed to forward to game server {game_addr}: {e}", slot.index);
                }
            }
        }
    }
}

/// CLIENT: per-slot reader on the socket facing the local game server
/// (spec §4.4 "CLIENT-game-side worker"). Forwards replies back toward
/// SERVER on the same slot's server-facing socket.
pub async fn client_game_side_worker(
    slot: Arc<Slot>,
    server_socket: Arc<UdpSocket>,
    game_socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    buf_size: usize,
    cancel: CancellationToken,
) {
    loop {
        let Some(outcome) = recv_or_cancel(&game_socket, buf_size, &cancel).await else {
            break;
        };
        let data = match outcome {
            Ok(RecvOutcome::Datagram { data, .. }) => data,
            Ok(RecvOutcome::Timeout) => continue,
            Err(e) => {
                log::error!("slot {}: transient recv error: {e}", slot.index);
                continue;
            }
        };
        slot.egress.touch();
        if let Err(e) = server_socket.send(&data, server_addr).await {
            log::error!("slot {}: failed to forward reply to SERVER {server_addr}: {e}", slot.index);
        }
    }
}

/// CLIENT-only per-slot keep-alive bookkeeping (spec §4.2). Tracks when
/// the last HELLO/KA was sent and whether a KA-ACK has arrived since,
/// so the clock in [`client_keepalive_clock`] knows whether the next
/// transmission is a plain KA or a re-bring-up HELLO.
pub struct KeepAlive {
    last_sent: Mutex<Option<Instant>>,
    waiting_ack: AtomicBool,
}

impl KeepAlive {
    pub fn new() -> Self {
        Self {
            last_sent: Mutex::new(None),
            waiting_ack: AtomicBool::new(false),
        }
    }

    fn mark_acked(&self) {
        self.waiting_ack.store(false, Ordering::Relaxed);
    }

    /// Forces the next clock tick to send a fresh HELLO immediately,
    /// used when [`crate::supervisor::run_client_timers`] resets a slot
    /// after `client_connection_timeout`.
    pub fn force_rebringup(&self) {
        *self.last_sent.lock() = None;
        self.waiting_ack.store(false, Ordering::Relaxed);
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self::new()
    }
}

/// CLIENT: the single periodic clock source (spec §5) that drives
/// HELLO/KA transmission for every slot toward SERVER.
#[allow(clippy::too_many_arguments)]
pub async fn client_keepalive_clock(
    slots: Vec<Arc<Slot>>,
    keepalives: Vec<Arc<KeepAlive>>,
    server_sockets: Vec<Arc<UdpSocket>>,
    server_ip: std::net::IpAddr,
    server_relay_base_port: u16,
    ping_interval: Duration,
    ping_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(200).min(ping_interval));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for i in 0..slots.len() {
            let slot = &slots[i];
            let ka = &keepalives[i];
            let socket = &server_sockets[i];
            let addr = SocketAddr::new(server_ip, server_relay_base_port + i as u16);

            let elapsed = ka.last_sent.lock().map(|t| t.elapsed());
            let active = slot.state() == SlotState::Active;
            let waiting = ka.waiting_ack.load(Ordering::Relaxed);

            let opcode = if !active {
                match elapsed {
                    None => Some(Opcode::Hello),
                    Some(e) if e >= ping_interval => Some(Opcode::Hello),
                    _ => None,
                }
            } else if waiting {
                match elapsed {
                    Some(e) if e >= ping_timeout => Some(Opcode::Hello),
                    _ => None,
                }
            } else {
                match elapsed {
                    None => Some(Opcode::Ka),
                    Some(e) if e >= ping_interval => Some(Opcode::Ka),
                    _ => None,
                }
            };

            let Some(opcode) = opcode else {
                continue;
            };
            let msg = ControlMessage::new(opcode, slot.index).encode();
            match socket.send(&msg, addr).await {
                Ok(()) => {
                    *ka.last_sent.lock() = Some(Instant::now());
                    ka.waiting_ack.store(true, Ordering::Relaxed);
                }
                Err(e) => log::error!("slot {}: failed to send {opcode:?} to SERVER {addr}: {e}", slot.index),
            }
        }
    }
}
