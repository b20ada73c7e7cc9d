//! CLIENT role setup (spec §2, §3): binds each slot's SERVER-facing and
//! game-facing sockets, starts bring-up HELLOs, and hands everything to
//! the supervisor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::EngineError;
use crate::protocol::{ControlMessage, Opcode};
use crate::slot::{Slot, SlotState};
use crate::socket::UdpSocket;
use crate::supervisor::{wait_for_shutdown_signal, EngineHandle};
use crate::worker::{self, KeepAlive};

pub async fn run(config: Config, cancel: CancellationToken) -> Result<(), EngineError> {
    let server_ip = config
        .server_ip
        .ok_or_else(|| EngineError::config("CLIENT requires -s <ip>"))?;
    let game_server_ip = config
        .game_server_ip
        .ok_or_else(|| EngineError::config("CLIENT requires -d <ip>"))?;
    let app_dest_port = config
        .app_dest_port
        .ok_or_else(|| EngineError::config("CLIENT requires -o <port>"))?;
    let game_addr = SocketAddr::new(game_server_ip, app_dest_port);

    let epoch = Instant::now();
    let mut slots = Vec::with_capacity(config.peer_count as usize);
    let mut server_sockets = Vec::with_capacity(config.peer_count as usize);
    let mut game_sockets = Vec::with_capacity(config.peer_count as usize);
    let mut keepalives = Vec::with_capacity(config.peer_count as usize);

    for i in 0..config.peer_count {
        let slot = Arc::new(Slot::new(
            i,
            config.server_relay_base_port + i as u16,
            epoch,
            config.packet_queue_size,
        ));
        // CLIENT starts bring-up for every slot immediately (spec §4.5
        // "UNASSIGNED -> ASSIGNING: ... engine start (CLIENT)").
        slot.begin_assigning();
        slots.push(slot);

        let server_addr = SocketAddr::new(config.bind_addr, config.server_relay_base_port + i as u16);
        server_sockets.push(Arc::new(UdpSocket::bind(server_addr).await?));

        let game_side_addr = SocketAddr::new(config.bind_addr, config.client_relay_base_port + i as u16);
        game_sockets.push(Arc::new(UdpSocket::bind(game_side_addr).await?));

        keepalives.push(Arc::new(KeepAlive::new()));
    }
    log::info!(
        "CLIENT relaying {}..{} toward SERVER {server_ip}, game server {game_addr}",
        config.server_relay_base_port,
        config.server_relay_base_port + config.peer_count as u16 - 1
    );

    let mut handle = EngineHandle::new(cancel.clone());

    for i in 0..config.peer_count as usize {
        let server_addr = SocketAddr::new(server_ip, config.server_relay_base_port + i as u16);
        handle.push(tokio::spawn(worker::client_server_side_worker(
            slots[i].clone(),
            keepalives[i].clone(),
            server_sockets[i].clone(),
            game_sockets[i].clone(),
            game_addr,
            config.receive_buffer_size,
            cancel.clone(),
        )));
        handle.push(tokio::spawn(worker::client_game_side_worker(
            slots[i].clone(),
            server_sockets[i].clone(),
            game_sockets[i].clone(),
            server_addr,
            config.receive_buffer_size,
            cancel.clone(),
        )));
    }

    handle.push(tokio::spawn(worker::client_keepalive_clock(
        slots.clone(),
        keepalives.clone(),
        server_sockets.clone(),
        server_ip,
        config.server_relay_base_port,
        config.timeouts.ping_interval,
        config.timeouts.ping_timeout,
        cancel.clone(),
    )));

    let slots_for_timers = Arc::new(slots.clone());
    let keepalives_for_reset = keepalives.clone();
    handle.push(tokio::spawn(crate::supervisor::run_client_timers(
        slots_for_timers,
        config.timeouts.clone(),
        move |i| keepalives_for_reset[i as usize].force_rebringup(),
        cancel.clone(),
    )));

    wait_for_shutdown_signal().await;
    log::info!("CLIENT shutting down");

    send_reset_to_server(&slots, &server_sockets, server_ip, config.server_relay_base_port).await;
    handle.shutdown().await;
    Ok(())
}

async fn send_reset_to_server(
    slots: &[Arc<Slot>],
    server_sockets: &[Arc<UdpSocket>],
    server_ip: std::net::IpAddr,
    base_port: u16,
) {
    for (i, slot) in slots.iter().enumerate() {
        if slot.state() != SlotState::Active {
            continue;
        }
        let addr = SocketAddr::new(server_ip, base_port + i as u16);
        let msg = ControlMessage::new(Opcode::Reset, slot.index).encode();
        if let Err(e) = server_sockets[i].send(&msg, addr).await {
            log::warn!("slot {}: failed to send shutdown RESET to SERVER {addr}: {e}", slot.index);
        }
    }
}
