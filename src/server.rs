//! SERVER role setup (spec §2, §3): binds the public listener and every
//! slot's relay socket, wires up the peer registry, and hands everything
//! to the supervisor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::EngineError;
use crate::protocol::{ControlMessage, Opcode};
use crate::registry::PeerRegistry;
use crate::socket::UdpSocket;
use crate::supervisor::{wait_for_shutdown_signal, EngineHandle};
use crate::worker;

pub async fn run(config: Config, cancel: CancellationToken) -> Result<(), EngineError> {
    let app_port = config
        .app_listen_port
        .ok_or_else(|| EngineError::config("SERVER requires -i <port>"))?;

    let public_addr = SocketAddr::new(config.bind_addr, app_port);
    let public_socket = Arc::new(UdpSocket::bind(public_addr).await?);
    log::info!("SERVER listening for peers on {public_addr}");

    let epoch = Instant::now();
    let registry = Arc::new(PeerRegistry::new(
        config.peer_count,
        config.server_relay_base_port,
        epoch,
        config.packet_queue_size,
    ));

    let mut channel_sockets = Vec::with_capacity(config.peer_count as usize);
    for slot in registry.slots() {
        let addr = SocketAddr::new(config.bind_addr, slot.relay_port);
        channel_sockets.push(Arc::new(UdpSocket::bind(addr).await?));
    }
    log::info!(
        "SERVER relay channels on {}..{}",
        config.server_relay_base_port,
        config.server_relay_base_port + config.peer_count as u16 - 1
    );

    let mut handle = EngineHandle::new(cancel.clone());

    handle.push(tokio::spawn(worker::server_public_listener(
        registry.clone(),
        public_socket.clone(),
        config.receive_buffer_size,
        cancel.clone(),
    )));

    for (i, channel_socket) in channel_sockets.iter().enumerate() {
        let i = i as u8;
        handle.push(tokio::spawn(worker::server_channel_reader(
            registry.clone(),
            i,
            channel_socket.clone(),
            public_socket.clone(),
            config.receive_buffer_size,
            cancel.clone(),
        )));
    }

    for (i, channel_socket) in channel_sockets.iter().enumerate() {
        handle.push(tokio::spawn(worker::server_channel_sender(
            registry.slot(i as u8),
            channel_socket.clone(),
            cancel.clone(),
        )));
    }

    handle.push(tokio::spawn(crate::supervisor::run_server_timers(
        registry.clone(),
        config.timeouts.clone(),
        cancel.clone(),
    )));

    wait_for_shutdown_signal().await;
    log::info!("SERVER shutting down");

    send_reset_to_clients(&registry, &channel_sockets).await;
    handle.shutdown().await;
    Ok(())
}

async fn send_reset_to_clients(registry: &PeerRegistry, channel_sockets: &[Arc<UdpSocket>]) {
    for slot in registry.slots() {
        if !slot.is_assigned() {
            continue;
        }
        let Some(endpoint) = slot.client_endpoint() else {
            continue;
        };
        let msg = ControlMessage::new(Opcode::Reset, slot.index).encode();
        let socket = &channel_sockets[slot.index as usize];
        if let Err(e) = socket.send(&msg, endpoint).await {
            log::warn!("slot {}: failed to send shutdown RESET to {endpoint}: {e}", slot.index);
        }
    }
}
