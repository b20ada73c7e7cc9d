//! Supervisor & timers (spec §4.5) — owns engine lifecycle: spawning
//! workers, observing inactivity timers, triggering resets, and
//! orchestrating graceful shutdown.
//!
//! Grounded in the teacher's `runtime/lan/mod.rs` `LanTasks`/
//! `start_lan_mode` pair: one shared [`CancellationToken`] handed to every
//! spawned task, joined on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Timeouts;
use crate::registry::PeerRegistry;
use crate::slot::Slot;

/// How often the timer loops wake to check inactivity deadlines. Finer
/// than any configured timeout is expected to matter (spec §8 scenario 4
/// wants a reset observed "within 1 s after the deadline").
const TIMER_TICK: Duration = Duration::from_millis(500);

/// Tracks every task the supervisor spawned so shutdown can join them
/// deterministically, mirroring `LanTasks`.
pub struct EngineHandle {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel, handles: Vec::new() }
    }

    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signals cancellation and waits for every spawned task to finish.
    /// Spec §5: sockets are closed "in a deterministic order: public
    /// listener first ... then each slot's channel sockets" — in this
    /// implementation that ordering falls out naturally because the
    /// listener task and the per-slot tasks all observe the same token
    /// and each drops its own socket when its loop returns.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

/// SERVER-side inactivity timers (spec §4.5 items 1 and 3): per-slot
/// `server_connection_timeout` and the global `server_peer_connection_timeout`.
pub async fn run_server_timers(registry: Arc<PeerRegistry>, timeouts: Timeouts, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(TIMER_TICK);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for slot in registry.slots() {
            if !slot.is_assigned() {
                continue;
            }
            // SERVER-side traffic-from-CLIENT is observed on the channel
            // socket, which touches `egress` (see worker.rs).
            if matches!(slot.egress.idle_for(), Some(idle) if idle >= timeouts.server_connection) {
                log::info!("slot {}: server_connection_timeout elapsed, resetting", slot.index);
                registry.reset_slot(slot.index);
            }
        }

        if matches!(registry.global_activity.idle_for(), Some(idle) if idle >= timeouts.server_peer_connection) {
            log::info!("server_peer_connection_timeout elapsed, purging peer registry");
            registry.purge();
        }
    }
}

/// Waits for an external shutdown request: Ctrl-C on any platform, plus
/// SIGTERM on Unix (the signal a service manager sends). Shared by both
/// roles so their shutdown trigger can't drift apart.
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// CLIENT-side inactivity timer (spec §4.5 item 2): per-slot
/// `client_connection_timeout` against the local game server.
pub async fn run_client_timers(
    slots: Arc<Vec<Arc<Slot>>>,
    timeouts: Timeouts,
    force_hello: impl Fn(u8) + Send + 'static,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(TIMER_TICK);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for slot in slots.iter() {
            if slot.state() != crate::slot::SlotState::Active {
                continue;
            }
            // CLIENT-side traffic-from-game-server touches `egress`.
            if matches!(slot.egress.idle_for(), Some(idle) if idle >= timeouts.client_connection) {
                log::info!("slot {}: client_connection_timeout elapsed, resetting and re-issuing HELLO", slot.index);
                slot.reset();
                slot.begin_assigning();
                force_hello(slot.index);
            }
        }
    }
}
