//! Per-slot state: the state machine, activity timestamps, and the
//! bounded payload queue (spec §3, §4.4, §4.5).

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

/// Per-slot state machine (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    Unassigned = 0,
    Assigning = 1,
    Active = 2,
    Resetting = 3,
}

impl SlotState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SlotState::Assigning,
            2 => SlotState::Active,
            3 => SlotState::Resetting,
            _ => SlotState::Unassigned,
        }
    }
}

/// Monotonic "last seen" marker with a lock-free read/write path —
/// spec §5 notes a simple atomic write is sufficient for the
/// producer/supervisor split on these timestamps.
pub struct ActivityMark {
    epoch: Instant,
    ms: AtomicU64,
}

impl ActivityMark {
    pub fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let now = (self.epoch.elapsed().as_millis() as u64).max(1);
        self.ms.store(now, Ordering::Relaxed);
    }

    /// `None` means "never touched since the last clear".
    pub fn idle_for(&self) -> Option<Duration> {
        let v = self.ms.load(Ordering::Relaxed);
        if v == 0 {
            return None;
        }
        let now = self.epoch.elapsed().as_millis() as u64;
        Some(Duration::from_millis(now.saturating_sub(v)))
    }

    pub fn clear(&self) {
        self.ms.store(0, Ordering::Relaxed);
    }
}

/// Bounded FIFO queue with drop-on-full semantics (spec §4.4
/// "Queueing"): the producer never blocks, and a full queue simply loses
/// the newest datagram rather than stalling the reader.
pub struct PacketQueue {
    capacity: usize,
    inner: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            notify: Notify::new(),
        }
    }

    /// Returns `false` when the datagram was dropped because the queue
    /// was full.
    pub fn try_push(&self, data: Vec<u8>) -> bool {
        let mut q = self.inner.lock();
        if q.len() >= self.capacity {
            return false;
        }
        q.push_back(data);
        drop(q);
        self.notify.notify_one();
        true
    }

    pub async fn pop(&self) -> Vec<u8> {
        loop {
            if let Some(v) = self.inner.lock().pop_front() {
                return v;
            }
            self.notify.notified().await;
        }
    }

    /// Drains all queued datagrams — used on reset so a stale payload
    /// from the previously bound peer can never reach the next peer
    /// assigned to this slot (spec §4.5 "Reset semantics").
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// One multiplexing slot. Shared via `Arc` between the supervisor (which
/// owns state transitions) and the worker tasks (which only touch their
/// own direction's timestamp and queue) — spec §3 "Ownership".
pub struct Slot {
    pub index: u8,
    pub relay_port: u16,
    state: AtomicU8,
    /// SERVER only: the internet peer currently bound to this slot.
    peer_addr: RwLock<Option<SocketAddr>>,
    /// SERVER only: the CLIENT endpoint observed on this slot's channel
    /// socket, learned from HELLO/KA (spec §4.4).
    client_endpoint: RwLock<Option<SocketAddr>>,
    pub ingress: ActivityMark,
    pub egress: ActivityMark,
    pub to_client: PacketQueue,
}

impl Slot {
    pub fn new(index: u8, relay_port: u16, epoch: Instant, queue_depth: usize) -> Self {
        Self {
            index,
            relay_port,
            state: AtomicU8::new(SlotState::Unassigned as u8),
            peer_addr: RwLock::new(None),
            client_endpoint: RwLock::new(None),
            ingress: ActivityMark::new(epoch),
            egress: ActivityMark::new(epoch),
            to_client: PacketQueue::new(queue_depth),
        }
    }

    pub fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: SlotState) {
        self.state.store(s as u8, Ordering::Release);
    }

    pub fn is_assigned(&self) -> bool {
        !matches!(self.state(), SlotState::Unassigned)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer_addr.read()
    }

    pub fn client_endpoint(&self) -> Option<SocketAddr> {
        *self.client_endpoint.read()
    }

    pub fn set_client_endpoint(&self, addr: SocketAddr) {
        *self.client_endpoint.write() = Some(addr);
    }

    /// Atomically claims this slot for `addr` if it is currently
    /// unassigned. Returns `true` on success.
    pub fn try_claim(&self, addr: SocketAddr) -> bool {
        let claimed = self
            .state
            .compare_exchange(
                SlotState::Unassigned as u8,
                SlotState::Assigning as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if claimed {
            *self.peer_addr.write() = Some(addr);
            self.set_state(SlotState::Active);
        }
        claimed
    }

    /// Marks a not-yet-active slot active (spec: ASSIGNING -> ACTIVE on
    /// first KA-ACK, CLIENT side).
    pub fn activate(&self) {
        if self.state() == SlotState::Assigning {
            self.set_state(SlotState::Active);
        }
    }

    pub fn begin_assigning(&self) {
        self.set_state(SlotState::Assigning);
    }

    /// Resets the slot to UNASSIGNED, draining the queue and clearing
    /// timestamps and addresses first (spec §4.5 "Reset semantics").
    /// Returns the peer address that was bound, if any, so the caller
    /// can remove it from the registry's address index.
    pub fn reset(&self) -> Option<SocketAddr> {
        self.set_state(SlotState::Resetting);
        self.to_client.clear();
        self.ingress.clear();
        self.egress.clear();
        let prior_peer = self.peer_addr.write().take();
        *self.client_endpoint.write() = None;
        self.set_state(SlotState::Unassigned);
        prior_peer
    }
}
