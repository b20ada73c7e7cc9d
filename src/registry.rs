//! Peer registry (SERVER only) — spec §4.3.
//!
//! Maps an internet peer's observed `(ip, port)` to a slot index and
//! back. New-peer assignment and the address index are guarded by a
//! single lock so that binding is atomic with respect to concurrent
//! ingress, per spec §4.3 "Tie-breaks".

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::slot::{ActivityMark, Slot};

pub enum BindOutcome {
    Existing(u8),
    Assigned(u8),
    Full,
}

pub struct PeerRegistry {
    slots: Vec<Arc<Slot>>,
    addr_index: Mutex<HashMap<SocketAddr, u8>>,
    /// Last time any remote peer was observed at all, regardless of
    /// which slot it landed in — drives `server_peer_connection_timeout`
    /// (spec §4.5, global reset).
    pub global_activity: ActivityMark,
}

impl PeerRegistry {
    pub fn new(peer_count: u8, server_relay_base_port: u16, epoch: Instant, queue_depth: usize) -> Self {
        let slots = (0..peer_count)
            .map(|i| Arc::new(Slot::new(i, server_relay_base_port + i as u16, epoch, queue_depth)))
            .collect();
        Self {
            slots,
            addr_index: Mutex::new(HashMap::new()),
            global_activity: ActivityMark::new(epoch),
        }
    }

    pub fn slots(&self) -> &[Arc<Slot>] {
        &self.slots
    }

    /// Cheap `Arc` clone — lets a spawned task hold its own reference to
    /// a slot without borrowing from the registry.
    pub fn slot(&self, i: u8) -> Arc<Slot> {
        self.slots[i as usize].clone()
    }

    /// Looks up an existing binding for `addr`, or assigns the first
    /// unassigned slot (ascending index), or reports the table full.
    pub fn bind_or_assign(&self, addr: SocketAddr) -> BindOutcome {
        let mut index = self.addr_index.lock();
        if let Some(&slot) = index.get(&addr) {
            return BindOutcome::Existing(slot);
        }
        for slot in &self.slots {
            if slot.try_claim(addr) {
                index.insert(addr, slot.index);
                return BindOutcome::Assigned(slot.index);
            }
        }
        BindOutcome::Full
    }

    pub fn peer_for_slot(&self, i: u8) -> Option<SocketAddr> {
        self.slot(i).peer_addr()
    }

    /// Resets a single slot and removes its address mapping. A reset on
    /// an already-unassigned slot is a no-op (spec §8 boundary behavior).
    ///
    /// Holds `addr_index`'s lock across the slot reset so a concurrent
    /// `bind_or_assign` for the same address can't observe the stale
    /// mapping after the slot has already been cleared — without this, a
    /// retransmitted datagram from the peer being evicted could land in
    /// the slot's queue after a new peer has been assigned to it.
    pub fn reset_slot(&self, i: u8) {
        let mut index = self.addr_index.lock();
        if let Some(addr) = self.slot(i).reset() {
            index.remove(&addr);
        }
    }

    /// Purges the entire registry (spec §4.5, global reset).
    pub fn purge(&self) {
        let mut index = self.addr_index.lock();
        for slot in &self.slots {
            slot.reset();
        }
        index.clear();
    }
}
