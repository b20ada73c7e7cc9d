//! In-band control subprotocol (spec §4.2).
//!
//! Control messages ride the same UDP flow as payload, prefixed by a
//! sentinel that is vanishingly unlikely to occur at the start of a real
//! game datagram. The sentinel choice carries no security weight — it
//! only has to be long enough that an accidental collision is negligible.
//!
//! Wire shape: `sentinel(8) | opcode(1) | slot(1)`.

/// Reserved prefix that marks a datagram as control rather than payload.
pub const SENTINEL: &[u8; 8] = b"WKUNICST";

/// Total length of an encoded control message.
pub const CONTROL_LEN: usize = SENTINEL.len() + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Hello = 1,
    Ka = 2,
    KaAck = 3,
    Reset = 4,
}

impl Opcode {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Opcode::Hello),
            2 => Some(Opcode::Ka),
            3 => Some(Opcode::KaAck),
            4 => Some(Opcode::Reset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlMessage {
    pub opcode: Opcode,
    pub slot: u8,
}

impl ControlMessage {
    pub fn new(opcode: Opcode, slot: u8) -> Self {
        Self { opcode, slot }
    }

    pub fn encode(&self) -> [u8; CONTROL_LEN] {
        let mut out = [0u8; CONTROL_LEN];
        out[..SENTINEL.len()].copy_from_slice(SENTINEL);
        out[SENTINEL.len()] = self.opcode as u8;
        out[SENTINEL.len() + 1] = self.slot;
        out
    }

    /// Try to parse `buf` as a control message. Returns `None` when the
    /// sentinel doesn't match (ordinary payload) or the opcode byte is
    /// unrecognized (a [`crate::error::EngineError::ProtocolAnomaly`],
    /// logged by the caller and otherwise ignored).
    pub fn decode(buf: &[u8]) -> Option<Result<ControlMessage, ()>> {
        if buf.len() < SENTINEL.len() || &buf[..SENTINEL.len()] != SENTINEL {
            return None;
        }
        if buf.len() < CONTROL_LEN {
            return Some(Err(()));
        }
        let opcode = match Opcode::from_u8(buf[SENTINEL.len()]) {
            Some(op) => op,
            None => return Some(Err(())),
        };
        let slot = buf[SENTINEL.len() + 1];
        Some(Ok(ControlMessage { opcode, slot }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_opcode() {
        for (op, slot) in [
            (Opcode::Hello, 0u8),
            (Opcode::Ka, 12),
            (Opcode::KaAck, 255),
            (Opcode::Reset, 3),
        ] {
            let msg = ControlMessage::new(op, slot);
            let encoded = msg.encode();
            let decoded = ControlMessage::decode(&encoded).unwrap().unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn non_control_payload_is_not_misread() {
        let payload = b"\xDE\xAD\xBE\xEF regular game data";
        assert!(ControlMessage::decode(payload).is_none());
    }

    #[test]
    fn truncated_control_message_is_anomaly() {
        let mut buf = SENTINEL.to_vec();
        buf.push(Opcode::Hello as u8);
        assert_eq!(ControlMessage::decode(&buf), Some(Err(())));
    }

    #[test]
    fn unknown_opcode_is_anomaly() {
        let mut buf = SENTINEL.to_vec();
        buf.push(0xEE);
        buf.push(0);
        assert_eq!(ControlMessage::decode(&buf), Some(Err(())));
    }

    #[test]
    fn payload_that_happens_to_start_with_sentinel_is_accepted_loss() {
        // Documented in spec §4.2: this is an accepted misclassification,
        // not a bug — the sentinel is not cryptographically reserved.
        let mut buf = SENTINEL.to_vec();
        buf.extend_from_slice(&[Opcode::Ka as u8, 4]);
        assert!(ControlMessage::decode(&buf).unwrap().is_ok());
    }
}
