//! Socket layer (spec §4.1): bind, send-to, recv-with-timeout.
//!
//! Grounded in `runtime/lan/discovery.rs`'s `bind_reusable_udp` — we keep
//! the same socket2-then-tokio conversion so `SO_REUSEADDR` is set before
//! the bind, then hand the socket to tokio for async I/O.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket as TokioUdpSocket;

use crate::error::EngineError;

/// Outcome of a single timed receive.
pub enum RecvOutcome {
    Datagram { data: Vec<u8>, from: SocketAddr },
    Timeout,
}

/// Thin async UDP wrapper matching spec §4.1's `recv`/`send` contract.
pub struct UdpSocket {
    inner: TokioUdpSocket,
    local_addr: SocketAddr,
}

impl UdpSocket {
    /// Bind with `SO_REUSEADDR` set, mirroring the teacher's
    /// `bind_reusable_udp` so re-running the engine right after a crash
    /// doesn't fail on a lingering TIME_WAIT-like state.
    pub async fn bind(addr: SocketAddr) -> Result<Self, EngineError> {
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|source| EngineError::Bind { addr, source })?;
        socket
            .set_reuse_address(true)
            .map_err(|source| EngineError::Bind { addr, source })?;
        socket
            .set_nonblocking(true)
            .map_err(|source| EngineError::Bind { addr, source })?;
        socket
            .bind(&addr.into())
            .map_err(|source| EngineError::Bind { addr, source })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let inner = TokioUdpSocket::from_std(std_socket)
            .map_err(|source| EngineError::Bind { addr, source })?;
        let local_addr = inner
            .local_addr()
            .map_err(|source| EngineError::Bind { addr, source })?;

        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive up to `buf_size` bytes, waiting at most `timeout`.
    ///
    /// The recv buffer is over-allocated by one byte so a datagram of
    /// exactly `buf_size` bytes can be told apart from one the OS actually
    /// truncated: `recv_from` reports `len == buf_size` in both cases when
    /// the buffer is sized exactly `buf_size`, which would otherwise drop
    /// every legitimate datagram at that boundary size (spec §4.4 "Buffer
    /// sizing", spec §8 invariant 6). Only `len > buf_size` is truncation.
    pub async fn recv(&self, buf_size: usize, timeout: Duration) -> Result<RecvOutcome, EngineError> {
        let mut buf = vec![0u8; buf_size + 1];
        match tokio::time::timeout(timeout, self.inner.recv_from(&mut buf)).await {
            Err(_elapsed) => Ok(RecvOutcome::Timeout),
            Ok(Ok((len, from))) => {
                if len > buf_size {
                    log::warn!("dropping oversized datagram from {from} (truncated by OS)");
                    return Ok(RecvOutcome::Timeout);
                }
                buf.truncate(len);
                Ok(RecvOutcome::Datagram { data: buf, from })
            }
            Ok(Err(source)) => Err(EngineError::TransientIo(source)),
        }
    }

    pub async fn send(&self, buf: &[u8], to: SocketAddr) -> Result<(), EngineError> {
        self.inner
            .send_to(buf, to)
            .await
            .map(|_| ())
            .map_err(EngineError::TransientIo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost(port: u16) -> SocketAddr {
        SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), port)
    }

    #[tokio::test]
    async fn datagram_exactly_buf_size_is_not_mistaken_for_truncation() {
        let receiver = UdpSocket::bind(localhost(0)).await.unwrap();
        let sender = UdpSocket::bind(localhost(0)).await.unwrap();
        let payload = vec![0x7Au8; 64];

        sender.send(&payload, receiver.local_addr()).await.unwrap();

        match receiver.recv(64, Duration::from_secs(3)).await.unwrap() {
            RecvOutcome::Datagram { data, .. } => assert_eq!(data, payload),
            RecvOutcome::Timeout => panic!("64-byte datagram into a 64-byte buffer must not be dropped"),
        }
    }

    #[tokio::test]
    async fn datagram_larger_than_buf_size_is_dropped() {
        let receiver = UdpSocket::bind(localhost(0)).await.unwrap();
        let sender = UdpSocket::bind(localhost(0)).await.unwrap();

        sender.send(&vec![0u8; 65], receiver.local_addr()).await.unwrap();

        match receiver.recv(64, Duration::from_secs(3)).await.unwrap() {
            RecvOutcome::Timeout => {}
            RecvOutcome::Datagram { .. } => panic!("oversized datagram should be dropped, not forwarded"),
        }
    }
}
