//! Transport seam: how packets reach and leave the wire
//!
//! Sessions hold a `dyn RtpTransport` so tests can swap the UDP socket for an
//! in-memory pair.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::Result;

/// Datagram transport used by RTP and RTCP sessions
#[async_trait]
pub trait RtpTransport: Send + Sync {
    /// Send one datagram to `dest`
    async fn send_to(&self, data: &[u8], dest: SocketAddr) -> Result<usize>;

    /// Receive one datagram; returns bytes read and the peer address
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Local address the transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// UDP transport over a tokio socket
pub struct UdpRtpTransport {
    socket: UdpSocket,
}

impl UdpRtpTransport {
    /// Bind a socket on `local`
    pub async fn bind(local: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self { socket })
    }

    /// Wrap an already-bound socket
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl RtpTransport for UdpRtpTransport {
    async fn send_to(&self, data: &[u8], dest: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(data, dest).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// In-memory transport for tests: two halves connected by channels
pub struct ChannelTransport {
    local: SocketAddr,
    peer: SocketAddr,
    tx: mpsc::Sender<Vec<u8>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl ChannelTransport {
    /// Create a connected pair; `a` and `b` are the nominal addresses
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (Self, Self) {
        let (tx_ab, rx_ab) = mpsc::channel(64);
        let (tx_ba, rx_ba) = mpsc::channel(64);
        (
            Self {
                local: a,
                peer: b,
                tx: tx_ab,
                rx: tokio::sync::Mutex::new(rx_ba),
            },
            Self {
                local: b,
                peer: a,
                tx: tx_ba,
                rx: tokio::sync::Mutex::new(rx_ab),
            },
        )
    }
}

#[async_trait]
impl RtpTransport for ChannelTransport {
    async fn send_to(&self, data: &[u8], _dest: SocketAddr) -> Result<usize> {
        self.tx
            .send(data.to_vec())
            .await
            .map_err(|_| Error::SessionError("transport peer closed".to_string()))?;
        Ok(data.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        let data = rx
            .recv()
            .await
            .ok_or_else(|| Error::SessionError("transport peer closed".to_string()))?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok((n, self.peer))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local)
    }
}

/// Shared handle type sessions store
pub type SharedTransport = Arc<dyn RtpTransport>;
