use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::TransportError;
use crate::session::{PlaybackState, Sender};

/// UDP delivery of one stream to one receiver (unicast or multicast group).
///
/// The socket is shared: a server typically binds one socket per stream
/// direction and hands clones of the `Arc` to every sender.
///
/// Mirrors how a UDP destination is added on PLAY and removed on PAUSE: the
/// sender starts inactive and only transmits after
/// [`sync_state`](Sender::sync_state) moved it to `Playing`. Inactive sends
/// succeed without touching the socket.
pub struct UdpSender {
    socket: Arc<UdpSocket>,
    rtp_addr: SocketAddr,
    rtcp_addr: SocketAddr,
    active: AtomicBool,
}

impl UdpSender {
    /// Bind an ephemeral UDP socket for outbound RTP/RTCP.
    pub fn bind_socket() -> std::io::Result<Arc<UdpSocket>> {
        Ok(Arc::new(UdpSocket::bind("0.0.0.0:0")?))
    }

    /// Unicast sender to `rtp_addr`/`rtcp_addr`.
    pub fn unicast(socket: Arc<UdpSocket>, rtp_addr: SocketAddr, rtcp_addr: SocketAddr) -> Self {
        Self {
            socket,
            rtp_addr,
            rtcp_addr,
            active: AtomicBool::new(false),
        }
    }

    /// Multicast sender. Sets the socket's multicast TTL.
    pub fn multicast(
        socket: Arc<UdpSocket>,
        rtp_group: SocketAddr,
        rtcp_group: SocketAddr,
        ttl: u32,
    ) -> std::io::Result<Self> {
        if rtp_group.is_ipv4() {
            socket.set_multicast_ttl_v4(ttl)?;
        }
        Ok(Self::unicast(socket, rtp_group, rtcp_group))
    }

    /// Start transmitting without waiting for a state sync.
    pub fn activated(self) -> Self {
        self.active.store(true, Ordering::Release);
        self
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn send_to(&self, packet: &[u8], addr: SocketAddr) -> Result<(), TransportError> {
        if !self.is_active() {
            return Ok(());
        }
        self.socket.send_to(packet, addr)?;
        Ok(())
    }
}

impl Sender for UdpSender {
    fn send_rtp(&self, packet: &[u8]) -> Result<(), TransportError> {
        self.send_to(packet, self.rtp_addr)
    }

    fn send_rtcp(&self, packet: &[u8]) -> Result<(), TransportError> {
        self.send_to(packet, self.rtcp_addr)
    }

    fn sync_state(&self, state: PlaybackState) {
        let active = state == PlaybackState::Playing;
        if self.active.swap(active, Ordering::AcqRel) != active {
            tracing::debug!(rtp = %self.rtp_addr, active, "udp destination toggled");
        }
    }

    fn release(self: Box<Self>) {
        tracing::debug!(rtp = %self.rtp_addr, rtcp = %self.rtcp_addr, "udp destination removed");
    }
}
