//! Ready-made [`Sender`](crate::Sender) implementations.
//!
//! RTSP offers two ways to carry a stream's RTP/RTCP to a receiver:
//!
//! - **UDP** ([`udp`]): separate datagram destinations for RTP and RTCP,
//!   unicast or to a multicast group.
//!
//! - **TCP interleaved** ([`tcp`]): RTP and RTCP multiplexed onto the RTSP
//!   control connection with `$` framing (RFC 2326 §10.12).
//!
//! Opening sockets and negotiating ports stays with the protocol layer; these
//! types only move packets.

pub mod tcp;
pub mod udp;

pub use tcp::InterleavedSender;
pub use udp::UdpSender;
