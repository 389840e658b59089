use std::fmt;
use std::net::SocketAddr;

use crate::error::TransportError;
use crate::session::PlaybackState;

/// Receiver identity of a transport within one stream.
///
/// Usually derived from the client address or the RTSP session id; two
/// transports with the same key cannot be attached to the same stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportKey(String);

impl TransportKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransportKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for TransportKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<SocketAddr> for TransportKey {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

/// Delivery callbacks for one receiver, supplied by the network layer.
///
/// Sends are invoked from the producer's threads, possibly concurrently for
/// RTP and RTCP, so implementations must be `Sync`. An `Err` is a local
/// delivery failure: it is counted against this transport only.
pub trait Sender: Send + Sync {
    /// Deliver one RTP packet.
    fn send_rtp(&self, packet: &[u8]) -> Result<(), TransportError>;

    /// Deliver one RTCP packet.
    fn send_rtcp(&self, packet: &[u8]) -> Result<(), TransportError>;

    /// Bring the underlying connection in line with a new playback state
    /// (e.g. add or drop a UDP destination on PLAY/PAUSE).
    fn sync_state(&self, _state: PlaybackState) {}

    /// Called exactly once when the transport is detached, explicitly, by
    /// auto-detach, or by session teardown.
    fn release(self: Box<Self>) {}
}

/// A single (stream, receiver) binding handed to
/// [`MediaSession::attach_transport`](crate::MediaSession::attach_transport).
pub struct Transport {
    key: TransportKey,
    sender: Box<dyn Sender>,
}

impl Transport {
    pub fn new(key: impl Into<TransportKey>, sender: Box<dyn Sender>) -> Self {
        Self {
            key: key.into(),
            sender,
        }
    }

    pub fn key(&self) -> &TransportKey {
        &self.key
    }

    pub(crate) fn into_parts(self) -> (TransportKey, Box<dyn Sender>) {
        (self.key, self.sender)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Names one attached transport: the stream it belongs to and its key.
///
/// Used to pick the transports whose connections follow a state change in
/// [`MediaSession::set_state`](crate::MediaSession::set_state).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportRef {
    pub stream: usize,
    pub key: TransportKey,
}

impl TransportRef {
    pub fn new(stream: usize, key: impl Into<TransportKey>) -> Self {
        Self {
            stream,
            key: key.into(),
        }
    }
}
