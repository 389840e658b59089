//! The media-producing side of a session.
//!
//! A [`Producer`] wraps whatever graph actually generates RTP (decoders,
//! payloaders, an RTP session manager). The session drives it through the
//! trait; the producer talks back through the [`ProducerHandle`] it is given
//! in [`Producer::start`]:
//!
//! - [`ProducerHandle::ready`] once it has prerolled (and again after a
//!   seek it reported as [`SeekOutcome::Pending`]),
//! - [`ProducerHandle::set_caps`] when a stream's format is known,
//! - [`ProducerHandle::push`] for every generated RTP/RTCP packet,
//! - [`ProducerHandle::post`] for lifecycle events.

use std::sync::Weak;
use std::time::Duration;

use crate::caps::StreamCaps;
use crate::error::ProducerError;
use crate::pump::EventPoster;
use crate::range::TimeRange;
use crate::session::{PlaybackState, SessionInner};

/// Lifecycle events a producer reports asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerEvent {
    /// Unrecoverable failure. The session is torn down.
    Error(String),
    EndOfStream,
    /// Buffer fill level in percent; `100` means buffering is over.
    BufferingLevel(u8),
    LivenessChanged(bool),
}

/// Which channel of a stream a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Rtp,
    Rtcp,
}

/// How a producer completed a seek request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// The new position is in effect when `seek` returns.
    Applied,
    /// The producer will call [`ProducerHandle::ready`] once it has
    /// prerolled at the new position.
    Pending,
}

/// A media-producing graph driven by a [`MediaSession`](crate::MediaSession).
pub trait Producer: Send + Sync + 'static {
    /// Number of elementary streams the graph exposes. Fixed for the
    /// producer's lifetime.
    fn stream_count(&self) -> usize;

    /// Start producing. Packets and events must go through `handle`.
    fn start(&self, handle: ProducerHandle) -> Result<(), ProducerError>;

    /// Stop producing and drop the handle.
    fn stop(&self);

    /// Move the graph to a playback state.
    fn request_state(&self, state: PlaybackState) -> Result<(), ProducerError>;

    /// Whether the media has a seekable timeline.
    fn is_seekable(&self) -> bool {
        false
    }

    fn seek(&self, _range: &TimeRange) -> Result<SeekOutcome, ProducerError> {
        Err(ProducerError::NotSeekable)
    }

    /// Total media duration, when known.
    fn duration(&self) -> Option<Duration> {
        None
    }
}

/// The producer's way back into its session.
///
/// Bound to one prepare cycle: once the session is torn down (or prepared
/// again) every call on an old handle is ignored.
#[derive(Clone)]
pub struct ProducerHandle {
    pub(crate) session: Weak<SessionInner>,
    pub(crate) generation: u64,
    pub(crate) events: EventPoster,
}

impl ProducerHandle {
    /// Signal that the producer has prerolled and can serve data.
    pub fn ready(&self) {
        if let Some(session) = self.session.upgrade() {
            session.signal_ready(self.generation);
        }
    }

    /// Announce the negotiated caps of a stream. Only the first
    /// announcement per stream is kept.
    pub fn set_caps(&self, stream: usize, caps: StreamCaps) {
        if let Some(session) = self.session.upgrade() {
            session.announce_caps(self.generation, stream, caps);
        }
    }

    /// Post a lifecycle event to the session's message pump.
    pub fn post(&self, event: ProducerEvent) {
        if let ProducerEvent::Error(reason) = &event {
            // Let a blocked prepare fail fast instead of timing out.
            if let Some(session) = self.session.upgrade() {
                session.fail_ready(self.generation, reason);
            }
        }
        self.events.post(event);
    }

    /// Route a packet to every transport of `stream`. Returns how many
    /// transports accepted it; packets are dropped unless the session is
    /// prepared.
    pub fn push(&self, stream: usize, kind: PacketKind, packet: &[u8]) -> usize {
        match self.session.upgrade() {
            Some(session) => session.route(self.generation, stream, kind, packet),
            None => 0,
        }
    }

    pub fn push_rtp(&self, stream: usize, packet: &[u8]) -> usize {
        self.push(stream, PacketKind::Rtp, packet)
    }

    pub fn push_rtcp(&self, stream: usize, packet: &[u8]) -> usize {
        self.push(stream, PacketKind::Rtcp, packet)
    }
}

impl std::fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
