//! Error types for the media session library.

use std::io;
use std::time::Duration;

use crate::session::{LifecycleState, PlaybackState};
use crate::session::transport::TransportKey;

/// Errors returned by [`MediaSession`](crate::MediaSession) control calls.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Lifecycle**: [`Prepare`](Self::Prepare), [`InvalidState`](Self::InvalidState).
/// - **Playback**: [`State`](Self::State), [`NotSeekable`](Self::NotSeekable),
///   [`Seek`](Self::Seek), [`InvalidRange`](Self::InvalidRange).
/// - **Streams**: [`StreamNotFound`](Self::StreamNotFound),
///   [`CapsUnknown`](Self::CapsUnknown),
///   [`DuplicateTransport`](Self::DuplicateTransport),
///   [`TransportNotFound`](Self::TransportNotFound).
/// - **Asynchronous**: [`FatalProducer`](Self::FatalProducer), only ever
///   handed to a [`SessionListener`](crate::SessionListener).
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// The session could not be brought to the prepared state.
    #[error("prepare failed: {0}")]
    Prepare(#[from] PrepareError),

    /// The producer refused the requested playback state.
    #[error("producer could not reach {target:?}: {reason}")]
    State {
        target: PlaybackState,
        reason: String,
    },

    /// The media is live or has no seekable timeline.
    #[error("media is not seekable")]
    NotSeekable,

    /// The producer rejected a seek for a reason other than seekability.
    #[error("seek failed: {0}")]
    Seek(String),

    /// The producer reported an unrecoverable error; the session was torn down.
    #[error("fatal producer error: {0}")]
    FatalProducer(String),

    /// The call is not valid in the session's current lifecycle state.
    #[error("{operation} not allowed while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    /// No stream exists at the given index.
    #[error("stream {0} not found")]
    StreamNotFound(usize),

    /// The producer has not announced caps for the stream yet.
    #[error("caps not negotiated for stream {0}")]
    CapsUnknown(usize),

    /// A transport with the same receiver key is already attached.
    #[error("transport {key} already attached to stream {index}")]
    DuplicateTransport { index: usize, key: TransportKey },

    /// No transport with this key is attached to the stream.
    #[error("transport {key} not attached to stream {index}")]
    TransportNotFound { index: usize, key: TransportKey },

    /// A time range could not be parsed or is inverted.
    #[error("invalid range: {0}")]
    InvalidRange(String),
}

/// Why [`MediaSession::prepare`](crate::MediaSession::prepare) (or a pending
/// seek) failed.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    /// The producer failed to start.
    #[error("producer failed to start: {0}")]
    Construction(#[source] ProducerError),

    /// No ready signal was observed within the configured timeout.
    #[error("producer not ready after {0:?}")]
    Timeout(Duration),

    /// Teardown interrupted the wait.
    #[error("cancelled by teardown")]
    Cancelled,

    /// The producer posted an error while the wait was in progress.
    #[error("producer error while preparing: {0}")]
    Failed(String),
}

/// Errors reported by a [`Producer`](crate::Producer) implementation.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// The producer has no seekable timeline.
    #[error("not seekable")]
    NotSeekable,

    #[error("{0}")]
    Failed(String),
}

/// A local delivery failure on one transport.
///
/// Never surfaced as a session error: the fan-out counts it against the
/// transport and moves on.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Underlying socket or stream error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The receiver went away.
    #[error("transport closed")]
    Closed,

    /// The sender refused the packet.
    #[error("packet rejected: {0}")]
    Rejected(String),
}

/// Convenience alias for `Result<T, MediaError>`.
pub type Result<T> = std::result::Result<T, MediaError>;
