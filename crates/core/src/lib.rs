pub mod caps;
pub mod config;
pub mod error;
pub mod producer;
pub mod pump;
pub mod range;
pub mod session;
pub mod transport;

pub use caps::{MediaKind, StreamCaps};
pub use config::SessionConfig;
pub use error::{MediaError, PrepareError, ProducerError, Result, TransportError};
pub use producer::{PacketKind, Producer, ProducerEvent, ProducerHandle, SeekOutcome};
pub use pump::{EventPoster, MessageHandler, MessagePump};
pub use range::TimeRange;
pub use session::{
    LifecycleState, MediaSession, PlaybackState, Sender, SessionListener, Transport, TransportKey,
    TransportRef,
};
