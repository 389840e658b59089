use std::time::Duration;

/// Default bound on the wait for the producer's first ready signal.
pub const DEFAULT_PREPARE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on the wait for a producer to re-preroll after a seek.
pub const DEFAULT_SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of consecutive failed sends before a transport is dropped.
pub const DEFAULT_MAX_SEND_FAILURES: u32 = 16;

/// Session-level tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long [`prepare`](crate::MediaSession::prepare) waits for the
    /// producer to report readiness.
    pub prepare_timeout: Duration,
    /// How long a seek the producer completes asynchronously may take.
    pub seek_timeout: Duration,
    /// Consecutive send failures (RTP and RTCP combined) after which a
    /// transport is detached automatically. `0` disables auto-detach.
    pub max_send_failures: u32,
    /// Initial value of the session's shared flag.
    pub shared: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prepare_timeout: DEFAULT_PREPARE_TIMEOUT,
            seek_timeout: DEFAULT_SEEK_TIMEOUT,
            max_send_failures: DEFAULT_MAX_SEND_FAILURES,
            shared: false,
        }
    }
}
