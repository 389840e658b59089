//! Play/seek window in Normal Play Time (RFC 2326 §3.6).
//!
//! ```text
//! npt=10-20        → start 10s, stop 20s
//! npt=0:01:05.5-   → start 65.5s, open-ended
//! npt=now-         → live "now", treated as start 0
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MediaError, Result};

/// The active play window of a session: start, optional stop and rate.
///
/// Only built through the validating constructors, so `stop >= start` and
/// the rate is finite and non-zero.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRange {
    start: Duration,
    /// `None` means "until the end of the media".
    stop: Option<Duration>,
    /// Applied playback rate (`1.0` is normal speed).
    rate: f64,
}

impl TimeRange {
    /// Create a range, rejecting a stop that lies before the start.
    pub fn new(start: Duration, stop: Option<Duration>) -> Result<Self> {
        if let Some(stop) = stop {
            if stop < start {
                return Err(MediaError::InvalidRange(format!(
                    "stop {stop:?} before start {start:?}"
                )));
            }
        }
        Ok(Self {
            start,
            stop,
            rate: 1.0,
        })
    }

    /// The full range of a media of the given duration.
    pub fn until(duration: Option<Duration>) -> Self {
        Self {
            start: Duration::ZERO,
            stop: duration,
            rate: 1.0,
        }
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn stop(&self) -> Option<Duration> {
        self.stop
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Same window with a different playback rate.
    pub fn with_rate(mut self, rate: f64) -> Result<Self> {
        if !rate.is_finite() || rate == 0.0 {
            return Err(MediaError::InvalidRange(format!("bad rate {rate}")));
        }
        self.rate = rate;
        Ok(self)
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::until(None)
    }
}

fn parse_npt_time(text: &str) -> Result<Duration> {
    let bad = || MediaError::InvalidRange(format!("bad npt time '{text}'"));

    if text == "now" {
        return Ok(Duration::ZERO);
    }

    let secs = match text.split(':').collect::<Vec<_>>().as_slice() {
        [secs] => secs.parse::<f64>().map_err(|_| bad())?,
        [h, m, s] => {
            let h: u64 = h.parse().map_err(|_| bad())?;
            let m: u64 = m.parse().map_err(|_| bad())?;
            let s: f64 = s.parse().map_err(|_| bad())?;
            if m >= 60 || s >= 60.0 {
                return Err(bad());
            }
            let whole = h
                .checked_mul(3600)
                .and_then(|secs| secs.checked_add(m * 60))
                .ok_or_else(bad)?;
            whole as f64 + s
        }
        _ => return Err(bad()),
    };

    Duration::try_from_secs_f64(secs).map_err(|_| bad())
}

impl FromStr for TimeRange {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self> {
        let spec = s
            .trim()
            .strip_prefix("npt=")
            .ok_or_else(|| MediaError::InvalidRange(format!("not an npt range: '{s}'")))?;
        let (start, stop) = spec
            .split_once('-')
            .ok_or_else(|| MediaError::InvalidRange(format!("missing '-' in '{s}'")))?;

        let start = if start.is_empty() {
            Duration::ZERO
        } else {
            parse_npt_time(start)?
        };
        let stop = if stop.is_empty() {
            None
        } else {
            Some(parse_npt_time(stop)?)
        };

        TimeRange::new(start, stop)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "npt={:.3}-", self.start.as_secs_f64())?;
        if let Some(stop) = self.stop {
            write!(f, "{:.3}", stop.as_secs_f64())?;
        }
        Ok(())
    }
}
