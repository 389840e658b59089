//! Negotiated media format of one elementary stream.
//!
//! The producer announces caps once per stream when it discovers them; the
//! protocol layer reads them back (e.g. to build the SDP for DESCRIBE).

use std::fmt;

/// Kind of elementary stream, as used in the SDP `m=` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Application,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
            Self::Application => write!(f, "application"),
        }
    }
}

/// Capability descriptor for a stream's RTP payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCaps {
    pub kind: MediaKind,
    /// RTP payload type (RFC 3551). Dynamic types use 96–127.
    pub payload_type: u8,
    /// Encoding name for `a=rtpmap` (e.g. `"H264"`, `"opus"`).
    pub encoding_name: String,
    /// RTP clock rate in Hz.
    pub clock_rate: u32,
    /// Audio channel count, if relevant.
    pub channels: Option<u16>,
    /// Codec parameters for `a=fmtp`, without the payload type prefix.
    pub format_params: Option<String>,
}

impl StreamCaps {
    pub fn new(kind: MediaKind, payload_type: u8, encoding_name: &str, clock_rate: u32) -> Self {
        Self {
            kind,
            payload_type,
            encoding_name: encoding_name.to_string(),
            clock_rate,
            channels: None,
            format_params: None,
        }
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_format_params(mut self, params: &str) -> Self {
        self.format_params = Some(params.to_string());
        self
    }

    /// The `a=rtpmap` attribute line.
    ///
    /// `a=rtpmap:96 H264/90000`, or `a=rtpmap:97 opus/48000/2` with channels.
    pub fn rtpmap(&self) -> String {
        match self.channels {
            Some(ch) => format!(
                "a=rtpmap:{} {}/{}/{}",
                self.payload_type, self.encoding_name, self.clock_rate, ch
            ),
            None => format!(
                "a=rtpmap:{} {}/{}",
                self.payload_type, self.encoding_name, self.clock_rate
            ),
        }
    }

    /// The `a=fmtp` attribute line, when the stream has format parameters.
    pub fn fmtp(&self) -> Option<String> {
        self.format_params
            .as_ref()
            .map(|p| format!("a=fmtp:{} {}", self.payload_type, p))
    }
}
