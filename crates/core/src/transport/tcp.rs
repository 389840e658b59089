use std::io::Write;

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::session::Sender;

/// Largest payload an interleaved frame can carry (16-bit length field).
pub const MAX_INTERLEAVED_PAYLOAD: usize = u16::MAX as usize;

/// Frame a packet for an RTSP connection (RFC 2326 §10.12).
///
/// ```text
/// +-----+---------+----------------+-----------------+
/// | '$' | channel | length (u16 BE) | payload ...     |
/// +-----+---------+----------------+-----------------+
/// ```
pub fn frame_interleaved(channel: u8, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        TransportError::Rejected(format!(
            "payload of {} bytes exceeds interleaved frame limit",
            payload.len()
        ))
    })?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.push(b'$');
    frame.push(channel);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Delivery over the client's RTSP TCP connection using `$` framing.
///
/// RTP and RTCP go to the two channels negotiated in the `interleaved=`
/// parameter of the SETUP `Transport` header. The writer is typically a
/// clone of the connection's `TcpStream`; writes are serialized so frames
/// from concurrent RTP and RTCP sends never interleave.
pub struct InterleavedSender<W: Write + Send> {
    writer: Mutex<W>,
    rtp_channel: u8,
    rtcp_channel: u8,
}

impl<W: Write + Send> InterleavedSender<W> {
    pub fn new(writer: W, rtp_channel: u8, rtcp_channel: u8) -> Self {
        Self {
            writer: Mutex::new(writer),
            rtp_channel,
            rtcp_channel,
        }
    }

    /// Consume the sender and hand back the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn write_frame(&self, channel: u8, packet: &[u8]) -> Result<(), TransportError> {
        let frame = frame_interleaved(channel, packet)?;
        self.writer.lock().write_all(&frame)?;
        Ok(())
    }
}

impl<W: Write + Send> Sender for InterleavedSender<W> {
    fn send_rtp(&self, packet: &[u8]) -> Result<(), TransportError> {
        self.write_frame(self.rtp_channel, packet)
    }

    fn send_rtcp(&self, packet: &[u8]) -> Result<(), TransportError> {
        self.write_frame(self.rtcp_channel, packet)
    }

    fn release(self: Box<Self>) {
        let mut writer = self.into_inner();
        if let Err(e) = writer.flush() {
            tracing::debug!(error = %e, "flush on interleaved release failed");
        }
    }
}
