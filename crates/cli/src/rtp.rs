use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngExt;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// RTP fixed header state for one synthetic stream (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Also counts what it has sent so it can emit matching sender reports.
#[derive(Debug)]
pub struct RtpHeader {
    pub pt: u8,
    pub ssrc: u32,
    sequence: u16,
    timestamp: u32,
    packets: u32,
    octets: u32,
}

impl RtpHeader {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self {
            pt,
            ssrc,
            sequence: 0,
            timestamp: 0,
            packets: 0,
            octets: 0,
        }
    }

    /// Random SSRC, per RFC 3550 §8.1.
    pub fn with_random_ssrc(pt: u8) -> Self {
        Self::new(pt, rand::rng().random::<u32>())
    }

    /// Build a complete RTP packet around `payload` and advance the sequence.
    pub fn packet(&mut self, marker: bool, payload: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(12 + payload.len());
        packet.push(2 << 6);
        packet.push(((marker as u8) << 7) | (self.pt & 0x7f));
        packet.extend_from_slice(&self.sequence.to_be_bytes());
        packet.extend_from_slice(&self.timestamp.to_be_bytes());
        packet.extend_from_slice(&self.ssrc.to_be_bytes());
        packet.extend_from_slice(payload);

        self.sequence = self.sequence.wrapping_add(1);
        self.packets = self.packets.wrapping_add(1);
        self.octets = self.octets.wrapping_add(payload.len() as u32);
        packet
    }

    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment);
    }

    /// RTCP sender report without report blocks (RFC 3550 §6.4.1).
    pub fn sender_report(&self, now: SystemTime) -> [u8; 28] {
        let since_unix = now.duration_since(UNIX_EPOCH).unwrap_or_default();
        let ntp_secs = (since_unix.as_secs() + NTP_UNIX_OFFSET) as u32;
        let ntp_frac = ((since_unix.subsec_nanos() as u64) << 32) / 1_000_000_000;

        let mut sr = [0u8; 28];
        sr[0] = 2 << 6;
        sr[1] = 200;
        // Length in 32-bit words minus one.
        sr[2..4].copy_from_slice(&6u16.to_be_bytes());
        sr[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        sr[8..12].copy_from_slice(&ntp_secs.to_be_bytes());
        sr[12..16].copy_from_slice(&(ntp_frac as u32).to_be_bytes());
        sr[16..20].copy_from_slice(&self.timestamp.to_be_bytes());
        sr[20..24].copy_from_slice(&self.packets.to_be_bytes());
        sr[24..28].copy_from_slice(&self.octets.to_be_bytes());
        sr
    }
}
