//! RTP header encoding, decoding and packet size arithmetic.

use super::CryptoMode;
use crate::constants::{RTP_PROFILE_TYPE, RTP_VERSION};
use byteorder::{ByteOrder, NetworkEndian};

/// Size of a fixed RTP header without CSRCs.
pub const RTP_HEADER_LEN: usize = 12;

/// Profile marker of an RFC 5285 one-byte header extension block.
pub const ONE_BYTE_EXTENSION_PROFILE: u16 = 0xBEDE;

/// Fields of a fixed RTP header.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RtpHeader {
    /// Protocol version; always 2 for valid traffic.
    pub version: u8,
    /// Whether padding bytes follow the payload.
    pub has_padding: bool,
    /// Whether a header extension block precedes the payload.
    pub has_extension: bool,
    /// Number of CSRC identifiers following the fixed header.
    pub csrc_count: u8,
    /// Profile-specific marker bit.
    pub marker: bool,
    /// Payload type of the packet.
    pub payload_type: u8,
    /// Wrapping 16-bit sequence number.
    pub sequence: u16,
    /// Sampling instant of the first payload sample.
    pub timestamp: u32,
    /// Synchronisation source of the sender.
    pub ssrc: u32,
}

impl RtpHeader {
    /// Header for an outgoing Opus packet.
    #[must_use]
    pub fn new(sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            has_padding: false,
            has_extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: RTP_PROFILE_TYPE,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Total size of this header, including CSRCs.
    #[must_use]
    pub fn header_len(&self) -> usize {
        RTP_HEADER_LEN + 4 * self.csrc_count as usize
    }
}

/// Writes `header` into the first [`RTP_HEADER_LEN`] bytes of `buf`.
///
/// `buf` must hold at least [`RTP_HEADER_LEN`] bytes. CSRCs are never written.
pub fn write_header(buf: &mut [u8], header: &RtpHeader) {
    debug_assert!(buf.len() >= RTP_HEADER_LEN, "RTP write buffer too small");

    buf[0] = (header.version << 6)
        | (u8::from(header.has_padding) << 5)
        | (u8::from(header.has_extension) << 4)
        | (header.csrc_count & 0x0f);
    buf[1] = (u8::from(header.marker) << 7) | (header.payload_type & 0x7f);
    NetworkEndian::write_u16(&mut buf[2..4], header.sequence);
    NetworkEndian::write_u32(&mut buf[4..8], header.timestamp);
    NetworkEndian::write_u32(&mut buf[8..12], header.ssrc);
}

/// Reads the fixed RTP header at the start of `buf`.
///
/// Returns `None` if `buf` cannot hold a header.
#[must_use]
pub fn read_header(buf: &[u8]) -> Option<RtpHeader> {
    if buf.len() < RTP_HEADER_LEN {
        return None;
    }

    Some(RtpHeader {
        version: buf[0] >> 6,
        has_padding: buf[0] & 0x20 != 0,
        has_extension: buf[0] & 0x10 != 0,
        csrc_count: buf[0] & 0x0f,
        marker: buf[1] & 0x80 != 0,
        payload_type: buf[1] & 0x7f,
        sequence: NetworkEndian::read_u16(&buf[2..4]),
        timestamp: NetworkEndian::read_u32(&buf[4..8]),
        ssrc: NetworkEndian::read_u32(&buf[8..12]),
    })
}

/// Size in bytes of the header extension block at the start of `payload`,
/// including its own 4-byte preamble.
///
/// Returns `None` if the block is truncated.
#[must_use]
pub fn extension_len(payload: &[u8]) -> Option<usize> {
    if payload.len() < 4 {
        return None;
    }

    let words = NetworkEndian::read_u16(&payload[2..4]) as usize;
    let len = 4 + 4 * words;

    (len <= payload.len()).then_some(len)
}

/// Size of an encrypted packet carrying `payload_len` bytes of Opus data.
#[must_use]
pub fn packet_size(payload_len: usize, mode: CryptoMode) -> usize {
    RTP_HEADER_LEN + mode.payload_overhead() + payload_len
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_round_trip() {
        let cases = [
            (0, 0, 0),
            (1, 960, 0xdead_beef),
            (u16::MAX, u32::MAX, u32::MAX),
            (0x1234, 0x5678_9abc, 42),
        ];

        for (seq, ts, ssrc) in cases {
            let mut buf = [0u8; RTP_HEADER_LEN];
            write_header(&mut buf, &RtpHeader::new(seq, ts, ssrc));

            let read = read_header(&buf).unwrap();
            assert_eq!(
                (read.sequence, read.timestamp, read.ssrc, read.has_extension),
                (seq, ts, ssrc, false)
            );
            assert_eq!(read.version, RTP_VERSION);
            assert_eq!(read.payload_type, RTP_PROFILE_TYPE);
        }
    }

    #[test]
    fn wire_layout() {
        let mut buf = [0u8; RTP_HEADER_LEN];
        write_header(&mut buf, &RtpHeader::new(0x0102, 0x0304_0506, 0x0708_090a));
        assert_eq!(buf, [0x80, 120, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(read_header(&[0x80; RTP_HEADER_LEN - 1]).is_none());
    }

    #[test]
    fn extension_flag_is_read() {
        let mut buf = [0u8; RTP_HEADER_LEN];
        write_header(&mut buf, &RtpHeader::new(1, 2, 3));
        buf[0] |= 0x10;
        assert!(read_header(&buf).unwrap().has_extension);
    }

    #[test]
    fn extension_block_length() {
        let block = [0xBE, 0xDE, 0x00, 0x02, 1, 2, 3, 4, 5, 6, 7, 8, 0xAA];
        assert_eq!(extension_len(&block), Some(12));
        assert_eq!(extension_len(&block[..11]), None);
        assert_eq!(extension_len(&block[..3]), None);
    }

    #[test]
    fn sizes_per_mode() {
        assert_eq!(packet_size(100, CryptoMode::Normal), 12 + 16 + 100);
        assert_eq!(packet_size(100, CryptoMode::Suffix), 12 + 16 + 100 + 24);
        assert_eq!(packet_size(100, CryptoMode::Lite), 12 + 16 + 100 + 4);
    }
}
