//! Encryption schemes supported by the voice server's secure RTP negotiation.
use super::rtp::RTP_HEADER_LEN;
use crate::driver::connection::error::{Error as ConnectionError, Result as ConnectionResult};
use byteorder::{ByteOrder, NetworkEndian};
use crypto_secretbox::{
    AeadInPlace,
    Error as CryptoError,
    Key,
    KeyInit,
    Nonce,
    SecretBox,
    Tag,
    XSalsa20Poly1305 as Cipher,
};
use rand::Rng;
use std::{fmt, num::Wrapping};

pub const TAG_SIZE: usize = SecretBox::<()>::TAG_SIZE;
pub const NONCE_SIZE: usize = SecretBox::<()>::NONCE_SIZE;
pub const KEY_SIZE: usize = SecretBox::<()>::KEY_SIZE;

/// Variants of the XSalsa20Poly1305 encryption scheme.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CryptoMode {
    /// The RTP header is used as the source of nonce bytes for the packet.
    ///
    /// Equivalent to a nonce of at most 48b (6B) at no extra packet overhead:
    /// the RTP sequence number and timestamp are the varying quantities.
    Normal,
    /// An additional random 24B suffix is used as the source of nonce bytes for the packet.
    /// This is regenerated randomly for each packet.
    ///
    /// Full nonce width of 24B (192b), at an extra 24B per packet (~1.2 kB/s).
    Suffix,
    /// An additional 4B suffix is used as the source of nonce bytes for the packet.
    /// This nonce value increments by `1` with each packet.
    ///
    /// Nonce width of 4B (32b), at an extra 4B per packet (~0.2 kB/s).
    Lite,
}

impl From<CryptoState> for CryptoMode {
    fn from(val: CryptoState) -> Self {
        use CryptoState::*;
        match val {
            Normal => CryptoMode::Normal,
            Suffix => CryptoMode::Suffix,
            Lite(_) => CryptoMode::Lite,
        }
    }
}

impl CryptoMode {
    /// Client preference used when none is configured: smallest overhead first.
    pub const DEFAULT_PREFERENCE: [CryptoMode; 3] =
        [CryptoMode::Lite, CryptoMode::Suffix, CryptoMode::Normal];

    /// Returns the name of a mode as it will appear during negotiation.
    #[must_use]
    pub fn to_request_str(self) -> &'static str {
        use CryptoMode::*;
        match self {
            Normal => "xsalsa20_poly1305",
            Suffix => "xsalsa20_poly1305_suffix",
            Lite => "xsalsa20_poly1305_lite",
        }
    }

    /// Parses a mode name as it appears during negotiation.
    #[must_use]
    pub fn from_request_str(name: &str) -> Option<Self> {
        use CryptoMode::*;
        [Normal, Suffix, Lite]
            .into_iter()
            .find(|m| m.to_request_str() == name)
    }

    /// Picks the first mode in `preference` which the server `offered`.
    pub fn select<S: AsRef<str>>(
        offered: &[S],
        preference: &[CryptoMode],
    ) -> ConnectionResult<CryptoMode> {
        preference
            .iter()
            .copied()
            .find(|mode| offered.iter().any(|s| s.as_ref() == mode.to_request_str()))
            .ok_or(ConnectionError::CryptoModeUnavailable)
    }

    /// Returns the number of bytes each nonce is stored as within
    /// a packet.
    #[must_use]
    pub fn nonce_size(self) -> usize {
        use CryptoMode::*;
        match self {
            Normal => RTP_HEADER_LEN,
            Suffix => NONCE_SIZE,
            Lite => 4,
        }
    }

    /// Returns the number of bytes occupied by the encryption scheme
    /// which fall before the payload.
    #[must_use]
    pub fn payload_prefix_len(self) -> usize {
        TAG_SIZE
    }

    /// Returns the number of bytes occupied by the encryption scheme
    /// which fall after the payload.
    #[must_use]
    pub fn payload_suffix_len(self) -> usize {
        use CryptoMode::*;
        match self {
            Normal => 0,
            Suffix | Lite => self.nonce_size(),
        }
    }

    /// Calculates the number of additional bytes required compared
    /// to an unencrypted payload.
    #[must_use]
    pub fn payload_overhead(self) -> usize {
        self.payload_prefix_len() + self.payload_suffix_len()
    }

    /// Extracts the byte slice in a packet used as the nonce, and the remaining mutable
    /// portion of the packet.
    fn nonce_slice<'a>(
        self,
        header: &'a [u8],
        body: &'a mut [u8],
    ) -> Result<(&'a [u8], &'a mut [u8]), CryptoError> {
        use CryptoMode::*;
        match self {
            Normal => Ok((header, body)),
            Suffix | Lite => {
                let len = body.len();
                if len < self.payload_suffix_len() {
                    Err(CryptoError)
                } else {
                    let (body_left, nonce_loc) = body.split_at_mut(len - self.payload_suffix_len());
                    Ok((&nonce_loc[..self.nonce_size()], body_left))
                }
            },
        }
    }

    /// Decrypts an RTP packet in place using the given key.
    ///
    /// `packet` holds the whole datagram, whose first `header_len` bytes are
    /// authenticated but unencrypted. If successful, this returns the number of
    /// bytes to be ignored from the start and end of the packet body.
    #[inline]
    pub fn decrypt_in_place(
        self,
        packet: &mut [u8],
        header_len: usize,
        cipher: &Cipher,
    ) -> Result<(usize, usize), CryptoError> {
        if header_len > packet.len() {
            return Err(CryptoError);
        }

        let (header, body) = packet.split_at_mut(header_len);
        let (slice_to_use, body_remaining) = self.nonce_slice(header, body)?;

        let nonce = pad_nonce(slice_to_use);

        let body_start = self.payload_prefix_len();
        let body_tail = self.payload_suffix_len();

        if body_start > body_remaining.len() {
            return Err(CryptoError);
        }

        let (tag_bytes, data_bytes) = body_remaining.split_at_mut(body_start);
        let tag = Tag::from_slice(tag_bytes);

        cipher
            .decrypt_in_place_detached(&nonce, b"", data_bytes, tag)
            .map(|()| (body_start, body_tail))
    }

    /// Encrypts an RTP packet in place using the given key.
    ///
    /// Use of this requires that the input packet has had a nonce generated in the correct location,
    /// and `payload_len` specifies the number of bytes after the header including this nonce.
    #[inline]
    pub fn encrypt_in_place(
        self,
        packet: &mut [u8],
        header_len: usize,
        cipher: &Cipher,
        payload_len: usize,
    ) -> Result<(), CryptoError> {
        if header_len + payload_len > packet.len() || payload_len < TAG_SIZE {
            return Err(CryptoError);
        }

        let (header, body) = packet.split_at_mut(header_len);
        let (slice_to_use, body_remaining) = self.nonce_slice(header, &mut body[..payload_len])?;

        let nonce = pad_nonce(slice_to_use);

        // body_remaining is now correctly truncated by this point.
        // the true_payload to encrypt follows after the first TAG_LEN bytes.
        let tag = cipher.encrypt_in_place_detached(&nonce, b"", &mut body_remaining[TAG_SIZE..])?;
        body_remaining[..TAG_SIZE].copy_from_slice(&tag[..]);

        Ok(())
    }
}

#[inline]
fn pad_nonce(bytes: &[u8]) -> Nonce {
    let mut nonce = Nonce::default();
    let len = bytes.len().min(NONCE_SIZE);
    nonce[..len].copy_from_slice(&bytes[..len]);
    nonce
}

/// Per-packet nonce state of the active encryption mode.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CryptoState {
    Normal,
    Suffix,
    Lite(Wrapping<u32>),
}

impl From<CryptoMode> for CryptoState {
    fn from(val: CryptoMode) -> Self {
        use CryptoMode::*;
        match val {
            Normal => CryptoState::Normal,
            Suffix => CryptoState::Suffix,
            Lite => CryptoState::Lite(Wrapping(rand::random::<u32>())),
        }
    }
}

impl CryptoState {
    /// Writes packet nonce into the body, if required, returning the new length.
    ///
    /// `payload_end` is the end of the tag and payload, counted from the end of
    /// the header.
    pub fn write_packet_nonce(
        &mut self,
        packet: &mut [u8],
        header_len: usize,
        payload_end: usize,
    ) -> usize {
        let mode = self.kind();
        let endpoint = payload_end + mode.payload_suffix_len();
        let body = &mut packet[header_len..];

        use CryptoState::*;
        match self {
            Suffix => {
                rand::thread_rng().fill(&mut body[payload_end..endpoint]);
            },
            Lite(i) => {
                NetworkEndian::write_u32(&mut body[payload_end..endpoint], i.0);
                *i += Wrapping(1);
            },
            Normal => {},
        }

        endpoint
    }

    /// Returns the underlying (stateless) type of the active crypto mode.
    #[must_use]
    pub fn kind(&self) -> CryptoMode {
        CryptoMode::from(*self)
    }
}

/// Encryption mode and key negotiated for a session.
#[derive(Clone)]
pub(crate) struct SessionKey {
    pub mode: CryptoMode,
    pub cipher: Cipher,
}

impl SessionKey {
    pub(crate) fn new(mode: CryptoMode, key: &[u8]) -> ConnectionResult<Self> {
        if key.len() != KEY_SIZE {
            return Err(ConnectionError::CryptoInvalidLength);
        }

        Ok(Self {
            mode,
            cipher: Cipher::new(Key::from_slice(key)),
        })
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("mode", &self.mode)
            .field("cipher", &"<secret>")
            .finish()
    }
}
