/// Decode behaviour for received RTP packets within the driver.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum DecodeMode {
    /// Packets received from the voice server are handed over to events without any
    /// changes applied.
    ///
    /// No CPU work involved.
    Pass,
    /// Decrypts the body of each received packet.
    ///
    /// Small per-packet CPU use.
    Decrypt,
    /// Decrypts and decodes each received packet, correcting for packet loss.
    ///
    /// Larger per-packet CPU use.
    #[default]
    Decode,
}

impl DecodeMode {
    /// Returns whether this mode will decrypt received packets.
    #[must_use]
    pub fn should_decrypt(self) -> bool {
        self != DecodeMode::Pass
    }

    /// Returns whether this mode will decode received packets.
    #[must_use]
    pub fn should_decode(self) -> bool {
        self == DecodeMode::Decode
    }
}
