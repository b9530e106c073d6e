use crate::id::UserId;

/// One frame of received audio.
///
/// Lost packets are covered by frames with `concealed` set, fired in order
/// before the frame of the packet which revealed the loss.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct VoiceData<'a> {
    /// Synchronisation Source of the sender.
    pub ssrc: u32,
    /// The sender, if a speaking or connect event has named it.
    pub user_id: Option<UserId>,
    /// Extended 64-bit RTP sequence number of this frame.
    pub sequence: u64,
    /// RTP timestamp of this frame.
    pub timestamp: u32,
    /// Whether this frame was synthesised to conceal packet loss.
    pub concealed: bool,
    /// Packet body after the RTP header.
    ///
    /// This is still encrypted under [`DecodeMode::Pass`], and is otherwise the
    /// bare Opus frame. Empty for concealed frames.
    ///
    /// [`DecodeMode::Pass`]: crate::driver::DecodeMode::Pass
    pub payload: &'a [u8],
    /// Decoded interleaved PCM, present under [`DecodeMode::Decode`].
    ///
    /// [`DecodeMode::Decode`]: crate::driver::DecodeMode::Decode
    pub audio: Option<&'a [i16]>,
}
