use crate::id::GuildId;

/// Voice connection details gathered at setup/reinstantiation.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct ConnectData<'a> {
    /// ID of the target voice channel's parent guild.
    pub guild_id: GuildId,
    /// The domain name of the voice server.
    ///
    /// This may be useful if you need/wish to move your voice connection
    /// to a node closer to the server.
    pub server: &'a str,
    /// Unique string describing this session for validation/authentication purposes.
    pub session_id: &'a str,
    /// The [RTP SSRC] *("Synchronisation source")* assigned by the voice server
    /// for the duration of this call.
    ///
    /// All packets sent will use this SSRC, which is not related to the sender's User
    /// ID.
    ///
    /// [RTP SSRC]: https://tools.ietf.org/html/rfc3550#section-3
    pub ssrc: u32,
}
