use crate::id::{ChannelId, GuildId, UserId};
use std::fmt;

/// Parameters and information needed to start communicating with a voice server.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct ConnectionInfo {
    /// ID of the voice channel being joined, if it is known.
    ///
    /// This is not needed to establish a connection, but can be useful
    /// for book-keeping.
    pub channel_id: Option<ChannelId>,
    /// Address (`host:port`) of the voice websocket gateway server assigned to this call.
    pub endpoint: String,
    /// ID of the target voice channel's parent guild.
    pub guild_id: GuildId,
    /// Unique string describing this session for validation/authentication purposes.
    pub session_id: String,
    /// Ephemeral secret used to validate the above session.
    pub token: String,
    /// ID of the connecting user.
    pub user_id: UserId,
    /// Whether this session may be resumed rather than identified afresh.
    ///
    /// The driver sets this once a session becomes active, and clears it
    /// whenever the server rejects the session or its credentials rotate.
    pub resume: bool,
}

impl ConnectionInfo {
    /// Creates connection info for a fresh (non-resumable) session.
    pub fn new(
        guild_id: impl Into<GuildId>,
        user_id: impl Into<UserId>,
        endpoint: impl Into<String>,
        session_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: None,
            endpoint: endpoint.into(),
            guild_id: guild_id.into(),
            session_id: session_id.into(),
            token: token.into(),
            user_id: user_id.into(),
            resume: false,
        }
    }

    /// Applies a new endpoint and token issued by the backend.
    ///
    /// Returns whether either value changed, in which case the session can no
    /// longer be resumed and must be re-established.
    pub fn apply_server_update(&mut self, endpoint: String, token: String) -> bool {
        let should_reconn = self.endpoint != endpoint || self.token != token;

        if should_reconn {
            self.endpoint = endpoint;
            self.token = token;
            self.resume = false;
        }

        should_reconn
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("channel_id", &self.channel_id)
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .field("session_id", &self.session_id)
            .field("token", &"<secret>")
            .field("user_id", &self.user_id)
            .field("resume", &self.resume)
            .finish()
    }
}
