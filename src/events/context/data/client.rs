use crate::id::UserId;

/// A user joined the voice session.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct ClientConnectData<'a> {
    /// The user who joined.
    pub user_id: UserId,
    /// SSRC the user will send audio with, or `0` if not yet known.
    pub audio_ssrc: u32,
    /// Display name from the configured [`UserDirectory`], if any.
    ///
    /// [`UserDirectory`]: crate::driver::UserDirectory
    pub display_name: Option<&'a str>,
}

/// A user left the voice session.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct ClientDisconnectData<'a> {
    /// The user who left.
    pub user_id: UserId,
    /// Display name from the configured [`UserDirectory`], if any.
    ///
    /// [`UserDirectory`]: crate::driver::UserDirectory
    pub display_name: Option<&'a str>,
}
