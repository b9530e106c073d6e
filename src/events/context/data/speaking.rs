use crate::{id::UserId, model::SpeakingState};

/// Speaking state update, describing how another voice user is transmitting
/// audio data.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct SpeakingData<'a> {
    /// Synchronisation Source of the user's audio stream.
    pub ssrc: u32,
    /// The user, if the server named one.
    pub user_id: Option<UserId>,
    /// Current capabilities of the user.
    pub speaking: SpeakingState,
    /// Display name from the configured [`UserDirectory`], if any.
    ///
    /// [`UserDirectory`]: crate::driver::UserDirectory
    pub display_name: Option<&'a str>,
}
