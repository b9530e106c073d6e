use crate::id::UserId;

/// Read-only lookup of display identities for users seen on a voice session.
///
/// Used to annotate speaking and client events with a human readable name.
pub trait UserDirectory: Send + Sync {
    /// Returns the display name of `user`, if known.
    fn display_name(&self, user: UserId) -> Option<String>;
}
