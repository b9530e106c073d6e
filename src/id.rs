//! Newtypes around voice backend IDs.

use crate::model::id::{GuildId as GatewayGuild, UserId as GatewayUser};
use std::fmt::{Display, Formatter, Result as FmtResult};

macro_rules! impl_id {
    ($Id:ident) => {
        impl $Id {
            /// Returns the u64 representation of this Id.
            #[must_use]
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl Display for $Id {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $Id {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

/// ID of a voice/text channel.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ChannelId(pub u64);

/// ID of a guild (colloquially, "server").
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GuildId(pub u64);

/// ID of a user.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UserId(pub u64);

impl_id! {ChannelId}
impl_id! {GuildId}
impl_id! {UserId}

impl From<GuildId> for GatewayGuild {
    fn from(id: GuildId) -> Self {
        Self(id.get())
    }
}

impl From<UserId> for GatewayUser {
    fn from(id: UserId) -> Self {
        Self(id.get())
    }
}

impl From<GatewayUser> for UserId {
    fn from(id: GatewayUser) -> Self {
        Self(id.0)
    }
}
