use super::context_data::*;
use crate::{
    error::ConnectionError,
    id::{ChannelId, GuildId, UserId},
    model::SpeakingState,
    ws::Error as WsError,
};
use bytes::Bytes;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct InternalConnect {
    pub guild_id: GuildId,
    pub server: String,
    pub session_id: String,
    pub ssrc: u32,
}

#[derive(Debug)]
pub struct InternalDisconnect {
    pub kind: DisconnectKind,
    pub reason: Option<DisconnectReason>,
    pub channel_id: Option<ChannelId>,
    pub guild_id: GuildId,
    pub session_id: String,
}

impl InternalDisconnect {
    pub fn new(
        kind: DisconnectKind,
        error: Option<&ConnectionError>,
        info: &crate::ConnectionInfo,
    ) -> Self {
        Self {
            kind,
            reason: error.map(DisconnectReason::from),
            channel_id: info.channel_id,
            guild_id: info.guild_id,
            session_id: info.session_id.clone(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InternalSpeaking {
    pub ssrc: u32,
    pub user_id: Option<UserId>,
    pub speaking: SpeakingState,
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InternalClientConnect {
    pub user_id: UserId,
    pub audio_ssrc: u32,
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InternalClientDisconnect {
    pub user_id: UserId,
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InternalVoicePacket {
    pub ssrc: u32,
    pub user_id: Option<UserId>,
    pub sequence: u64,
    pub timestamp: u32,
    pub concealed: bool,
    pub payload: Bytes,
    pub audio: Option<Vec<i16>>,
}

#[derive(Debug)]
pub struct InternalSocketError {
    pub error: WsError,
    pub will_resume: bool,
}

impl<'a> From<&'a InternalConnect> for ConnectData<'a> {
    fn from(val: &'a InternalConnect) -> Self {
        Self {
            guild_id: val.guild_id,
            server: &val.server,
            session_id: &val.session_id,
            ssrc: val.ssrc,
        }
    }
}

impl<'a> From<&'a InternalDisconnect> for DisconnectData<'a> {
    fn from(val: &'a InternalDisconnect) -> Self {
        Self {
            kind: val.kind,
            reason: val.reason,
            channel_id: val.channel_id,
            guild_id: val.guild_id,
            session_id: &val.session_id,
        }
    }
}

impl<'a> From<&'a InternalSpeaking> for SpeakingData<'a> {
    fn from(val: &'a InternalSpeaking) -> Self {
        Self {
            ssrc: val.ssrc,
            user_id: val.user_id,
            speaking: val.speaking,
            display_name: val.display_name.as_deref(),
        }
    }
}

impl<'a> From<&'a InternalClientConnect> for ClientConnectData<'a> {
    fn from(val: &'a InternalClientConnect) -> Self {
        Self {
            user_id: val.user_id,
            audio_ssrc: val.audio_ssrc,
            display_name: val.display_name.as_deref(),
        }
    }
}

impl<'a> From<&'a InternalClientDisconnect> for ClientDisconnectData<'a> {
    fn from(val: &'a InternalClientDisconnect) -> Self {
        Self {
            user_id: val.user_id,
            display_name: val.display_name.as_deref(),
        }
    }
}

impl<'a> From<&'a InternalVoicePacket> for VoiceData<'a> {
    fn from(val: &'a InternalVoicePacket) -> Self {
        Self {
            ssrc: val.ssrc,
            user_id: val.user_id,
            sequence: val.sequence,
            timestamp: val.timestamp,
            concealed: val.concealed,
            payload: &val.payload,
            audio: val.audio.as_deref(),
        }
    }
}

impl<'a> From<&'a InternalSocketError> for SocketErrorData<'a> {
    fn from(val: &'a InternalSocketError) -> Self {
        Self {
            error: &val.error,
            will_resume: val.will_resume,
        }
    }
}
