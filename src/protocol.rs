//! The game protocol's closed payload sets, one per direction. Payload contents are kept
//!  minimal: they carry the data the reliability layer needs to be exercised end to end.

use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::chunk::{SliceAckMessage, SliceMessage};
use crate::codec::{BufExt, BufMutExt, Vec2, Vec3};
use crate::payload::{Payload, PayloadFlags, PayloadKind};


#[repr(u8)]
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum ClientPayloadKind {
    Connect = 1,
    Disconnect = 2,
    PlayerState = 3,
    ChatMessage = 4,
    Slice = 5,
    SliceAck = 6,
}

impl PayloadKind for ClientPayloadKind {
    const ALL: &'static [Self] = &[
        ClientPayloadKind::Connect,
        ClientPayloadKind::Disconnect,
        ClientPayloadKind::PlayerState,
        ClientPayloadKind::ChatMessage,
        ClientPayloadKind::Slice,
        ClientPayloadKind::SliceAck,
    ];

    fn flags(self) -> PayloadFlags {
        match self {
            ClientPayloadKind::Connect | ClientPayloadKind::Disconnect => PayloadFlags::RELIABLE,
            ClientPayloadKind::PlayerState => PayloadFlags::RELIABLE_LATEST,
            ClientPayloadKind::ChatMessage => PayloadFlags::RELIABLE.collection(),
            ClientPayloadKind::Slice => PayloadFlags::UNRELIABLE.collection(),
            ClientPayloadKind::SliceAck => PayloadFlags::UNRELIABLE,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum ServerPayloadKind {
    ConnectAccepted = 1,
    PlayerJoined = 2,
    PlayerLeft = 3,
    WorldTime = 4,
    ChatMessage = 5,
    Slice = 6,
    SliceAck = 7,
}

impl PayloadKind for ServerPayloadKind {
    const ALL: &'static [Self] = &[
        ServerPayloadKind::ConnectAccepted,
        ServerPayloadKind::PlayerJoined,
        ServerPayloadKind::PlayerLeft,
        ServerPayloadKind::WorldTime,
        ServerPayloadKind::ChatMessage,
        ServerPayloadKind::Slice,
        ServerPayloadKind::SliceAck,
    ];

    fn flags(self) -> PayloadFlags {
        match self {
            ServerPayloadKind::ConnectAccepted => PayloadFlags::RELIABLE,
            ServerPayloadKind::PlayerJoined
            | ServerPayloadKind::PlayerLeft
            | ServerPayloadKind::ChatMessage => PayloadFlags::RELIABLE.collection(),
            ServerPayloadKind::WorldTime => PayloadFlags::UNRELIABLE,
            ServerPayloadKind::Slice => PayloadFlags::UNRELIABLE.collection(),
            ServerPayloadKind::SliceAck => PayloadFlags::UNRELIABLE,
        }
    }
}


#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub protocol_version: u16,
    pub player_name: String,
}
impl ConnectRequest {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u16(self.protocol_version);
        buf.put_string(&self.player_name);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ConnectRequest> {
        let protocol_version = buf.try_get_u16()?;
        let player_name = buf.try_get_string()?;
        Ok(ConnectRequest {
            protocol_version,
            player_name,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub position: Vec3,
    pub velocity: Vec3,
    /// yaw / pitch
    pub look: Vec2,
    pub is_grounded: bool,
}
impl PlayerState {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_vec3(self.position);
        buf.put_vec3(self.velocity);
        buf.put_vec2(self.look);
        buf.put_bool(self.is_grounded);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PlayerState> {
        Ok(PlayerState {
            position: buf.try_get_vec3()?,
            velocity: buf.try_get_vec3()?,
            look: buf.try_get_vec2()?,
            is_grounded: buf.try_get_bool()?,
        })
    }
}

/// Chat text as sent by a client; the server adds the sender when relaying it
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectAccepted {
    pub player_id: u16,
    pub tick_rate: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerJoined {
    pub player_id: u16,
    pub player_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorldTime {
    pub tick: u32,
    pub time_of_day: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayedChatMessage {
    pub player_id: u16,
    pub text: String,
}


#[derive(Debug, Clone, PartialEq)]
pub enum ClientPayload {
    Connect(ConnectRequest),
    Disconnect,
    PlayerState(PlayerState),
    ChatMessage(ChatMessage),
    Slice(SliceMessage),
    SliceAck(SliceAckMessage),
}

impl Payload for ClientPayload {
    type Kind = ClientPayloadKind;

    fn kind(&self) -> ClientPayloadKind {
        match self {
            ClientPayload::Connect(_) => ClientPayloadKind::Connect,
            ClientPayload::Disconnect => ClientPayloadKind::Disconnect,
            ClientPayload::PlayerState(_) => ClientPayloadKind::PlayerState,
            ClientPayload::ChatMessage(_) => ClientPayloadKind::ChatMessage,
            ClientPayload::Slice(_) => ClientPayloadKind::Slice,
            ClientPayload::SliceAck(_) => ClientPayloadKind::SliceAck,
        }
    }

    fn ser(&self, buf: &mut BytesMut) {
        match self {
            ClientPayload::Connect(msg) => msg.ser(buf),
            ClientPayload::Disconnect => {}
            ClientPayload::PlayerState(msg) => msg.ser(buf),
            ClientPayload::ChatMessage(msg) => buf.put_string(&msg.text),
            ClientPayload::Slice(msg) => msg.ser(buf),
            ClientPayload::SliceAck(msg) => msg.ser(buf),
        }
    }

    fn deser(kind: ClientPayloadKind, buf: &mut &[u8]) -> anyhow::Result<ClientPayload> {
        Ok(match kind {
            ClientPayloadKind::Connect => ClientPayload::Connect(ConnectRequest::deser(buf)?),
            ClientPayloadKind::Disconnect => ClientPayload::Disconnect,
            ClientPayloadKind::PlayerState => ClientPayload::PlayerState(PlayerState::deser(buf)?),
            ClientPayloadKind::ChatMessage => ClientPayload::ChatMessage(ChatMessage { text: buf.try_get_string()? }),
            ClientPayloadKind::Slice => ClientPayload::Slice(SliceMessage::deser(buf)?),
            ClientPayloadKind::SliceAck => ClientPayload::SliceAck(SliceAckMessage::deser(buf)?),
        })
    }
}

impl From<SliceMessage> for ClientPayload {
    fn from(value: SliceMessage) -> Self {
        ClientPayload::Slice(value)
    }
}

impl From<SliceAckMessage> for ClientPayload {
    fn from(value: SliceAckMessage) -> Self {
        ClientPayload::SliceAck(value)
    }
}


#[derive(Debug, Clone, PartialEq)]
pub enum ServerPayload {
    ConnectAccepted(ConnectAccepted),
    PlayerJoined(PlayerJoined),
    PlayerLeft { player_id: u16 },
    WorldTime(WorldTime),
    ChatMessage(RelayedChatMessage),
    Slice(SliceMessage),
    SliceAck(SliceAckMessage),
}

impl Payload for ServerPayload {
    type Kind = ServerPayloadKind;

    fn kind(&self) -> ServerPayloadKind {
        match self {
            ServerPayload::ConnectAccepted(_) => ServerPayloadKind::ConnectAccepted,
            ServerPayload::PlayerJoined(_) => ServerPayloadKind::PlayerJoined,
            ServerPayload::PlayerLeft { .. } => ServerPayloadKind::PlayerLeft,
            ServerPayload::WorldTime(_) => ServerPayloadKind::WorldTime,
            ServerPayload::ChatMessage(_) => ServerPayloadKind::ChatMessage,
            ServerPayload::Slice(_) => ServerPayloadKind::Slice,
            ServerPayload::SliceAck(_) => ServerPayloadKind::SliceAck,
        }
    }

    fn ser(&self, buf: &mut BytesMut) {
        match self {
            ServerPayload::ConnectAccepted(msg) => {
                buf.put_u16(msg.player_id);
                buf.put_u8(msg.tick_rate);
            }
            ServerPayload::PlayerJoined(msg) => {
                buf.put_u16(msg.player_id);
                buf.put_string(&msg.player_name);
            }
            ServerPayload::PlayerLeft { player_id } => buf.put_u16(*player_id),
            ServerPayload::WorldTime(msg) => {
                buf.put_u32(msg.tick);
                buf.put_f32(msg.time_of_day);
            }
            ServerPayload::ChatMessage(msg) => {
                buf.put_u16(msg.player_id);
                buf.put_string(&msg.text);
            }
            ServerPayload::Slice(msg) => msg.ser(buf),
            ServerPayload::SliceAck(msg) => msg.ser(buf),
        }
    }

    fn deser(kind: ServerPayloadKind, buf: &mut &[u8]) -> anyhow::Result<ServerPayload> {
        Ok(match kind {
            ServerPayloadKind::ConnectAccepted => ServerPayload::ConnectAccepted(ConnectAccepted {
                player_id: buf.try_get_u16()?,
                tick_rate: buf.try_get_u8()?,
            }),
            ServerPayloadKind::PlayerJoined => ServerPayload::PlayerJoined(PlayerJoined {
                player_id: buf.try_get_u16()?,
                player_name: buf.try_get_string()?,
            }),
            ServerPayloadKind::PlayerLeft => ServerPayload::PlayerLeft { player_id: buf.try_get_u16()? },
            ServerPayloadKind::WorldTime => ServerPayload::WorldTime(WorldTime {
                tick: buf.try_get_u32()?,
                time_of_day: buf.try_get_f32()?,
            }),
            ServerPayloadKind::ChatMessage => ServerPayload::ChatMessage(RelayedChatMessage {
                player_id: buf.try_get_u16()?,
                text: buf.try_get_string()?,
            }),
            ServerPayloadKind::Slice => ServerPayload::Slice(SliceMessage::deser(buf)?),
            ServerPayloadKind::SliceAck => ServerPayload::SliceAck(SliceAckMessage::deser(buf)?),
        })
    }
}

impl From<SliceMessage> for ServerPayload {
    fn from(value: SliceMessage) -> Self {
        ServerPayload::Slice(value)
    }
}

impl From<SliceAckMessage> for ServerPayload {
    fn from(value: SliceAckMessage) -> Self {
        ServerPayload::SliceAck(value)
    }
}
