//! Binary wire protocol shared by server and client.
//!
//! Every datagram is a fixed-size header followed by exactly `payload_len`
//! bytes of the payload variant named by `msg_type`. All multi-byte scalars are
//! big-endian and floats travel as their raw IEEE-754 bit pattern.
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 1 | `msg_type` (0 ping, 1 move, 2 state_update, 3 all_players_state, 4 leave) |
//! | 1 | 1 | `flags` (bit0 reliable, bit1 requires_ack; advisory) |
//! | 2 | 4 | `session_id` |
//! | 6 | 4 | `sequence` |
//! | 10 | 4 | `ack` |
//! | 14 | 2 | `payload_len` |
//! | 16 | N | payload |

use crate::{Direction, MovementCommand, MAX_PLAYERS};
use bincode::Options;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub const HEADER_SIZE: usize = 16;

pub const PING_PAYLOAD_SIZE: usize = 8;
pub const MOVE_PAYLOAD_SIZE: usize = 9;
pub const STATE_PAYLOAD_SIZE: usize = 16;
pub const PLAYER_ENTRY_SIZE: usize = 12;
pub const LEAVE_PAYLOAD_SIZE: usize = 1;

/// Largest datagram the protocol can produce.
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + 1 + PLAYER_ENTRY_SIZE * MAX_PLAYERS;

pub const LEAVE_REASON_QUIT: u8 = 0;
pub const LEAVE_REASON_TIMEOUT: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("buffer truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("buffer has trailing bytes: expected {expected} bytes, got {actual}")]
    TrailingBytes { expected: usize, actual: usize },
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),
    #[error("unknown direction: {0}")]
    UnknownDirection(u8),
    #[error("payload length mismatch for {msg_type:?}: expected {expected}, got {actual}")]
    LengthMismatch {
        msg_type: MessageType,
        expected: usize,
        actual: usize,
    },
    #[error("too many players in broadcast: {0}")]
    TooManyPlayers(u8),
    #[error("serialization failed: {0}")]
    Serialization(#[from] bincode::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Ping,
    Move,
    StateUpdate,
    AllPlayersState,
    Leave,
}

impl MessageType {
    pub fn to_wire(self) -> u8 {
        match self {
            MessageType::Ping => 0,
            MessageType::Move => 1,
            MessageType::StateUpdate => 2,
            MessageType::AllPlayersState => 3,
            MessageType::Leave => 4,
        }
    }

    pub fn from_wire(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(MessageType::Ping),
            1 => Ok(MessageType::Move),
            2 => Ok(MessageType::StateUpdate),
            3 => Ok(MessageType::AllPlayersState),
            4 => Ok(MessageType::Leave),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

bitflags! {
    /// Delivery hints. Nothing in the protocol retransmits; receivers may ignore them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u8 {
        const RELIABLE = 0b0000_0001;
        const REQUIRES_ACK = 0b0000_0010;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub msg_type: MessageType,
    pub flags: PacketFlags,
    /// Chosen by the client, stable for the lifetime of the connection.
    pub session_id: u32,
    /// Client-assigned, increases with every outbound command.
    pub sequence: u32,
    /// Highest input sequence the server has integrated for the triggering session.
    pub ack: u32,
    pub payload_len: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPayload {
    pub timestamp: u64,
}

/// Authoritative position of a single player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    pub x: f32,
    pub y: f32,
    pub timestamp_ns: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub session_id: u32,
    pub x: f32,
    pub y: f32,
}

/// Consolidated world state. Only the first `MAX_PLAYERS` entries are ever encoded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AllPlayersPayload {
    pub players: Vec<PlayerEntry>,
}

impl AllPlayersPayload {
    pub fn new(players: Vec<PlayerEntry>) -> Self {
        Self { players }
    }

    pub fn count(&self) -> usize {
        self.players.len().min(MAX_PLAYERS)
    }

    pub fn find(&self, session_id: u32) -> Option<&PlayerEntry> {
        self.players
            .iter()
            .take(MAX_PLAYERS)
            .find(|entry| entry.session_id == session_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeavePayload {
    pub reason: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Ping(PingPayload),
    Move(MovementCommand),
    StateUpdate(StatePayload),
    AllPlayersState(AllPlayersPayload),
    Leave(LeavePayload),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Ping(_) => MessageType::Ping,
            Payload::Move(_) => MessageType::Move,
            Payload::StateUpdate(_) => MessageType::StateUpdate,
            Payload::AllPlayersState(_) => MessageType::AllPlayersState,
            Payload::Leave(_) => MessageType::Leave,
        }
    }

    /// Exact number of bytes this payload occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        match self {
            Payload::Ping(_) => PING_PAYLOAD_SIZE,
            Payload::Move(_) => MOVE_PAYLOAD_SIZE,
            Payload::StateUpdate(_) => STATE_PAYLOAD_SIZE,
            Payload::AllPlayersState(all) => 1 + PLAYER_ENTRY_SIZE * all.count(),
            Payload::Leave(_) => LEAVE_PAYLOAD_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Payload,
}

impl Packet {
    /// Builds a packet whose `msg_type` and `payload_len` match `payload`.
    pub fn new(session_id: u32, sequence: u32, ack: u32, payload: Payload) -> Self {
        let header = PacketHeader {
            msg_type: payload.message_type(),
            flags: PacketFlags::empty(),
            session_id,
            sequence,
            ack,
            payload_len: payload.encoded_len() as u16,
        };
        Self { header, payload }
    }

    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.header.flags = flags;
        self
    }

    pub fn ping(session_id: u32, sequence: u32, timestamp: u64) -> Self {
        Self::new(session_id, sequence, 0, Payload::Ping(PingPayload { timestamp }))
    }

    pub fn movement(session_id: u32, sequence: u32, command: MovementCommand) -> Self {
        Self::new(session_id, sequence, 0, Payload::Move(command))
    }

    pub fn leave(session_id: u32, sequence: u32, reason: u8) -> Self {
        Self::new(session_id, sequence, 0, Payload::Leave(LeavePayload { reason }))
    }
}

#[derive(Serialize, Deserialize)]
struct WireHeader {
    msg_type: u8,
    flags: u8,
    session_id: u32,
    sequence: u32,
    ack: u32,
    payload_len: u16,
}

#[derive(Serialize, Deserialize)]
struct WireMove {
    direction: u8,
    speed: f32,
    delta: f32,
}

/// Fixed-width, big-endian bincode configuration matching the wire layout.
fn wire_options() -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

/// Encodes a packet. `msg_type` and `payload_len` are always taken from the payload
/// so the header can never disagree with what follows it.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(&packet.payload)?;

    let header = WireHeader {
        msg_type: packet.payload.message_type().to_wire(),
        flags: packet.header.flags.bits(),
        session_id: packet.header.session_id,
        sequence: packet.header.sequence,
        ack: packet.header.ack,
        payload_len: payload.len() as u16,
    };

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    wire_options().serialize_into(&mut bytes, &header)?;
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Serializes only the payload into a freshly owned buffer.
pub fn encode_payload(payload: &Payload) -> Result<Vec<u8>, ProtocolError> {
    let options = wire_options();
    let mut bytes = Vec::with_capacity(payload.encoded_len());

    match payload {
        Payload::Ping(ping) => options.serialize_into(&mut bytes, ping)?,
        Payload::Move(command) => {
            let wire = WireMove {
                direction: command.direction.to_wire(),
                speed: command.speed,
                delta: command.delta,
            };
            options.serialize_into(&mut bytes, &wire)?;
        }
        Payload::StateUpdate(state) => options.serialize_into(&mut bytes, state)?,
        Payload::AllPlayersState(all) => {
            bytes.push(all.count() as u8);
            for entry in all.players.iter().take(MAX_PLAYERS) {
                options.serialize_into(&mut bytes, entry)?;
            }
        }
        Payload::Leave(leave) => options.serialize_into(&mut bytes, leave)?,
    }

    Ok(bytes)
}

/// Decodes one datagram.
///
/// The buffer must hold exactly the header plus `payload_len` bytes; the
/// length is checked before the payload is sliced.
pub fn decode(bytes: &[u8]) -> Result<Packet, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::Truncated {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    }

    let raw: WireHeader = wire_options().deserialize(&bytes[..HEADER_SIZE])?;
    let msg_type = MessageType::from_wire(raw.msg_type)?;

    let expected = HEADER_SIZE + raw.payload_len as usize;
    if bytes.len() < expected {
        return Err(ProtocolError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    if bytes.len() > expected {
        return Err(ProtocolError::TrailingBytes {
            expected,
            actual: bytes.len(),
        });
    }

    let payload = decode_payload(msg_type, &bytes[HEADER_SIZE..expected])?;

    Ok(Packet {
        header: PacketHeader {
            msg_type,
            flags: PacketFlags::from_bits_truncate(raw.flags),
            session_id: raw.session_id,
            sequence: raw.sequence,
            ack: raw.ack,
            payload_len: raw.payload_len,
        },
        payload,
    })
}

fn expect_len(msg_type: MessageType, bytes: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if bytes.len() != expected {
        return Err(ProtocolError::LengthMismatch {
            msg_type,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn decode_payload(msg_type: MessageType, bytes: &[u8]) -> Result<Payload, ProtocolError> {
    let options = wire_options();

    match msg_type {
        MessageType::Ping => {
            expect_len(msg_type, bytes, PING_PAYLOAD_SIZE)?;
            Ok(Payload::Ping(options.deserialize(bytes)?))
        }
        MessageType::Move => {
            expect_len(msg_type, bytes, MOVE_PAYLOAD_SIZE)?;
            let wire: WireMove = options.deserialize(bytes)?;
            let direction = Direction::from_wire(wire.direction)
                .ok_or(ProtocolError::UnknownDirection(wire.direction))?;
            Ok(Payload::Move(MovementCommand::new(
                direction, wire.speed, wire.delta,
            )))
        }
        MessageType::StateUpdate => {
            expect_len(msg_type, bytes, STATE_PAYLOAD_SIZE)?;
            Ok(Payload::StateUpdate(options.deserialize(bytes)?))
        }
        MessageType::AllPlayersState => {
            let Some((&count, entries)) = bytes.split_first() else {
                return Err(ProtocolError::LengthMismatch {
                    msg_type,
                    expected: 1,
                    actual: 0,
                });
            };
            if count as usize > MAX_PLAYERS {
                return Err(ProtocolError::TooManyPlayers(count));
            }
            expect_len(msg_type, bytes, 1 + PLAYER_ENTRY_SIZE * count as usize)?;

            let players = entries
                .chunks_exact(PLAYER_ENTRY_SIZE)
                .map(|chunk| options.deserialize::<PlayerEntry>(chunk))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Payload::AllPlayersState(AllPlayersPayload { players }))
        }
        MessageType::Leave => {
            expect_len(msg_type, bytes, LEAVE_PAYLOAD_SIZE)?;
            Ok(Payload::Leave(options.deserialize(bytes)?))
        }
    }
}
