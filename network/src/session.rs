//! Per-session inbound validation: sequence monotonicity, crypto, optional
//! compression, the per-type size table, lifecycle state gates and the
//! packet-rate budget.
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use rate_limiter::{PacketBudget, Verdict};
use thiserror::Error;

use crate::{
    compress::{decompress, CompressError},
    crypto::{CryptoError, CryptoSession, KeyPair},
    frame::FrameHeader,
    packets::{ClientOpcode, ClientPacket, DecodeFailure},
};

/// Server-side session handle; the wire `client_id` is its low half.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SessionId(pub u32);

impl SessionId {
    pub fn client_id(&self) -> u16 {
        self.0 as u16
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "session#{}", self.0)
    }
}

/// Session lifecycle. Stored as an atomic so the reader task can gate
/// packets while the world drives transitions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum LifecycleState {
    Handshake = 0,
    Authenticated = 1,
    CharSelect = 2,
    InWorld = 3,
    Closing = 4,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Handshake,
            1 => LifecycleState::Authenticated,
            2 => LifecycleState::CharSelect,
            3 => LifecycleState::InWorld,
            _ => LifecycleState::Closing,
        }
    }

    /// Which packet types a session in this state may send.
    pub fn permits(&self, opcode: ClientOpcode) -> bool {
        use ClientOpcode::*;
        match self {
            LifecycleState::Handshake => matches!(opcode, Handshake | AccountLogin | KeepAlive),
            LifecycleState::Authenticated => {
                matches!(
                    opcode,
                    CharacterList | KeepAlive | Logout | RekeyAck | AdminCommand
                )
            }
            LifecycleState::CharSelect => matches!(
                opcode,
                CharacterList
                    | CharacterCreate
                    | CharacterDelete
                    | CharacterSelect
                    | KeepAlive
                    | Logout
                    | RekeyAck
                    | AdminCommand
            ),
            LifecycleState::InWorld => !matches!(opcode, Handshake | AccountLogin),
            LifecycleState::Closing => false,
        }
    }
}

/// Shared lifecycle cell.
#[derive(Clone)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub fn new(state: LifecycleState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LifecycleState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Crypto state shared between the reader and writer halves of one
/// connection. Key material is symmetric; each direction keeps its own
/// sequence-driven rotation.
pub struct SessionCrypto {
    pub inbound: CryptoSession,
    pub outbound: CryptoSession,
    /// Staged pair announced in a REKEY packet, applied to the inbound
    /// direction once the client acks with its switch sequence.
    pub pending_rekey: Option<KeyPair>,
}

pub type SharedCrypto = Arc<Mutex<SessionCrypto>>;

pub fn shared_crypto(session: CryptoSession) -> SharedCrypto {
    Arc::new(Mutex::new(SessionCrypto {
        inbound: session.clone(),
        outbound: session,
        pending_rekey: None,
    }))
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("stale sequence {received}, already saw {last_seen}")]
    StaleSequence { received: u32, last_seen: u32 },
    #[error("undecryptable payload: {0}")]
    Crypto(#[from] CryptoError),
    #[error("corrupt compressed payload: {0}")]
    Compress(#[from] CompressError),
    #[error("malformed packet: {0:?}")]
    Decode(DecodeFailure),
    #[error("packet {opcode:?} illegal in state {state:?}")]
    IllegalState {
        opcode: ClientOpcode,
        state: LifecycleState,
    },
    #[error("packet rate budget exceeded")]
    Flood,
    #[error("payload too short for a sequence prefix")]
    MissingSequence,
}

/// Outcome of pushing one frame through the pipeline.
#[derive(Debug)]
pub enum Inbound {
    Packet { sequence: u32, packet: ClientPacket },
    /// Redelivered sequence; dropped silently, not a violation.
    DuplicateDropped,
}

/// The inbound half of the validation pipeline. Owned by the reader task.
pub struct InboundPipeline {
    state: SharedState,
    crypto: SharedCrypto,
    budget: PacketBudget,
    last_sequence: Option<u32>,
}

impl InboundPipeline {
    pub fn new(state: SharedState, crypto: SharedCrypto, packets_per_second: NonZeroU32) -> Self {
        Self {
            state,
            crypto,
            budget: PacketBudget::new(packets_per_second),
            last_sequence: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    /// Validates one checksum-verified frame. Steps, in order: sequence
    /// monotonicity, decrypt, decompress, per-type size and decode, state
    /// gate, rate budget.
    pub fn handle_frame(
        &mut self,
        header: FrameHeader,
        payload: &[u8],
    ) -> Result<Inbound, SessionError> {
        if payload.len() < 4 {
            return Err(SessionError::MissingSequence);
        }
        let sequence = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        match self.last_sequence {
            Some(last) if sequence == last => return Ok(Inbound::DuplicateDropped),
            Some(last) if sequence < last => {
                return Err(SessionError::StaleSequence {
                    received: sequence,
                    last_seen: last,
                })
            }
            _ => (),
        }

        let body = &payload[4..];
        let decrypted = if body.is_empty() {
            Vec::new()
        } else {
            self.crypto.lock().inbound.decrypt(sequence, body)?
        };
        let plain = if header.is_compressed() {
            decompress(&decrypted)?
        } else {
            decrypted
        };

        let packet =
            ClientPacket::decode(header.bare_type(), &plain).map_err(SessionError::Decode)?;

        let state = self.state.get();
        if !state.permits(packet.opcode()) {
            return Err(SessionError::IllegalState {
                opcode: packet.opcode(),
                state,
            });
        }

        if let Verdict::Exceeded(_) = self.budget.on_packet() {
            return Err(SessionError::Flood);
        }

        self.last_sequence = Some(sequence);
        Ok(Inbound::Packet { sequence, packet })
    }

    /// Stage the pending rekey pair onto the inbound direction; called when
    /// the client acks a REKEY with the sequence it will switch at.
    pub fn apply_rekey_ack(&mut self, from_sequence: u32) -> bool {
        let mut crypto = self.crypto.lock();
        match crypto.pending_rekey.take() {
            Some(pair) => {
                crypto.inbound.stage_rotation(pair, from_sequence);
                true
            }
            None => false,
        }
    }
}
