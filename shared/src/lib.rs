use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod clock;
pub mod error;
pub mod memory;
pub mod room;
pub mod rules;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{RulesError, StoreError};
pub use memory::MemoryStore;
pub use room::{GameRecord, LastMove, Players, RematchVotes, Room, RoomId, Seat, Side};
pub use rules::{ChessRules, MoveOutcome, PositionState, RulesAdapter, Terminal};
pub use store::{Snapshot, Store, Subscription, Transaction, TransactionResult};

pub const PROTOCOL_VERSION: u32 = 1;
pub const ROOMS_ROOT: &str = "rooms";
pub const ROOM_TTL_MS: u64 = 60 * 60 * 1000;
pub const MAX_PACKET_SIZE: usize = 16 * 1024;

/// Store wire protocol between a replica (`client::network::RemoteStore`) and
/// the store host (`server::network::Server`). Values travel as JSON text.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Heartbeat,
    Disconnect,
    Fetch {
        request_id: u32,
        path: String,
    },
    Write {
        request_id: u32,
        path: String,
        value: Option<String>,
    },
    CompareAndSet {
        request_id: u32,
        path: String,
        expected: Option<String>,
        value: Option<String>,
    },
    Subscribe {
        request_id: u32,
        subscription_id: u32,
        path: String,
    },
    Unsubscribe {
        subscription_id: u32,
    },

    Connected {
        client_id: u32,
    },
    Value {
        request_id: u32,
        revision: u64,
        value: Option<String>,
    },
    Conflict {
        request_id: u32,
        current: Option<String>,
    },
    Subscribed {
        request_id: u32,
    },
    Failed {
        request_id: u32,
        reason: String,
    },
    Changed {
        subscription_id: u32,
        revision: u64,
        value: Option<String>,
    },
    Disconnected {
        reason: String,
    },
}

impl Packet {
    /// Request id a response packet answers, if it is one.
    pub fn response_to(&self) -> Option<u32> {
        match self {
            Packet::Value { request_id, .. }
            | Packet::Conflict { request_id, .. }
            | Packet::Subscribed { request_id }
            | Packet::Failed { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }
}

pub fn encode_value(value: Option<&serde_json::Value>) -> Result<Option<String>, StoreError> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StoreError::Encoding(e.to_string()))
}

pub fn decode_value(text: Option<&str>) -> Result<Option<serde_json::Value>, StoreError> {
    text.map(serde_json::from_str)
        .transpose()
        .map_err(|e| StoreError::Encoding(e.to_string()))
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
