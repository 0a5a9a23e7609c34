//! Errors surfaced by the session engine.
//!
//! Every failure is scoped to one room and one session; nothing here is fatal
//! to the process.

use shared::{RoomId, RulesError, StoreError};
use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The room does not exist (never did, or was condemned).
    #[error("room {0} does not exist")]
    RoomNotFound(RoomId),

    /// The room outlived its retention window and was removed.
    #[error("room {0} has expired")]
    RoomExpired(RoomId),

    /// A live room already holds this identifier.
    #[error("room {0} already exists")]
    RoomAlreadyExists(RoomId),

    /// Both seats are held by other participants.
    #[error("both seats are taken")]
    SeatUnavailable,

    /// Spectators observe but cannot act.
    #[error("spectators cannot act in this room")]
    Spectator,

    #[error("it is not your turn")]
    NotYourTurn,

    #[error("waiting for an opponent to join")]
    WaitingForOpponent,

    /// Rematches are only offered once the game has ended.
    #[error("the game is still in progress")]
    GameInProgress,

    #[error("illegal move {from}-{to}")]
    IllegalMove { from: String, to: String },

    #[error("invalid room id {0:?}")]
    InvalidRoomId(String),

    #[error("display name must not be empty")]
    InvalidDisplayName,

    /// The stored record could not be decoded; state is unknown.
    #[error("room record is malformed: {0}")]
    MalformedRoom(String),

    #[error("rules error: {0}")]
    Rules(#[from] RulesError),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

impl SessionError {
    /// The session cannot continue; the caller should leave the room.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::RoomNotFound(_) | SessionError::RoomExpired(_)
        )
    }

    /// An action was refused with no state change; retrying later may work.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SessionError::NotYourTurn
                | SessionError::WaitingForOpponent
                | SessionError::GameInProgress
                | SessionError::IllegalMove { .. }
                | SessionError::Spectator
        )
    }

    /// The session continues as read-only observation.
    pub fn is_read_only(&self) -> bool {
        matches!(self, SessionError::Spectator | SessionError::SeatUnavailable)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::MalformedRoom(e.to_string())
    }
}
