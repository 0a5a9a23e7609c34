//! The persisted room record and the paths it lives under.
//!
//! ```text
//! rooms/<ROOMID>/
//!   createdAt          epoch millis, server assigned
//!   vacatedAt          epoch millis the last seat was given up | absent
//!   players/white      { id, name } | absent
//!   players/black      { id, name } | absent
//!   game/position      FEN
//!   game/lastMove      { from, to } | absent
//!   game/mover         "white" | "black"
//!   game/history       [SAN, ...] | absent
//!   rematch/white      bool
//!   rematch/black      bool
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::store::{join_path, server_timestamp};
use crate::ROOMS_ROOT;

/// Case-insensitive room identifier, canonicalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    /// Trims and upper-cases `raw`. Only ASCII alphanumerics, `-` and `_`
    /// are accepted so the id is always a single path segment.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || !trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return None;
        }
        Some(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn path(&self) -> String {
        join_path(&[ROOMS_ROOT, &self.0])
    }

    pub fn players_path(&self) -> String {
        join_path(&[ROOMS_ROOT, &self.0, "players"])
    }

    pub fn game_path(&self) -> String {
        join_path(&[ROOMS_ROOT, &self.0, "game"])
    }

    pub fn rematch_path(&self) -> String {
        join_path(&[ROOMS_ROOT, &self.0, "rematch"])
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::White, Side::Black];

    pub fn opposite(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => f.write_str("White"),
            Side::Black => f.write_str("Black"),
        }
    }
}

/// A participant bound to one of the two playing roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: String,
    pub name: String,
}

impl Seat {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Players {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white: Option<Seat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub black: Option<Seat>,
}

impl Players {
    pub fn get(&self, side: Side) -> Option<&Seat> {
        match side {
            Side::White => self.white.as_ref(),
            Side::Black => self.black.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, side: Side) -> &mut Option<Seat> {
        match side {
            Side::White => &mut self.white,
            Side::Black => &mut self.black,
        }
    }

    /// Side currently held by `participant_id`, white checked first.
    pub fn side_of(&self, participant_id: &str) -> Option<Side> {
        Side::BOTH
            .into_iter()
            .find(|side| self.get(*side).is_some_and(|seat| seat.id == participant_id))
    }

    pub fn both_filled(&self) -> bool {
        self.white.is_some() && self.black.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.white.is_none() && self.black.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMove {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    pub position: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_move: Option<LastMove>,
    pub mover: Side,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<String>,
}

impl GameRecord {
    pub fn fresh(position: String, mover: Side) -> Self {
        Self {
            position,
            last_move: None,
            mover,
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RematchVotes {
    #[serde(default)]
    pub white: bool,
    #[serde(default)]
    pub black: bool,
}

impl RematchVotes {
    pub fn get(&self, side: Side) -> bool {
        match side {
            Side::White => self.white,
            Side::Black => self.black,
        }
    }

    pub fn set(&mut self, side: Side, vote: bool) {
        match side {
            Side::White => self.white = vote,
            Side::Black => self.black = vote,
        }
    }

    pub fn both(&self) -> bool {
        self.white && self.black
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub created_at: u64,
    /// Set when the last seated participant leaves, cleared by the next claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vacated_at: Option<u64>,
    #[serde(default)]
    pub players: Players,
    pub game: GameRecord,
    #[serde(default)]
    pub rematch: RematchVotes,
}

impl Room {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Encodes the record with `createdAt` left for the store to stamp.
    pub fn to_value_stamped_by_store(&self) -> Result<Value, serde_json::Error> {
        let mut value = self.to_value()?;
        if let Value::Object(map) = &mut value {
            map.insert("createdAt".to_string(), server_timestamp());
        }
        Ok(value)
    }
}
