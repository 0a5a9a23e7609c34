//! The status line a room shows, derived from its position and seating.
//!
//! A room missing a player always reads as waiting for an opponent, unless
//! the position on the board is already decided.

use shared::{RulesAdapter, RulesError, Side, Terminal};
use std::fmt;

/// What a room is showing right now. Derived from the position on every
/// snapshot and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    Checkmate { winner: Side },
    Draw,
    Stalemate,
    Check { mover: Side },
    ToMove { mover: Side },
    AwaitingOpponent,
}

impl RoomStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RoomStatus::Checkmate { .. } | RoomStatus::Draw | RoomStatus::Stalemate
        )
    }

    /// Side whose move it is, when moves are being taken at all.
    pub fn mover(self) -> Option<Side> {
        match self {
            RoomStatus::Check { mover } | RoomStatus::ToMove { mover } => Some(mover),
            _ => None,
        }
    }
}

impl From<Terminal> for RoomStatus {
    fn from(terminal: Terminal) -> Self {
        match terminal {
            Terminal::Checkmate { winner } => RoomStatus::Checkmate { winner },
            Terminal::Draw => RoomStatus::Draw,
            Terminal::Stalemate => RoomStatus::Stalemate,
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomStatus::Checkmate { winner } => write!(f, "Checkmate! {} wins.", winner),
            RoomStatus::Draw => f.write_str("Draw!"),
            RoomStatus::Stalemate => f.write_str("Stalemate!"),
            RoomStatus::Check { mover } => write!(f, "Check! {} to move.", mover),
            RoomStatus::ToMove { mover } => write!(f, "{} to move.", mover),
            RoomStatus::AwaitingOpponent => f.write_str("Waiting for opponent..."),
        }
    }
}

/// Status of `position` in a room whose seats are (or are not) both taken.
///
/// A finished game always reports its result, even with a seat empty. An
/// unfinished one waits for the opponent before showing whose turn it is.
pub fn derive_status<R: RulesAdapter + ?Sized>(
    rules: &R,
    position: &str,
    both_seats_filled: bool,
) -> Result<RoomStatus, RulesError> {
    let state = rules.evaluate(position)?;

    if let Some(terminal) = state.terminal {
        return Ok(terminal.into());
    }
    if !both_seats_filled {
        return Ok(RoomStatus::AwaitingOpponent);
    }
    Ok(if state.in_check {
        RoomStatus::Check {
            mover: state.side_to_move,
        }
    } else {
        RoomStatus::ToMove {
            mover: state.side_to_move,
        }
    })
}
