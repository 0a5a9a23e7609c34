//! The rules capability the engine delegates every game-specific question to,
//! and a chess implementation backed by shakmaty.
//!
//! Positions are opaque strings to the engine. For [`ChessRules`] they are FEN.

use shakmaty::{
    fen::Fen, san::San, uci::UciMove, CastlingMode, Chess, Color, EnPassantMode, Move, Position,
    Role, Square,
};
use std::collections::BTreeSet;

use crate::error::RulesError;
use crate::room::Side;

/// How a finished game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Checkmate { winner: Side },
    Draw,
    Stalemate,
}

/// Everything the engine needs to know about a position without moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionState {
    pub side_to_move: Side,
    pub in_check: bool,
    pub terminal: Option<Terminal>,
}

/// Result of applying a legal move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub next_position: String,
    pub side_to_move: Side,
    pub terminal: Option<Terminal>,
    pub captured: bool,
    /// Human readable notation of the move, appended to the game history.
    pub notation: String,
}

pub trait RulesAdapter: Send + Sync + 'static {
    /// Canonical start position.
    fn initial_position(&self) -> String;

    fn evaluate(&self, position: &str) -> Result<PositionState, RulesError>;

    /// Squares the piece on `origin` may move to, restricted to moves `side`
    /// is allowed to make right now. Empty when `side` is not to move or the
    /// square holds none of its pieces.
    fn legal_destinations(
        &self,
        position: &str,
        origin: &str,
        side: Side,
    ) -> Result<BTreeSet<String>, RulesError>;

    /// Applies `from -> to`. Multi-result moves (promotion) resolve to a fixed
    /// default. Returns `Ok(None)` when the move is illegal.
    fn apply_move(
        &self,
        position: &str,
        from: &str,
        to: &str,
    ) -> Result<Option<MoveOutcome>, RulesError>;
}

/// Standard chess, promotions always to a queen.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChessRules;

impl ChessRules {
    pub fn new() -> Self {
        Self
    }

    fn parse_position(position: &str) -> Result<Chess, RulesError> {
        let fen: Fen = position
            .parse()
            .map_err(|e| RulesError::InvalidPosition(format!("{e}")))?;
        fen.into_position(CastlingMode::Standard)
            .map_err(|e| RulesError::InvalidPosition(format!("{e}")))
    }

    fn parse_square(square: &str) -> Result<Square, RulesError> {
        square
            .trim()
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| RulesError::InvalidSquare(square.to_string()))
    }

    fn to_fen(position: &Chess) -> String {
        Fen::from_position(position.clone(), EnPassantMode::Legal).to_string()
    }

    /// Origin, king-destination style target and promotion of a move.
    fn endpoints(m: &Move) -> Option<(Square, Square, Option<Role>)> {
        match UciMove::from_move(m, CastlingMode::Standard) {
            UciMove::Normal {
                from,
                to,
                promotion,
            } => Some((from, to, promotion)),
            _ => None,
        }
    }

    fn state_of(position: &Chess) -> PositionState {
        let side_to_move = side_of(position.turn());
        let terminal = if position.is_checkmate() {
            // the side to move is mated
            Some(Terminal::Checkmate {
                winner: side_to_move.opposite(),
            })
        } else if position.is_insufficient_material() || position.halfmoves() >= 100 {
            Some(Terminal::Draw)
        } else if position.is_stalemate() {
            Some(Terminal::Stalemate)
        } else {
            None
        };

        PositionState {
            side_to_move,
            in_check: position.is_check(),
            terminal,
        }
    }
}

impl RulesAdapter for ChessRules {
    fn initial_position(&self) -> String {
        Self::to_fen(&Chess::default())
    }

    fn evaluate(&self, position: &str) -> Result<PositionState, RulesError> {
        Ok(Self::state_of(&Self::parse_position(position)?))
    }

    fn legal_destinations(
        &self,
        position: &str,
        origin: &str,
        side: Side,
    ) -> Result<BTreeSet<String>, RulesError> {
        let position = Self::parse_position(position)?;
        let origin = Self::parse_square(origin)?;

        if side_of(position.turn()) != side {
            return Ok(BTreeSet::new());
        }

        Ok(position
            .legal_moves()
            .iter()
            .filter_map(Self::endpoints)
            .filter(|(from, _, _)| *from == origin)
            .map(|(_, to, _)| to.to_string())
            .collect())
    }

    fn apply_move(
        &self,
        position: &str,
        from: &str,
        to: &str,
    ) -> Result<Option<MoveOutcome>, RulesError> {
        let position = Self::parse_position(position)?;
        let from = Self::parse_square(from)?;
        let to = Self::parse_square(to)?;

        let chosen = position.legal_moves().into_iter().find(|m| {
            Self::endpoints(m).is_some_and(|(f, t, promotion)| {
                f == from && t == to && matches!(promotion, None | Some(Role::Queen))
            })
        });
        let m = match chosen {
            Some(m) => m,
            None => return Ok(None),
        };

        let notation = San::from_move(&position, &m).to_string();
        let captured = m.is_capture();
        let next = match position.play(&m) {
            Ok(next) => next,
            Err(_) => return Ok(None),
        };
        let state = Self::state_of(&next);

        Ok(Some(MoveOutcome {
            next_position: Self::to_fen(&next),
            side_to_move: state.side_to_move,
            terminal: state.terminal,
            captured,
            notation,
        }))
    }
}

fn side_of(color: Color) -> Side {
    match color {
        Color::White => Side::White,
        Color::Black => Side::Black,
    }
}
