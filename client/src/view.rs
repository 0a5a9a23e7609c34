//! Local, non-authoritative selection state for one replica.
//!
//! Nothing here writes to the store. A click that completes a move comes back
//! as [`ClickOutcome::Submit`] and the caller routes it through the arbiter.

use shared::{RulesAdapter, RulesError};
use std::collections::BTreeSet;

use crate::seats::SeatResolution;
use crate::status::RoomStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// A piece was picked up; these are its destinations.
    Selected(BTreeSet<String>),
    /// The click completes a move that should be submitted.
    Submit { from: String, to: String },
    /// The previous selection was dropped.
    Cleared,
    /// Nothing to do for this square.
    Ignored,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionView {
    selection: Option<String>,
    candidates: BTreeSet<String>,
}

impl SessionView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    pub fn candidates(&self) -> &BTreeSet<String> {
        &self.candidates
    }

    pub fn clear(&mut self) {
        self.selection = None;
        self.candidates.clear();
    }

    /// Handles a click on `square` in `position`.
    pub fn click<R: RulesAdapter + ?Sized>(
        &mut self,
        rules: &R,
        position: &str,
        seat: SeatResolution,
        square: &str,
    ) -> Result<ClickOutcome, RulesError> {
        let side = match seat.side() {
            Some(side) => side,
            None => return Ok(ClickOutcome::Ignored),
        };
        let square = square.trim().to_ascii_lowercase();

        if let Some(origin) = self.selection.clone() {
            if self.candidates.contains(&square) {
                return Ok(ClickOutcome::Submit {
                    from: origin,
                    to: square,
                });
            }
            // not a destination: maybe another of our pieces
            let destinations = rules.legal_destinations(position, &square, side)?;
            if destinations.is_empty() {
                self.clear();
                return Ok(ClickOutcome::Cleared);
            }
            return Ok(self.select(square, destinations));
        }

        let destinations = rules.legal_destinations(position, &square, side)?;
        if destinations.is_empty() {
            return Ok(ClickOutcome::Ignored);
        }
        Ok(self.select(square, destinations))
    }

    pub fn on_move_accepted(&mut self) {
        self.clear();
    }

    pub fn on_move_rejected(&mut self) {
        self.clear();
    }

    /// Recomputes destinations against a freshly pushed position. A selection
    /// with nowhere left to go is dropped.
    pub fn refresh<R: RulesAdapter + ?Sized>(
        &mut self,
        rules: &R,
        position: &str,
        seat: SeatResolution,
    ) -> Result<(), RulesError> {
        let (origin, side) = match (self.selection.as_deref(), seat.side()) {
            (Some(origin), Some(side)) => (origin, side),
            _ => {
                self.clear();
                return Ok(());
            }
        };
        let destinations = rules.legal_destinations(position, origin, side)?;
        if destinations.is_empty() {
            self.clear();
        } else {
            self.candidates = destinations;
        }
        Ok(())
    }

    fn select(&mut self, square: String, destinations: BTreeSet<String>) -> ClickOutcome {
        self.selection = Some(square);
        self.candidates = destinations.clone();
        ClickOutcome::Selected(destinations)
    }
}

/// True when `seat` is the side the room is waiting on.
pub fn is_my_turn(status: RoomStatus, seat: SeatResolution) -> bool {
    match (status.mover(), seat.side()) {
        (Some(mover), Some(side)) => mover == side,
        _ => false,
    }
}
