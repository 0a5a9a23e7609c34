//! The only writer of `game`: validates a proposed move and publishes the
//! resulting position.

use log::{info, warn};
use serde_json::Value;
use shared::{GameRecord, LastMove, RoomId, Room, RulesAdapter, Store, Transaction};
use std::sync::Arc;

use crate::error::{SessionError, SessionResult};
use crate::seats::SeatResolution;

pub struct TurnArbiter<S, R> {
    store: Arc<S>,
    rules: Arc<R>,
}

impl<S: Store, R: RulesAdapter> TurnArbiter<S, R> {
    pub fn new(store: Arc<S>, rules: Arc<R>) -> Self {
        Self { store, rules }
    }

    /// Checks the move against `room` and, when it passes, publishes the next
    /// game record. Rejections leave the store untouched.
    ///
    /// Preconditions, first failure wins: the caller holds a seat, it is that
    /// seat's turn, both seats are taken, and the move is legal.
    pub async fn submit_move(
        &self,
        id: &RoomId,
        room: &Room,
        seat: SeatResolution,
        from: &str,
        to: &str,
    ) -> SessionResult<GameRecord> {
        let side = match seat {
            SeatResolution::Player(side) => side,
            SeatResolution::Spectator => return Err(SessionError::Spectator),
        };

        let state = self.rules.evaluate(&room.game.position)?;
        if state.side_to_move != side {
            return Err(SessionError::NotYourTurn);
        }
        if !room.players.both_filled() {
            return Err(SessionError::WaitingForOpponent);
        }

        let outcome = match self.rules.apply_move(&room.game.position, from, to)? {
            Some(outcome) => outcome,
            None => {
                warn!("Rejected illegal move {}-{} in room {}", from, to, id);
                return Err(SessionError::IllegalMove {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        };

        let mut history = room.game.history.clone();
        history.push(outcome.notation.clone());
        let next = GameRecord {
            position: outcome.next_position,
            last_move: Some(LastMove {
                from: from.to_string(),
                to: to.to_string(),
            }),
            mover: outcome.side_to_move,
            history,
        };
        let encoded = serde_json::to_value(&next)?;

        // Only the mover passes the checks above, so the write cannot race
        // another seat. The guard catches a stale snapshot from our own seat
        // (two windows) and a room deleted underneath us.
        let mut stale: Option<SessionError> = None;
        let result = self
            .store
            .transact(&id.game_path(), |current| match current {
                None => {
                    stale = Some(SessionError::RoomNotFound(id.clone()));
                    Transaction::Abort
                }
                Some(game) if position_of(game) != Some(room.game.position.as_str()) => {
                    stale = Some(SessionError::NotYourTurn);
                    Transaction::Abort
                }
                Some(_) => {
                    stale = None;
                    Transaction::Commit(Some(encoded.clone()))
                }
            })
            .await?;

        if !result.committed {
            return Err(stale.unwrap_or(SessionError::NotYourTurn));
        }

        info!(
            "{} played {} in room {}, {} to move",
            side, outcome.notation, id, next.mover
        );
        if let Some(terminal) = outcome.terminal {
            info!("Room {} finished: {:?}", id, terminal);
        }
        Ok(next)
    }
}

fn position_of(game: &Value) -> Option<&str> {
    game.get("position").and_then(Value::as_str)
}
