//! Two-phase rematch agreement.
//!
//! A vote and the reset it may trigger are one transaction on the room root:
//! the commit that makes both votes true also puts the game back at the
//! initial position and clears the votes, so "both true, old position" is
//! never visible to anyone.

use log::{debug, info};
use serde_json::{json, Value};
use shared::store::{join_path, set_at};
use shared::{GameRecord, Room, RoomId, RulesAdapter, Side, Store, StoreError, Transaction};
use std::sync::Arc;

use crate::error::{SessionError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RematchOutcome {
    /// Our vote is recorded; waiting for the other side.
    Voted,
    /// Both sides agreed and the game was reset.
    Reset,
}

pub struct RematchCoordinator<S, R> {
    store: Arc<S>,
    rules: Arc<R>,
}

impl<S: Store, R: RulesAdapter> RematchCoordinator<S, R> {
    pub fn new(store: Arc<S>, rules: Arc<R>) -> Self {
        Self { store, rules }
    }

    /// Records `side`'s vote. Voting again is a no-op.
    pub async fn vote_rematch(&self, id: &RoomId, side: Side) -> SessionResult<RematchOutcome> {
        let fresh = self.fresh_game()?;
        let mut decision: Option<SessionResult<RematchOutcome>> = None;

        let result = self
            .store
            .transact(&id.path(), |current| {
                let (next, outcome) = apply_vote(id, current, Some(side), &fresh);
                decision = Some(outcome);
                next
            })
            .await?;

        let outcome = decision.unwrap_or_else(|| {
            Err(StoreError::Unavailable("rematch transaction never ran".to_string()).into())
        })?;
        if result.committed {
            match outcome {
                RematchOutcome::Reset => info!("Rematch agreed in room {}, board reset", id),
                RematchOutcome::Voted => info!("{} asked for a rematch in room {}", side, id),
            }
        }
        Ok(outcome)
    }

    /// Runs the guarded reset when both votes are already true, e.g. when they
    /// were written by a replica that never reset. Returns whether this call
    /// performed the reset.
    pub async fn settle(&self, id: &RoomId) -> SessionResult<bool> {
        let fresh = self.fresh_game()?;
        let result = self
            .store
            .transact(&id.path(), |current| {
                apply_vote(id, current, None, &fresh).0
            })
            .await?;

        if result.committed {
            info!("Settled pending rematch in room {}", id);
        } else {
            debug!("Nothing to settle in room {}", id);
        }
        Ok(result.committed)
    }

    fn fresh_game(&self) -> SessionResult<Value> {
        let position = self.rules.initial_position();
        let mover = self.rules.evaluate(&position)?.side_to_move;
        Ok(serde_json::to_value(GameRecord::fresh(position, mover))?)
    }
}

/// One pass of the vote/reset transaction. `side` is `None` when only
/// settling votes that are already in.
fn apply_vote(
    id: &RoomId,
    current: Option<&Value>,
    side: Option<Side>,
    fresh: &Value,
) -> (Transaction, SessionResult<RematchOutcome>) {
    let Some(value) = current else {
        return (
            Transaction::Abort,
            Err(SessionError::RoomNotFound(id.clone())),
        );
    };
    let room = match Room::from_value(value.clone()) {
        Ok(room) => room,
        Err(e) => return (Transaction::Abort, Err(e.into())),
    };

    let mut votes = room.rematch;
    if let Some(side) = side {
        if votes.get(side) && !votes.both() {
            return (Transaction::Abort, Ok(RematchOutcome::Voted));
        }
        votes.set(side, true);
    }

    let mut next = value.clone();
    if votes.both() {
        set_at(&mut next, "game", Some(fresh.clone()));
        set_at(
            &mut next,
            "rematch",
            Some(json!({"white": false, "black": false})),
        );
        return (Transaction::Commit(Some(next)), Ok(RematchOutcome::Reset));
    }

    match side {
        Some(side) => {
            set_at(
                &mut next,
                &join_path(&["rematch", side.key()]),
                Some(Value::Bool(true)),
            );
            (Transaction::Commit(Some(next)), Ok(RematchOutcome::Voted))
        }
        None => (Transaction::Abort, Ok(RematchOutcome::Voted)),
    }
}
