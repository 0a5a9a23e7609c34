//! Maps a connecting participant onto white, black or spectator.
//!
//! Claiming an empty seat is always a store transaction conditioned on the
//! seat still being empty at commit time, so two joiners racing for the same
//! seat can never both win and a seated player is never evicted.

use log::{debug, info};
use serde_json::Value;
use shared::store::{join_path, server_timestamp, set_at};
use shared::{Room, RoomId, Seat, Side, Store, StoreError, Transaction};
use std::sync::Arc;

use crate::error::{SessionError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatResolution {
    Player(Side),
    Spectator,
}

impl SeatResolution {
    pub fn side(self) -> Option<Side> {
        match self {
            SeatResolution::Player(side) => Some(side),
            SeatResolution::Spectator => None,
        }
    }

    pub fn is_spectator(self) -> bool {
        self == SeatResolution::Spectator
    }

    /// The playing side, or `SeatUnavailable` for a spectator.
    pub fn require_player(self) -> SessionResult<Side> {
        self.side().ok_or(SessionError::SeatUnavailable)
    }
}

pub struct SeatAssignment<S> {
    store: Arc<S>,
}

impl<S: Store> SeatAssignment<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Resolves `participant_id` against the `room` snapshot.
    ///
    /// A participant already holding a seat gets it back without any write.
    /// Otherwise the first empty seat (white, then black) is claimed through a
    /// transaction that re-checks the live record; if both seats are taken the
    /// participant is a spectator.
    pub async fn resolve_seat(
        &self,
        id: &RoomId,
        room: &Room,
        participant_id: &str,
        display_name: &str,
    ) -> SessionResult<SeatResolution> {
        if let Some(side) = room.players.side_of(participant_id) {
            debug!("{} re-enters room {} as {}", participant_id, id, side);
            return Ok(SeatResolution::Player(side));
        }
        if room.players.both_filled() {
            return Ok(SeatResolution::Spectator);
        }
        if display_name.trim().is_empty() {
            return Err(SessionError::InvalidDisplayName);
        }

        let seat = serde_json::to_value(Seat::new(participant_id, display_name.trim()))?;
        let mut decision: Option<SessionResult<SeatResolution>> = None;

        let result = self
            .store
            .transact(&id.path(), |current| {
                let (next, outcome) = claim_seat(id, current, participant_id, &seat);
                decision = Some(outcome);
                next
            })
            .await?;

        let resolution = decision.unwrap_or_else(|| {
            Err(StoreError::Unavailable("seat transaction never ran".to_string()).into())
        })?;
        if result.committed {
            if let SeatResolution::Player(side) = resolution {
                info!("{} took the {} seat in room {}", participant_id, side, id);
            }
        }
        Ok(resolution)
    }

    /// Gives up the seat held by `participant_id`, if it still holds one.
    /// Returns whether a seat was released. Leaving the last occupied seat
    /// stamps `vacatedAt`, which starts the empty-room grace.
    pub async fn release_seat(&self, id: &RoomId, participant_id: &str) -> SessionResult<bool> {
        let result = self
            .store
            .transact(&id.path(), |current| {
                let Some(value) = current else {
                    return Transaction::Abort;
                };
                let Ok(mut room) = Room::from_value(value.clone()) else {
                    return Transaction::Abort;
                };
                let Some(side) = room.players.side_of(participant_id) else {
                    return Transaction::Abort;
                };
                *room.players.slot_mut(side) = None;

                let mut next = value.clone();
                set_at(&mut next, &join_path(&["players", side.key()]), None);
                if room.players.is_empty() {
                    set_at(&mut next, "vacatedAt", Some(server_timestamp()));
                }
                Transaction::Commit(Some(next))
            })
            .await?;

        if result.committed {
            info!("{} left their seat in room {}", participant_id, id);
        }
        Ok(result.committed)
    }
}

/// One pass of the seat-claiming transaction over the live room value.
fn claim_seat(
    id: &RoomId,
    current: Option<&Value>,
    participant_id: &str,
    seat: &Value,
) -> (Transaction, SessionResult<SeatResolution>) {
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

    if let Some(side) = room.players.side_of(participant_id) {
        return (Transaction::Abort, Ok(SeatResolution::Player(side)));
    }

    match Side::BOTH
        .into_iter()
        .find(|side| room.players.get(*side).is_none())
    {
        Some(side) => {
            let mut next = value.clone();
            set_at(
                &mut next,
                &join_path(&["players", side.key()]),
                Some(seat.clone()),
            );
            set_at(&mut next, "vacatedAt", None);
            (
                Transaction::Commit(Some(next)),
                Ok(SeatResolution::Player(side)),
            )
        }
        None => (Transaction::Abort, Ok(SeatResolution::Spectator)),
    }
}
