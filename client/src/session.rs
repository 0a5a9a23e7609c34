//! Per-replica session: the confirmed room as last pushed by the store, the
//! seat this participant resolved to, the derived status and local selection.
//!
//! The confirmed room is only ever replaced by an authoritative push. An
//! accepted move leaves a scratch copy of the new game record for display
//! until that push arrives, and the push always wins.

use log::{debug, info, warn};
use shared::{
    Clock, GameRecord, Room, RoomId, RulesAdapter, Seat, Snapshot, Store, Subscription,
};
use std::sync::Arc;

use crate::arbiter::TurnArbiter;
use crate::config::EngineConfig;
use crate::error::{SessionError, SessionResult};
use crate::lifecycle::RoomLifecycle;
use crate::rematch::{RematchCoordinator, RematchOutcome};
use crate::seats::{SeatAssignment, SeatResolution};
use crate::status::{derive_status, RoomStatus};
use crate::view::{is_my_turn, ClickOutcome, SessionView};

/// The injected capabilities every session of a replica shares.
pub struct Engine<S, R> {
    store: Arc<S>,
    rules: Arc<R>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl<S, R> Clone for Engine<S, R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            rules: self.rules.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: Store, R: RulesAdapter> Engine<S, R> {
    pub fn new(store: Arc<S>, rules: Arc<R>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            rules,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Creates `room_id` with the caller on white.
    pub async fn create(
        &self,
        room_id: &str,
        participant_id: &str,
        display_name: &str,
    ) -> SessionResult<ClientSession<S, R>> {
        let id = parse_room_id(room_id)?;
        let name = parse_display_name(display_name)?;
        let lifecycle = self.lifecycle();

        let position = self.rules.initial_position();
        let mover = self.rules.evaluate(&position)?.side_to_move;
        let room = lifecycle
            .create_room(
                &id,
                Seat::new(participant_id, name.clone()),
                GameRecord::fresh(position, mover),
            )
            .await?;

        let seat = room
            .players
            .side_of(participant_id)
            .map_or(SeatResolution::Spectator, SeatResolution::Player);
        ClientSession::start(self.clone(), id, participant_id, name, room, seat)
    }

    /// Opens an existing room and resolves the caller's seat in it.
    pub async fn join(
        &self,
        room_id: &str,
        participant_id: &str,
        display_name: &str,
    ) -> SessionResult<ClientSession<S, R>> {
        let id = parse_room_id(room_id)?;
        let name = parse_display_name(display_name)?;

        let mut room = self.lifecycle().open_room(&id).await?;
        let seat = SeatAssignment::new(self.store.clone())
            .resolve_seat(&id, &room, participant_id, &name)
            .await?;
        if let SeatResolution::Player(side) = seat {
            // the claim is committed; the next push carries it too
            if room.players.get(side).is_none() {
                *room.players.slot_mut(side) = Some(Seat::new(participant_id, name.clone()));
            }
        }
        ClientSession::start(self.clone(), id, participant_id, name, room, seat)
    }

    fn lifecycle(&self) -> RoomLifecycle<S> {
        RoomLifecycle::new(self.store.clone(), self.clock.clone(), &self.config)
    }
}

pub struct ClientSession<S, R> {
    engine: Engine<S, R>,
    lifecycle: RoomLifecycle<S>,
    seats: SeatAssignment<S>,
    arbiter: TurnArbiter<S, R>,
    rematch: RematchCoordinator<S, R>,

    room_id: RoomId,
    participant_id: String,
    display_name: String,

    confirmed: Room,
    last_revision: u64,
    predicted: Option<GameRecord>,

    seat: SeatResolution,
    released: bool,
    status: RoomStatus,
    view: SessionView,
}

impl<S: Store, R: RulesAdapter> ClientSession<S, R> {
    fn start(
        engine: Engine<S, R>,
        room_id: RoomId,
        participant_id: &str,
        display_name: String,
        room: Room,
        seat: SeatResolution,
    ) -> SessionResult<Self> {
        let status = derive_status(
            &*engine.rules,
            &room.game.position,
            room.players.both_filled(),
        )?;
        info!(
            "{} entered room {} as {:?}: {}",
            participant_id, room_id, seat, status
        );

        Ok(Self {
            lifecycle: RoomLifecycle::new(engine.store.clone(), engine.clock.clone(), &engine.config),
            seats: SeatAssignment::new(engine.store.clone()),
            arbiter: TurnArbiter::new(engine.store.clone(), engine.rules.clone()),
            rematch: RematchCoordinator::new(engine.store.clone(), engine.rules.clone()),
            engine,
            room_id,
            participant_id: participant_id.to_string(),
            display_name,
            confirmed: room,
            last_revision: 0,
            predicted: None,
            seat,
            released: false,
            status,
            view: SessionView::new(),
        })
    }

    /// Push subscription on the whole room. Dropping it tears down only the
    /// subscription; the seat stays taken.
    pub async fn subscribe(&self) -> SessionResult<Subscription> {
        Ok(self.engine.store.subscribe(&self.room_id.path()).await?)
    }

    /// Applies an authoritative push. Returns the new status, or `None` when
    /// the push is older than one already applied.
    ///
    /// The pushed room replaces the confirmed one before any follow-up store
    /// call runs. A failing follow-up is returned as the error, with the push
    /// already applied.
    pub async fn apply_snapshot(&mut self, snapshot: Snapshot) -> SessionResult<Option<RoomStatus>> {
        if snapshot.revision < self.last_revision {
            debug!(
                "Dropping stale push r{} (have r{})",
                snapshot.revision, self.last_revision
            );
            return Ok(None);
        }

        let room = self.lifecycle.accept(&self.room_id, snapshot.value).await?;
        let status = derive_status(
            &*self.engine.rules,
            &room.game.position,
            room.players.both_filled(),
        )?;

        self.last_revision = snapshot.revision;
        self.predicted = None;
        self.seat = self.seat_in(&room);
        self.status = status;
        self.confirmed = room;
        self.view
            .refresh(&*self.engine.rules, &self.confirmed.game.position, self.seat)?;
        debug!("Room {} r{}: {}", self.room_id, self.last_revision, self.status);

        self.follow_up().await?;
        Ok(Some(self.status))
    }

    fn seat_in(&self, room: &Room) -> SeatResolution {
        if let Some(side) = room.players.side_of(&self.participant_id) {
            return SeatResolution::Player(side);
        }
        if let SeatResolution::Player(side) = self.seat {
            warn!(
                "{} no longer holds {} in room {}",
                self.participant_id, side, self.room_id
            );
        }
        SeatResolution::Spectator
    }

    /// Store writes a push can call for: claiming a freed seat under the
    /// promotion policy, and settling a rematch both sides agreed to.
    async fn follow_up(&mut self) -> SessionResult<()> {
        let promote = self.engine.config.promote_spectators
            && self.seat.is_spectator()
            && !self.released
            && !self.confirmed.players.both_filled();
        if promote {
            let seat = self
                .seats
                .resolve_seat(&self.room_id, &self.confirmed, &self.participant_id, &self.display_name)
                .await?;
            if seat != self.seat {
                self.seat = seat;
                self.view
                    .refresh(&*self.engine.rules, &self.confirmed.game.position, self.seat)?;
            }
        }

        if self.confirmed.rematch.both() {
            self.rematch.settle(&self.room_id).await?;
        }
        Ok(())
    }

    /// Submits `from -> to` for this participant's seat.
    ///
    /// A move the local rules already reject never reaches the store. On any
    /// error the confirmed room is untouched.
    pub async fn submit_move(&mut self, from: &str, to: &str) -> SessionResult<GameRecord> {
        let result = self.try_submit(from, to).await;
        match &result {
            Ok(next) => {
                self.predicted = Some(next.clone());
                self.view.on_move_accepted();
            }
            Err(e) => {
                warn!("Move {}-{} refused: {}", from, to, e);
                self.view.on_move_rejected();
            }
        }
        result
    }

    async fn try_submit(&self, from: &str, to: &str) -> SessionResult<GameRecord> {
        let may_move = self.seat.side().is_some()
            && self.status.mover() == self.seat.side()
            && self.confirmed.players.both_filled();
        // scratch pre-filter, thrown away either way
        if may_move
            && self
                .engine
                .rules
                .apply_move(&self.confirmed.game.position, from, to)?
                .is_none()
        {
            return Err(SessionError::IllegalMove {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.arbiter
            .submit_move(&self.room_id, &self.confirmed, self.seat, from, to)
            .await
    }

    /// Board click. A click that completes a move submits it.
    pub async fn click(&mut self, square: &str) -> SessionResult<ClickOutcome> {
        let outcome = self.view.click(
            &*self.engine.rules,
            &self.confirmed.game.position,
            self.seat,
            square,
        )?;
        if let ClickOutcome::Submit { from, to } = &outcome {
            self.submit_move(from, to).await?;
        }
        Ok(outcome)
    }

    /// Asks for a rematch of a finished game.
    pub async fn vote_rematch(&mut self) -> SessionResult<RematchOutcome> {
        let side = match self.seat {
            SeatResolution::Player(side) => side,
            SeatResolution::Spectator => return Err(SessionError::Spectator),
        };
        if !self.status.is_terminal() {
            return Err(SessionError::GameInProgress);
        }
        self.rematch.vote_rematch(&self.room_id, side).await
    }

    /// Gives the seat up for good. Closing the session without calling this
    /// keeps the seat reserved.
    pub async fn release_seat(&mut self) -> SessionResult<bool> {
        let released = self
            .seats
            .release_seat(&self.room_id, &self.participant_id)
            .await?;
        self.seat = SeatResolution::Spectator;
        self.released = true;
        self.view.clear();
        Ok(released)
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn room(&self) -> &Room {
        &self.confirmed
    }

    /// Game record to display: the scratch copy of an accepted move until the
    /// push that confirms it arrives, else the confirmed one.
    pub fn display_game(&self) -> &GameRecord {
        self.predicted.as_ref().unwrap_or(&self.confirmed.game)
    }

    pub fn seat(&self) -> SeatResolution {
        self.seat
    }

    pub fn status(&self) -> RoomStatus {
        self.status
    }

    pub fn view(&self) -> &SessionView {
        &self.view
    }

    pub fn revision(&self) -> u64 {
        self.last_revision
    }

    pub fn is_my_turn(&self) -> bool {
        is_my_turn(self.status, self.seat)
    }
}

fn parse_room_id(raw: &str) -> SessionResult<RoomId> {
    RoomId::parse(raw).ok_or_else(|| SessionError::InvalidRoomId(raw.to_string()))
}

fn parse_display_name(raw: &str) -> SessionResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(SessionError::InvalidDisplayName);
    }
    Ok(name.to_string())
}
