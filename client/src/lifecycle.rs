//! Room creation, lazy expiry and teardown.
//!
//! There is no background sweeper: expiry is checked whenever a replica reads
//! the room (joining or receiving a push), and whichever replica notices first
//! deletes the whole subtree. The delete re-checks the live record inside a
//! transaction, so a replica acting on an old push can neither remove a room
//! that was re-created under the same id nor resurrect a removed one.

use log::{debug, info, warn};
use serde_json::Value;
use shared::{Clock, GameRecord, Players, RematchVotes, Room, RoomId, Seat, Store, Transaction};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::{SessionError, SessionResult};

pub struct RoomLifecycle<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    room_ttl: Duration,
    empty_room_grace: Duration,
}

impl<S: Store> RoomLifecycle<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        Self {
            store,
            clock,
            room_ttl: config.room_ttl,
            empty_room_grace: config.empty_room_grace,
        }
    }

    /// Creates `id` with `creator` on the white seat and `game` as the opening
    /// state. Fails with `RoomAlreadyExists` when a live room holds the id; an
    /// expired leftover is replaced.
    pub async fn create_room(
        &self,
        id: &RoomId,
        creator: Seat,
        game: GameRecord,
    ) -> SessionResult<Room> {
        if creator.name.trim().is_empty() {
            return Err(SessionError::InvalidDisplayName);
        }

        let room = Room {
            created_at: 0,
            vacated_at: None,
            players: Players {
                white: Some(creator),
                black: None,
            },
            game,
            rematch: RematchVotes::default(),
        };
        let encoded = room.to_value_stamped_by_store()?;

        let now = self.clock.now_millis();
        let (ttl, grace) = (self.room_ttl, self.empty_room_grace);
        let result = self
            .store
            .transact(&id.path(), |current| match current {
                Some(existing) if !is_stale_value(existing, now, ttl, grace) => {
                    Transaction::Abort
                }
                _ => Transaction::Commit(Some(encoded.clone())),
            })
            .await?;

        if !result.committed {
            warn!("Room {} already exists", id);
            return Err(SessionError::RoomAlreadyExists(id.clone()));
        }

        let created = decode_room(id, result.snapshot)?;
        info!("Created room {} at {}", id, created.created_at);
        Ok(created)
    }

    /// True when `room` is past its retention window, or has had both seats
    /// empty for longer than the empty-room grace. The grace runs from
    /// `vacatedAt`, or from creation for a room nobody ever left.
    pub fn check_expiry(&self, room: &Room) -> bool {
        is_expired(
            room,
            self.clock.now_millis(),
            self.room_ttl,
            self.empty_room_grace,
        )
    }

    /// Removes the whole room subtree if the live record is still expired.
    /// An absent, live or unreadable record is left alone.
    pub async fn condemn(&self, id: &RoomId) -> SessionResult<()> {
        let now = self.clock.now_millis();
        let (ttl, grace) = (self.room_ttl, self.empty_room_grace);
        let result = self
            .store
            .transact(&id.path(), |current| match current {
                Some(live) if is_stale_value(live, now, ttl, grace) => Transaction::Commit(None),
                _ => Transaction::Abort,
            })
            .await?;

        if result.committed {
            info!("Condemned room {}", id);
        } else {
            debug!("Room {} no longer needs condemning", id);
        }
        Ok(())
    }

    /// Joiner path: fetch the room once and vet it.
    pub async fn open_room(&self, id: &RoomId) -> SessionResult<Room> {
        let value = self.store.fetch_once(&id.path()).await?;
        self.accept(id, value).await
    }

    /// Vets a fetched or pushed room value: absent rooms are `RoomNotFound`,
    /// expired ones are condemned and reported as `RoomExpired`.
    pub async fn accept(&self, id: &RoomId, value: Option<Value>) -> SessionResult<Room> {
        let room = decode_room(id, value)?;
        if self.check_expiry(&room) {
            warn!("Room {} expired, removing it", id);
            self.condemn(id).await?;
            return Err(SessionError::RoomExpired(id.clone()));
        }
        Ok(room)
    }
}

pub fn decode_room(id: &RoomId, value: Option<Value>) -> SessionResult<Room> {
    match value {
        Some(value) => Ok(Room::from_value(value)?),
        None => Err(SessionError::RoomNotFound(id.clone())),
    }
}

fn is_expired(room: &Room, now: u64, ttl: Duration, grace: Duration) -> bool {
    let age = now.saturating_sub(room.created_at);
    if age > ttl.as_millis() as u64 {
        return true;
    }
    if !room.players.is_empty() {
        return false;
    }
    let empty_since = room.vacated_at.unwrap_or(room.created_at);
    now.saturating_sub(empty_since) > grace.as_millis() as u64
}

fn is_stale_value(value: &Value, now: u64, ttl: Duration, grace: Duration) -> bool {
    // a record we cannot read is never silently overwritten
    match Room::from_value(value.clone()) {
        Ok(room) => is_expired(&room, now, ttl, grace),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seats::SeatAssignment;
    use crate::testing::DownStore;
    use shared::{ManualClock, MemoryStore, Side, StoreError};

    const T0: u64 = 1_700_000_000_000;

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, RoomLifecycle<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let lifecycle = RoomLifecycle::new(store.clone(), clock.clone(), &EngineConfig::default());
        (store, clock, lifecycle)
    }

    fn opening() -> GameRecord {
        GameRecord::fresh("start".to_string(), Side::White)
    }

    #[tokio::test]
    async fn test_create_and_open() {
        let (_store, _clock, lifecycle) = setup();
        let id = RoomId::parse("room1").unwrap();

        let created = lifecycle
            .create_room(&id, Seat::new("p1", "Ada"), opening())
            .await
            .unwrap();
        assert_eq!(created.created_at, T0);
        assert_eq!(created.players.white, Some(Seat::new("p1", "Ada")));
        assert_eq!(created.players.black, None);
        assert_eq!(created.rematch, RematchVotes::default());

        let opened = lifecycle.open_room(&id).await.unwrap();
        assert_eq!(opened, created);
    }

    #[tokio::test]
    async fn test_create_collision_is_distinct() {
        let (store, _clock, lifecycle) = setup();
        let id = RoomId::parse("dup").unwrap();

        lifecycle
            .create_room(&id, Seat::new("p1", "Ada"), opening())
            .await
            .unwrap();
        let revision = store.revision().await;

        let err = lifecycle
            .create_room(&id, Seat::new("p9", "Eve"), opening())
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::RoomAlreadyExists(id.clone()));
        assert_eq!(store.revision().await, revision);

        let room = lifecycle.open_room(&id).await.unwrap();
        assert_eq!(room.players.white.unwrap().id, "p1");
    }

    #[tokio::test]
    async fn test_create_replaces_expired_leftover() {
        let (_store, clock, lifecycle) = setup();
        let id = RoomId::parse("old").unwrap();

        lifecycle
            .create_room(&id, Seat::new("p1", "Ada"), opening())
            .await
            .unwrap();
        clock.advance(Duration::from_secs(2 * 3600));

        let room = lifecycle
            .create_room(&id, Seat::new("p2", "Bo"), opening())
            .await
            .unwrap();
        assert_eq!(room.players.white.unwrap().id, "p2");
        assert_eq!(room.created_at, T0 + 2 * 3600 * 1000);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let (_store, _clock, lifecycle) = setup();
        let id = RoomId::parse("blank").unwrap();
        let err = lifecycle
            .create_room(&id, Seat::new("p1", "  "), opening())
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::InvalidDisplayName);
    }

    #[tokio::test]
    async fn test_open_missing_room() {
        let (_store, _clock, lifecycle) = setup();
        let id = RoomId::parse("nope").unwrap();
        let err = lifecycle.open_room(&id).await.unwrap_err();
        assert_eq!(err, SessionError::RoomNotFound(id));
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn test_expired_room_is_condemned_on_open() {
        let (store, clock, lifecycle) = setup();
        let id = RoomId::parse("late").unwrap();
        lifecycle
            .create_room(&id, Seat::new("p1", "Ada"), opening())
            .await
            .unwrap();

        clock.advance(Duration::from_secs(3600));
        assert!(lifecycle.open_room(&id).await.is_ok());

        clock.advance(Duration::from_millis(1));
        let err = lifecycle.open_room(&id).await.unwrap_err();
        assert_eq!(err, SessionError::RoomExpired(id.clone()));
        assert_eq!(store.fetch_once(&id.path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_room_grace() {
        let (store, clock, lifecycle) = setup();
        let id = RoomId::parse("ghost").unwrap();
        lifecycle
            .create_room(&id, Seat::new("p1", "Ada"), opening())
            .await
            .unwrap();
        store
            .write(&format!("{}/white", id.players_path()), None)
            .await
            .unwrap();

        clock.advance(Duration::from_secs(4 * 60));
        assert!(lifecycle.open_room(&id).await.is_ok());

        clock.advance(Duration::from_secs(2 * 60));
        let err = lifecycle.open_room(&id).await.unwrap_err();
        assert_eq!(err, SessionError::RoomExpired(id));
    }

    #[tokio::test]
    async fn test_grace_runs_from_vacancy() {
        let (store, clock, lifecycle) = setup();
        let id = RoomId::parse("left").unwrap();
        lifecycle
            .create_room(&id, Seat::new("p1", "Ada"), opening())
            .await
            .unwrap();

        // an old room whose last player just left is not gone at once
        clock.advance(Duration::from_secs(10 * 60));
        assert!(SeatAssignment::new(store.clone())
            .release_seat(&id, "p1")
            .await
            .unwrap());
        let room = lifecycle.open_room(&id).await.unwrap();
        assert_eq!(room.vacated_at, Some(T0 + 10 * 60 * 1000));

        clock.advance(Duration::from_secs(4 * 60));
        assert!(lifecycle.open_room(&id).await.is_ok());

        clock.advance(Duration::from_secs(2 * 60));
        let err = lifecycle.open_room(&id).await.unwrap_err();
        assert_eq!(err, SessionError::RoomExpired(id.clone()));
        assert_eq!(store.fetch_once(&id.path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_claim_clears_vacancy() {
        let (store, clock, lifecycle) = setup();
        let id = RoomId::parse("refill").unwrap();
        lifecycle
            .create_room(&id, Seat::new("p1", "Ada"), opening())
            .await
            .unwrap();
        let seats = SeatAssignment::new(store.clone());
        seats.release_seat(&id, "p1").await.unwrap();

        let room = lifecycle.open_room(&id).await.unwrap();
        assert!(room.vacated_at.is_some());
        seats.resolve_seat(&id, &room, "p2", "Bo").await.unwrap();

        clock.advance(Duration::from_secs(30 * 60));
        let room = lifecycle.open_room(&id).await.unwrap();
        assert_eq!(room.vacated_at, None);
        assert_eq!(room.players.white.unwrap().id, "p2");
    }

    #[tokio::test]
    async fn test_condemn_is_idempotent() {
        let (store, clock, lifecycle) = setup();
        let id = RoomId::parse("gone").unwrap();
        lifecycle
            .create_room(&id, Seat::new("p1", "Ada"), opening())
            .await
            .unwrap();

        clock.advance(Duration::from_secs(2 * 3600));
        lifecycle.condemn(&id).await.unwrap();
        let revision = store.revision().await;
        lifecycle.condemn(&id).await.unwrap();
        assert_eq!(store.fetch_once(&id.path()).await.unwrap(), None);
        assert_eq!(store.revision().await, revision);
    }

    #[tokio::test]
    async fn test_condemn_spares_live_room() {
        let (store, _clock, lifecycle) = setup();
        let id = RoomId::parse("alive").unwrap();
        lifecycle
            .create_room(&id, Seat::new("p1", "Ada"), opening())
            .await
            .unwrap();
        let revision = store.revision().await;

        lifecycle.condemn(&id).await.unwrap();
        assert!(store.fetch_once(&id.path()).await.unwrap().is_some());
        assert_eq!(store.revision().await, revision);
    }

    #[tokio::test]
    async fn test_old_push_cannot_delete_recreated_room() {
        let (store, clock, lifecycle) = setup();
        let id = RoomId::parse("race").unwrap();
        lifecycle
            .create_room(&id, Seat::new("p1", "Ada"), opening())
            .await
            .unwrap();
        let old_push = store.fetch_once(&id.path()).await.unwrap();

        // another replica re-creates the id after the first room expired
        clock.advance(Duration::from_secs(2 * 3600));
        let other = RoomLifecycle::new(store.clone(), clock.clone(), &EngineConfig::default());
        let fresh = other
            .create_room(&id, Seat::new("p2", "Bo"), opening())
            .await
            .unwrap();

        let err = lifecycle.accept(&id, old_push).await.unwrap_err();
        assert_eq!(err, SessionError::RoomExpired(id.clone()));
        assert_eq!(lifecycle.open_room(&id).await.unwrap(), fresh);
    }

    #[tokio::test]
    async fn test_store_failures_surface() {
        let clock = Arc::new(ManualClock::new(T0));
        let lifecycle = RoomLifecycle::new(Arc::new(DownStore), clock, &EngineConfig::default());
        let id = RoomId::parse("down").unwrap();

        let unavailable = |r: SessionResult<_>| {
            matches!(
                r,
                Err(SessionError::StoreUnavailable(StoreError::Unavailable(_)))
            )
        };
        assert!(unavailable(lifecycle.open_room(&id).await.map(|_| ())));
        assert!(unavailable(lifecycle.condemn(&id).await));
        assert!(unavailable(
            lifecycle
                .create_room(&id, Seat::new("p1", "Ada"), opening())
                .await
                .map(|_| ())
        ));
    }

    #[tokio::test]
    async fn test_malformed_record_is_reported() {
        let (store, _clock, lifecycle) = setup();
        let id = RoomId::parse("junk").unwrap();
        store
            .write(&id.path(), Some(serde_json::json!({"createdAt": "yesterday"})))
            .await
            .unwrap();

        assert!(matches!(
            lifecycle.open_room(&id).await,
            Err(SessionError::MalformedRoom(_))
        ));
        assert!(matches!(
            lifecycle
                .create_room(&id, Seat::new("p1", "Ada"), opening())
                .await,
            Err(SessionError::RoomAlreadyExists(_))
        ));
    }
}
