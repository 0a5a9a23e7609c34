//! Fixtures shared by the unit tests of this crate.

use serde_json::Value;
use shared::{
    GameRecord, MemoryStore, Players, RematchVotes, Room, RoomId, RulesAdapter, Store,
    StoreError, Subscription, Transaction, TransactionResult,
};
use std::sync::{Arc, Mutex};

/// A store whose backend is unreachable.
pub struct DownStore;

impl Store for DownStore {
    async fn fetch_once(&self, _path: &str) -> Result<Option<Value>, StoreError> {
        Err(StoreError::Unavailable("backend down".to_string()))
    }

    async fn subscribe(&self, _path: &str) -> Result<Subscription, StoreError> {
        Err(StoreError::Unavailable("backend down".to_string()))
    }

    async fn write(&self, _path: &str, _value: Option<Value>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("backend down".to_string()))
    }

    async fn transact<F>(&self, _path: &str, _update: F) -> Result<TransactionResult, StoreError>
    where
        F: FnMut(Option<&Value>) -> Transaction + Send,
    {
        Err(StoreError::Unavailable("backend down".to_string()))
    }
}

/// A `MemoryStore` that can be told to fail every call until it recovers.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failure: Mutex<Option<StoreError>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failure: Mutex::new(None),
        }
    }

    /// The healthy store underneath, for writes made by "other replicas".
    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    pub fn fail_with(&self, error: StoreError) {
        *self.failure.lock().expect("failure lock") = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().expect("failure lock") = None;
    }

    fn check(&self) -> Result<(), StoreError> {
        match self.failure.lock().expect("failure lock").clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Store for FlakyStore {
    async fn fetch_once(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.check()?;
        self.inner.fetch_once(path).await
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        self.check()?;
        self.inner.subscribe(path).await
    }

    async fn write(&self, path: &str, value: Option<Value>) -> Result<(), StoreError> {
        self.check()?;
        self.inner.write(path, value).await
    }

    async fn transact<F>(&self, path: &str, update: F) -> Result<TransactionResult, StoreError>
    where
        F: FnMut(Option<&Value>) -> Transaction + Send,
    {
        self.check()?;
        self.inner.transact(path, update).await
    }
}

/// A room `TEST` at the initial position with `players` seated.
pub async fn seeded_room<R: RulesAdapter>(
    rules: &R,
    players: Players,
) -> (Arc<MemoryStore>, RoomId, Room) {
    let store = Arc::new(MemoryStore::new());
    let id = RoomId::parse("test").expect("valid room id");
    let position = rules.initial_position();
    let mover = rules.evaluate(&position).expect("initial position").side_to_move;
    let room = Room {
        created_at: 1,
        vacated_at: None,
        players,
        game: GameRecord::fresh(position, mover),
        rematch: RematchVotes::default(),
    };
    store
        .write(&id.path(), Some(room.to_value().expect("encodable room")))
        .await
        .expect("memory store write");
    (store, id, room)
}
