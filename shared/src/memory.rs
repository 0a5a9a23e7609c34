//! In-process implementation of [`Store`].
//!
//! Every operation runs under one lock, so transactions are trivially atomic.
//! Used directly by tests and as the backing tree of the UDP store host.

use log::debug;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::store::{
    get_at, normalize, paths_overlap, resolve_placeholders, set_at, Snapshot, Store,
    Subscription, Transaction, TransactionResult,
};

struct Subscriber {
    path: String,
    last_sent: Option<Value>,
    sender: mpsc::UnboundedSender<Snapshot>,
}

struct Tree {
    root: Value,
    revision: u64,
    subscribers: Vec<Subscriber>,
}

impl Tree {
    fn read(&self, path: &str) -> Option<Value> {
        get_at(&self.root, path).cloned()
    }

    /// Applies one mutation and pushes it to every overlapping subscriber
    /// whose view actually changed.
    fn commit(&mut self, path: &str, value: Option<Value>, now: u64) -> u64 {
        let value = value.map(|mut v| {
            resolve_placeholders(&mut v, now);
            v
        });
        set_at(&mut self.root, path, value);
        self.revision += 1;

        let revision = self.revision;
        let root = &self.root;
        self.subscribers.retain_mut(|subscriber| {
            if !paths_overlap(&subscriber.path, path) {
                return !subscriber.sender.is_closed();
            }
            let current = get_at(root, &subscriber.path).cloned();
            if current == subscriber.last_sent {
                return !subscriber.sender.is_closed();
            }
            subscriber.last_sent = current.clone();
            subscriber
                .sender
                .send(Snapshot {
                    revision,
                    value: current,
                })
                .is_ok()
        });

        debug!("Committed revision {} at {}", revision, path);
        revision
    }
}

pub struct MemoryStore {
    tree: Mutex<Tree>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store whose server timestamps come from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tree: Mutex::new(Tree {
                root: Value::Object(Map::new()),
                revision: 0,
                subscribers: Vec::new(),
            }),
            clock,
        }
    }

    /// Number of mutations committed so far.
    pub async fn revision(&self) -> u64 {
        self.tree.lock().await.revision
    }

    pub async fn subscriber_count(&self) -> usize {
        let mut tree = self.tree.lock().await;
        tree.subscribers.retain(|s| !s.sender.is_closed());
        tree.subscribers.len()
    }

    pub async fn fetch_with_revision(&self, path: &str) -> (u64, Option<Value>) {
        let tree = self.tree.lock().await;
        (tree.revision, tree.read(path))
    }

    /// Writes and returns the new revision with the stored value.
    pub async fn write_with_revision(
        &self,
        path: &str,
        value: Option<Value>,
    ) -> (u64, Option<Value>) {
        let mut tree = self.tree.lock().await;
        let revision = tree.commit(path, value, self.clock.now_millis());
        (revision, tree.read(path))
    }

    /// Replaces the value at `path` only if it still equals `expected`.
    /// On mismatch the current value is returned as the error.
    pub async fn compare_and_set(
        &self,
        path: &str,
        expected: Option<Value>,
        value: Option<Value>,
    ) -> Result<(u64, Option<Value>), Option<Value>> {
        let mut tree = self.tree.lock().await;
        let current = tree.read(path);
        if current != expected.and_then(normalize) {
            return Err(current);
        }
        let revision = tree.commit(path, value, self.clock.now_millis());
        Ok((revision, tree.read(path)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    async fn fetch_once(&self, path: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.tree.lock().await.read(path))
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut tree = self.tree.lock().await;
        let current = tree.read(path);
        let _ = sender.send(Snapshot {
            revision: tree.revision,
            value: current.clone(),
        });
        tree.subscribers.push(Subscriber {
            path: path.to_string(),
            last_sent: current,
            sender,
        });
        Ok(Subscription::new(receiver))
    }

    async fn write(&self, path: &str, value: Option<Value>) -> Result<(), StoreError> {
        let mut tree = self.tree.lock().await;
        tree.commit(path, value, self.clock.now_millis());
        Ok(())
    }

    async fn transact<F>(&self, path: &str, mut update: F) -> Result<TransactionResult, StoreError>
    where
        F: FnMut(Option<&Value>) -> Transaction + Send,
    {
        let mut tree = self.tree.lock().await;
        let current = tree.read(path);
        match update(current.as_ref()) {
            Transaction::Commit(next) => {
                tree.commit(path, next, self.clock.now_millis());
                Ok(TransactionResult {
                    committed: true,
                    snapshot: tree.read(path),
                })
            }
            Transaction::Abort => Ok(TransactionResult {
                committed: false,
                snapshot: current,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::server_timestamp;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_then_fetch() {
        let store = MemoryStore::new();
        store
            .write("rooms/A/game/mover", Some(json!("black")))
            .await
            .unwrap();

        assert_eq!(
            store.fetch_once("rooms/A/game").await.unwrap(),
            Some(json!({"mover": "black"}))
        );
        assert_eq!(store.fetch_once("rooms/B").await.unwrap(), None);
        assert_eq!(store.revision().await, 1);
    }

    #[tokio::test]
    async fn test_server_timestamp_uses_store_clock() {
        let clock = Arc::new(ManualClock::new(7_000));
        let store = MemoryStore::with_clock(clock.clone());

        store
            .write("rooms/A", Some(json!({"createdAt": server_timestamp()})))
            .await
            .unwrap();

        assert_eq!(
            store.fetch_once("rooms/A/createdAt").await.unwrap(),
            Some(json!(7_000))
        );
    }

    #[tokio::test]
    async fn test_subscription_gets_initial_and_changes() {
        let store = MemoryStore::new();
        store.write("rooms/A/x", Some(json!(1))).await.unwrap();

        let mut sub = store.subscribe("rooms/A").await.unwrap();
        let first = sub.recv().await.unwrap();
        assert_eq!(first.value, Some(json!({"x": 1})));

        store.write("rooms/A/x", Some(json!(2))).await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(second.value, Some(json!({"x": 2})));
        assert!(second.revision > first.revision);

        // unrelated paths do not fire
        store.write("rooms/B/x", Some(json!(3))).await.unwrap();
        assert!(sub.try_recv().is_none());

        // deletion fires with an absent value
        store.write("rooms/A", None).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().value, None);
    }

    #[tokio::test]
    async fn test_subscription_waits_for_a_change() {
        let store = MemoryStore::new();
        let mut subscription = store.subscribe("rooms/A").await.unwrap();
        assert_eq!(subscription.recv().await.unwrap().value, None);

        let mut next = tokio_test::task::spawn(subscription.recv());
        tokio_test::assert_pending!(next.poll());

        store
            .write("rooms/A/createdAt", Some(json!(1)))
            .await
            .unwrap();
        assert!(next.is_woken());
        let snapshot = tokio_test::assert_ready!(next.poll()).unwrap();
        assert_eq!(snapshot.value, Some(json!({"createdAt": 1})));
    }

    #[tokio::test]
    async fn test_unchanged_value_does_not_fire() {
        let store = MemoryStore::new();
        store.write("a", Some(json!(1))).await.unwrap();
        let mut sub = store.subscribe("a").await.unwrap();
        sub.recv().await.unwrap();

        store.write("a", Some(json!(1))).await.unwrap();
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_forgotten() {
        let store = MemoryStore::new();
        let sub = store.subscribe("a").await.unwrap();
        assert_eq!(store.subscriber_count().await, 1);

        drop(sub);
        store.write("a", Some(json!(1))).await.unwrap();
        assert_eq!(store.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_transaction_commit_and_abort() {
        let store = MemoryStore::new();

        let result = store
            .transact("counter", |current| {
                let n = current.and_then(Value::as_u64).unwrap_or(0);
                Transaction::Commit(Some(json!(n + 1)))
            })
            .await
            .unwrap();
        assert!(result.committed);
        assert_eq!(result.snapshot, Some(json!(1)));

        let result = store
            .transact("counter", |_| Transaction::Abort)
            .await
            .unwrap();
        assert!(!result.committed);
        assert_eq!(result.snapshot, Some(json!(1)));
        assert_eq!(store.revision().await, 1);
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = MemoryStore::new();
        store.write("k", Some(json!("a"))).await.unwrap();

        let conflict = store
            .compare_and_set("k", Some(json!("stale")), Some(json!("b")))
            .await;
        assert_eq!(conflict, Err(Some(json!("a"))));

        let (revision, value) = store
            .compare_and_set("k", Some(json!("a")), Some(json!("b")))
            .await
            .unwrap();
        assert_eq!(revision, 2);
        assert_eq!(value, Some(json!("b")));

        // absent expected matches an absent key
        assert!(store
            .compare_and_set("fresh", None, Some(json!(1)))
            .await
            .is_ok());
    }
}
