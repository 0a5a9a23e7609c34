//! The replicated key-tree capability the session engine runs on.
//!
//! A store holds one JSON tree addressed by `/`-separated paths. Writing
//! `null` (or `None`) deletes a key and prunes parents left empty; a missing
//! key reads as absent. Every committed mutation bumps a store-wide revision
//! which subscriptions carry so replicas can discard stale pushes.
//!
//! Engine components never touch a global handle: a `Store` implementation is
//! constructed by whoever composes the engine and passed in explicitly.

use serde_json::{Map, Value};
use std::future::Future;
use tokio::sync::mpsc;

use crate::error::StoreError;

const SERVER_VALUE_KEY: &str = ".sv";
const SERVER_TIMESTAMP: &str = "timestamp";

/// One pushed state of a subscribed path.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub revision: u64,
    pub value: Option<Value>,
}

/// What a transaction update function decided after seeing the current value.
#[derive(Debug, Clone, PartialEq)]
pub enum Transaction {
    /// Replace the value at the path (`None` deletes it).
    Commit(Option<Value>),
    /// Leave the store untouched.
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResult {
    pub committed: bool,
    /// Value at the path after the transaction settled.
    pub snapshot: Option<Value>,
}

pub trait Store: Send + Sync + 'static {
    /// Reads the value at `path` once.
    fn fetch_once(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;

    /// Starts a push subscription. The current value is delivered first, then
    /// one snapshot per committed change at or below `path`. Dropping the
    /// returned handle unsubscribes.
    fn subscribe(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Subscription, StoreError>> + Send;

    /// Unconditionally replaces the value at `path`.
    fn write(
        &self,
        path: &str,
        value: Option<Value>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomic read-modify-write of the value at `path`. `update` may run more
    /// than once and must not have side effects beyond its return value and
    /// captured scratch state.
    fn transact<F>(
        &self,
        path: &str,
        update: F,
    ) -> impl Future<Output = Result<TransactionResult, StoreError>> + Send
    where
        F: FnMut(Option<&Value>) -> Transaction + Send;
}

/// Receiving end of a store subscription.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Snapshot>,
    cancel: Option<(u32, mpsc::UnboundedSender<u32>)>,
}

impl Subscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<Snapshot>) -> Self {
        Self {
            receiver,
            cancel: None,
        }
    }

    /// A subscription that reports its id on `cancel` when dropped.
    pub fn with_cancel(
        receiver: mpsc::UnboundedReceiver<Snapshot>,
        id: u32,
        cancel: mpsc::UnboundedSender<u32>,
    ) -> Self {
        Self {
            receiver,
            cancel: Some((id, cancel)),
        }
    }

    /// Next pushed snapshot; `None` once the store side has gone away.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Snapshot> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some((id, cancel)) = self.cancel.take() {
            let _ = cancel.send(id);
        }
    }
}

/// Placeholder the store replaces with its own clock at commit time.
pub fn server_timestamp() -> Value {
    let mut map = Map::new();
    map.insert(
        SERVER_VALUE_KEY.to_string(),
        Value::String(SERVER_TIMESTAMP.to_string()),
    );
    Value::Object(map)
}

pub fn join_path(segments: &[&str]) -> String {
    segments
        .iter()
        .flat_map(|segment| segment.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// True when one path is an ancestor of (or equal to) the other.
pub fn paths_overlap(a: &str, b: &str) -> bool {
    let a = split_path(a);
    let b = split_path(b);
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

pub fn get_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for segment in split_path(path) {
        node = node.as_object()?.get(segment)?;
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

/// Drops `null` members and empty objects; `None` when nothing is left.
pub fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, child)| normalize(child).map(|child| (key, child)))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(Value::Object(cleaned))
            }
        }
        other => Some(other),
    }
}

/// Writes `value` at `path` inside `root`, pruning parents left empty.
pub fn set_at(root: &mut Value, path: &str, value: Option<Value>) {
    let segments = split_path(path);
    let value = value.and_then(normalize);
    if segments.is_empty() {
        *root = value.unwrap_or_else(|| Value::Object(Map::new()));
        return;
    }
    set_segments(root, &segments, value);
}

fn set_segments(node: &mut Value, segments: &[&str], value: Option<Value>) {
    let (head, rest) = match segments.split_first() {
        Some(split) => split,
        None => return,
    };

    if !node.is_object() {
        if value.is_none() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let map = match node.as_object_mut() {
        Some(map) => map,
        None => return,
    };

    if rest.is_empty() {
        match value {
            Some(value) => {
                map.insert((*head).to_string(), value);
            }
            None => {
                map.remove(*head);
            }
        }
        return;
    }

    if value.is_none() && !map.contains_key(*head) {
        return;
    }
    let child = map
        .entry((*head).to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    set_segments(child, rest, value);

    if child.as_object().is_some_and(|m| m.is_empty()) {
        map.remove(*head);
    }
}

/// Replaces every server-timestamp placeholder inside `value` with `now`.
pub fn resolve_placeholders(value: &mut Value, now: u64) {
    if is_server_timestamp(value) {
        *value = Value::from(now);
        return;
    }
    match value {
        Value::Object(map) => map
            .values_mut()
            .for_each(|child| resolve_placeholders(child, now)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|child| resolve_placeholders(child, now)),
        _ => {}
    }
}

fn is_server_timestamp(value: &Value) -> bool {
    value.as_object().is_some_and(|map| {
        map.len() == 1
            && map.get(SERVER_VALUE_KEY).and_then(Value::as_str) == Some(SERVER_TIMESTAMP)
    })
}
