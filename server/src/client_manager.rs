//! Replica connection management for the store host
//!
//! This module tracks every replica talking to the host:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - The push subscriptions each replica holds, so they die with it
//! - Capacity limits and address lookup for response routing
//!
//! Timing a replica out only ends its connection and subscriptions. Nothing
//! in the store changes; a replica that comes back still owns its seat.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// A connected replica and the forwarding tasks of its subscriptions
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the host
    pub id: u32,
    /// Network address for sending responses and pushes
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Subscription id to the task forwarding its pushes
    subscriptions: HashMap<u32, JoinHandle<()>>,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            subscriptions: HashMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing arrived from this client within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        for (_, task) in self.subscriptions.drain() {
            task.abort();
        }
    }
}

/// Manages all connected replicas
///
/// Enforces the connection limit and owns the subscription tasks, so removing
/// a client (explicitly or by timeout) also stops every push to it.
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<u32, Client>,
    /// Next available client ID for new connections
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
    /// Silence after which a client is dropped
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns Some(client_id) if successful, None if the host is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    /// Removes a client and stops its subscriptions. Returns false if it was
    /// already gone.
    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!(
                "Client {} disconnected ({} subscriptions closed)",
                client.id,
                client.subscription_count()
            );
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Marks traffic from `addr`. Returns the client id, or None for an
    /// address that never connected.
    pub fn touch(&mut self, addr: SocketAddr) -> Option<u32> {
        let client_id = self.find_client_by_addr(addr)?;
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.touch();
        }
        Some(client_id)
    }

    /// Registers the forwarding task of a new subscription. A task replacing
    /// an existing id aborts the old one; a task for an unknown client is
    /// aborted straight away.
    pub fn add_subscription(&mut self, client_id: u32, subscription_id: u32, task: JoinHandle<()>) {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                if let Some(old) = client.subscriptions.insert(subscription_id, task) {
                    old.abort();
                }
            }
            None => task.abort(),
        }
    }

    pub fn remove_subscription(&mut self, client_id: u32, subscription_id: u32) -> bool {
        let task = self
            .clients
            .get_mut(&client_id)
            .and_then(|client| client.subscriptions.remove(&subscription_id));
        match task {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Removes every client silent for longer than the timeout and returns
    /// their ids.
    pub fn check_timeouts(&mut self) -> Vec<u32> {
        let timeout = self.timeout;
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    pub fn get_client(&self, client_id: u32) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
