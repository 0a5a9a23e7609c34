//! `RemoteStore`: the [`Store`] capability spoken over UDP to a store host.
//!
//! One background task reads the socket and routes responses to the request
//! waiting on them (by `request_id`) and pushes to their subscription (by
//! `subscription_id`). A second task sends heartbeats so the host does not
//! time this replica out, a third turns dropped subscriptions into
//! `Unsubscribe` packets.

use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use serde_json::Value;
use shared::{
    decode_value, encode_value, Packet, Snapshot, Store, StoreError, Subscription, Transaction,
    TransactionResult, MAX_PACKET_SIZE, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

use crate::config::EngineConfig;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Routing {
    pending: HashMap<u32, oneshot::Sender<Packet>>,
    subscriptions: HashMap<u32, mpsc::UnboundedSender<Snapshot>>,
}

pub struct RemoteStore {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    client_id: u32,
    next_id: AtomicU32,
    routing: Arc<Mutex<Routing>>,
    cancel_tx: mpsc::UnboundedSender<u32>,
    request_timeout: Duration,
    max_attempts: u32,
    tasks: Vec<JoinHandle<()>>,
}

impl RemoteStore {
    /// Connects to the store host at `server_addr` and starts the background
    /// tasks.
    pub async fn connect(server_addr: &str, config: &EngineConfig) -> Result<Self, StoreError> {
        let server_addr: SocketAddr = server_addr
            .parse()
            .map_err(|e| StoreError::Unavailable(format!("bad server address: {e}")))?;
        let bind_addr = if server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr).await.map_err(unavailable)?;

        info!("Connecting to store host at {}...", server_addr);
        send_packet(
            &socket,
            server_addr,
            &Packet::Connect {
                client_version: PROTOCOL_VERSION,
            },
        )
        .await?;
        let client_id = timeout(config.request_timeout, await_connected(&socket))
            .await
            .map_err(|_| StoreError::Timeout)??;
        info!("Connected! Client ID: {}", client_id);

        let socket = Arc::new(socket);
        let routing = Arc::new(Mutex::new(Routing::default()));
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();

        let tasks = vec![
            tokio::spawn(receive_loop(socket.clone(), routing.clone())),
            tokio::spawn(heartbeat_loop(socket.clone(), server_addr)),
            tokio::spawn(cancel_loop(
                socket.clone(),
                server_addr,
                routing.clone(),
                cancel_rx,
            )),
        ];

        Ok(Self {
            socket,
            server_addr,
            client_id,
            next_id: AtomicU32::new(1),
            routing,
            cancel_tx,
            request_timeout: config.request_timeout,
            max_attempts: config.max_transaction_attempts.max(1),
            tasks,
        })
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    /// Tells the host we are leaving. Subscriptions end with it; seats do not.
    pub async fn disconnect(&self) -> Result<(), StoreError> {
        send_packet(&self.socket, self.server_addr, &Packet::Disconnect).await
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends the request built for a fresh id and waits for its response.
    async fn request(&self, build: impl FnOnce(u32) -> Packet) -> Result<Packet, StoreError> {
        let request_id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.routing.lock().await.pending.insert(request_id, tx);

        let packet = build(request_id);
        if let Err(e) = send_packet(&self.socket, self.server_addr, &packet).await {
            self.routing.lock().await.pending.remove(&request_id);
            return Err(e);
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(Packet::Failed { reason, .. })) => Err(StoreError::Unavailable(reason)),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(StoreError::Unavailable("connection closed".to_string())),
            Err(_) => {
                self.routing.lock().await.pending.remove(&request_id);
                warn!("Request {} timed out", request_id);
                Err(StoreError::Timeout)
            }
        }
    }

    async fn compare_and_set(
        &self,
        path: &str,
        expected: Option<&Value>,
        next: Option<&Value>,
    ) -> Result<Result<Option<Value>, Option<Value>>, StoreError> {
        let expected = encode_value(expected)?;
        let value = encode_value(next)?;
        let response = self
            .request(|request_id| Packet::CompareAndSet {
                request_id,
                path: path.to_string(),
                expected,
                value,
            })
            .await?;

        match response {
            Packet::Value { value, .. } => Ok(Ok(decode_value(value.as_deref())?)),
            Packet::Conflict { current, .. } => Ok(Err(decode_value(current.as_deref())?)),
            other => Err(unexpected(&other)),
        }
    }
}

impl Store for RemoteStore {
    async fn fetch_once(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let response = self
            .request(|request_id| Packet::Fetch {
                request_id,
                path: path.to_string(),
            })
            .await?;
        match response {
            Packet::Value { value, .. } => decode_value(value.as_deref()),
            other => Err(unexpected(&other)),
        }
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        let subscription_id = self.next_id();
        let (tx, rx) = mpsc::unbounded_channel();
        // registered first so the initial push cannot race the ack
        self.routing
            .lock()
            .await
            .subscriptions
            .insert(subscription_id, tx);

        let response = self
            .request(|request_id| Packet::Subscribe {
                request_id,
                subscription_id,
                path: path.to_string(),
            })
            .await;
        match response {
            Ok(Packet::Subscribed { .. }) => {
                debug!("Subscribed {} to {}", subscription_id, path);
                Ok(Subscription::with_cancel(
                    rx,
                    subscription_id,
                    self.cancel_tx.clone(),
                ))
            }
            other => {
                self.routing
                    .lock()
                    .await
                    .subscriptions
                    .remove(&subscription_id);
                Err(match other {
                    Ok(packet) => unexpected(&packet),
                    Err(e) => e,
                })
            }
        }
    }

    async fn write(&self, path: &str, value: Option<Value>) -> Result<(), StoreError> {
        let value = encode_value(value.as_ref())?;
        let response = self
            .request(|request_id| Packet::Write {
                request_id,
                path: path.to_string(),
                value,
            })
            .await?;
        match response {
            Packet::Value { .. } => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Optimistic loop: read, let `update` decide, compare-and-set against
    /// what was read. A conflict hands back the value that won, and `update`
    /// runs again on it.
    async fn transact<F>(&self, path: &str, mut update: F) -> Result<TransactionResult, StoreError>
    where
        F: FnMut(Option<&Value>) -> Transaction + Send,
    {
        let mut current = self.fetch_once(path).await?;

        for attempt in 1..=self.max_attempts {
            let next = match update(current.as_ref()) {
                Transaction::Abort => {
                    return Ok(TransactionResult {
                        committed: false,
                        snapshot: current,
                    })
                }
                Transaction::Commit(next) => next,
            };

            match self
                .compare_and_set(path, current.as_ref(), next.as_ref())
                .await?
            {
                Ok(stored) => {
                    return Ok(TransactionResult {
                        committed: true,
                        snapshot: stored,
                    })
                }
                Err(winner) => {
                    debug!("Transaction on {} lost attempt {}, retrying", path, attempt);
                    current = winner;
                }
            }
        }

        warn!(
            "Transaction on {} gave up after {} attempts",
            path, self.max_attempts
        );
        Err(StoreError::TransactionContention {
            attempts: self.max_attempts,
        })
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        if let Ok(data) = serialize(&Packet::Disconnect) {
            let _ = self.socket.try_send_to(&data, self.server_addr);
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn send_packet(
    socket: &UdpSocket,
    addr: SocketAddr,
    packet: &Packet,
) -> Result<(), StoreError> {
    let data = serialize(packet).map_err(|e| StoreError::Encoding(e.to_string()))?;
    if data.len() > MAX_PACKET_SIZE {
        return Err(StoreError::Encoding(format!(
            "packet of {} bytes exceeds {}",
            data.len(),
            MAX_PACKET_SIZE
        )));
    }
    socket.send_to(&data, addr).await.map_err(unavailable)?;
    Ok(())
}

async fn await_connected(socket: &UdpSocket) -> Result<u32, StoreError> {
    let mut buffer = vec![0u8; MAX_PACKET_SIZE];
    loop {
        let (len, _) = socket.recv_from(&mut buffer).await.map_err(unavailable)?;
        match deserialize::<Packet>(&buffer[..len]) {
            Ok(Packet::Connected { client_id }) => return Ok(client_id),
            Ok(Packet::Disconnected { reason }) => return Err(StoreError::Unavailable(reason)),
            Ok(other) => debug!("Ignoring {:?} before handshake", other),
            Err(e) => warn!("Failed to deserialize packet: {}", e),
        }
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, routing: Arc<Mutex<Routing>>) {
    let mut buffer = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let len = match socket.recv_from(&mut buffer).await {
            Ok((len, _)) => len,
            Err(e) => {
                error!("Error receiving packet: {}", e);
                continue;
            }
        };
        let packet = match deserialize::<Packet>(&buffer[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Failed to deserialize packet: {}", e);
                continue;
            }
        };

        if let Some(request_id) = packet.response_to() {
            let waiter = routing.lock().await.pending.remove(&request_id);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(packet);
                }
                None => debug!("Late response for request {}", request_id),
            }
            continue;
        }

        match packet {
            Packet::Changed {
                subscription_id,
                revision,
                value,
            } => {
                let value = match decode_value(value.as_deref()) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Dropping undecodable push: {}", e);
                        continue;
                    }
                };
                let mut routing = routing.lock().await;
                let delivered = routing
                    .subscriptions
                    .get(&subscription_id)
                    .is_some_and(|tx| tx.send(Snapshot { revision, value }).is_ok());
                if !delivered {
                    routing.subscriptions.remove(&subscription_id);
                }
            }
            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                // waiters see a closed channel, subscribers see the end
                let mut routing = routing.lock().await;
                routing.pending.clear();
                routing.subscriptions.clear();
            }
            other => warn!("Unexpected packet type: {:?}", other),
        }
    }
}

async fn heartbeat_loop(socket: Arc<UdpSocket>, server_addr: SocketAddr) {
    let mut ticker = interval(HEARTBEAT_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = send_packet(&socket, server_addr, &Packet::Heartbeat).await {
            error!("Error sending heartbeat: {}", e);
        }
    }
}

async fn cancel_loop(
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    routing: Arc<Mutex<Routing>>,
    mut cancel_rx: mpsc::UnboundedReceiver<u32>,
) {
    while let Some(subscription_id) = cancel_rx.recv().await {
        routing.lock().await.subscriptions.remove(&subscription_id);
        let packet = Packet::Unsubscribe { subscription_id };
        if let Err(e) = send_packet(&socket, server_addr, &packet).await {
            error!("Error sending unsubscribe: {}", e);
        }
    }
}

fn unavailable(e: std::io::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn unexpected(packet: &Packet) -> StoreError {
    StoreError::Unavailable(format!("unexpected response {:?}", packet))
}
