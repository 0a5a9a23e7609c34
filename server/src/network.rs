//! Store host network layer: serves one shared `MemoryStore` to replicas over UDP

use crate::client_manager::ClientManager;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{
    decode_value, encode_value, MemoryStore, Packet, Store, MAX_PACKET_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32 },
    Shutdown,
}

/// Messages queued for the socket writer
#[derive(Debug)]
pub enum OutgoingMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Store host: owns the tree every replica reads and writes
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    store: Arc<MemoryStore>,
    client_timeout: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    out_tx: mpsc::UnboundedSender<OutgoingMessage>,
    out_rx: mpsc::UnboundedReceiver<OutgoingMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        store: Arc<MemoryStore>,
        max_clients: usize,
        client_timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Store host listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients, client_timeout))),
            store,
            client_timeout,
            server_tx,
            server_rx,
            out_tx,
            out_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle for stopping `run` from elsewhere (send `ServerMessage::Shutdown`).
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    /// Spawns task that receives packets and forwards them to the main loop
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns the single socket writer; responses and pushes leave in queue order
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut out_rx = std::mem::replace(&mut self.out_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(OutgoingMessage::SendPacket { packet, addr }) = out_rx.recv().await {
                if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns task that drops replicas that stopped sending heartbeats
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let period = (self.client_timeout / 2).clamp(Duration::from_millis(10), Duration::from_secs(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.out_tx.send(OutgoingMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Processes one incoming packet
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        if let Packet::Connect { client_version } = packet {
            self.handle_connect(client_version, addr).await;
            return;
        }

        let client_id = {
            let mut clients = self.clients.write().await;
            clients.touch(addr)
        };
        let Some(client_id) = client_id else {
            debug!("Packet from unknown address {}", addr);
            self.send_packet(
                Packet::Disconnected {
                    reason: "Not connected".to_string(),
                },
                addr,
            );
            return;
        };

        match packet {
            Packet::Heartbeat => {}

            Packet::Disconnect => {
                let mut clients = self.clients.write().await;
                clients.remove_client(&client_id);
            }

            Packet::Subscribe {
                request_id,
                subscription_id,
                path,
            } => {
                self.handle_subscribe(client_id, addr, request_id, subscription_id, &path)
                    .await;
            }

            Packet::Unsubscribe { subscription_id } => {
                let mut clients = self.clients.write().await;
                if clients.remove_subscription(client_id, subscription_id) {
                    debug!("Client {} dropped subscription {}", client_id, subscription_id);
                }
            }

            request => match answer(&self.store, &request).await {
                Some(response) => self.send_packet(response, addr),
                None => warn!("Unexpected packet type from client at {}", addr),
            },
        }
    }

    async fn handle_connect(&mut self, client_version: u32, addr: SocketAddr) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            self.send_packet(
                Packet::Disconnected {
                    reason: format!(
                        "Unsupported protocol version {} (host speaks {})",
                        client_version, PROTOCOL_VERSION
                    ),
                },
                addr,
            );
            return;
        }

        let mut clients = self.clients.write().await;

        // Remove existing connection if present
        if let Some(existing_id) = clients.find_client_by_addr(addr) {
            info!("Removing existing client {} from {}", existing_id, addr);
            clients.remove_client(&existing_id);
        }

        let response = match clients.add_client(addr) {
            Some(client_id) => Packet::Connected { client_id },
            None => Packet::Disconnected {
                reason: "Server full".to_string(),
            },
        };
        drop(clients);
        self.send_packet(response, addr);
    }

    /// Acknowledges first, then forwards every snapshot as `Changed`. Both go
    /// through the same writer queue, so the ack always leads.
    async fn handle_subscribe(
        &self,
        client_id: u32,
        addr: SocketAddr,
        request_id: u32,
        subscription_id: u32,
        path: &str,
    ) {
        let mut subscription = match self.store.subscribe(path).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.send_packet(failed(request_id, e), addr);
                return;
            }
        };
        self.send_packet(Packet::Subscribed { request_id }, addr);

        let out_tx = self.out_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(snapshot) = subscription.recv().await {
                let value = match encode_value(snapshot.value.as_ref()) {
                    Ok(value) => value,
                    Err(e) => {
                        error!("Cannot encode push for {}: {}", subscription_id, e);
                        continue;
                    }
                };
                let packet = Packet::Changed {
                    subscription_id,
                    revision: snapshot.revision,
                    value,
                };
                if out_tx
                    .send(OutgoingMessage::SendPacket { packet, addr })
                    .is_err()
                {
                    break;
                }
            }
        });

        debug!(
            "Client {} subscribed {} to {}",
            client_id, subscription_id, path
        );
        let mut clients = self.clients.write().await;
        clients.add_subscription(client_id, subscription_id, task);
    }

    /// Main loop: dispatches packets until shut down
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Store host started successfully");

        loop {
            match self.server_rx.recv().await {
                Some(ServerMessage::PacketReceived { packet, addr }) => {
                    self.handle_packet(packet, addr).await;
                }
                Some(ServerMessage::ClientTimeout { client_id }) => {
                    info!("Client {} timed out", client_id);
                }
                Some(ServerMessage::Shutdown) | None => {
                    info!("Store host shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn send_packet_impl(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = serialize(packet)?;
    if data.len() > MAX_PACKET_SIZE {
        return Err(format!("packet of {} bytes exceeds {}", data.len(), MAX_PACKET_SIZE).into());
    }
    socket.send_to(&data, addr).await?;
    Ok(())
}

fn failed(request_id: u32, reason: impl std::fmt::Display) -> Packet {
    Packet::Failed {
        request_id,
        reason: reason.to_string(),
    }
}

/// Answers a one-shot store request (`Fetch`, `Write`, `CompareAndSet`).
/// Returns `None` for anything else.
pub async fn answer(store: &MemoryStore, request: &Packet) -> Option<Packet> {
    let response = match request {
        Packet::Fetch { request_id, path } => {
            let (revision, value) = store.fetch_with_revision(path).await;
            value_packet(*request_id, revision, value.as_ref())
        }

        Packet::Write {
            request_id,
            path,
            value,
        } => match decode_value(value.as_deref()) {
            Ok(value) => {
                let (revision, stored) = store.write_with_revision(path, value).await;
                value_packet(*request_id, revision, stored.as_ref())
            }
            Err(e) => failed(*request_id, e),
        },

        Packet::CompareAndSet {
            request_id,
            path,
            expected,
            value,
        } => {
            let decoded = decode_value(expected.as_deref())
                .and_then(|expected| Ok((expected, decode_value(value.as_deref())?)));
            let (expected, value) = match decoded {
                Ok(pair) => pair,
                Err(e) => return Some(failed(*request_id, e)),
            };
            match store.compare_and_set(path, expected, value).await {
                Ok((revision, stored)) => value_packet(*request_id, revision, stored.as_ref()),
                Err(current) => match encode_value(current.as_ref()) {
                    Ok(current) => Packet::Conflict {
                        request_id: *request_id,
                        current,
                    },
                    Err(e) => failed(*request_id, e),
                },
            }
        }

        _ => return None,
    };
    Some(response)
}

fn value_packet(request_id: u32, revision: u64, value: Option<&serde_json::Value>) -> Packet {
    match encode_value(value) {
        Ok(value) => Packet::Value {
            request_id,
            revision,
            value,
        },
        Err(e) => failed(request_id, e),
    }
}
