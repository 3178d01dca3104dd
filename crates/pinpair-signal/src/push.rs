//! WebSocket push binding
//!
//! Every connection task forwards its frames to one [`PushHub`] task over an
//! mpsc channel. The hub owns the room table and handles one event at a
//! time to completion, so the table needs no lock. Delivery is a direct send
//! into the target connection's outbound channel; nothing is buffered for
//! absent peers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use pinpair_core::{Clock, Policy, RoomCode, SecretId, SignalError};

use crate::controller::{Departure, RoomController};
use crate::delivery::{ConnId, PushHandle};
use crate::messages::{ClientFrame, ServerFrame};
use crate::reaper::Reaped;
use crate::room::{MessageKind, Payload, Role, RoomTable};

/// Events consumed by the hub, in arrival order
#[derive(Debug)]
pub enum HubEvent {
    Connected {
        conn: ConnId,
        tx: UnboundedSender<ServerFrame>,
    },
    Frame {
        conn: ConnId,
        text: String,
    },
    Closed {
        conn: ConnId,
    },
    Sweep,
}

/// Counters readable outside the hub task
#[derive(Debug, Default)]
pub struct HubStats {
    rooms: AtomicUsize,
    connections: AtomicUsize,
}

impl HubStats {
    pub fn rooms(&self) -> usize {
        self.rooms.load(Ordering::Relaxed)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// The room a connection is paired into
#[derive(Debug)]
struct Binding {
    code: RoomCode,
    secret_id: SecretId,
    role: Role,
}

struct Connection {
    tx: UnboundedSender<ServerFrame>,
    binding: Option<Binding>,
}

/// Single-owner state for the push binding
pub struct PushHub {
    rooms: RoomTable<PushHandle>,
    connections: HashMap<ConnId, Connection>,
    policy: Policy,
    clock: Arc<dyn Clock>,
    stats: Arc<HubStats>,
}

impl PushHub {
    pub fn new(policy: Policy, clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: RoomTable::new(),
            connections: HashMap::new(),
            policy: policy.without_peer_expiry(),
            clock,
            stats: Arc::new(HubStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<HubStats> {
        self.stats.clone()
    }

    /// Process events until every sender is gone
    pub async fn run(mut self, mut events: UnboundedReceiver<HubEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        debug!("Hub stopped");
    }

    /// Handle one event to completion
    pub fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Connected { conn, tx } => {
                self.connections.insert(conn, Connection { tx, binding: None });
            }
            HubEvent::Frame { conn, text } => {
                if let Err(e) = self.on_frame(conn, &text) {
                    debug!("{} rejected: {}", conn, e);
                    self.send(conn, ServerFrame::error(&e));
                }
            }
            HubEvent::Closed { conn } => self.disconnect(conn),
            HubEvent::Sweep => self.sweep(),
        }

        self.stats.rooms.store(self.rooms.len(), Ordering::Relaxed);
        self.stats
            .connections
            .store(self.connections.len(), Ordering::Relaxed);
    }

    fn controller(&mut self) -> RoomController<'_, PushHandle> {
        let now = self.clock.now();
        RoomController::new(&mut self.rooms, &self.policy, now)
    }

    fn on_frame(&mut self, conn: ConnId, text: &str) -> Result<(), SignalError> {
        let frame = ClientFrame::from_json(text)?;
        // WebSocket clients may pad the pin; the polling endpoint is strict
        let pin = frame.pin().trim().to_string();

        match frame.frame_type.as_str() {
            "create-room" => self.create_room(conn),
            "join-room" => self.join_room(conn, &pin),
            "offer" | "answer" | "ice-candidate" => {
                let kind = MessageKind::parse_signal(&frame.frame_type)?;
                self.relay(conn, kind, &pin, frame.payload)
            }
            _ => Err(SignalError::invalid_request("Unsupported message type.")),
        }
    }

    /// Outbound handle for a connection that is not yet paired
    fn unpaired_handle(&self, conn: ConnId) -> Result<PushHandle, SignalError> {
        let connection = self
            .connections
            .get(&conn)
            .ok_or(SignalError::PeerUnavailable)?;
        if connection.binding.is_some() {
            return Err(SignalError::AlreadyPaired);
        }
        Ok(PushHandle::new(conn, connection.tx.clone()))
    }

    fn create_room(&mut self, conn: ConnId) -> Result<(), SignalError> {
        let handle = self.unpaired_handle(conn)?;
        let created = self.controller().create_room(handle)?;

        self.bind(conn, created.code.clone(), created.secret_id, Role::Initiator);
        self.send(conn, ServerFrame::RoomCreated { pin: created.code });
        Ok(())
    }

    fn join_room(&mut self, conn: ConnId, pin: &str) -> Result<(), SignalError> {
        let handle = self.unpaired_handle(conn)?;
        let code = RoomCode::parse(pin)?;
        let secret_id = self.controller().join_room(&code, handle)?;

        self.bind(conn, code.clone(), secret_id, Role::Joiner);
        self.send(conn, ServerFrame::JoinSuccess { pin: code });
        Ok(())
    }

    fn relay(
        &mut self,
        conn: ConnId,
        kind: MessageKind,
        pin: &str,
        payload: Payload,
    ) -> Result<(), SignalError> {
        let code = RoomCode::parse(pin)?;
        let binding = self
            .connections
            .get(&conn)
            .and_then(|c| c.binding.as_ref())
            .ok_or(SignalError::NotPaired)?;
        if binding.code != code {
            return Err(SignalError::CodeMismatch);
        }

        let secret_id = binding.secret_id.clone();
        self.controller().send_signal(&code, &secret_id, kind, payload)
    }

    /// Connection closed: leave its room and forget it
    fn disconnect(&mut self, conn: ConnId) {
        let Some(connection) = self.connections.remove(&conn) else {
            return;
        };
        let Some(binding) = connection.binding else {
            debug!("{} closed unpaired", conn);
            return;
        };

        debug!("{} closed as {:?} of room {}", conn, binding.role, binding.code);
        let departure = self.controller().leave(&binding.code, &binding.secret_id);
        if let Departure::RoomClosed {
            joiner: Some(joiner),
            ..
        } = departure
        {
            // The joiner already got peer-disconnected; it may pair again
            self.unbind(joiner.channel.conn);
        }
    }

    fn sweep(&mut self) {
        let reaped = self.controller().sweep();
        for reaped in reaped {
            match reaped {
                Reaped::RoomExpired { code, room, .. } => {
                    let orphans = std::iter::once(room.initiator).chain(room.joiner);
                    for peer in orphans {
                        let conn = peer.channel.conn;
                        self.unbind(conn);
                        let notice = ServerFrame::error(&SignalError::RoomExpired);
                        if let Err(e) = peer.channel.send(notice) {
                            debug!("{} gone before expiry notice for {}: {}", conn, code, e);
                        }
                    }
                }
                Reaped::JoinerExpired { joiner, .. } => self.unbind(joiner.channel.conn),
            }
        }
    }

    fn bind(&mut self, conn: ConnId, code: RoomCode, secret_id: SecretId, role: Role) {
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.binding = Some(Binding {
                code,
                secret_id,
                role,
            });
        }
    }

    fn unbind(&mut self, conn: ConnId) {
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.binding = None;
        }
    }

    fn send(&self, conn: ConnId, frame: ServerFrame) {
        if let Some(connection) = self.connections.get(&conn) {
            if connection.tx.send(frame).is_err() {
                warn!("Dropped frame for closed {}", conn);
            }
        }
    }
}

/// WebSocket push server
pub struct PushServer {
    events: UnboundedSender<HubEvent>,
    stats: Arc<HubStats>,
    next_conn: AtomicU64,
}

impl PushServer {
    /// Spawn the hub task and return a server feeding it
    pub fn spawn(hub: PushHub, sweep_every: Option<Duration>) -> Self {
        let stats = hub.stats();
        let (events, rx) = mpsc::unbounded_channel();
        tokio::spawn(hub.run(rx));

        if let Some(every) = sweep_every {
            let events = events.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(every);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    if events.send(HubEvent::Sweep).is_err() {
                        break;
                    }
                }
            });
        }

        Self {
            events,
            stats,
            next_conn: AtomicU64::new(1),
        }
    }

    pub fn stats(&self) -> Arc<HubStats> {
        self.stats.clone()
    }

    /// Start the push server
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        info!("Push endpoint listening on {}", addr);

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let conn = ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed));
            let events = self.events.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, conn, events, stats).await {
                    debug!("Connection error from {}: {:?}", peer_addr, e);
                }
            });
        }
    }
}

/// Handle a single connection (health probe or WebSocket)
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    conn: ConnId,
    events: UnboundedSender<HubEvent>,
    stats: Arc<HubStats>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // WebSocket upgrades are GET requests too, so match on the path
    let mut peek_buf = [0u8; 12];
    let n = stream.peek(&mut peek_buf).await?;
    let head = &peek_buf[..n];
    if head.starts_with(b"GET /health") || head.starts_with(b"GET /stats") {
        return handle_http_request(&mut stream, &stats).await;
    }

    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    debug!("New connection from {} as {}", peer_addr, conn);
    events.send(HubEvent::Connected { conn, tx })?;

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match frame.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to encode frame: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if events.send(HubEvent::Frame { conn, text }).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket error: {:?}", e);
                break;
            }
        }
    }

    // Cleanup on disconnect
    let _ = events.send(HubEvent::Closed { conn });
    writer.abort();

    debug!("Connection closed: {}", conn);
    Ok(())
}

/// Handle an HTTP request (for health checks)
async fn handle_http_request(
    stream: &mut TcpStream,
    stats: &HubStats,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Read the HTTP request
    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    // Parse the request path
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let (status, body) = match path {
        "/health" => (
            "200 OK",
            serde_json::json!({
                "status": "healthy",
                "rooms": stats.rooms(),
                "connections": stats.connections(),
            })
            .to_string(),
        ),
        "/stats" => (
            "200 OK",
            serde_json::json!({
                "rooms": stats.rooms(),
                "connections": stats.connections(),
            })
            .to_string(),
        ),
        _ => ("404 Not Found", r#"{"error":"not found"}"#.to_string()),
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    Ok(())
}
