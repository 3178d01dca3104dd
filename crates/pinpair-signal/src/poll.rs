//! HTTP polling binding (store-and-forward)
//!
//! A single `POST /api` endpoint. Each request takes exclusive access to the
//! room table, sweeps stale rooms, runs exactly one controller operation,
//! and persists the table before answering.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use pinpair_core::{Clock, ErrorKind, Policy, RoomCode, SecretId, SignalError};

use crate::controller::RoomController;
use crate::delivery::Mailbox;
use crate::messages::{ApiAction, ApiData, ApiRequest, ApiResponse};
use crate::room::{MessageKind, Payload};
use crate::storage::RoomStore;

const NO_STORE: &str = "no-store, no-cache, must-revalidate, max-age=0";

/// A validated polling call
#[derive(Clone, Debug)]
pub enum Call {
    CreateRoom,
    JoinRoom {
        code: RoomCode,
    },
    SendSignal {
        code: RoomCode,
        secret_id: SecretId,
        kind: MessageKind,
        payload: Payload,
    },
    Poll {
        code: RoomCode,
        secret_id: SecretId,
    },
    Leave {
        code: RoomCode,
        secret_id: SecretId,
    },
}

impl Call {
    /// Validate formats in request order: code, secret id, kind
    pub fn from_request(request: ApiRequest) -> Result<Self, SignalError> {
        let call = match ApiAction::parse(&request.action)? {
            ApiAction::CreateRoom => Call::CreateRoom,
            ApiAction::JoinRoom => Call::JoinRoom {
                code: request.code()?,
            },
            ApiAction::SendSignal => Call::SendSignal {
                code: request.code()?,
                secret_id: request.secret_id()?,
                kind: request.signal_kind()?,
                payload: request.payload,
            },
            ApiAction::Poll => Call::Poll {
                code: request.code()?,
                secret_id: request.secret_id()?,
            },
            ApiAction::Leave => Call::Leave {
                code: request.code()?,
                secret_id: request.secret_id()?,
            },
        };
        Ok(call)
    }

    fn apply(self, rooms: &mut RoomController<'_, Mailbox>) -> Result<ApiData, SignalError> {
        let capacity = rooms.policy.max_queue_len;
        match self {
            Call::CreateRoom => {
                let created = rooms.create_room(Mailbox::new(capacity))?;
                Ok(ApiData::Credentials {
                    code: created.code,
                    secret_id: created.secret_id,
                })
            }
            Call::JoinRoom { code } => {
                let secret_id = rooms.join_room(&code, Mailbox::new(capacity))?;
                Ok(ApiData::Credentials { code, secret_id })
            }
            Call::SendSignal {
                code,
                secret_id,
                kind,
                payload,
            } => {
                rooms.send_signal(&code, &secret_id, kind, payload)?;
                Ok(ApiData::Empty {})
            }
            Call::Poll { code, secret_id } => {
                let messages = rooms.drain(&code, &secret_id)?;
                Ok(ApiData::Messages { messages })
            }
            Call::Leave { code, secret_id } => {
                rooms.leave(&code, &secret_id);
                Ok(ApiData::Empty {})
            }
        }
    }
}

/// Request handler shared by every HTTP worker
pub struct PollBroker<S> {
    store: S,
    policy: Policy,
    clock: Arc<dyn Clock>,
}

impl<S: RoomStore> PollBroker<S> {
    pub fn new(store: S, policy: Policy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    /// Sweep, then run one call, inside a single storage transaction
    pub fn handle(&self, call: Call) -> Result<ApiData, SignalError> {
        let now = self.clock.now();
        self.store.transact(|table| {
            let mut rooms = RoomController::new(table, &self.policy, now);
            rooms.sweep();
            call.apply(&mut rooms)
        })?
    }

    /// Sweep without serving a request; returns the number of reaped entries
    pub fn sweep(&self) -> Result<usize, SignalError> {
        let now = self.clock.now();
        let reaped = self
            .store
            .transact(|table| RoomController::new(table, &self.policy, now).sweep().len())?;
        Ok(reaped)
    }

    pub fn room_count(&self) -> Result<usize, SignalError> {
        Ok(self.store.transact(|table| table.len())?)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Auth => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::PeerUnavailable => StatusCode::CONFLICT,
        ErrorKind::Capacity => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Storage | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn envelope(status: StatusCode, body: ApiResponse) -> Response {
    (status, [(header::CACHE_CONTROL, NO_STORE)], Json(body)).into_response()
}

fn failure(err: &SignalError) -> Response {
    if err.is_server_fault() {
        error!("Request failed: {}", err);
    } else {
        debug!("Request rejected: {}", err);
    }
    envelope(status_for(err.kind()), ApiResponse::failure(err))
}

async fn api<S: RoomStore + 'static>(State(broker): State<Arc<PollBroker<S>>>, body: Bytes) -> Response {
    let call = match ApiRequest::from_slice(&body).and_then(Call::from_request) {
        Ok(call) => call,
        Err(e) => return failure(&e),
    };

    match tokio::task::spawn_blocking(move || broker.handle(call)).await {
        Ok(Ok(data)) => envelope(StatusCode::OK, ApiResponse::success(data)),
        Ok(Err(e)) => failure(&e),
        Err(e) => failure(&SignalError::Storage(format!("request worker failed: {}", e))),
    }
}

async fn method_not_allowed() -> Response {
    envelope(
        StatusCode::METHOD_NOT_ALLOWED,
        ApiResponse::failure(&SignalError::invalid_request("Only POST is allowed.")),
    )
}

async fn health<S: RoomStore + 'static>(State(broker): State<Arc<PollBroker<S>>>) -> Response {
    match tokio::task::spawn_blocking(move || broker.room_count()).await {
        Ok(Ok(rooms)) => Json(json!({ "status": "healthy", "rooms": rooms })).into_response(),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy" })),
        )
            .into_response(),
    }
}

async fn stats<S: RoomStore + 'static>(State(broker): State<Arc<PollBroker<S>>>) -> Response {
    let policy = broker.policy;
    match tokio::task::spawn_blocking(move || broker.room_count()).await {
        Ok(Ok(rooms)) => Json(json!({
            "rooms": rooms,
            "maxQueueLen": policy.max_queue_len,
            "roomIdleSecs": policy.room_idle_secs,
            "peerStaleSecs": policy.peer_stale_secs,
        }))
        .into_response(),
        Ok(Err(e)) => failure(&e),
        Err(e) => failure(&SignalError::Storage(e.to_string())),
    }
}

/// Build the HTTP router for a broker
pub fn router<S: RoomStore + 'static>(broker: Arc<PollBroker<S>>) -> Router {
    Router::new()
        .route("/api", post(api::<S>).fallback(method_not_allowed))
        .route("/health", get(health::<S>))
        .route("/stats", get(stats::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(broker)
}

/// Periodically sweep rooms independent of request traffic
pub fn spawn_sweeper<S: RoomStore + 'static>(
    broker: Arc<PollBroker<S>>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        // First tick completes immediately
        tick.tick().await;
        loop {
            tick.tick().await;
            let broker = broker.clone();
            match tokio::task::spawn_blocking(move || broker.sweep()).await {
                Ok(Ok(0)) => {}
                Ok(Ok(n)) => info!("Background sweep reaped {} entries", n),
                Ok(Err(e)) => error!("Background sweep failed: {}", e),
                Err(e) => error!("Background sweep panicked: {}", e),
            }
        }
    })
}

/// HTTP polling server
pub struct PollServer<S> {
    broker: Arc<PollBroker<S>>,
    sweep_every: Option<Duration>,
}

impl<S: RoomStore + 'static> PollServer<S> {
    pub fn new(broker: PollBroker<S>, sweep_every: Option<Duration>) -> Self {
        Self {
            broker: Arc::new(broker),
            sweep_every,
        }
    }

    pub fn broker(&self) -> Arc<PollBroker<S>> {
        self.broker.clone()
    }

    /// Start the polling server
    pub async fn serve(self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        info!("Polling endpoint listening on {}", addr);

        let sweeper = self
            .sweep_every
            .map(|every| spawn_sweeper(self.broker.clone(), every));

        let result = axum::serve(listener, router(self.broker)).await;

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        result
    }
}
