//! HTTP endpoints and the WebSocket accept path.
//!
//! Login endpoints are open; everything else wants a user token in the
//! `x-jwt` header. The same header carries the room claim on the
//! WebSocket handshake.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use atelier_shared::constants::{JWT_HEADER, MAX_FRAME_SIZE};
use atelier_shared::protocol::Envelope;
use atelier_shared::types::{RoomClaim, RoomId, User};

use crate::auth::secure_id;
use crate::broker::Broker;
use crate::channel::Channel;
use crate::error::BrokerError;
use crate::peer::Peer;

pub fn build_router(broker: Arc<Broker>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/login/url", post(login_url))
        .route("/api/login/confirm/{token}", post(login_confirm))
        .route("/api/login/simple", post(login_simple))
        .route("/api/login/validate", post(login_validate))
        .route("/api/session/create", post(session_create))
        .route("/api/session/join/{room}", post(session_join))
        .route("/ws", get(connect))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(broker)
}

fn jwt_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(JWT_HEADER).and_then(|v| v.to_str().ok())
}

fn require_user(broker: &Broker, headers: &HeaderMap) -> Result<User, BrokerError> {
    let jwt = jwt_header(headers).ok_or(BrokerError::AuthInvalid)?;
    broker.credentials.get_user(jwt)
}

// ─── Login ───

#[derive(Serialize)]
struct LoginUrlResponse {
    url: String,
    token: String,
}

async fn login_url(State(broker): State<Arc<Broker>>) -> Json<LoginUrlResponse> {
    let token = secure_id();
    Json(LoginUrlResponse {
        url: broker.login_url(&token),
        token,
    })
}

#[derive(Serialize)]
struct LoginConfirmResponse {
    user: User,
    token: String,
}

/// Long-polls until the login keyed by `token` is confirmed out-of-band.
async fn login_confirm(
    State(broker): State<Arc<Broker>>,
    Path(token): Path<String>,
) -> Result<Json<LoginConfirmResponse>, BrokerError> {
    let jwt = broker.credentials.confirm_auth(&token).await?;
    let user = broker.credentials.get_user(&jwt)?;
    Ok(Json(LoginConfirmResponse { user, token: jwt }))
}

#[derive(Deserialize)]
struct SimpleLoginRequest {
    token: String,
    user: String,
    #[serde(default)]
    email: Option<String>,
}

/// Dev-mode login: confirm a pending entry with a caller-supplied identity.
async fn login_simple(
    State(broker): State<Arc<Broker>>,
    Json(req): Json<SimpleLoginRequest>,
) -> Result<&'static str, BrokerError> {
    broker
        .credentials
        .confirm_user(&req.token, req.user, req.email)?;
    Ok("Ok")
}

async fn login_validate(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
) -> &'static str {
    match jwt_header(&headers) {
        Some(jwt) if broker.credentials.get_user(jwt).is_ok() => "true",
        _ => "false",
    }
}

// ─── Sessions ───

#[derive(Serialize)]
struct CreateSessionResponse {
    room: RoomId,
    token: String,
}

async fn session_create(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
) -> Result<Json<CreateSessionResponse>, BrokerError> {
    let user = require_user(&broker, &headers)?;
    let prepared = broker.prepare_room(&user)?;
    Ok(Json(CreateSessionResponse {
        room: prepared.id,
        token: prepared.jwt,
    }))
}

#[derive(Serialize)]
struct JoinSessionResponse {
    token: String,
}

/// Blocks on the host's `peer/join` verdict before signing a guest claim.
async fn session_join(
    State(broker): State<Arc<Broker>>,
    Path(room): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JoinSessionResponse>, BrokerError> {
    let user = require_user(&broker, &headers)?;
    let room_id = RoomId(room);
    let room = broker
        .rooms
        .room_by_id(&room_id)
        .await
        .ok_or(BrokerError::RoomNotFound(room_id))?;
    let token = broker.request_join(&room, &user).await?;
    Ok(Json(JoinSessionResponse { token }))
}

// ─── Transport ───

async fn connect(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let claim = jwt_header(&headers)
        .ok_or(BrokerError::AuthInvalid)
        .and_then(|jwt| broker.credentials.verify_jwt::<RoomClaim>(jwt));

    ws.on_upgrade(move |socket| handle_socket(broker, socket, claim))
        .into_response()
}

/// One Error envelope, then goodbye.
async fn reject_socket(socket: &mut WebSocket, message: &str) {
    if let Ok(text) = serde_json::to_string(&Envelope::error(message)) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn handle_socket(
    broker: Arc<Broker>,
    mut socket: WebSocket,
    claim: Result<RoomClaim, BrokerError>,
) {
    let claim = match claim {
        Ok(claim) => claim,
        Err(e) => {
            debug!(error = %e, "rejecting transport handshake");
            reject_socket(&mut socket, &e.to_string()).await;
            return;
        }
    };

    let (channel, outbound_rx) = Channel::new();
    let peer = Arc::new(Peer::new(claim.user, channel.clone()));

    if let Err(e) = broker
        .join(Arc::clone(&peer), claim.room.clone(), claim.host)
        .await
    {
        reject_socket(&mut socket, &e.to_string()).await;
        return;
    }

    info!(peer = %peer.id, room = %claim.room, host = claim.host, "transport connected");
    pump(broker, peer, channel, outbound_rx, socket).await;
}

/// Drive one connection: drain the channel's outbound queue onto the
/// socket and feed decoded inbound frames to the broker, until either
/// side closes.
async fn pump(
    broker: Arc<Broker>,
    peer: Arc<Peer>,
    channel: Channel,
    mut outbound_rx: UnboundedReceiver<Envelope>,
    mut socket: WebSocket,
) {
    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(envelope) => {
                    if send_envelope(&mut socket, &envelope).await.is_err() {
                        break;
                    }
                }
                None => break,
            },

            _ = channel.closed() => {
                // Best-effort flush of already-queued envelopes (the
                // room-close broadcast is enqueued just before close)
                while let Ok(envelope) = outbound_rx.try_recv() {
                    if send_envelope(&mut socket, &envelope).await.is_err() {
                        break;
                    }
                }
                break;
            }

            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(raw))) => {
                    handle_frame(&broker, &peer, raw.as_bytes()).await;
                }
                Some(Ok(Message::Binary(raw))) => {
                    handle_frame(&broker, &peer, &raw).await;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(peer = %peer.id, error = %e, "transport error");
                    break;
                }
            },
        }
    }

    channel.close();
    let _ = socket.send(Message::Close(None)).await;
    info!(peer = %peer.id, "transport disconnected");
}

async fn send_envelope(socket: &mut WebSocket, envelope: &Envelope) -> Result<(), axum::Error> {
    let text = serde_json::to_string(envelope).expect("envelope serialization");
    socket.send(Message::Text(text.into())).await
}

/// Decode one frame; schema failures earn an Error envelope and cost the
/// peer its connection.
async fn handle_frame(broker: &Arc<Broker>, peer: &Arc<Peer>, bytes: &[u8]) {
    if bytes.len() > MAX_FRAME_SIZE {
        let _ = peer.send(Envelope::error(format!(
            "frame too large: {} bytes",
            bytes.len()
        )));
        peer.channel.close();
        return;
    }

    match Envelope::decode(bytes) {
        Ok(envelope) => broker.handle_envelope(peer, envelope).await,
        Err(e) => {
            let _ = peer.send(Envelope::error(
                BrokerError::SchemaInvalid(e.to_string()).to_string(),
            ));
            peer.channel.close();
        }
    }
}
