use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use atelier_shared::types::RoomId;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid or badly signed token")]
    AuthInvalid,

    #[error("login was not confirmed in time")]
    AuthTimeout,

    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("room already has a host: {0}")]
    RoomActive(RoomId),

    #[error("join request rejected by host")]
    JoinRejected,

    #[error("host did not answer the join request in time")]
    JoinTimeout,

    #[error("request timed out")]
    RequestTimeout,

    /// Error message relayed back from the answering peer
    #[error("{0}")]
    Remote(String),

    #[error("peer does not belong to a room")]
    NoRoom,

    #[error("malformed envelope: {0}")]
    SchemaInvalid(String),

    #[error("channel is closed")]
    ChannelClosed,
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = match self {
            BrokerError::AuthInvalid => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}
