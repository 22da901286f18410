// Session broker: rooms, relay, credentials, and the HTTP/WebSocket front.

pub mod api;
pub mod auth;
pub mod broker;
pub mod channel;
pub mod config;
pub mod error;
pub mod peer;
pub mod relay;
pub mod rooms;

pub use broker::Broker;
pub use config::ServerConfig;
pub use error::BrokerError;
