/// Wire protocol version stamped on every envelope
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Length of broker-generated identifiers (room ids, correlation ids, confirm tokens)
pub const SECURE_ID_LEN: usize = 24;

/// Maximum envelope size in bytes (256 KiB)
pub const MAX_FRAME_SIZE: usize = 262_144;

/// Seconds before an unanswered relayed request times out
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Seconds before an unconfirmed deferred login is evicted
pub const AUTH_TIMEOUT_SECS: u64 = 300;

/// Default HTTP/WebSocket port
pub const DEFAULT_PORT: u16 = 8100;

/// Default listen hostname
pub const DEFAULT_HOSTNAME: &str = "localhost";

/// Name of the header carrying user and room tokens
pub const JWT_HEADER: &str = "x-jwt";
