pub const RESPONSE_HEADER_SERVER: &str = "backhaul";
pub const OUTBOUND_USER_AGENT: &str = "Proxy/1.0";

pub const DEFAULT_HTTP2_PORT: u16 = 8080;
pub const DEFAULT_HTTP1_PORT: u16 = 9080;

pub const TCP_LISTEN_BACKLOG: u32 = 1024;
pub const TLS_HANDSHAKE_TIMEOUT_SEC: u64 = 15; // default as with firefox browser
pub const MAX_CLIENTS: usize = 512;
pub const MAX_CONCURRENT_STREAMS: u32 = 100;

/// Read buffer kept per front-door session.
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

pub const UPSTREAM_TIMEOUT_SEC: u64 = 30;
pub const REQUEST_EXPIRY_SEC: u64 = 30;
pub const MANIFEST_SWEEP_INTERVAL_SEC: u64 = 5;

/// Registration endpoint served by both front doors.
pub const REGISTRATION_PATH: &str = "/proxy/register";
