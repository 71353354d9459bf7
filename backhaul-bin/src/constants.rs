pub const DEFAULT_HTTP2_PORT: u16 = 8080;
pub const DEFAULT_HTTP1_PORT: u16 = 9080;
pub const DEFAULT_THREADS: usize = 4;
pub const DEFAULT_TLS_CERT_PATH: &str = "certs/server.crt";
pub const DEFAULT_TLS_KEY_PATH: &str = "certs/server.key";
