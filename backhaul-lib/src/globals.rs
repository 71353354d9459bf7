use crate::{constants::*, count::ConnectionCount, manifest::ActiveRequestManifest, registry::BackendRegistry};
use std::{
  net::{Ipv4Addr, SocketAddr},
  path::PathBuf,
  sync::Arc,
  time::Duration,
};

/// Global object shared among async tasks: proxy configuration plus the
/// process-wide registry, manifest and counters. Built once at startup and
/// passed by shared reference to every session and handler.
pub struct Globals {
  /// Configuration parameters for the front doors and forwarding
  pub proxy_config: ProxyConfig,
  /// Shared context - Backend registry consulted by every forwarder
  pub backend_registry: BackendRegistry,
  /// Shared context - Table of in-flight forwarded requests
  pub request_manifest: ActiveRequestManifest,
  /// Shared context - Counter for connections being served
  pub connection_count: ConnectionCount,
  /// Shared context - Async task runtime handler
  pub runtime_handle: tokio::runtime::Handle,
  /// Shared context - Notify object to stop async tasks
  pub term_notify: Option<Arc<tokio::sync::Notify>>,
}

/// Configuration parameters for the two front doors
#[derive(PartialEq, Eq, Clone)]
pub struct ProxyConfig {
  /// listen socket address of the HTTP/2 front door
  pub http2_addr: SocketAddr,
  /// listen socket address of the HTTP/1.1 front door
  pub http1_addr: SocketAddr,
  /// tcp listen backlog
  pub tcp_listen_backlog: u32,

  pub max_clients: usize,          // when serving connections
  pub max_concurrent_streams: u32, // initial SETTINGS of each h2 session

  pub upstream_timeout: Duration, // outbound backend exchange
  pub request_expiry: Duration,   // manifest sweep threshold
  pub sweep_interval: Duration,   // manifest sweep cadence

  /// TLS material for the HTTP/2 front door; None serves cleartext h2
  pub tls: Option<TlsFileConfig>,
}

/// PEM file locations for the TLS adapter
#[derive(PartialEq, Eq, Clone)]
pub struct TlsFileConfig {
  pub cert_path: PathBuf,
  pub key_path: PathBuf,
}

impl Default for ProxyConfig {
  fn default() -> Self {
    Self {
      http2_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_HTTP2_PORT)),
      http1_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_HTTP1_PORT)),
      tcp_listen_backlog: TCP_LISTEN_BACKLOG,

      max_clients: MAX_CLIENTS,
      max_concurrent_streams: MAX_CONCURRENT_STREAMS,

      upstream_timeout: Duration::from_secs(UPSTREAM_TIMEOUT_SEC),
      request_expiry: Duration::from_secs(REQUEST_EXPIRY_SEC),
      sweep_interval: Duration::from_secs(MANIFEST_SWEEP_INTERVAL_SEC),

      tls: None,
    }
  }
}
