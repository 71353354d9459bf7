use thiserror::Error;

pub type BackhaulResult<T> = std::result::Result<T, BackhaulError>;

/// Describes things that can go wrong in the backhaul fabric
#[derive(Debug, Error)]
pub enum BackhaulError {
  // general errors
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  // TLS errors
  #[error("Failed to build TLS server crypto: {0}")]
  FailedToBuildServerCrypto(String),
  #[error("Failed to complete TLS handshake: {0}")]
  FailedToTlsHandshake(String),
  #[error("Client did not negotiate ALPN h2")]
  NoAlpnH2,

  // HTTP/2 session errors
  #[error("HTTP/2 session error: {0}")]
  H2Error(#[from] h2::Error),

  // outbound client errors
  #[error("Failed to resolve host {0}")]
  FailedToResolveHost(String),
  #[error("Failed to connect to backend: {0}")]
  FailedToConnectBackend(String),
  #[error("Failed to exchange with backend: {0}")]
  FailedToExchangeWithBackend(String),
  #[error("Backend did not respond within the timeout")]
  BackendTimeout,

  // HTTP/1.1 session errors
  #[error("hyper connection error: {0}")]
  HyperConnectionError(String),
  #[error("hyper body manipulation error: {0}")]
  HyperBodyManipulationError(String),
  #[error("Invalid HTTP message: {0}")]
  InvalidHttpMessage(#[from] http::Error),

  // builder errors
  #[error("Failed to build proxy: {0}")]
  FailedToBuildProxy(#[from] crate::proxy::ProxyBuilderError),

  // Others
  #[error("Infallible")]
  Infallible(#[from] std::convert::Infallible),
}
