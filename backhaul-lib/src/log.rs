use std::net::SocketAddr;
pub use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
/// Access log line for one request served by a front door
pub struct ProxyLog {
  pub client_addr: String,
  pub method: String,
  pub path: String,
  pub upstream: String,
  pub status: String,
}

impl ProxyLog {
  pub fn new(method: &http::Method, path: &str) -> Self {
    Self {
      client_addr: "".to_string(),
      method: method.to_string(),
      path: path.to_string(),
      upstream: "".to_string(),
      status: "".to_string(),
    }
  }

  pub fn client_addr(&mut self, client_addr: &SocketAddr) -> &mut Self {
    self.client_addr = client_addr.to_string();
    self
  }
  pub fn upstream(&mut self, host: &str, port: u16) -> &mut Self {
    self.upstream = format!("{host}:{port}");
    self
  }
  pub fn status_code(&mut self, status_code: &http::StatusCode) -> &mut Self {
    self.status = status_code.as_u16().to_string();
    self
  }

  pub fn output(&self) {
    info!(
      "{} -- {} {} -- {} \"{}\"",
      self.client_addr, self.method, self.path, self.status, self.upstream
    );
  }
}
