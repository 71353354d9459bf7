use crate::constants::*;
use anyhow::{ensure, Context};
use backhaul_lib::{ProxyConfig, TlsFileConfig};
use std::net::{Ipv4Addr, SocketAddr};

/// Build the proxy configuration from the process environment:
/// `PORT` (HTTP/2 door), `HTTP1_PORT`, `THREADS`, `USE_SSL` ("1" enables TLS),
/// `CERT_FILE`, `KEY_FILE`. Absent variables fall back to the defaults.
pub fn build_settings() -> Result<(ProxyConfig, usize), anyhow::Error> {
  let http2_port: u16 = env_or("PORT", DEFAULT_HTTP2_PORT)?;
  let http1_port: u16 = env_or("HTTP1_PORT", DEFAULT_HTTP1_PORT)?;
  let threads: usize = env_or("THREADS", DEFAULT_THREADS)?;

  ensure!(http2_port != http1_port, "PORT and HTTP1_PORT must differ");
  ensure!(threads >= 1, "THREADS must be at least 1");

  let use_ssl = std::env::var("USE_SSL").map(|v| v == "1").unwrap_or(false);
  let tls = use_ssl.then(|| TlsFileConfig {
    cert_path: std::env::var("CERT_FILE")
      .unwrap_or_else(|_| DEFAULT_TLS_CERT_PATH.to_string())
      .into(),
    key_path: std::env::var("KEY_FILE")
      .unwrap_or_else(|_| DEFAULT_TLS_KEY_PATH.to_string())
      .into(),
  });

  let proxy_config = ProxyConfig {
    http2_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, http2_port)),
    http1_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, http1_port)),
    tls,
    ..Default::default()
  };

  Ok((proxy_config, threads))
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, anyhow::Error>
where
  T::Err: std::error::Error + Send + Sync + 'static,
{
  match std::env::var(name) {
    Ok(v) => v.parse::<T>().with_context(|| format!("Invalid value for {name}: {v}")),
    Err(_) => Ok(default),
  }
}
