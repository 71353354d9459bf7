use anyhow::Context;
use backhaul_lib::{
  reexports::{Bytes, HeaderMap, Method, StatusCode},
  ForwardRequest, HttpClient,
};
use clap::{error::ErrorKind, Parser, ValueEnum};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

const REGISTRATION_PATH: &str = "/proxy/register";
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RegistrationProtocol {
  /// register only with the HTTP/1.1 front door
  Http1,
  /// register only with the HTTP/2 front door
  Http2,
  /// register with both front doors
  Both,
}

#[derive(Debug, Parser)]
#[command(
  name = "backhaul-agent",
  about = "Expose a local backend through the backhaul fabric",
  disable_help_flag = false
)]
struct Opts {
  /// Local backend host
  #[arg(long, default_value = "localhost")]
  host: String,
  /// Proxy server host
  #[arg(long = "proxy", default_value = "localhost")]
  proxy: String,
  /// Proxy HTTP/2 front-door port
  #[arg(long = "proxy-port", default_value_t = 8080)]
  proxy_port: u16,
  /// Proxy HTTP/1.1 front-door port
  #[arg(long = "proxy-http1-port", default_value_t = 9080)]
  proxy_http1_port: u16,
  /// Path pattern to forward
  #[arg(long = "path", default_value = "/")]
  path_pattern: String,
  /// Registration protocol
  #[arg(long, value_enum, default_value_t = RegistrationProtocol::Both)]
  protocol: RegistrationProtocol,
  /// Local backend port
  local_port: u16,
}

/// Everything needed to hold one live registration against the fabric.
#[derive(Debug, Clone)]
struct TunnelConfig {
  tunnel_id: String,
  local_host: String,
  local_port: u16,
  proxy_host: String,
  proxy_port: u16,
  proxy_http1_port: u16,
  path_pattern: String,
  protocol: RegistrationProtocol,
}

impl From<Opts> for TunnelConfig {
  fn from(opts: Opts) -> Self {
    Self {
      tunnel_id: generate_tunnel_id(),
      local_host: opts.host,
      local_port: opts.local_port,
      proxy_host: opts.proxy,
      proxy_port: opts.proxy_port,
      proxy_http1_port: opts.proxy_http1_port,
      path_pattern: opts.path_pattern,
      protocol: opts.protocol,
    }
  }
}

fn generate_tunnel_id() -> String {
  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.subsec_nanos())
    .unwrap_or_default();
  format!("tunnel-{}", 1000 + nanos % 9000)
}

/// Keeps the registration alive for the lifetime of the process and cleans it
/// up on shutdown.
struct ForwardingAgent {
  config: TunnelConfig,
  http_client: HttpClient,
}

impl ForwardingAgent {
  fn new(config: TunnelConfig) -> Self {
    Self {
      config,
      http_client: HttpClient::new(REGISTRATION_TIMEOUT),
    }
  }

  async fn start_tunnel(&self) {
    let body = serde_json::json!({
      "backend_id": self.config.tunnel_id,
      "host": self.config.local_host,
      "port": self.config.local_port,
      "path_pattern": self.config.path_pattern,
    })
    .to_string();

    match self.config.protocol {
      RegistrationProtocol::Http1 => self.send_http1(Method::POST, &body, "registered").await,
      RegistrationProtocol::Http2 => self.send_http2(Method::POST, &body, "registered").await,
      RegistrationProtocol::Both => {
        self.send_http1(Method::POST, &body, "registered").await;
        self.send_http2(Method::POST, &body, "registered").await;
      }
    }

    println!("\n{}", "=".repeat(60));
    println!("Forwarding Agent Started");
    println!("{}", "=".repeat(60));
    self.display_status();
    println!("{}", "=".repeat(60));
    println!("\nPress Ctrl+C to stop forwarding...\n");
  }

  /// Clean shutdown: withdraw the registration from every door it was sent to.
  async fn stop_tunnel(&self) {
    debug!("Performing stop of tunnel {}", self.config.tunnel_id);
    let body = serde_json::json!({ "backend_id": self.config.tunnel_id }).to_string();

    match self.config.protocol {
      RegistrationProtocol::Http1 => self.send_http1(Method::DELETE, &body, "unregistered").await,
      RegistrationProtocol::Http2 => self.send_http2(Method::DELETE, &body, "unregistered").await,
      RegistrationProtocol::Both => {
        self.send_http1(Method::DELETE, &body, "unregistered").await;
        self.send_http2(Method::DELETE, &body, "unregistered").await;
      }
    }
    debug!("Tunnel stopped");
  }

  async fn send_http1(&self, method: Method, body: &str, action: &str) {
    let port = self.config.proxy_http1_port;
    let result = self
      .http_client
      .send_request(
        &self.config.proxy_host,
        port,
        &method,
        REGISTRATION_PATH,
        &HeaderMap::new(),
        Bytes::from(body.to_string()),
      )
      .await;

    match result {
      Ok(res) if res.status == StatusCode::OK => {
        println!("* Backend {action} on port {port} (HTTP/1.1)");
      }
      Ok(res) => {
        println!(
          "Registration operation failed on port {port} (HTTP {}): {}",
          res.status.as_u16(),
          String::from_utf8_lossy(&res.body)
        );
      }
      Err(e) => {
        println!("Registration operation failed on port {port}: {e}");
      }
    }
  }

  async fn send_http2(&self, method: Method, body: &str, action: &str) {
    let port = self.config.proxy_port;
    let result = h2_exchange(
      &self.config.proxy_host,
      port,
      method,
      REGISTRATION_PATH,
      Bytes::from(body.to_string()),
    )
    .await;

    match result {
      Ok((status, body)) if status == StatusCode::OK => {
        debug!("Registration response: {}", String::from_utf8_lossy(&body));
        println!("* Backend {action} on port {port} (HTTP/2)");
      }
      Ok((status, body)) => {
        println!(
          "Registration operation failed on port {port} (HTTP {}): {}",
          status.as_u16(),
          String::from_utf8_lossy(&body)
        );
      }
      Err(e) => {
        println!("Registration operation failed on port {port}: {e}");
      }
    }
  }

  fn display_status(&self) {
    println!("Tunnel ID:     {}", self.config.tunnel_id);
    println!("Local Backend: {}:{}", self.config.local_host, self.config.local_port);
    println!("Status:        Active");

    println!("\nPublic URLs:");
    let (h2, h1) = (
      format!(
        "  HTTP/2:      http://{}:{}{}",
        self.config.proxy_host, self.config.proxy_port, self.config.path_pattern
      ),
      format!(
        "  HTTP/1.1:    http://{}:{}{}",
        self.config.proxy_host, self.config.proxy_http1_port, self.config.path_pattern
      ),
    );
    match self.config.protocol {
      RegistrationProtocol::Http1 => println!("{h1}"),
      RegistrationProtocol::Http2 => println!("{h2}"),
      RegistrationProtocol::Both => {
        println!("{h2}");
        println!("{h1}");
      }
    }
  }
}

/// One cleartext prior-knowledge HTTP/2 exchange against the h2 front door.
async fn h2_exchange(host: &str, port: u16, method: Method, path: &str, body: Bytes) -> anyhow::Result<(StatusCode, Bytes)> {
  let stream = tokio::net::TcpStream::connect((host, port))
    .await
    .with_context(|| format!("Failed to connect to {host}:{port}"))?;
  let (client, connection) = h2::client::handshake(stream).await?;
  tokio::spawn(async move {
    connection.await.ok();
  });

  let mut client = client.ready().await?;
  let request = http::Request::builder()
    .method(method)
    .uri(format!("http://{host}:{port}{path}"))
    .body(())?;
  let end_of_stream = body.is_empty();
  let (response, mut send_stream) = client.send_request(request, end_of_stream)?;
  if !end_of_stream {
    send_stream.send_data(body, true)?;
  }

  let response = response.await?;
  let status = response.status();
  let mut body_stream = response.into_body();
  let mut collected = Vec::new();
  while let Some(chunk) = body_stream.data().await {
    let chunk = chunk?;
    let _ = body_stream.flow_control().release_capacity(chunk.len());
    collected.extend_from_slice(&chunk);
  }

  Ok((status, Bytes::from(collected)))
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
  tracing_subscriber::fmt().compact().init();

  let opts = match Opts::try_parse() {
    Ok(opts) => opts,
    Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
      print!("{e}");
      std::process::exit(0);
    }
    Err(e) => {
      eprintln!("{e}");
      std::process::exit(1);
    }
  };

  let agent = ForwardingAgent::new(TunnelConfig::from(opts));
  agent.start_tunnel().await;

  tokio::signal::ctrl_c().await.ok();
  info!("Shutting down tunnel...");
  agent.stop_tunnel().await;
}
