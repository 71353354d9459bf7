use crate::{
  constants::OUTBOUND_USER_AGENT,
  error::{BackhaulError, BackhaulResult},
  log::*,
  message::{BackendResponse, CONTENT_TYPE_JSON},
};
use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use std::{net::SocketAddr, time::Duration};
use tokio::net::{lookup_host, TcpStream};

#[async_trait]
/// Seam for the one-shot outbound exchange against a registered backend.
pub trait ForwardRequest {
  async fn send_request(
    &self,
    host: &str,
    port: u16,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body: Bytes,
  ) -> BackhaulResult<BackendResponse>;
}

/// Outbound HTTP/1.1 client: resolve, connect, write one request, read one
/// complete response. The connection is single-use and dropped after the
/// exchange; nothing is retried.
#[derive(Debug, Clone)]
pub struct HttpClient {
  timeout: Duration,
}

impl HttpClient {
  pub fn new(timeout: Duration) -> Self {
    Self { timeout }
  }

  async fn resolve(&self, host: &str, port: u16) -> BackhaulResult<SocketAddr> {
    lookup_host((host, port))
      .await
      .ok()
      .and_then(|mut addrs| addrs.next())
      .ok_or_else(|| BackhaulError::FailedToResolveHost(format!("{host}:{port}")))
  }

  async fn exchange(
    &self,
    addr: SocketAddr,
    host: &str,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body: Bytes,
  ) -> BackhaulResult<BackendResponse> {
    let stream = TcpStream::connect(addr)
      .await
      .map_err(|e| BackhaulError::FailedToConnectBackend(e.to_string()))?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
      .await
      .map_err(|e| BackhaulError::FailedToExchangeWithBackend(e.to_string()))?;
    tokio::spawn(async move {
      if let Err(e) = conn.await {
        debug!("Outbound connection closed: {}", e);
      }
    });

    let req = build_outbound_request(host, method, path, headers, body)?;
    let res = sender
      .send_request(req)
      .await
      .map_err(|e| BackhaulError::FailedToExchangeWithBackend(e.to_string()))?;

    let (parts, body) = res.into_parts();
    let body = body
      .collect()
      .await
      .map_err(|e| BackhaulError::FailedToExchangeWithBackend(e.to_string()))?
      .to_bytes();

    Ok(BackendResponse {
      status: parts.status,
      headers: parts.headers,
      body,
    })
  }
}

#[async_trait]
impl ForwardRequest for HttpClient {
  async fn send_request(
    &self,
    host: &str,
    port: u16,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body: Bytes,
  ) -> BackhaulResult<BackendResponse> {
    let addr = self.resolve(host, port).await?;
    debug!("Forwarding {} {} to {}", method, path, addr);

    tokio::time::timeout(self.timeout, self.exchange(addr, host, method, path, headers, body))
      .await
      .map_err(|_| BackhaulError::BackendTimeout)?
  }
}

/// Build the request written to the backend: `Host` is the registered host,
/// `User-Agent` identifies the fabric, end-to-end headers of the inbound
/// request are relayed, and a non-empty body defaults its content type to
/// JSON when the caller supplied none. Content-Length is derived from the
/// buffered body.
fn build_outbound_request(
  host: &str,
  method: &Method,
  path: &str,
  headers: &HeaderMap,
  body: Bytes,
) -> BackhaulResult<Request<Full<Bytes>>> {
  let mut builder = Request::builder()
    .method(method.clone())
    .uri(path)
    .header(header::HOST, host)
    .header(header::USER_AGENT, OUTBOUND_USER_AGENT);

  for (name, value) in end_to_end_headers(headers).iter() {
    builder = builder.header(name, value);
  }

  if !body.is_empty() && !headers.contains_key(header::CONTENT_TYPE) {
    builder = builder.header(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
  }

  Ok(builder.body(Full::new(body))?)
}

/// Hop-by-hop headers plus the fields the client regenerates itself.
const STRIPPED_HEADERS: &[header::HeaderName] = &[
  header::CONNECTION,
  header::PROXY_AUTHENTICATE,
  header::PROXY_AUTHORIZATION,
  header::TE,
  header::TRAILER,
  header::TRANSFER_ENCODING,
  header::UPGRADE,
  header::HOST,
  header::CONTENT_LENGTH,
  header::USER_AGENT,
];

fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
  let mut out = HeaderMap::new();
  for (name, value) in headers.iter() {
    if STRIPPED_HEADERS.contains(name) {
      continue;
    }
    out.append(name.clone(), value.clone());
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  /// Accepts one connection, captures the request head and body, replies with
  /// a canned response.
  async fn one_shot_server(response: &'static str) -> (SocketAddr, tokio::sync::oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
      let (mut stream, _) = listener.accept().await.unwrap();
      let mut buf = vec![0u8; 4096];
      let mut received = Vec::new();
      loop {
        let n = stream.read(&mut buf).await.unwrap();
        received.extend_from_slice(&buf[..n]);
        if n == 0 || received.windows(4).any(|w| w == b"\r\n\r\n") {
          break;
        }
      }
      stream.write_all(response.as_bytes()).await.unwrap();
      stream.flush().await.unwrap();
      tx.send(String::from_utf8_lossy(&received).to_string()).ok();
    });

    (addr, rx)
  }

  #[tokio::test]
  async fn exchanges_one_request_and_parses_response() {
    let (addr, rx) = one_shot_server("HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 5\r\n\r\nhello").await;

    let client = HttpClient::new(Duration::from_secs(5));
    let res = client
      .send_request(
        "127.0.0.1",
        addr.port(),
        &Method::GET,
        "/hello",
        &HeaderMap::new(),
        Bytes::new(),
      )
      .await
      .unwrap();

    assert_eq!(res.status, http::StatusCode::OK);
    assert_eq!(res.body.as_ref(), b"hello");
    assert_eq!(res.headers.get(header::CONTENT_TYPE).unwrap(), "text/plain");

    let wire = rx.await.unwrap();
    assert!(wire.starts_with("GET /hello HTTP/1.1\r\n"));
    assert!(wire.contains("host: 127.0.0.1"));
    assert!(wire.contains("user-agent: Proxy/1.0"));
  }

  #[tokio::test]
  async fn connect_failure_is_reported() {
    // port 1 is never listening locally
    let client = HttpClient::new(Duration::from_secs(2));
    let res = client
      .send_request("127.0.0.1", 1, &Method::GET, "/", &HeaderMap::new(), Bytes::new())
      .await;
    assert!(matches!(
      res,
      Err(BackhaulError::FailedToConnectBackend(_)) | Err(BackhaulError::BackendTimeout)
    ));
  }

  #[test]
  fn hop_by_hop_and_regenerated_headers_are_stripped() {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::HOST, HeaderValue::from_static("original.example"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
    headers.insert("x-custom", HeaderValue::from_static("kept"));

    let out = end_to_end_headers(&headers);
    assert_eq!(out.len(), 1);
    assert_eq!(out.get("x-custom").unwrap(), "kept");
  }
}
