use backhaul_lib::{
  entrypoint,
  reexports::{Bytes, HeaderMap, Method, StatusCode},
  BackendResponse, ForwardRequest, HttpClient, ProxyConfig,
};
use std::{net::SocketAddr, time::Duration};
use tokio::{
  io::{AsyncReadExt, AsyncWriteExt},
  net::TcpListener,
};

/// Spawn a whole fabric on the given localhost ports and give the acceptors a
/// moment to bind.
async fn start_fabric(h2_port: u16, h1_port: u16) {
  let config = ProxyConfig {
    http2_addr: SocketAddr::from(([127, 0, 0, 1], h2_port)),
    http1_addr: SocketAddr::from(([127, 0, 0, 1], h1_port)),
    ..Default::default()
  };
  let handle = tokio::runtime::Handle::current();
  tokio::spawn(async move {
    entrypoint(&config, &handle, None).await.ok();
  });
  tokio::time::sleep(Duration::from_millis(300)).await;
}

/// Minimal HTTP/1.1 backend: echoes the request body, or a fixed greeting for
/// body-less requests. One request per connection, as the fabric's outbound
/// client is one-shot.
async fn mock_echo_backend() -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();

  tokio::spawn(async move {
    loop {
      let Ok((mut stream, _)) = listener.accept().await else {
        break;
      };
      tokio::spawn(async move {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 4096];
        let header_end = loop {
          let Ok(n) = stream.read(&mut tmp).await else { return };
          if n == 0 {
            return;
          }
          buf.extend_from_slice(&tmp[..n]);
          if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
          }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
          .lines()
          .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
              value.trim().parse::<usize>().ok()
            } else {
              None
            }
          })
          .unwrap_or(0);

        while buf.len() < header_end + content_length {
          let Ok(n) = stream.read(&mut tmp).await else { return };
          if n == 0 {
            break;
          }
          buf.extend_from_slice(&tmp[..n]);
        }

        let body = &buf[header_end..];
        let payload: Vec<u8> = if body.is_empty() {
          b"hello from backend".to_vec()
        } else {
          body.to_vec()
        };
        let response = format!(
          "HTTP/1.1 200 OK\r\ncontent-type: application/octet-stream\r\ncontent-length: {}\r\n\r\n",
          payload.len()
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.write_all(&payload).await;
        let _ = stream.flush().await;
      });
    }
  });

  addr
}

async fn http1_request(port: u16, method: Method, path: &str, body: Bytes) -> BackendResponse {
  let client = HttpClient::new(Duration::from_secs(5));
  client
    .send_request("127.0.0.1", port, &method, path, &HeaderMap::new(), body)
    .await
    .unwrap()
}

/// One cleartext prior-knowledge HTTP/2 request on its own connection.
async fn http2_request(port: u16, method: Method, path: &str, body: Bytes) -> (StatusCode, Bytes) {
  let stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
  let (send_request, connection) = h2::client::handshake(stream).await.unwrap();
  tokio::spawn(async move {
    connection.await.ok();
  });

  let mut send_request = send_request.ready().await.unwrap();
  let request = http::Request::builder()
    .method(method)
    .uri(format!("http://127.0.0.1:{port}{path}"))
    .body(())
    .unwrap();
  let end_of_stream = body.is_empty();
  let (response, mut request_stream) = send_request.send_request(request, end_of_stream).unwrap();
  if !end_of_stream {
    request_stream.send_data(body, true).unwrap();
  }

  let response = response.await.unwrap();
  let status = response.status();
  let mut body_stream = response.into_body();
  let mut collected = Vec::new();
  while let Some(chunk) = body_stream.data().await {
    let chunk = chunk.unwrap();
    let _ = body_stream.flow_control().release_capacity(chunk.len());
    collected.extend_from_slice(&chunk);
  }
  (status, Bytes::from(collected))
}

fn registration_body(backend_id: &str, port: u16, pattern: &str) -> Bytes {
  Bytes::from(
    serde_json::json!({
      "backend_id": backend_id,
      "host": "127.0.0.1",
      "port": port,
      "path_pattern": pattern,
    })
    .to_string(),
  )
}

#[tokio::test(flavor = "multi_thread")]
async fn http1_front_door_registers_and_forwards() {
  start_fabric(18080, 19080).await;
  let backend = mock_echo_backend().await;

  let res = http1_request(
    19080,
    Method::POST,
    "/proxy/register",
    registration_body("t1", backend.port(), "/"),
  )
  .await;
  assert_eq!(res.status, StatusCode::OK);
  let body: serde_json::Value = serde_json::from_slice(&res.body).unwrap();
  assert_eq!(body["status"], "success");

  let res = http1_request(19080, Method::GET, "/hello", Bytes::new()).await;
  assert_eq!(res.status, StatusCode::OK);
  assert_eq!(res.body.as_ref(), b"hello from backend");
}

#[tokio::test(flavor = "multi_thread")]
async fn http2_front_door_registers_and_forwards() {
  start_fabric(18180, 19180).await;
  let backend = mock_echo_backend().await;

  let (status, body) = http2_request(
    18180,
    Method::POST,
    "/proxy/register",
    registration_body("t1", backend.port(), "/"),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
  assert_eq!(body["status"], "success");

  let (status, body) = http2_request(18180, Method::GET, "/hello", Bytes::new()).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body.as_ref(), b"hello from backend");
}

#[tokio::test(flavor = "multi_thread")]
async fn unmatched_prefix_yields_404() {
  start_fabric(18280, 19280).await;
  let backend = mock_echo_backend().await;

  let (status, _) = http2_request(
    18280,
    Method::POST,
    "/proxy/register",
    registration_body("api", backend.port(), "/api/"),
  )
  .await;
  assert_eq!(status, StatusCode::OK);

  let (status, body) = http2_request(18280, Method::GET, "/other", Bytes::new()).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
  assert!(body["error"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_backend_yields_502() {
  start_fabric(18380, 19380).await;

  let (status, _) = http2_request(
    18380,
    Method::POST,
    "/proxy/register",
    registration_body("down", 1, "/"),
  )
  .await;
  assert_eq!(status, StatusCode::OK);

  let (status, body) = http2_request(18380, Method::GET, "/anything", Bytes::new()).await;
  assert_eq!(status, StatusCode::BAD_GATEWAY);
  let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
  assert!(body["error"].is_string());

  let res = http1_request(19380, Method::GET, "/anything", Bytes::new()).await;
  assert_eq!(res.status, StatusCode::BAD_GATEWAY);
}

#[tokio::test(flavor = "multi_thread")]
async fn health_probe_answers_without_registrations() {
  start_fabric(18480, 19480).await;

  let (status, body) = http2_request(18480, Method::GET, "/health", Bytes::new()).await;
  assert_eq!(status, StatusCode::OK);
  let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
  assert_eq!(body["status"], "ok");
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_streams_keep_bodies_apart() {
  start_fabric(18580, 19580).await;
  let backend = mock_echo_backend().await;

  let (status, _) = http2_request(
    18580,
    Method::POST,
    "/proxy/register",
    registration_body("echo", backend.port(), "/"),
  )
  .await;
  assert_eq!(status, StatusCode::OK);

  // one connection, 50 multiplexed streams with distinct 1 KiB bodies
  let stream = tokio::net::TcpStream::connect(("127.0.0.1", 18580)).await.unwrap();
  let (send_request, connection) = h2::client::handshake(stream).await.unwrap();
  tokio::spawn(async move {
    connection.await.ok();
  });

  let mut handles = Vec::new();
  for i in 0..50u32 {
    let send_request = send_request.clone();
    handles.push(tokio::spawn(async move {
      let mut payload = format!("stream-{i}-").into_bytes();
      payload.resize(1024, b'x');
      let payload = Bytes::from(payload);

      let mut send_request = send_request.ready().await.unwrap();
      let request = http::Request::builder()
        .method(Method::POST)
        .uri(format!("http://127.0.0.1:18580/echo/{i}"))
        .body(())
        .unwrap();
      let (response, mut request_stream) = send_request.send_request(request, false).unwrap();
      request_stream.send_data(payload.clone(), true).unwrap();

      let response = response.await.unwrap();
      assert_eq!(response.status(), StatusCode::OK);
      let mut body_stream = response.into_body();
      let mut collected = Vec::new();
      while let Some(chunk) = body_stream.data().await {
        let chunk = chunk.unwrap();
        let _ = body_stream.flow_control().release_capacity(chunk.len());
        collected.extend_from_slice(&chunk);
      }
      assert_eq!(collected, payload.as_ref());
    }));
  }

  for handle in handles {
    handle.await.unwrap();
  }
}
