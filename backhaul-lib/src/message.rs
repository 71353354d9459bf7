use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// One logical request assembled by a front-door session, ready for routing.
/// Sessions fill this from very different wire shapes (h2 frames, hyper parts),
/// so only the pieces the router and forwarder need are carried.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
  pub method: Method,
  pub path: String,
  pub headers: HeaderMap,
  pub body: Bytes,
}

impl ProxyRequest {
  pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap, body: Bytes) -> Self {
    Self {
      method,
      path: path.into(),
      headers,
      body,
    }
  }
}

/// Response emitted back on the originating stream or connection.
#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: StatusCode,
  pub body: Bytes,
  pub content_type: HeaderValue,
  /// End-to-end headers relayed from a backend, empty for synthetic responses.
  pub headers: HeaderMap,
}

impl HttpResponse {
  /// Synthetic response with a JSON body.
  pub fn json(status: StatusCode, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      body: body.into(),
      content_type: HeaderValue::from_static(CONTENT_TYPE_JSON),
      headers: HeaderMap::new(),
    }
  }

  /// Synthetic response without a body, e.g. 204.
  pub fn empty(status: StatusCode) -> Self {
    Self {
      status,
      body: Bytes::new(),
      content_type: HeaderValue::from_static(CONTENT_TYPE_JSON),
      headers: HeaderMap::new(),
    }
  }

  /// `{"error": "..."}` with the given status.
  pub fn error_json(status: StatusCode, message: &str) -> Self {
    let body = serde_json::json!({ "error": message }).to_string();
    Self::json(status, body)
  }

  /// Relay of a backend response, keeping its status, headers and body.
  pub fn from_backend(res: BackendResponse) -> Self {
    let content_type = res
      .headers
      .get(http::header::CONTENT_TYPE)
      .cloned()
      .unwrap_or_else(|| HeaderValue::from_static(CONTENT_TYPE_JSON));
    Self {
      status: res.status,
      body: res.body,
      content_type,
      headers: res.headers,
    }
  }
}

/// Complete response read from a backend by the outbound client.
#[derive(Debug, Clone)]
pub struct BackendResponse {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Bytes,
}
