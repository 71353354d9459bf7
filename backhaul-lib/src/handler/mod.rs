mod registration;
mod router;

use crate::{
  constants::REGISTRATION_PATH,
  forwarder::{ForwardRequest, HttpClient},
  globals::Globals,
  log::*,
  manifest::{ActiveRequest, RequestState},
  message::{HttpResponse, ProxyRequest},
};
use http::{Method, StatusCode};
use router::Router;
use std::sync::Arc;

/// Resolves each assembled request to a local route or a registered backend.
/// One instance per process, shared by every front-door session.
pub struct ProxyRequestHandler {
  globals: Arc<Globals>,
  router: Router,
  forwarder: HttpClient,
}

impl ProxyRequestHandler {
  pub fn new(globals: Arc<Globals>) -> Self {
    let mut router = Router::default();
    router.register_route(Method::GET, "/test", |_, _| {
      debug!("Processing GET /test service");
      Ok(HttpResponse::empty(StatusCode::NO_CONTENT))
    });
    router.register_route(Method::POST, REGISTRATION_PATH, |req, globals| {
      Ok(registration::handle_registration_request(req, globals))
    });
    router.register_route(Method::DELETE, REGISTRATION_PATH, |req, globals| {
      Ok(registration::handle_registration_request(req, globals))
    });

    let forwarder = HttpClient::new(globals.proxy_config.upstream_timeout);
    Self {
      globals,
      router,
      forwarder,
    }
  }

  /// Serve one request: exact routes first, then the registration-path
  /// method guard, then prefix-based forwarding.
  pub async fn handle_request(&self, req: ProxyRequest, active: &ActiveRequest) -> HttpResponse {
    debug!("Processing {} {}", req.method, req.path);

    if let Some(route) = self.router.find(&req.method, &req.path) {
      return match route(&req, &self.globals) {
        Ok(res) => res,
        Err(e) => {
          error!("Handler for {} {} failed: {}", req.method, req.path, e);
          HttpResponse::error_json(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
      };
    }

    // Exact path, unsupported method. The route table only holds POST/DELETE.
    if req.path == REGISTRATION_PATH {
      return HttpResponse::error_json(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }

    self.forward_request(req, active).await
  }

  /// Forward an unrouted request to the backend owning the longest matching
  /// prefix, relaying its response. Misses are 404, backend failures 502.
  async fn forward_request(&self, req: ProxyRequest, active: &ActiveRequest) -> HttpResponse {
    let Some(rule) = self.globals.backend_registry.find(&req.path) else {
      warn!("No backend found for path: {}", req.path);
      return HttpResponse::error_json(StatusCode::NOT_FOUND, "No backend found for this path");
    };

    info!(
      "Forwarding request to backend: {} at {}:{}",
      rule.backend_id, rule.target_host, rule.target_port
    );
    let mut log = ProxyLog::new(&req.method, &req.path);
    log.client_addr(&active.peer_addr()).upstream(&rule.target_host, rule.target_port);

    active.set_state(RequestState::Forwarding);
    let exchange = self.forwarder.send_request(
      &rule.target_host,
      rule.target_port,
      &req.method,
      &req.path,
      &req.headers,
      req.body,
    );
    active.set_state(RequestState::WaitingBackend);

    match exchange.await {
      Ok(res) => {
        log.status_code(&res.status).output();
        HttpResponse::from_backend(res)
      }
      Err(e) => {
        error!("Backend request failed: {}", e);
        self.globals.request_manifest.fail(active.id());
        log.status_code(&StatusCode::BAD_GATEWAY).output();
        HttpResponse::error_json(StatusCode::BAD_GATEWAY, &format!("Backend request failed: {e}"))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registry::ForwardingRule;
  use bytes::Bytes;
  use http::HeaderMap;

  fn test_globals() -> Arc<Globals> {
    Arc::new(Globals {
      proxy_config: Default::default(),
      backend_registry: Default::default(),
      request_manifest: Default::default(),
      connection_count: Default::default(),
      runtime_handle: tokio::runtime::Handle::current(),
      term_notify: None,
    })
  }

  fn request(method: Method, path: &str) -> ProxyRequest {
    ProxyRequest::new(method, path, HeaderMap::new(), Bytes::new())
  }

  fn peer() -> std::net::SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
  }

  #[tokio::test]
  async fn health_is_served_regardless_of_registrations() {
    let globals = test_globals();
    let handler = ProxyRequestHandler::new(globals.clone());
    let active = globals.request_manifest.create(peer());

    let res = handler.handle_request(request(Method::GET, "/health"), &active).await;
    assert_eq!(res.status, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&res.body).unwrap();
    assert_eq!(body["status"], "ok");
  }

  #[tokio::test]
  async fn test_route_returns_204_without_body() {
    let globals = test_globals();
    let handler = ProxyRequestHandler::new(globals.clone());
    let active = globals.request_manifest.create(peer());

    let res = handler.handle_request(request(Method::GET, "/test"), &active).await;
    assert_eq!(res.status, StatusCode::NO_CONTENT);
    assert!(res.body.is_empty());
  }

  #[tokio::test]
  async fn registration_path_rejects_other_methods() {
    let globals = test_globals();
    let handler = ProxyRequestHandler::new(globals.clone());
    let active = globals.request_manifest.create(peer());

    let res = handler.handle_request(request(Method::GET, "/proxy/register"), &active).await;
    assert_eq!(res.status, StatusCode::METHOD_NOT_ALLOWED);

    // the longer path is not the registration endpoint, it forwards (and misses)
    let active = globals.request_manifest.create(peer());
    let res = handler
      .handle_request(request(Method::GET, "/proxy/registerfoo"), &active)
      .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn unknown_prefix_is_404() {
    let globals = test_globals();
    globals
      .backend_registry
      .register(ForwardingRule::new("api", "127.0.0.1", 9999, "/api/"));
    let handler = ProxyRequestHandler::new(globals.clone());
    let active = globals.request_manifest.create(peer());

    let res = handler.handle_request(request(Method::GET, "/other"), &active).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    let body: serde_json::Value = serde_json::from_slice(&res.body).unwrap();
    assert!(body["error"].is_string());
  }

  #[tokio::test]
  async fn unreachable_backend_is_502_and_fails_the_request() {
    let globals = test_globals();
    globals
      .backend_registry
      .register(ForwardingRule::new("down", "127.0.0.1", 1, "/"));
    let handler = ProxyRequestHandler::new(globals.clone());
    let active = globals.request_manifest.create(peer());

    let res = handler.handle_request(request(Method::GET, "/anything"), &active).await;
    assert_eq!(res.status, StatusCode::BAD_GATEWAY);
    assert_eq!(active.state(), RequestState::Failed);
    assert!(globals.request_manifest.get(active.id()).is_none());
  }
}
