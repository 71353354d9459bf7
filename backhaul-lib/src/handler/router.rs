use crate::{
  globals::Globals,
  log::*,
  message::{HttpResponse, ProxyRequest},
};
use http::{Method, StatusCode};
use rustc_hash::FxHashMap as HashMap;
use std::sync::Arc;

/// Handler for one exact route. Errors escaping a handler surface as 500.
pub type RouteFn = Box<dyn Fn(&ProxyRequest, &Arc<Globals>) -> anyhow::Result<HttpResponse> + Send + Sync>;

/// Exact `(method, path)` route table, built once at startup and read-only
/// afterwards. Requests not matched here fall through to prefix-based
/// forwarding, which is a separate mechanism on purpose.
pub struct Router {
  routes: HashMap<(Method, String), RouteFn>,
}

impl Default for Router {
  fn default() -> Self {
    let mut router = Self { routes: HashMap::default() };
    router.register_route(Method::GET, "/health", |_, _| {
      Ok(HttpResponse::json(
        StatusCode::OK,
        serde_json::json!({"status": "ok"}).to_string(),
      ))
    });
    router
  }
}

impl Router {
  pub fn register_route<F>(&mut self, method: Method, path: &str, handler: F)
  where
    F: Fn(&ProxyRequest, &Arc<Globals>) -> anyhow::Result<HttpResponse> + Send + Sync + 'static,
  {
    info!("Registered route: {} {}", method, path);
    self.routes.insert((method, path.to_string()), Box::new(handler));
  }

  pub fn find(&self, method: &Method, path: &str) -> Option<&RouteFn> {
    self.routes.get(&(method.clone(), path.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::Bytes;
  use http::HeaderMap;

  fn request(method: Method, path: &str) -> ProxyRequest {
    ProxyRequest::new(method, path, HeaderMap::new(), Bytes::new())
  }

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

  #[tokio::test]
  async fn health_route_is_built_in() {
    let router = Router::default();
    let globals = test_globals();

    let route = router.find(&Method::GET, "/health").unwrap();
    let res = route(&request(Method::GET, "/health"), &globals).unwrap();
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body.as_ref(), br#"{"status":"ok"}"#);
  }

  #[tokio::test]
  async fn lookup_is_exact_on_method_and_path() {
    let mut router = Router::default();
    router.register_route(Method::GET, "/test", |_, _| Ok(HttpResponse::empty(StatusCode::NO_CONTENT)));

    assert!(router.find(&Method::GET, "/test").is_some());
    assert!(router.find(&Method::POST, "/test").is_none());
    assert!(router.find(&Method::GET, "/testx").is_none());
    assert!(router.find(&Method::GET, "/tes").is_none());
  }
}
