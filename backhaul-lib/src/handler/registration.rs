use crate::{
  globals::Globals,
  log::*,
  message::{HttpResponse, ProxyRequest},
  registry::ForwardingRule,
};
use http::{Method, StatusCode};
use serde::Deserialize;
use std::sync::Arc;

/// Body of `POST /proxy/register`
#[derive(Debug, Deserialize)]
struct RegisterPayload {
  backend_id: String,
  host: String,
  port: u16,
  path_pattern: String,
}

/// Body of `DELETE /proxy/register`
#[derive(Debug, Deserialize)]
struct UnregisterPayload {
  backend_id: String,
}

/// Service the registration endpoint. POST inserts or replaces a forwarding
/// rule, DELETE removes one, anything else is 405. Malformed or invalid
/// payloads are 400 and leave the registry untouched.
pub fn handle_registration_request(req: &ProxyRequest, globals: &Arc<Globals>) -> HttpResponse {
  match req.method {
    Method::POST => match parse_register(&req.body) {
      Ok(rule) => {
        let backend_id = rule.backend_id.clone();
        globals.backend_registry.register(rule);
        success_response(&backend_id, "Backend registered successfully")
      }
      Err(e) => {
        warn!("Registration operation failed: {}", e);
        HttpResponse::error_json(StatusCode::BAD_REQUEST, "Invalid request data")
      }
    },
    Method::DELETE => match serde_json::from_slice::<UnregisterPayload>(&req.body) {
      Ok(payload) => {
        globals.backend_registry.unregister(&payload.backend_id);
        success_response(&payload.backend_id, "Backend unregistered successfully")
      }
      Err(e) => {
        warn!("Unregistration operation failed: {}", e);
        HttpResponse::error_json(StatusCode::BAD_REQUEST, "Invalid request data")
      }
    },
    _ => HttpResponse::error_json(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
  }
}

/// The registry only ever holds valid rules, so the payload is checked here:
/// port 0 and empty patterns never make it in.
fn parse_register(body: &[u8]) -> anyhow::Result<ForwardingRule> {
  let payload: RegisterPayload = serde_json::from_slice(body)?;
  anyhow::ensure!(payload.port != 0, "port must be in 1-65535");
  anyhow::ensure!(!payload.path_pattern.is_empty(), "path_pattern must be non-empty");
  Ok(ForwardingRule::new(
    &payload.backend_id,
    &payload.host,
    payload.port,
    &payload.path_pattern,
  ))
}

fn success_response(backend_id: &str, message: &str) -> HttpResponse {
  let body = serde_json::json!({
    "status": "success",
    "backend_id": backend_id,
    "message": message,
  })
  .to_string();
  HttpResponse::json(StatusCode::OK, body)
}
