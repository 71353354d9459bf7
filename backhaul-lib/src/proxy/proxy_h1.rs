use crate::{
  constants::{READ_BUFFER_SIZE, RESPONSE_HEADER_SERVER},
  error::*,
  globals::Globals,
  handler::ProxyRequestHandler,
  log::*,
  manifest::RequestState,
  message::{HttpResponse, ProxyRequest},
};
use bytes::Bytes;
use http::{header, HeaderValue, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, service::service_fn};
use hyper_util::rt::TokioIo;
use std::{net::SocketAddr, sync::Arc};
use tokio::io::{AsyncRead, AsyncWrite};

/// Per-connection HTTP/1.1 front-door session: parse one request at a time,
/// route it through the shared handler and write the response back.
pub(super) struct H1Session {
  globals: Arc<Globals>,
  msg_handler: Arc<ProxyRequestHandler>,
  client_addr: SocketAddr,
}

impl H1Session {
  pub(super) fn new(globals: Arc<Globals>, msg_handler: Arc<ProxyRequestHandler>, client_addr: SocketAddr) -> Self {
    Self {
      globals,
      msg_handler,
      client_addr,
    }
  }

  pub(super) async fn serve<I>(self, stream: I) -> BackhaulResult<()>
  where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
  {
    let Self {
      globals,
      msg_handler,
      client_addr,
    } = self;

    let service = service_fn(move |req: Request<Incoming>| {
      let globals = globals.clone();
      let msg_handler = msg_handler.clone();
      async move { serve_request(globals, msg_handler, client_addr, req).await }
    });

    hyper::server::conn::http1::Builder::new()
      .max_buf_size(READ_BUFFER_SIZE)
      .serve_connection(TokioIo::new(stream), service)
      .await
      .map_err(|e| BackhaulError::HyperConnectionError(e.to_string()))
  }
}

async fn serve_request(
  globals: Arc<Globals>,
  msg_handler: Arc<ProxyRequestHandler>,
  client_addr: SocketAddr,
  req: Request<Incoming>,
) -> BackhaulResult<Response<Full<Bytes>>> {
  let active = globals.request_manifest.create(client_addr);
  active.set_state(RequestState::Parsing);

  let (parts, body) = req.into_parts();
  let body = match body.collect().await {
    Ok(collected) => collected.to_bytes(),
    Err(e) => {
      error!("HTTP/1.1 read error: {}", e);
      globals.request_manifest.fail(active.id());
      return Err(BackhaulError::HyperBodyManipulationError(e.to_string()));
    }
  };

  let path = parts
    .uri
    .path_and_query()
    .map(|pq| pq.as_str().to_string())
    .unwrap_or_else(|| "/".to_string());
  info!("HTTP/1.1 {} {}", parts.method, path);

  let proxy_request = ProxyRequest::new(parts.method, path, parts.headers, body);
  let response = msg_handler.handle_request(proxy_request, &active).await;

  active.set_state(RequestState::SendingResponse);
  let response = build_h1_response(response)?;
  globals.request_manifest.complete(active.id());
  Ok(response)
}

/// Serialize the handler's response for the HTTP/1.1 door. Relayed backend
/// headers are written through minus the fields hyper regenerates; synthetic
/// responses get the fabric's server header and JSON content type.
fn build_h1_response(response: HttpResponse) -> BackhaulResult<Response<Full<Bytes>>> {
  const REGENERATED: &[header::HeaderName] = &[header::CONTENT_LENGTH, header::TRANSFER_ENCODING, header::CONNECTION];

  let mut builder = Response::builder().status(response.status);
  for (name, value) in response.headers.iter() {
    if REGENERATED.contains(name) {
      continue;
    }
    builder = builder.header(name, value);
  }

  let res = builder.body(Full::new(response.body))?;
  let (mut parts, body) = res.into_parts();
  parts
    .headers
    .insert(header::SERVER, HeaderValue::from_static(RESPONSE_HEADER_SERVER));
  parts.headers.entry(header::CONTENT_TYPE).or_insert(response.content_type);
  Ok(Response::from_parts(parts, body))
}
