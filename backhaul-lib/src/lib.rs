mod constants;
mod count;
mod error;
mod forwarder;
mod globals;
mod handler;
mod log;
mod manifest;
mod message;
mod proxy;
mod registry;

use crate::{
  globals::Globals,
  handler::ProxyRequestHandler,
  log::*,
  proxy::{FrontDoor, ProxyBuilder, ServerCrypto},
};
use futures::future::select_all;
use std::sync::Arc;

pub use crate::{
  error::{BackhaulError, BackhaulResult},
  forwarder::{ForwardRequest, HttpClient},
  globals::{ProxyConfig, TlsFileConfig},
  message::BackendResponse,
};
pub mod reexports {
  pub use bytes::Bytes;
  pub use http::{HeaderMap, Method, StatusCode};
}

/// Entrypoint that creates and spawns the two front doors of the fabric
pub async fn entrypoint(
  proxy_config: &ProxyConfig,
  runtime_handle: &tokio::runtime::Handle,
  term_notify: Option<Arc<tokio::sync::Notify>>,
) -> BackhaulResult<()> {
  // For initial message logging
  info!("Listen port: {} (HTTP/2)", proxy_config.http2_addr.port());
  info!("Listen port: {} (HTTP/1.1)", proxy_config.http1_addr.port());
  if proxy_config.tls.is_some() {
    info!("TLS is enabled on the HTTP/2 front door (ALPN: h2)");
  }

  // build global shared context: the registry and manifest live here instead
  // of process-wide statics so tests can run whole fabrics side by side
  let globals = Arc::new(Globals {
    proxy_config: proxy_config.clone(),
    backend_registry: Default::default(),
    request_manifest: Default::default(),
    connection_count: Default::default(),
    runtime_handle: runtime_handle.clone(),
    term_notify: term_notify.clone(),
  });

  // build message handler including the request forwarder
  let msg_handler = Arc::new(ProxyRequestHandler::new(globals.clone()));

  // TLS context is built once; a broken cert or key is a startup failure
  let server_crypto = proxy_config.tls.as_ref().map(ServerCrypto::try_new).transpose()?;

  // expiry sweep over the in-flight request manifest
  globals.runtime_handle.spawn(manifest::expiry_service(globals.clone()));

  let http2_proxy = ProxyBuilder::default()
    .globals(globals.clone())
    .listening_on(proxy_config.http2_addr)
    .front_door(FrontDoor::Http2)
    .server_crypto(server_crypto)
    .msg_handler(msg_handler.clone())
    .build()?;
  let http1_proxy = ProxyBuilder::default()
    .globals(globals.clone())
    .listening_on(proxy_config.http1_addr)
    .front_door(FrontDoor::Http1)
    .msg_handler(msg_handler)
    .build()?;

  let futures = select_all(
    [http2_proxy, http1_proxy]
      .into_iter()
      .map(|proxy| globals.runtime_handle.spawn(async move { proxy.start().await })),
  );

  // wait until the first front door returns: an error there is a process
  // failure, a clean return means shutdown was requested
  match futures.await {
    (Ok(Ok(())), _, _) => Ok(()),
    (Ok(Err(e)), _, _) => {
      error!("Front door service is down: {}", e);
      Err(e)
    }
    (Err(e), _, _) => {
      error!("Front door task failed: {}", e);
      Err(BackhaulError::Io(std::io::Error::other(e.to_string())))
    }
  }
}
