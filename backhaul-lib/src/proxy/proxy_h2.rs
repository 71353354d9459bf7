use crate::{
  error::*,
  globals::Globals,
  handler::ProxyRequestHandler,
  log::*,
  manifest::RequestState,
  message::{HttpResponse, ProxyRequest},
};
use bytes::{Bytes, BytesMut};
use h2::{server::SendResponse, RecvStream, Reason};
use http::{header, Request, Response};
use std::{net::SocketAddr, sync::Arc};
use tokio::io::{AsyncRead, AsyncWrite};

/// Per-connection HTTP/2 server session. The codec state machine lives in the
/// `h2` connection; this object drives it, owns the stream accumulators and
/// bridges completed requests into the shared handler.
pub(super) struct H2Session {
  globals: Arc<Globals>,
  msg_handler: Arc<ProxyRequestHandler>,
  client_addr: SocketAddr,
}

/// Accumulator for one request stream: request line data from the HEADERS
/// frame, body bytes appended as DATA frames arrive.
struct H2StreamData {
  method: http::Method,
  path: String,
  headers: http::HeaderMap,
  body: BytesMut,
}

impl H2StreamData {
  /// Drain the stream until END_STREAM. Each DATA chunk is appended to the
  /// body buffer and its flow-control capacity released so the peer can keep
  /// sending.
  async fn assemble(request: Request<RecvStream>) -> Result<Self, h2::Error> {
    let (parts, mut body_stream) = request.into_parts();
    let path = parts
      .uri
      .path_and_query()
      .map(|pq| pq.as_str().to_string())
      .unwrap_or_else(|| "/".to_string());

    let mut stream_data = Self {
      method: parts.method,
      path,
      headers: parts.headers,
      body: BytesMut::new(),
    };

    while let Some(chunk) = body_stream.data().await {
      let chunk = chunk?;
      stream_data.body.extend_from_slice(&chunk);
      let _ = body_stream.flow_control().release_capacity(chunk.len());
      debug!("Total body so far: {} bytes", stream_data.body.len());
    }

    Ok(stream_data)
  }

  fn into_request(self) -> ProxyRequest {
    ProxyRequest::new(self.method, self.path, self.headers, self.body.freeze())
  }
}

impl H2Session {
  pub(super) fn new(globals: Arc<Globals>, msg_handler: Arc<ProxyRequestHandler>, client_addr: SocketAddr) -> Self {
    Self {
      globals,
      msg_handler,
      client_addr,
    }
  }

  /// Run the session until the peer goes away or the codec reports a fatal
  /// error. Streams are served on their own tasks, so responses complete in
  /// whatever order the backends answer.
  pub(super) async fn serve<I>(self, stream: I) -> BackhaulResult<()>
  where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
  {
    let mut connection = h2::server::Builder::new()
      .max_concurrent_streams(self.globals.proxy_config.max_concurrent_streams)
      .handshake(stream)
      .await?;
    debug!("HTTP/2 session established with {}", self.client_addr);

    while let Some(accepted) = connection.accept().await {
      let (request, respond) = accepted?;
      let globals = self.globals.clone();
      let msg_handler = self.msg_handler.clone();
      let client_addr = self.client_addr;

      self.globals.runtime_handle.spawn(async move {
        if let Err(e) = process_stream(globals, msg_handler, client_addr, request, respond).await {
          debug!("HTTP/2 stream from {} ended with error: {}", client_addr, e);
        }
      });
    }

    debug!("HTTP/2 session with {} closed", self.client_addr);
    Ok(())
  }
}

/// Full lifecycle of one stream: accumulate, dispatch once on END_STREAM,
/// emit the response on the originating stream id.
async fn process_stream(
  globals: Arc<Globals>,
  msg_handler: Arc<ProxyRequestHandler>,
  client_addr: SocketAddr,
  request: Request<RecvStream>,
  mut respond: SendResponse<Bytes>,
) -> BackhaulResult<()> {
  let active = globals.request_manifest.create(client_addr);
  active.set_state(RequestState::Parsing);

  let stream_data = match H2StreamData::assemble(request).await {
    Ok(stream_data) => stream_data,
    Err(e) => {
      globals.request_manifest.fail(active.id());
      respond.send_reset(Reason::PROTOCOL_ERROR);
      return Err(e.into());
    }
  };
  info!(
    "Processing complete request {} {} (body: {} bytes)",
    stream_data.method,
    stream_data.path,
    stream_data.body.len()
  );

  let response = msg_handler.handle_request(stream_data.into_request(), &active).await;

  active.set_state(RequestState::SendingResponse);
  match send_response(&mut respond, response) {
    Ok(()) => {
      globals.request_manifest.complete(active.id());
      Ok(())
    }
    Err(e) => {
      globals.request_manifest.fail(active.id());
      respond.send_reset(Reason::INTERNAL_ERROR);
      Err(e)
    }
  }
}

/// Emit a response on the stream. An empty body is a single HEADERS frame
/// carrying `:status` with END_STREAM and no `content-length`; anything else
/// is HEADERS plus one DATA frame. The advertised length is the stored body
/// byte length, so binary bodies survive intact.
fn send_response(respond: &mut SendResponse<Bytes>, response: HttpResponse) -> BackhaulResult<()> {
  let status = response.status;

  if response.body.is_empty() {
    let head = Response::builder().status(status).body(())?;
    respond.send_response(head, true)?;
    debug!("Response sent with status {} (headers only)", status);
    return Ok(());
  }

  let head = Response::builder()
    .status(status)
    .header(header::CONTENT_TYPE, response.content_type)
    .header(header::CONTENT_LENGTH, response.body.len())
    .body(())?;
  let mut stream = respond.send_response(head, false)?;
  stream.send_data(response.body, true)?;
  debug!("Response sent with status {}", status);
  Ok(())
}
