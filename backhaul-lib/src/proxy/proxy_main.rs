use super::{crypto_service::ServerCrypto, proxy_h1::H1Session, proxy_h2::H2Session, socket::bind_tcp_socket};
use crate::{constants::TLS_HANDSHAKE_TIMEOUT_SEC, error::*, globals::Globals, handler::ProxyRequestHandler, log::*};
use derive_builder::Builder;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpStream, time::timeout};

/// Which protocol an acceptor speaks on its port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontDoor {
  Http2,
  Http1,
}

impl FrontDoor {
  fn label(&self) -> &'static str {
    match self {
      Self::Http2 => "HTTP/2",
      Self::Http1 => "HTTP/1.1",
    }
  }
}

#[derive(Builder, Clone)]
/// Acceptor for one front door: accept a socket, wrap it in a session, recur.
/// Accepting only stops when the termination notify fires.
pub struct Proxy {
  /// global context shared among async tasks
  pub globals: Arc<Globals>,
  /// listen socket address
  pub listening_on: SocketAddr,
  /// protocol served on this port
  pub front_door: FrontDoor,
  /// TLS crypto wrapping accepted h2 sockets; None serves cleartext
  #[builder(default)]
  pub server_crypto: Option<ServerCrypto>,
  /// message handler serving assembled requests
  pub msg_handler: Arc<ProxyRequestHandler>,
}

impl Proxy {
  /// Wrap an accepted socket in a session on its own task. Connections over
  /// `max_clients` are dropped at the door.
  fn serve_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
    let connection_count = self.globals.connection_count.clone();
    if connection_count.increment() > self.globals.proxy_config.max_clients {
      connection_count.decrement();
      return;
    }
    debug!("Connection incoming: current # {}", connection_count.current());

    let self_inner = self.clone();
    self.globals.runtime_handle.clone().spawn(async move {
      if let Err(e) = self_inner.run_session(stream, peer_addr).await {
        warn!("Session with {} terminated: {}", peer_addr, e);
      }
      connection_count.decrement();
      debug!("Connection processed: current # {}", connection_count.current());
    });
  }

  /// Drive one connection to completion. TLS sockets must complete the
  /// handshake and negotiate ALPN `h2` before the session starts; failures
  /// drop the connection.
  async fn run_session(&self, stream: TcpStream, peer_addr: SocketAddr) -> BackhaulResult<()> {
    match (self.front_door, &self.server_crypto) {
      (FrontDoor::Http1, _) => {
        H1Session::new(self.globals.clone(), self.msg_handler.clone(), peer_addr)
          .serve(stream)
          .await
      }
      (FrontDoor::Http2, None) => {
        H2Session::new(self.globals.clone(), self.msg_handler.clone(), peer_addr)
          .serve(stream)
          .await
      }
      (FrontDoor::Http2, Some(server_crypto)) => {
        let tls_stream = timeout(
          Duration::from_secs(TLS_HANDSHAKE_TIMEOUT_SEC),
          server_crypto.acceptor().accept(stream),
        )
        .await
        .map_err(|_| BackhaulError::FailedToTlsHandshake("timeout".to_string()))?
        .map_err(|e| BackhaulError::FailedToTlsHandshake(e.to_string()))?;

        if tls_stream.get_ref().1.alpn_protocol() != Some(b"h2") {
          return Err(BackhaulError::NoAlpnH2);
        }
        debug!("TLS handshake completed with {}", peer_addr);

        H2Session::new(self.globals.clone(), self.msg_handler.clone(), peer_addr)
          .serve(tls_stream)
          .await
      }
    }
  }

  /// Bind the listen socket and accept until shutdown. Accept errors are
  /// logged and accepting continues.
  pub async fn start(&self) -> BackhaulResult<()> {
    let tcp_socket = bind_tcp_socket(&self.listening_on)?;
    let tcp_listener = tcp_socket.listen(self.globals.proxy_config.tcp_listen_backlog)?;
    info!(
      "Start TCP proxy serving {} requests on {}",
      self.front_door.label(),
      self.listening_on
    );

    let term_notify = self.globals.term_notify.clone();
    match term_notify {
      Some(term_notify) => loop {
        tokio::select! {
          accepted = tcp_listener.accept() => {
            match accepted {
              Ok((stream, peer_addr)) => self.serve_connection(stream, peer_addr),
              Err(e) => error!("Accept error: {}", e),
            }
          }
          _ = term_notify.notified() => {
            info!("{} acceptor on {} stopped", self.front_door.label(), self.listening_on);
            break;
          }
        }
      },
      None => loop {
        match tcp_listener.accept().await {
          Ok((stream, peer_addr)) => self.serve_connection(stream, peer_addr),
          Err(e) => error!("Accept error: {}", e),
        }
      },
    }

    Ok(())
  }
}
