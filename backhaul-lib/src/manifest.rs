use crate::{globals::Globals, log::*};
use rustc_hash::FxHashMap as HashMap;
use std::{
  net::SocketAddr,
  sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc, Mutex,
  },
  time::{Duration, Instant},
};

/// Lifecycle of one in-flight forwarded request. Transitions only advance
/// along the happy path, or jump to `Failed` from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RequestState {
  Created = 0,
  Parsing = 1,
  Forwarding = 2,
  WaitingBackend = 3,
  SendingResponse = 4,
  Completed = 5,
  Failed = 6,
}

impl RequestState {
  fn from_u8(v: u8) -> Self {
    match v {
      0 => Self::Created,
      1 => Self::Parsing,
      2 => Self::Forwarding,
      3 => Self::WaitingBackend,
      4 => Self::SendingResponse,
      5 => Self::Completed,
      _ => Self::Failed,
    }
  }

  fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed)
  }
}

/// Bookkeeping record for one in-flight request. The inbound and outbound
/// streams stay owned by the session futures; the record carries only what
/// observers need.
#[derive(Debug)]
pub struct ActiveRequest {
  request_id: u64,
  state: AtomicU8,
  start_time: Instant,
  peer_addr: SocketAddr,
}

impl ActiveRequest {
  fn new(request_id: u64, peer_addr: SocketAddr) -> Self {
    debug!("Created active request {}", request_id);
    Self {
      request_id,
      state: AtomicU8::new(RequestState::Created as u8),
      start_time: Instant::now(),
      peer_addr,
    }
  }

  pub fn id(&self) -> u64 {
    self.request_id
  }

  pub fn peer_addr(&self) -> SocketAddr {
    self.peer_addr
  }

  /// Lock-free read, usable while the manifest mutex is held by someone else.
  pub fn state(&self) -> RequestState {
    RequestState::from_u8(self.state.load(Ordering::Acquire))
  }

  pub fn elapsed(&self) -> Duration {
    self.start_time.elapsed()
  }

  /// Advance the state. Regressions and transitions out of a terminal state
  /// are ignored, which keeps concurrent observers on one of the two
  /// permitted monotonic paths.
  pub fn set_state(&self, next: RequestState) {
    let res = self
      .state
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
        let cur = RequestState::from_u8(cur);
        if cur.is_terminal() || next <= cur {
          None
        } else {
          Some(next as u8)
        }
      });
    if res.is_ok() {
      debug!("Request {} state: {:?}", self.request_id, next);
    }
  }
}

/// Process-wide table of in-flight requests. The mutex guards only the map;
/// per-record state is atomic.
#[derive(Debug, Default)]
pub struct ActiveRequestManifest {
  inner: Mutex<HashMap<u64, Arc<ActiveRequest>>>,
  next_request_id: AtomicU64,
}

impl ActiveRequestManifest {
  /// Allocate a fresh id (strictly monotonic, never reused within a run) and
  /// insert a record in state `Created`.
  pub fn create(&self, peer_addr: SocketAddr) -> Arc<ActiveRequest> {
    let id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
    let request = Arc::new(ActiveRequest::new(id, peer_addr));

    let mut requests = self.inner.lock().unwrap();
    requests.insert(id, request.clone());
    debug!("Created request {}, total active: {}", id, requests.len());
    request
  }

  pub fn get(&self, request_id: u64) -> Option<Arc<ActiveRequest>> {
    self.inner.lock().unwrap().get(&request_id).cloned()
  }

  /// Record the terminal `Completed` state and drop the record.
  pub fn complete(&self, request_id: u64) {
    let mut requests = self.inner.lock().unwrap();
    if let Some(request) = requests.remove(&request_id) {
      request.set_state(RequestState::Completed);
      debug!("Completed request {}, remaining active: {}", request_id, requests.len());
    }
  }

  /// Record the terminal `Failed` state and drop the record.
  pub fn fail(&self, request_id: u64) {
    let mut requests = self.inner.lock().unwrap();
    if let Some(request) = requests.remove(&request_id) {
      request.set_state(RequestState::Failed);
      debug!("Failed request {}, remaining active: {}", request_id, requests.len());
    }
  }

  /// Evict records older than `expiry`, marking each `Failed`.
  /// Returns the number of evicted records.
  pub fn sweep(&self, expiry: Duration) -> usize {
    let mut requests = self.inner.lock().unwrap();
    let expired: Vec<u64> = requests
      .values()
      .filter(|r| r.elapsed() > expiry)
      .map(|r| r.id())
      .collect();
    for id in &expired {
      if let Some(request) = requests.remove(id) {
        request.set_state(RequestState::Failed);
        warn!("Cleaning up expired request {}", id);
      }
    }
    expired.len()
  }

  pub fn len(&self) -> usize {
    self.inner.lock().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.lock().unwrap().is_empty()
  }

  pub fn log_stats(&self) {
    info!("Active requests: {}", self.len());
  }
}

/// Periodic sweep of the manifest, spawned at startup and stopped by the
/// termination notify.
pub async fn expiry_service(globals: Arc<Globals>) {
  let mut interval = tokio::time::interval(globals.proxy_config.sweep_interval);
  interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
  loop {
    match &globals.term_notify {
      Some(notify) => {
        tokio::select! {
          _ = interval.tick() => {}
          _ = notify.notified() => {
            debug!("Manifest sweep service stopped");
            break;
          }
        }
      }
      None => {
        interval.tick().await;
      }
    }
    let evicted = globals.request_manifest.sweep(globals.proxy_config.request_expiry);
    if evicted > 0 {
      globals.request_manifest.log_stats();
    }
  }
}
