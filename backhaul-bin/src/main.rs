#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod config;
mod constants;
mod log;

use crate::{config::build_settings, log::*};
use backhaul_lib::entrypoint;
use std::sync::Arc;

fn main() {
  init_logger();

  let (proxy_conf, threads) = match build_settings() {
    Ok(v) => v,
    Err(e) => {
      error!("Invalid configuration: {}", e);
      std::process::exit(1);
    }
  };

  let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
  runtime_builder.enable_all();
  runtime_builder.thread_name("backhaul");
  runtime_builder.worker_threads(threads);
  let runtime = runtime_builder.build().unwrap();

  info!("Starting backhaul fabric with {} worker threads", threads);

  let exit_code = runtime.block_on(async {
    let term_notify = Arc::new(tokio::sync::Notify::new());
    tokio::spawn({
      let term_notify = term_notify.clone();
      async move {
        wait_for_termination().await;
        info!("Received termination signal, shutting down...");
        term_notify.notify_waiters();
      }
    });

    match entrypoint(&proxy_conf, &runtime.handle().clone(), Some(term_notify)).await {
      Ok(()) => 0,
      Err(e) => {
        error!("Server error: {}", e);
        1
      }
    }
  });

  warn!("backhaul exited!");
  std::process::exit(exit_code);
}

#[cfg(unix)]
async fn wait_for_termination() {
  use tokio::signal::unix::{signal, SignalKind};
  let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
  let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
  tokio::select! {
    _ = sigint.recv() => {}
    _ = sigterm.recv() => {}
  }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
  tokio::signal::ctrl_c().await.ok();
}
