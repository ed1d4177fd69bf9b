//! WASI HTTP server entry point for the rendezvous server
//!
//! This module provides the main entry point when running as a WASI HTTP component
//! using `wasmtime serve`.

use rendezvous_server::handler::{service_unavailable, store_access};
use rendezvous_server::{Config, ServerState, handle_request};
use std::cell::RefCell;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wstd::http::{Body, Request, Response};

// Thread-local state for the server (WASI is single-threaded)
thread_local! {
    static STATE: RefCell<Option<ServerState>> = const { RefCell::new(None) };
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rendezvous_server=info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn get_or_init_state() -> ServerState {
    STATE.with(|s| {
        s.borrow_mut()
            .get_or_insert_with(|| {
                init_tracing();
                let config = Config::from_env().unwrap_or_else(|e| {
                    warn!(error = %e, "invalid configuration, using defaults");
                    Config::default()
                });
                info!(?config, "rendezvous server starting");
                ServerState::new(config)
            })
            .clone()
    })
}

/// The main HTTP handler for WASI
///
/// This function is called by the WASI runtime for each incoming HTTP request.
#[wstd::http_server]
async fn main(request: Request<Body>) -> Result<Response<Body>, wstd::http::Error> {
    let state = get_or_init_state();
    let access = store_access(request.method(), request.uri().path());
    match state.with_store(access, handle_request(request, &state)).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "state file unavailable");
            Ok(service_unavailable())
        }
    }
}
