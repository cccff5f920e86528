//! Connection acceptance and the fixed-size worker pool.
//!
//! A single acceptor thread reads raw `TcpStream`s off the listener and
//! hands them to a bounded channel; `workers` persistent threads pull from
//! that channel, each performing its own TLS handshake and then serving
//! requests on that connection until the peer disconnects or a read/write
//! fails. The channel bound equals the worker count, so the acceptor
//! blocks rather than queueing unbounded work once every worker is busy.

use crate::access::AccessManager;
use crate::account::AccountManager;
use crate::config::ServerConfig;
use crate::error::{CustodianResult, ServerError};
use crate::net::tls::{self, TlsStream};
use crate::protocol::{self, ServerState};
use crate::session::SessionManager;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Registers the default database and its top-level collections with an
/// admin context, bypassing rules evaluation. Aborts the process (returns
/// `Bootstrap`) on any failure, per the fatal-bootstrap-error requirement.
pub fn bootstrap(config: &ServerConfig) -> CustodianResult<ServerState> {
    let mut access = AccessManager::new();
    access
        .add_db(&config.default_db_name, &config.db_dir, &config.default_rules_path)
        .map_err(|e| ServerError::Bootstrap(format!("failed to register default database: {e}")))?;

    for root in ["users", "public"] {
        access
            .with_admin_tree(&config.default_db_name, |tree| tree.add_root_collection(root))
            .map_err(|e| ServerError::Bootstrap(format!("failed to create '{root}' collection: {e}")))?;
    }

    let accounts = AccountManager::open(&config.accounts_dir)
        .map_err(|e| ServerError::Bootstrap(format!("failed to open account store: {e}")))?;

    Ok(ServerState {
        sessions: Arc::new(SessionManager::new()),
        accounts: Arc::new(accounts),
        access: Arc::new(access),
        default_db: config.default_db_name.clone(),
    })
}

fn serve_connection(state: &ServerState, mut stream: TlsStream) {
    loop {
        match protocol::handle_one_request(state, &mut stream) {
            Ok(()) => continue,
            Err(err) => {
                if err.should_log() {
                    tracing::error!(error = %err, "connection terminated");
                } else {
                    tracing::debug!(error = %err, "connection closed");
                }
                break;
            }
        }
    }
}

fn worker_loop(
    id: usize,
    rx: Arc<Mutex<Receiver<TcpStream>>>,
    state: ServerState,
    tls_config: Arc<rustls::ServerConfig>,
    read_timeout: Duration,
) {
    loop {
        let next = { rx.lock().expect("worker channel mutex poisoned").recv() };
        let Ok(tcp_stream) = next else {
            tracing::debug!(worker = id, "shutting down, channel closed");
            break;
        };
        if let Err(err) = tcp_stream.set_read_timeout(Some(read_timeout)) {
            tracing::warn!(worker = id, error = %err, "failed to set read timeout, dropping connection");
            continue;
        }
        match tls::accept(tls_config.clone(), tcp_stream) {
            Ok(tls_stream) => serve_connection(&state, tls_stream),
            Err(err) => tracing::warn!(worker = id, error = %err, "TLS handshake failed"),
        }
    }
}

/// Bind `bind_address`, spawn `workers` worker threads, and accept
/// connections until the listener fails. `read_timeout` bounds how long any
/// single read (handshake or request) may block, so a connection that
/// stalls mid-request is dropped instead of pinning its worker forever.
pub fn run(
    state: ServerState,
    tls_config: Arc<rustls::ServerConfig>,
    bind_address: &str,
    workers: usize,
    read_timeout: Duration,
) -> CustodianResult<()> {
    let listener = TcpListener::bind(bind_address)?;
    tracing::info!(%bind_address, workers, "listening");

    let (tx, rx) = sync_channel::<TcpStream>(workers);
    let rx = Arc::new(Mutex::new(rx));

    for id in 0..workers {
        let rx = rx.clone();
        let state = state.clone();
        let tls_config = tls_config.clone();
        thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || worker_loop(id, rx, state, tls_config, read_timeout))
            .map_err(|e| ServerError::Bootstrap(format!("failed to spawn worker {id}: {e}")))?;
    }

    for incoming in listener.incoming() {
        match incoming {
            Ok(tcp_stream) => {
                if tx.send(tcp_stream).is_err() {
                    tracing::error!("all workers gone, stopping accept loop");
                    break;
                }
            }
            Err(err) => tracing::warn!(error = %err, "accept failed"),
        }
    }

    Ok(())
}
