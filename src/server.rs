//! Accept loop and per-connection worker driving the protocol end to end.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::config::{ServerConfig, BACKLOG};
use crate::credentials::CredentialStore;
use crate::dispatch::dispatch;
use crate::protocol::request::ParseError;
use crate::protocol::response::ResponseFrame;
use crate::protocol::ResultCode;
use crate::sandbox::Home;

#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
    Store(crate::credentials::StoreError),
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Io(e)
    }
}

impl From<crate::credentials::StoreError> for ServerError {
    fn from(e: crate::credentials::StoreError) -> Self {
        ServerError::Store(e)
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Io(e) => write!(f, "i/o error: {}", e),
            ServerError::Store(e) => write!(f, "credential store error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

/// Runs the accept loop until an interrupt/terminate signal is received.
///
/// The number of concurrently running connection tasks is not bounded beyond
/// the runtime's own worker-thread count, which callers should size to
/// `std::thread::available_parallelism` to model a fixed connection-worker
/// pool (see `main.rs`).
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let home = Home::new(&config.home_directory).await.map_err(|e| {
        ServerError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{:?}", e),
        ))
    })?;
    let store = CredentialStore::load(&config.home_directory).await?;
    let home = Arc::new(home);
    let store = Arc::new(store);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let listener = TcpListener::bind(addr).await?;
    info!(port = config.port, backlog = BACKLOG, "listening");

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interrupt = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!(%e, "failed to install SIGINT handler");
                    return;
                }
            };
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(%e, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = interrupt.recv() => info!("received SIGINT, shutting down"),
                _ = terminate.recv() => info!("received SIGTERM, shutting down"),
            }
            shutdown.store(true, Ordering::SeqCst);
        });
    }

    let timeout = Duration::from_secs(config.timeout_secs);

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let accept = tokio::time::timeout(Duration::from_millis(500), listener.accept()).await;
        let (socket, peer) = match accept {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                warn!(%e, "accept failed");
                continue;
            }
            Err(_) => continue, // periodic wakeup to re-check the shutdown flag
        };
        let store = store.clone();
        let home = home.clone();
        tokio::spawn(async move {
            handle_connection(socket, peer, store, home, timeout).await;
        });
    }

    info!("accept loop exited, draining in-flight connections");
    Ok(())
}

/// Drives one accepted connection through a single request/response round:
/// applies the per-connection read timeout, parses, dispatches, and writes
/// the reply before the socket is dropped. Exposed (rather than private) so
/// integration tests can exercise it over a real `TcpStream` instead of only
/// through the in-process duplex fixture used by the dispatcher-level tests.
pub async fn handle_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    store: Arc<CredentialStore>,
    home: Arc<Home>,
    timeout: Duration,
) {
    info!(%peer, "connection accepted");
    let parsed = tokio::time::timeout(timeout, crate::protocol::request::parse(&mut socket)).await;

    let response = match parsed {
        Ok(Ok(request)) => {
            let resp = dispatch(&store, &home, request).await;
            Some(resp)
        }
        Ok(Err(ParseError::ConnectionClosed)) => {
            warn!(%peer, "peer closed connection mid-frame");
            Some(ResponseFrame::error(ResultCode::SockClosed, 0))
        }
        Ok(Err(e)) => {
            warn!(%peer, ?e, "malformed request");
            Some(ResponseFrame::error(ResultCode::Failure, 0))
        }
        Err(_) => {
            warn!(%peer, "read timed out");
            Some(ResponseFrame::error(ResultCode::SessionError, 0))
        }
    };

    if let Some(response) = response {
        if let Err(e) = response.write_to(&mut socket).await {
            warn!(%peer, %e, "failed to write response");
        }
    }
    info!(%peer, "connection closed");
}
