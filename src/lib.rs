use std::future::{self, Future};
use std::io;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info, info_span, warn, Instrument};

pub mod config;
pub mod listener;
pub mod pump;
pub mod session;

pub use config::Config;
pub use listener::Listener;
pub use session::Session;

/// Relays every connection accepted on `listener` to `target` until
/// `shutdown` completes.
///
/// Shutdown drops the listener so no further connections are accepted.
/// Sessions already running are left alone. An error is returned only when
/// accepting fails for good.
pub async fn run(
    listener: TcpListener,
    target: impl Into<Arc<str>>,
    shutdown: impl Future,
) -> Result<()> {
    let mut server = Listener::new(listener, target.into());

    let res = tokio::select! {
        res = server.run().instrument(info_span!("listener")) => res,
        _ = shutdown => {
            info!("shutting down");
            Ok(())
        }
    };

    drop(server);
    res
}

/// Resolves once `signal` reports an interrupt.
///
/// If listening for the interrupt fails, this never resolves, so the relay
/// keeps serving instead of looking like it was asked to stop.
pub async fn shutdown_signal(signal: impl Future<Output = io::Result<()>>) {
    match signal.await {
        Ok(()) => warn!("stopping"),
        Err(err) => {
            error!(cause = %err, "failed to listen for interrupt");
            future::pending::<()>().await
        }
    }
}
