use std::future::Future;
use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use backon::{ExponentialBuilder, Retryable};
use tokio::net::TcpListener;
use tracing::{error, info, info_span, warn, Instrument};

use crate::session::Session;

/// Retries after a failed accept before the listener gives up.
pub const ACCEPT_RETRIES: usize = 64;

/// Accepts clients and hands each one to its own [`Session`] task.
pub struct Listener {
    listener: TcpListener,
    target: Arc<str>,
    backoff: ExponentialBuilder,
}

impl Listener {
    pub fn new(listener: TcpListener, target: Arc<str>) -> Self {
        Listener {
            listener,
            target,
            backoff: ExponentialBuilder::default()
                .with_jitter()
                .with_max_times(ACCEPT_RETRIES),
        }
    }

    /// Runs the accept loop.
    ///
    /// Transient accept errors are retried with jittered backoff. The loop
    /// only ends with an error once the retries are exhausted.
    pub async fn run(&mut self) -> Result<()> {
        let port = self.listener.local_addr()?.port();
        info!(port, target = %self.target, "accepting inbound connections");

        loop {
            let listener = &self.listener;
            let (inbound, addr) = accept_with_retry(|| listener.accept(), &self.backoff)
                .await
                .with_context(|| format!("accept failed on port {port}"))?;

            let session = Session::new(inbound, addr, Arc::clone(&self.target));
            let span = info_span!("handler", addr = %session.addr());

            tokio::spawn(
                async move {
                    info!("connected");
                    if let Err(err) = session.run().await {
                        error!(cause = ?err, "session failed");
                    }
                    info!("closed");
                }
                .instrument(span),
            );
        }
    }
}

/// Calls `accept` until it succeeds or `backoff` runs out of retries.
async fn accept_with_retry<T, F, Fut>(
    mut accept: F,
    backoff: &ExponentialBuilder,
) -> io::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let attempt = || {
        let fut = accept();
        async move {
            fut.await.map_err(|err| {
                warn!(cause = %err, "accept failed");
                err
            })
        }
    };

    attempt.retry(backoff).await
}
