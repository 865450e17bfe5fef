use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tcpfwd::Config;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    let port = config.port;
    if let Err(err) = serve(config).await {
        error!(port, cause = ?err, "fatal");
        process::exit(1);
    }
}

async fn serve(config: Config) -> Result<()> {
    let port = config.port;
    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("could not start listening port {port}"))?;
    info!(port, target = %config.target, "running");

    tcpfwd::run(
        listener,
        config.target,
        tcpfwd::shutdown_signal(signal::ctrl_c()),
    )
    .await
}
