#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use john_lib::config::load_from_path;
use john_lib::telemetry::init_tracing;
use john_lib::tcp::{self, Server};
use john_lib::transport;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "John: edge tunnel node for a BitterJohn/SweetLisa-style fleet")]
struct Cli {
    /// Path to the node's TOML configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "john.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    init_tracing("info");

    let cli = Cli::parse();
    let config = match load_from_path(&cli.config) {
        Ok(cfg) => Arc::new(cfg),
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(addr = ?config.listen, passages = config.passages.len(), "configuration loaded");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let server = Arc::new(Server::new(config.clone()));

    let tcp_shutdown = shutdown_rx.clone();
    let tcp_task = tokio::spawn(tcp::run(server.clone(), config.listen, tcp_shutdown));

    let grpc_task = config.grpc.clone().map(|grpc_cfg| {
        let server = server.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { transport::serve(&grpc_cfg, server, shutdown_rx).await })
    });

    if let Err(err) = tcp_task.await.expect("tcp listener task panicked") {
        error!(%err, "tcp listener exited with error");
        std::process::exit(1);
    }

    if let Some(grpc_task) = grpc_task {
        if let Err(err) = grpc_task.await.expect("grpc listener task panicked") {
            error!(%err, "grpc listener exited with error");
            std::process::exit(1);
        }
    }
}
