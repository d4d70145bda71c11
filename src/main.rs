use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info};
use tokio::net::TcpListener;

use crate::args::Args;
use crate::lifecycle::Lifecycle;
use crate::server::AppState;
use crate::swarm::{Config, Swarm};

mod args;
mod bencoding;
mod codec;
mod core;
mod error;
mod flash;
mod lifecycle;
mod magnet;
mod message;
mod server;
mod swarm;
#[cfg(test)]
mod testing;
mod torrent;
mod tracker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    std::env::set_current_dir(&args.root_dir)
        .with_context(|| format!("unable to change to {}", args.root_dir.display()))?;
    lifecycle::ensure_storage_dir(&args.storage_dir)
        .with_context(|| format!("unable to create {}", args.storage_dir.display()))?;

    let config = Config::new(args.storage_dir.clone())
        .with_upload(args.upload)
        .with_port(args.peer_port);
    let swarm = Arc::new(Swarm::new(config));
    if args.peer_port != 0 {
        let addr = (args.listen_address.ip(), args.peer_port).into();
        swarm
            .listen(addr)
            .await
            .with_context(|| format!("unable to listen for peers on {}", addr))?;
    }

    let lifecycle = Lifecycle::new(swarm.clone(), args.storage_dir.clone());
    match lifecycle.recover().await {
        Ok(recovered) => info!("recovered {} torrents", recovered),
        Err(err) => error!("unable to read {}: {}", args.storage_dir.display(), err),
    }

    let listener = TcpListener::bind(args.listen_address)
        .await
        .with_context(|| format!("unable to listen on {}", args.listen_address))?;
    info!("serving on http://{}", listener.local_addr()?);
    let state = AppState {
        swarm: swarm.clone(),
        lifecycle,
    };
    let shutdown = {
        let swarm = swarm.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("unable to wait for ctrl-c: {}", err);
                std::future::pending::<()>().await;
            }
            info!("shutting down");
            swarm.shutdown();
        }
    };
    server::serve(listener, server::router(state, &args.static_dir), shutdown).await?;

    Ok(())
}
