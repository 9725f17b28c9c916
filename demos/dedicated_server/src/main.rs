//! Headless dedicated server.
//!
//! Clients are simulated in-process: `--bots` clients go through connection approval once the server is up.
//! With `--agones`, the server registers with the Agones SDK sidecar and falls back to hosting on its own
//! if no sidecar answers.
//!
//! Run with
//! - `cargo run -p dedicated_server -- --bots 3`
//! - `cargo run -p dedicated_server -- --agones --agones-port 9358`
mod transport;

use anyhow::Context;
use beacon::prelude::*;
use clap::Parser;
use core::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use transport::LoopbackTransport;

/// CLI options of the dedicated server
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Port the server listens on
    #[arg(long, default_value_t = 7777)]
    port: u16,

    #[arg(long, default_value_t = 8)]
    max_players: usize,

    /// Accept release clients instead of the build type of the server
    #[arg(long)]
    release_clients: bool,

    /// Register with the Agones SDK sidecar
    #[arg(long)]
    agones: bool,

    /// HTTP port of the Agones SDK sidecar
    #[arg(long, env = "AGONES_SDK_HTTP_PORT")]
    agones_port: Option<u16>,

    /// Number of simulated clients
    #[arg(long, default_value_t = 0)]
    bots: u64,
}

impl Cli {
    fn config(&self) -> ServerConfig {
        let config = ServerConfig::default().with_max_connected_players(self.max_players);
        if self.release_clients {
            config.with_debug_build(false)
        } else {
            config
        }
    }

    #[cfg(feature = "agones")]
    fn hosting_adapter(&self) -> anyhow::Result<Option<Arc<dyn HostingAdapter>>> {
        if !self.agones {
            return Ok(None);
        }
        let mut config = AgonesConfig::from_env();
        if let Some(port) = self.agones_port {
            config = config.with_sdk_port(port);
        }
        let adapter = AgonesHostingAdapter::new(config).context("could not create the Agones adapter")?;
        Ok(Some(Arc::new(adapter)))
    }

    #[cfg(not(feature = "agones"))]
    fn hosting_adapter(&self) -> anyhow::Result<Option<Arc<dyn HostingAdapter>>> {
        if self.agones {
            warn!("Built without the agones feature, hosting locally");
        }
        Ok(None)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let (events, receiver) = mpsc::channel(64);
    let transport = LoopbackTransport::new(events.clone());
    let connection_events = Arc::new(ConnectionEventChannel::default());
    let mut notifications = connection_events.subscribe();

    let mut builder = ServerStateMachine::builder(transport.clone())
        .with_config(cli.config())
        .with_events(connection_events);
    if let Some(adapter) = cli.hosting_adapter()? {
        builder = builder.with_hosting_adapter(adapter);
    }
    let mut machine = builder.build();

    let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cli.port);
    machine
        .start_server(Some(Box::new(DirectIp::new(address))))
        .await
        .context("could not start the server")?;

    tokio::spawn({
        let events = events.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, shutting down");
                    let _ = events.send(ServerEvent::ShutdownRequested).await;
                }
                Err(e) => error!("Could not listen for Ctrl-C: {e}"),
            }
        }
    });

    tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            info!(?notification, "Connection notification");
        }
    });

    let bots = cli.bots;
    let is_debug = cli.config().debug_build;
    tokio::spawn(async move {
        for client_id in 1..=bots {
            if let Err(e) = connect_bot(&events, &transport, client_id, is_debug).await {
                warn!(client_id, "Bot could not connect: {e}");
            }
        }
    });

    match machine.run(receiver).await {
        Termination::Shutdown => info!("Dedicated server shut down"),
        Termination::Stopped => info!("Server stopped"),
        Termination::EventsClosed => info!("Event stream closed"),
    }
    Ok(())
}

async fn connect_bot(
    events: &mpsc::Sender<ServerEvent>,
    transport: &LoopbackTransport,
    client_id: ClientId,
    is_debug: bool,
) -> anyhow::Result<()> {
    let payload = ConnectionPayload::new(format!("bot-{client_id}"), format!("Bot {client_id}"), is_debug)
        .encode()?;
    let (respond, response) = oneshot::channel();
    events
        .send(ServerEvent::ApprovalRequested {
            request: ApprovalRequest::new(client_id, payload),
            respond,
        })
        .await?;
    let response = response.await?;
    if !response.approved {
        info!(client_id, reason = ?response.reason, "Bot rejected");
        return Ok(());
    }
    transport.accept(client_id);
    events.send(ServerEvent::ClientConnected(client_id)).await?;
    Ok(())
}
