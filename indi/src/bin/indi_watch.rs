//! Connects to an INDI server and logs device activity until the
//! connection drops.
//!
//! Set `RUST_LOG` to change verbosity.

use clap::Parser;
use skyhook_indi::{
    BlobMode, ClientConfig, EventMediator, IndiClient, IndiEvent, IndiResult, INDI_DEFAULT_PORT,
};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "indi-watch", version, about)]
struct Cli {
    /// INDI server host
    #[arg(default_value = "localhost")]
    host: String,

    /// INDI server port
    #[arg(default_value_t = INDI_DEFAULT_PORT)]
    port: u16,

    /// Only watch this device, with BLOBs enabled
    device: Option<String>,

    /// Connect timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
}

impl Cli {
    fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(&self.host, Some(self.port));
        config.connection_timeout_ms = self.timeout_ms;
        config
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    if let Err(e) = watch(cli.config(), cli.device.as_deref()).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn watch(config: ClientConfig, device: Option<&str>) -> IndiResult<()> {
    let mediator = EventMediator::default();
    tokio::spawn(log_events(mediator.subscribe()));

    let mut client = IndiClient::with_config(config, Arc::new(mediator));
    client.connect().await?;
    if let Some(device) = device {
        client.watch_device(Some(device)).await?;
        client.set_blob_mode(BlobMode::Also, device, None).await?;
    }
    tracing::info!("Watching {}", client.config().address());
    client.run().await
}

/// Log events until the channel closes; returns how many were logged
async fn log_events(mut events: broadcast::Receiver<IndiEvent>) -> usize {
    let mut logged = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                log_event(event);
                logged += 1;
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Event log fell behind, skipped {} events", skipped)
            }
            Err(RecvError::Closed) => break,
        }
    }
    logged
}

fn log_event(event: IndiEvent) {
    match event {
        IndiEvent::BlobReceived {
            device,
            property,
            element,
            format,
            size,
            ..
        } => tracing::info!("BLOB {}.{}.{}: {} bytes {}", device, property, element, size, format),
        IndiEvent::Message { device, text } => {
            tracing::info!("[{}] {}", device.as_deref().unwrap_or("server"), text)
        }
        other => tracing::debug!("{:?}", other),
    }
}
