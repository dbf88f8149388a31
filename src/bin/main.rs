//! snare-dns binary entry point.

use clap::Parser;
use snare_dns::{telemetry, Config, DnsServer};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Zone-serving DNS server with upstream fallback and answer mutation.
#[derive(Parser, Debug)]
#[command(name = "snare-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML). Optional; `SNARE_DNS__*` variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, config::ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder
        .add_source(
            config::Environment::with_prefix("SNARE_DNS")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("injection.addresses"),
        )
        .build()?
        .try_deserialize()
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    let _ = ctrl_c.await;

    info!("shutdown signal received");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config = load_config(args.config.as_ref())?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = ?args.config,
        listen_addr = %config.dns.listen_addr,
        upstream = %config.dns.upstream,
        zone_file = %config.dns.zone_file.display(),
        "Starting snare-dns"
    );

    let server = match DnsServer::from_config(&config).await {
        Ok(server) => server,
        Err(e) => {
            error!("failed to start: {}", e);
            return Err(e.into());
        }
    };

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    if let Err(e) = server.run(shutdown).await {
        error!("DNS server error: {}", e);
        return Err(e.into());
    }

    info!("snare-dns shutdown complete");
    Ok(())
}
