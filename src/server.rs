//! DNS server setup and lifecycle management.

use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::classify::{BadAddressPool, ClassificationStore};
use crate::config::{Config, DnsConfig};
use crate::engine::{Classifier, Injector, Mutation, ResolutionEngine};
use crate::error::DnsError;
use crate::handler::ZoneHandler;
use crate::parser::load_zone_file;
use crate::random::StdRandom;
use crate::upstream::DnsUpstream;
use crate::zone::Zone;

/// Interval for emitting state metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically emit zone and classification metrics.
async fn metrics_loop(engine: Arc<ResolutionEngine>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                emit_metrics(&engine);
                debug!(records = engine.zone().len(), "emitted state metrics");
            }
            _ = shutdown.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

fn emit_metrics(engine: &ResolutionEngine) {
    engine.zone().emit_metrics();
    if let Mutation::Classify(classifier) = engine.mutation() {
        classifier.store().emit_metrics();
    }
}

/// Serial stamped on SOA records with default timers.
fn zone_serial() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or_default()
}

/// Build the mutation strategy selected by `config`.
pub fn build_mutation(config: &Config) -> Result<Mutation, DnsError> {
    if config.injection.enabled {
        info!(
            probability = config.injection.probability,
            addresses = config.injection.addresses.len(),
            "injection enabled"
        );
        return Ok(Mutation::Inject(Injector::new(
            config.injection.probability,
            config.injection.addresses.clone(),
        )));
    }

    if config.classification.enabled {
        let classification = &config.classification;
        let pool = BadAddressPool::load(&classification.bad_pool_path)?;
        let store = ClassificationStore::open(
            classification.store_path.clone(),
            pool,
            classification.bad_probability,
        )?;
        info!(
            marker = %classification.name_marker,
            bad_probability = classification.bad_probability,
            "classification enabled"
        );
        return Ok(Mutation::Classify(Classifier::new(
            store,
            &classification.name_marker,
        )));
    }

    Ok(Mutation::Passthrough)
}

/// DNS server answering from a zone file with upstream fallback.
pub struct DnsServer {
    config: DnsConfig,
    engine: Arc<ResolutionEngine>,
}

impl DnsServer {
    /// Create a server around an already built engine.
    pub fn new(config: DnsConfig, engine: ResolutionEngine) -> Self {
        Self {
            config,
            engine: Arc::new(engine),
        }
    }

    /// Load the zone file, resolve the upstream and build the engine
    /// described by `config`.
    pub async fn from_config(config: &Config) -> Result<Self, DnsError> {
        config.validate()?;

        let records = load_zone_file(&config.dns.zone_file, zone_serial())?;
        info!(
            zone_file = %config.dns.zone_file.display(),
            records = records.len(),
            "loaded zone"
        );

        let upstream_addr = config.dns.upstream_addr().await?;
        info!(upstream = %config.dns.upstream, addr = %upstream_addr, "resolved upstream");
        let upstream = DnsUpstream::new(upstream_addr, config.dns.upstream_timeout());
        let engine = ResolutionEngine::new(
            Zone::new(records),
            build_mutation(config)?,
            Arc::new(upstream),
            Arc::new(StdRandom::from_entropy()),
        );

        Ok(Self::new(config.dns.clone(), engine))
    }

    /// Get a reference to the resolution engine.
    pub fn engine(&self) -> &ResolutionEngine {
        &self.engine
    }

    /// Run the DNS server until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DnsError> {
        info!(
            listen_addr = %self.config.listen_addr,
            upstream = %self.config.upstream,
            "Starting snare-dns server"
        );

        let mut server = ServerFuture::new(ZoneHandler::new(self.engine.clone()));

        // Bind UDP
        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        // Bind TCP
        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, self.config.tcp_timeout());

        info!(records = self.engine.zone().len(), "DNS server ready to serve queries");

        // Start metrics loop
        let metrics_engine = self.engine.clone();
        let metrics_shutdown = shutdown.clone();
        let metrics_handle = tokio::spawn(async move {
            metrics_loop(metrics_engine, metrics_shutdown).await;
        });

        // Emit initial metrics
        emit_metrics(&self.engine);

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
            }
        }

        // Make sure the metrics loop stops even if the server exited on its own.
        shutdown.cancel();
        let _ = metrics_handle.await;

        info!("DNS server stopped");
        Ok(())
    }
}
