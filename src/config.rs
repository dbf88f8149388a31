//! Configuration types for snare-dns.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::DnsError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    #[serde(default)]
    pub dns: DnsConfig,

    /// Synthetic answer injection ("attack mode").
    #[serde(default)]
    pub injection: InjectionConfig,

    /// Upstream answer classification.
    #[serde(default)]
    pub classification: ClassificationConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Reject option combinations the server cannot run with.
    pub fn validate(&self) -> Result<(), DnsError> {
        check_probability("injection.probability", self.injection.probability)?;
        check_probability(
            "classification.bad_probability",
            self.classification.bad_probability,
        )?;

        if self.injection.enabled && self.classification.enabled {
            return Err(DnsError::Config(
                "injection and classification cannot both be enabled".to_string(),
            ));
        }

        self.dns.upstream_endpoint()?;
        Ok(())
    }
}

fn check_probability(key: &str, value: f64) -> Result<(), DnsError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(DnsError::Config(format!(
            "{key} must be within [0, 1], got {value}"
        )))
    }
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Upstream resolver for unmatched queries: an IP, `ip:port`, `host` or
    /// `host:port`. Host names are resolved once at startup.
    #[serde(default = "default_upstream")]
    pub upstream: String,

    /// Upstream query timeout in seconds.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    /// Idle timeout for TCP clients in seconds.
    #[serde(default = "default_tcp_timeout")]
    pub tcp_timeout_secs: u64,

    /// Zone file to serve.
    #[serde(default = "default_zone_file")]
    pub zone_file: PathBuf,
}

impl DnsConfig {
    /// Upstream as `host:port`, defaulting the port to 53.
    pub fn upstream_endpoint(&self) -> Result<String, DnsError> {
        let upstream = self.upstream.trim();
        let invalid = || DnsError::InvalidAddress(upstream.to_string());

        if upstream.parse::<SocketAddr>().is_ok() {
            return Ok(upstream.to_string());
        }
        if let Ok(ip) = upstream.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, 53).to_string());
        }
        if upstream.is_empty() || upstream.contains(char::is_whitespace) {
            return Err(invalid());
        }

        match upstream.rsplit_once(':') {
            None => Ok(format!("{upstream}:53")),
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(upstream.to_string())
            }
            Some(_) => Err(invalid()),
        }
    }

    /// Resolve the upstream once; the first address returned is used.
    pub async fn upstream_addr(&self) -> Result<SocketAddr, DnsError> {
        let endpoint = self.upstream_endpoint()?;
        let addr = tokio::net::lookup_host(endpoint.as_str())
            .await
            .map_err(|e| DnsError::InvalidAddress(format!("{endpoint}: {e}")))?
            .next()
            .ok_or_else(|| DnsError::InvalidAddress(format!("{endpoint}: no addresses")));
        addr
    }

    /// Upstream query timeout.
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// TCP client timeout.
    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_timeout_secs)
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream: default_upstream(),
            upstream_timeout_secs: default_upstream_timeout(),
            tcp_timeout_secs: default_tcp_timeout(),
            zone_file: default_zone_file(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 53))
}

fn default_upstream() -> String {
    "8.8.8.8".to_string()
}

fn default_upstream_timeout() -> u64 {
    5
}

fn default_tcp_timeout() -> u64 {
    30
}

fn default_zone_file() -> PathBuf {
    PathBuf::from("/zones/zones.txt")
}

/// Synthetic injection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionConfig {
    /// Answer unmatched A queries with synthetic records.
    #[serde(default)]
    pub enabled: bool,

    /// Chance of injecting for an unmatched query.
    #[serde(default = "default_injection_probability")]
    pub probability: f64,

    /// Substitute addresses; empty means reuse the zone's A records.
    #[serde(default = "default_injection_addresses")]
    pub addresses: Vec<Ipv4Addr>,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            probability: default_injection_probability(),
            addresses: default_injection_addresses(),
        }
    }
}

fn default_injection_probability() -> f64 {
    0.2
}

fn default_injection_addresses() -> Vec<Ipv4Addr> {
    vec![Ipv4Addr::new(54, 68, 132, 136)]
}

/// Classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Classify addresses in upstream answers.
    #[serde(default)]
    pub enabled: bool,

    /// Persisted classification map.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// JSON array of substitute addresses.
    #[serde(default = "default_bad_pool_path")]
    pub bad_pool_path: PathBuf,

    /// Chance of classifying a new address as bad.
    #[serde(default = "default_bad_probability")]
    pub bad_probability: f64,

    /// Only answers whose owner name contains this marker are classified.
    #[serde(default = "default_name_marker")]
    pub name_marker: String,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            store_path: default_store_path(),
            bad_pool_path: default_bad_pool_path(),
            bad_probability: default_bad_probability(),
            name_marker: default_name_marker(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("ips.json")
}

fn default_bad_pool_path() -> PathBuf {
    PathBuf::from("bad_ips_pool.json")
}

fn default_bad_probability() -> f64 {
    0.3
}

fn default_name_marker() -> String {
    "ntp".to_string()
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "snare_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
