//! Snare DNS - a zone-serving DNS server with upstream fallback and answer
//! mutation.
//!
//! Queries are answered from a flat zone file where possible and proxied to an
//! upstream resolver otherwise. Two optional mutations turn the server into a
//! test fixture for clients that trust whatever DNS tells them:
//!
//! - **Injection**: unmatched A queries get a synthetic answer which is then
//!   kept in the zone, so the same lie is told consistently.
//! - **Classification**: addresses in upstream answers for selected names are
//!   sorted into good and bad once, persisted, and bad ones swapped for a
//!   substitute from a pool.
//!
//! ## Resolution
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐   ┌──────────────────────────────┐
//! │ zone file  │──▶│     Zone      │◀──│       ResolutionEngine       │
//! │ (parser)   │   │ (in-memory)   │   │                              │
//! └────────────┘   └───────────────┘   │  1. exact match              │
//!                                      │  2. injection (optional)     │◀── UDP/TCP
//! ┌────────────┐                       │  3. SOA authority            │    :53
//! │  upstream  │◀──────────────────────│  4. upstream                 │
//! └────────────┘                       │     + classification         │
//!                                      └──────────────┬───────────────┘
//!                                                     │
//!                                      ┌──────────────▼───────────────┐
//!                                      │ ClassificationStore (JSON)   │
//!                                      └──────────────────────────────┘
//! ```
//!
//! ## Zone file
//!
//! ```text
//! # comment
//! example.com     A     ["1.2.3.4"]
//! example.com     TXT   hello world
//! example.com     SOA   ["ns1.example.com", "admin.example.com"]
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use snare_dns::{Config, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut config = Config::default();
//!     config.dns.listen_addr = "127.0.0.1:5353".parse().unwrap();
//!     config.dns.zone_file = "zones.txt".into();
//!
//!     let server = DnsServer::from_config(&config).await.unwrap();
//!     server.run(CancellationToken::new()).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod matcher;
pub mod metrics;
pub mod parser;
pub mod random;
pub mod record;
pub mod server;
pub mod telemetry;
pub mod upstream;
pub mod zone;

// Re-export main types
pub use classify::{BadAddressPool, ClassificationStore, Verdict};
pub use config::{ClassificationConfig, Config, DnsConfig, InjectionConfig, TelemetryConfig};
pub use engine::{Classifier, Injector, Mutation, Resolution, ResolutionEngine, Stage};
pub use error::{DnsError, RecordError, ZoneParseError};
pub use handler::ZoneHandler;
pub use record::{ZoneQuery, ZoneRecord};
pub use server::DnsServer;
pub use zone::Zone;
