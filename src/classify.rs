//! Good/bad address classification with persistent, stable decisions.
//!
//! Every address seen in a filtered upstream answer is classified once. Bad
//! addresses are replaced by a member of a fixed pool, good ones pass
//! through, and the decision is written to disk so it survives restarts.
//!
//! Store file format:
//!
//! ```json
//! {
//!   "bad": { "5.5.5.5": "9.9.9.9" },
//!   "good": { "1.2.3.4": "A", "2001:db8::1": "AAAA" }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::DnsError;
use crate::metrics;
use crate::random::RandomSource;

/// Fixed inventory of substitute addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadAddressPool {
    addresses: Vec<IpAddr>,
}

impl BadAddressPool {
    /// Create a pool from addresses.
    pub fn new(addresses: Vec<IpAddr>) -> Self {
        Self { addresses }
    }

    /// Load a pool from a JSON array of address strings.
    pub fn load(path: &Path) -> Result<Self, DnsError> {
        let pool_error = |reason: String| DnsError::BadAddressPool {
            path: path.to_path_buf(),
            reason,
        };

        let text = std::fs::read_to_string(path).map_err(|e| pool_error(e.to_string()))?;
        let raw: Vec<String> = serde_json::from_str(&text).map_err(|e| pool_error(e.to_string()))?;

        let addresses = raw
            .iter()
            .map(|a| {
                a.trim()
                    .parse::<IpAddr>()
                    .map_err(|e| pool_error(format!("{a:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if addresses.is_empty() {
            return Err(pool_error("pool is empty".to_string()));
        }

        info!(path = %path.display(), size = addresses.len(), "loaded bad-address pool");
        Ok(Self::new(addresses))
    }

    /// Number of addresses in the pool.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// True when the pool has no addresses.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Pool members in load order.
    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }
}

/// Record kind an address is served as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressKind {
    /// IPv4, served as A.
    A,
    /// IPv6, served as AAAA.
    AAAA,
}

impl AddressKind {
    /// Kind matching the address family.
    pub fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => AddressKind::A,
            IpAddr::V6(_) => AddressKind::AAAA,
        }
    }
}

/// Stored decision for an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Served unchanged.
    Good,
    /// Replaced by the given pool member.
    Bad(IpAddr),
}

/// Outcome of a single classification call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Good address, returned unchanged.
    Good(IpAddr),
    /// Bad address, replaced by its pool substitute.
    Bad(IpAddr),
    /// Pool exhausted on a bad draw; a random pool member is served.
    /// Nothing is recorded for the original address.
    Substituted(IpAddr),
    /// Pool exhausted on a good draw; a previously recorded good address is
    /// served instead. Nothing is recorded for the original address.
    Reassigned(IpAddr),
    /// Pool exhausted and no good address of the same kind is known; the
    /// original address passes through unrecorded.
    Unrecorded(IpAddr),
}

impl Verdict {
    /// Address to put in the answer.
    pub fn address(&self) -> IpAddr {
        match *self {
            Verdict::Good(a)
            | Verdict::Bad(a)
            | Verdict::Substituted(a)
            | Verdict::Reassigned(a)
            | Verdict::Unrecorded(a) => a,
        }
    }

    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Good(_) => "good",
            Verdict::Bad(_) => "bad",
            Verdict::Substituted(_) => "substituted",
            Verdict::Reassigned(_) => "reassigned",
            Verdict::Unrecorded(_) => "unrecorded",
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    good: BTreeMap<String, AddressKind>,
    #[serde(default)]
    bad: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Entries {
    good: BTreeMap<IpAddr, AddressKind>,
    bad: BTreeMap<IpAddr, IpAddr>,
}

impl Entries {
    fn from_file(file: StoreFile) -> Result<Self, String> {
        let parse = |s: &str| {
            s.parse::<IpAddr>()
                .map_err(|e| format!("invalid address {s:?}: {e}"))
        };

        let mut entries = Entries::default();
        for (address, kind) in &file.good {
            entries.good.insert(parse(address)?, *kind);
        }
        for (address, substitute) in &file.bad {
            entries.bad.insert(parse(address)?, parse(substitute)?);
        }
        Ok(entries)
    }

    fn to_file(&self) -> StoreFile {
        StoreFile {
            good: self
                .good
                .iter()
                .map(|(a, k)| (a.to_string(), *k))
                .collect(),
            bad: self
                .bad
                .iter()
                .map(|(a, s)| (a.to_string(), s.to_string()))
                .collect(),
        }
    }
}

/// Persistent classification map.
///
/// All decisions for an address are made under one lock, so concurrent first
/// sightings of the same address agree.
#[derive(Debug)]
pub struct ClassificationStore {
    path: PathBuf,
    pool: BadAddressPool,
    bad_probability: f64,
    entries: Mutex<Entries>,
}

impl ClassificationStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(
        path: impl Into<PathBuf>,
        pool: BadAddressPool,
        bad_probability: f64,
    ) -> Result<Self, DnsError> {
        let path = path.into();

        let entries = if path.exists() {
            let store_error = |reason: String| DnsError::ClassificationStore {
                path: path.clone(),
                reason,
            };
            let text = std::fs::read_to_string(&path).map_err(|e| store_error(e.to_string()))?;
            let file: StoreFile =
                serde_json::from_str(&text).map_err(|e| store_error(e.to_string()))?;
            Entries::from_file(file).map_err(store_error)?
        } else {
            Entries::default()
        };

        if entries.bad.len() > pool.len() {
            warn!(
                bad = entries.bad.len(),
                pool = pool.len(),
                "stored bad entries exceed pool size"
            );
        }

        info!(
            path = %path.display(),
            good = entries.good.len(),
            bad = entries.bad.len(),
            "opened classification store"
        );

        Ok(Self {
            path,
            pool,
            bad_probability,
            entries: Mutex::new(entries),
        })
    }

    /// Decide what to serve for `address`, recording first sightings.
    ///
    /// On a persistence failure the new entry is dropped again and the error
    /// returned, leaving the store as it was.
    ///
    /// The store file is rewritten synchronously while the lock is held, so a
    /// first sighting blocks the calling runtime worker for one small file
    /// write. Writes happen at most once per distinct address.
    pub fn classify(
        &self,
        address: IpAddr,
        random: &dyn RandomSource,
    ) -> Result<Verdict, DnsError> {
        let mut entries = self.entries.lock();

        if entries.good.contains_key(&address) {
            return Ok(Verdict::Good(address));
        }
        if let Some(substitute) = entries.bad.get(&address) {
            return Ok(Verdict::Bad(*substitute));
        }

        let has_capacity = entries.bad.len() < self.pool.len();
        let draw = random.probability();

        if draw < self.bad_probability {
            if !has_capacity {
                if self.pool.is_empty() {
                    return Ok(Verdict::Unrecorded(address));
                }
                let substitute = self.pool.addresses()[random.index(self.pool.len())];
                debug!(%address, %substitute, "pool exhausted, substituting without recording");
                return Ok(Verdict::Substituted(substitute));
            }

            let used: BTreeSet<IpAddr> = entries.bad.values().copied().collect();
            let free: Vec<IpAddr> = self
                .pool
                .addresses()
                .iter()
                .filter(|a| !used.contains(a))
                .copied()
                .collect();

            // duplicate pool entries can leave nothing free below capacity
            if !free.is_empty() {
                let substitute = free[random.index(free.len())];
                entries.bad.insert(address, substitute);
                if let Err(e) = self.persist(&entries) {
                    entries.bad.remove(&address);
                    return Err(e);
                }
                debug!(%address, %substitute, "classified bad");
                return Ok(Verdict::Bad(substitute));
            }
        }

        if has_capacity {
            entries.good.insert(address, AddressKind::of(&address));
            if let Err(e) = self.persist(&entries) {
                entries.good.remove(&address);
                return Err(e);
            }
            debug!(%address, "classified good");
            return Ok(Verdict::Good(address));
        }

        let kind = AddressKind::of(&address);
        let candidates: Vec<IpAddr> = entries
            .good
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(a, _)| *a)
            .collect();

        if candidates.is_empty() {
            debug!(%address, "pool exhausted and no good address to reassign");
            return Ok(Verdict::Unrecorded(address));
        }

        let reassigned = candidates[random.index(candidates.len())];
        debug!(%address, %reassigned, "pool exhausted, reassigning good address");
        Ok(Verdict::Reassigned(reassigned))
    }

    /// Stored decision for `address`, if any.
    pub fn lookup(&self, address: &IpAddr) -> Option<Classification> {
        let entries = self.entries.lock();
        if entries.good.contains_key(address) {
            return Some(Classification::Good);
        }
        entries.bad.get(address).map(|s| Classification::Bad(*s))
    }

    /// Number of good entries.
    pub fn good_count(&self) -> usize {
        self.entries.lock().good.len()
    }

    /// Number of bad entries. Never exceeds the pool size.
    pub fn bad_count(&self) -> usize {
        self.entries.lock().bad.len()
    }

    /// The substitute pool.
    pub fn pool(&self) -> &BadAddressPool {
        &self.pool
    }

    /// Emit store gauges.
    pub fn emit_metrics(&self) {
        let entries = self.entries.lock();
        metrics::record_classification_counts(entries.good.len(), entries.bad.len());
    }

    /// Rewrite the whole store file through a temp file and rename.
    fn persist(&self, entries: &Entries) -> Result<(), DnsError> {
        let store_error = |reason: String| DnsError::ClassificationStore {
            path: self.path.clone(),
            reason,
        };

        let json = serde_json::to_string_pretty(&entries.to_file())
            .map_err(|e| store_error(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, json).map_err(|e| store_error(format!("write {tmp:?}: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| store_error(format!("rename {tmp:?}: {e}")))?;
        Ok(())
    }
}
