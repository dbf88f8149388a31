//! In-memory zone shared by every listener.
//!
//! Lookups take a read lock and may run concurrently. Injection takes the
//! write lock and re-checks for an existing answer before appending, so two
//! workers racing on the same unknown name publish a single record.

use std::net::Ipv4Addr;
use std::sync::Arc;

use hickory_proto::rr::Record;
use parking_lot::RwLock;
use tracing::debug;

use crate::matcher::{matches, matches_authority};
use crate::metrics;
use crate::record::{ZoneQuery, ZoneRecord};

/// Thread-safe ordered record sequence.
#[derive(Debug, Clone, Default)]
pub struct Zone {
    inner: Arc<RwLock<Vec<ZoneRecord>>>,
}

impl Zone {
    /// Create a zone from parsed records.
    pub fn new(records: Vec<ZoneRecord>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(records)),
        }
    }

    /// Number of records, injected ones included.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when the zone has no records.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Every record matching the query exactly, in zone order.
    pub fn lookup(&self, query: &ZoneQuery) -> Vec<Record> {
        collect(&self.inner.read(), query, matches)
    }

    /// Every SOA record at or above the queried name, in zone order.
    pub fn lookup_authority(&self, query: &ZoneQuery) -> Vec<Record> {
        collect(&self.inner.read(), query, matches_authority)
    }

    /// Addresses of all A records, used as injection candidates.
    pub fn ipv4_addresses(&self) -> Vec<Ipv4Addr> {
        self.inner
            .read()
            .iter()
            .filter_map(ZoneRecord::ipv4)
            .collect()
    }

    /// Append `record` unless `query` already has an exact answer.
    ///
    /// Returns the answer set the query now resolves to and whether the
    /// record was appended.
    pub fn inject(&self, query: &ZoneQuery, record: ZoneRecord) -> (Vec<Record>, bool) {
        let mut records = self.inner.write();

        let existing = collect(&records, query, matches);
        if !existing.is_empty() {
            debug!(query = %query, "answer already injected by another worker");
            return (existing, false);
        }

        debug!(query = %query, record = %record, "injecting record");
        let answer = vec![record.record().clone()];
        records.push(record);
        (answer, true)
    }

    /// Emit zone gauges.
    pub fn emit_metrics(&self) {
        metrics::record_zone_size(self.len());
    }
}

fn collect(
    records: &[ZoneRecord],
    query: &ZoneQuery,
    predicate: fn(&ZoneRecord, &ZoneQuery) -> bool,
) -> Vec<Record> {
    records
        .iter()
        .filter(|record| predicate(record, query))
        .map(|record| record.record().clone())
        .collect()
}
