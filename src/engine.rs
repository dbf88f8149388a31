//! The per-query resolution pipeline.
//!
//! ```text
//! query
//!   → exact zone match               (Stage::Authoritative)
//!   → synthetic A record, if enabled (Stage::Injected)
//!   → SOA at or above the name       (Stage::SoaAuthority)
//!   → upstream, answers optionally
//!     run through classification     (Stage::Upstream)
//! ```
//!
//! The first stage producing records wins. A failing mutation step is logged
//! and treated as a non-match so the query still gets the next stage's answer.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, Record, RecordType};
use tracing::{debug, info, warn};

use crate::classify::ClassificationStore;
use crate::error::DnsError;
use crate::metrics;
use crate::random::RandomSource;
use crate::record::{ZoneQuery, ZoneRecord};
use crate::upstream::Upstream;
use crate::zone::Zone;

/// Pipeline stage that produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Exact match in the zone.
    Authoritative,
    /// Synthetic record created for this query.
    Injected,
    /// SOA of an enclosing zone.
    SoaAuthority,
    /// Upstream reply.
    Upstream,
}

impl Stage {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Authoritative => "authoritative",
            Stage::Injected => "injected",
            Stage::SoaAuthority => "soa_authority",
            Stage::Upstream => "upstream",
        }
    }
}

/// Records and flags to answer a query with.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Stage that produced the answer.
    pub stage: Stage,
    /// Response code to send.
    pub response_code: ResponseCode,
    /// Recursion-available flag to send.
    pub recursion_available: bool,
    /// Answer section.
    pub answers: Vec<Record>,
    /// Authority section.
    pub name_servers: Vec<Record>,
    /// Additional section.
    pub additionals: Vec<Record>,
}

impl Resolution {
    fn local(stage: Stage, answers: Vec<Record>) -> Self {
        Self {
            stage,
            response_code: ResponseCode::NoError,
            recursion_available: true,
            answers,
            name_servers: Vec::new(),
            additionals: Vec::new(),
        }
    }

    fn from_upstream(reply: &Message) -> Self {
        Self {
            stage: Stage::Upstream,
            response_code: reply.response_code(),
            recursion_available: reply.recursion_available(),
            answers: reply.answers().to_vec(),
            name_servers: reply.name_servers().to_vec(),
            additionals: reply.additionals().to_vec(),
        }
    }

    /// True when answered from local data.
    pub fn is_authoritative(&self) -> bool {
        self.stage != Stage::Upstream
    }
}

/// Answers unmatched A queries with a synthetic record that is kept in the
/// zone for later queries.
#[derive(Debug, Clone)]
pub struct Injector {
    probability: f64,
    addresses: Vec<Ipv4Addr>,
}

impl Injector {
    /// Inject with `probability`, picking substitutes from `addresses`, or
    /// from the zone's own A records when `addresses` is empty.
    pub fn new(probability: f64, addresses: Vec<Ipv4Addr>) -> Self {
        Self {
            probability,
            addresses,
        }
    }

    fn substitute(&self, zone: &Zone, random: &dyn RandomSource) -> Result<Ipv4Addr, DnsError> {
        if !self.addresses.is_empty() {
            return Ok(self.addresses[random.index(self.addresses.len())]);
        }

        let known = zone.ipv4_addresses();
        if known.is_empty() {
            return Err(DnsError::Injection(
                "no substitute addresses configured and no A records in zone".to_string(),
            ));
        }
        Ok(known[random.index(known.len())])
    }

    /// Maybe inject a record for `query`; `None` means the draw declined or
    /// the query type is not eligible.
    pub fn inject(
        &self,
        zone: &Zone,
        query: &ZoneQuery,
        random: &dyn RandomSource,
    ) -> Result<Option<Vec<Record>>, DnsError> {
        if !matches!(query.query_type, RecordType::A | RecordType::ANY) {
            return Ok(None);
        }
        if random.probability() >= self.probability {
            return Ok(None);
        }

        let address = self.substitute(zone, random)?;
        let (answers, added) = zone.inject(query, ZoneRecord::a(&query.name, address));
        if added {
            info!(name = %query.name, %address, "no record for name, mapped it");
            metrics::record_injection();
        }
        Ok(Some(answers))
    }
}

/// Rewrites addresses in upstream answers through a [`ClassificationStore`].
#[derive(Debug)]
pub struct Classifier {
    store: ClassificationStore,
    name_marker: String,
}

impl Classifier {
    /// Classify A/AAAA answers whose owner name contains `name_marker`.
    pub fn new(store: ClassificationStore, name_marker: &str) -> Self {
        Self {
            store,
            name_marker: name_marker.to_ascii_lowercase(),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &ClassificationStore {
        &self.store
    }

    /// Whether `record` is subject to classification.
    pub fn applies_to(&self, record: &Record) -> bool {
        matches!(record.record_type(), RecordType::A | RecordType::AAAA)
            && record
                .name()
                .to_string()
                .to_ascii_lowercase()
                .contains(&self.name_marker)
    }

    /// The record to serve in place of `record`.
    pub fn rewrite(&self, record: &Record, random: &dyn RandomSource) -> Record {
        if !self.applies_to(record) {
            return record.clone();
        }

        let address = match record.data() {
            RData::A(a) => IpAddr::V4(a.0),
            RData::AAAA(aaaa) => IpAddr::V6(aaaa.0),
            _ => return record.clone(),
        };

        let verdict = match self.store.classify(address, random) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(%address, error = %e, "classification failed, passing address through");
                metrics::record_mutation_failure("classification");
                return record.clone();
            }
        };
        metrics::record_verdict(verdict.label());

        let served = verdict.address();
        if served == address {
            return record.clone();
        }

        debug!(name = %record.name(), %address, %served, verdict = verdict.label(), "rewriting answer");
        let rdata = match served {
            IpAddr::V4(v4) => RData::A(A::from(v4)),
            IpAddr::V6(v6) => RData::AAAA(AAAA::from(v6)),
        };
        let mut rewritten = Record::from_rdata(record.name().clone(), record.ttl(), rdata);
        rewritten.set_dns_class(record.dns_class());
        rewritten
    }
}

/// Mutation applied on top of plain resolution, fixed at construction.
#[derive(Debug)]
pub enum Mutation {
    /// Zone answers and upstream fallback only.
    Passthrough,
    /// Synthetic answers for unmatched names.
    Inject(Injector),
    /// Classification of upstream addresses.
    Classify(Classifier),
}

/// Resolves queries against the zone, the mutation strategy and upstream.
pub struct ResolutionEngine {
    zone: Zone,
    mutation: Mutation,
    upstream: Arc<dyn Upstream>,
    random: Arc<dyn RandomSource>,
}

impl ResolutionEngine {
    /// Create an engine.
    pub fn new(
        zone: Zone,
        mutation: Mutation,
        upstream: Arc<dyn Upstream>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            zone,
            mutation,
            upstream,
            random,
        }
    }

    /// The served zone.
    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    /// The configured mutation.
    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// Run the pipeline for one query.
    ///
    /// Only an upstream failure is returned as an error.
    pub async fn resolve(&self, query: &ZoneQuery) -> Result<Resolution, DnsError> {
        let answers = self.zone.lookup(query);
        if !answers.is_empty() {
            debug!(query = %query, count = answers.len(), "found zone records");
            return Ok(Resolution::local(Stage::Authoritative, answers));
        }

        if let Mutation::Inject(injector) = &self.mutation {
            match injector.inject(&self.zone, query, self.random.as_ref()) {
                Ok(Some(answers)) => return Ok(Resolution::local(Stage::Injected, answers)),
                Ok(None) => {}
                Err(e) => {
                    warn!(query = %query, error = %e, "injection failed, continuing");
                    metrics::record_mutation_failure("injection");
                }
            }
        }

        let answers = self.zone.lookup_authority(query);
        if !answers.is_empty() {
            debug!(query = %query, "found higher level SOA record");
            return Ok(Resolution::local(Stage::SoaAuthority, answers));
        }

        debug!(query = %query, "no local zone found, proxying");
        let reply = self.upstream.resolve(query).await?;
        let mut resolution = Resolution::from_upstream(&reply);

        if let Mutation::Classify(classifier) = &self.mutation {
            resolution.answers = resolution
                .answers
                .iter()
                .map(|record| classifier.rewrite(record, self.random.as_ref()))
                .collect();
        }

        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::BadAddressPool;
    use crate::parser::parse_zone;
    use crate::random::StdRandom;
    use crate::record::DEFAULT_TTL;
    use async_trait::async_trait;
    use hickory_proto::op::MessageType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Upstream returning fixed answers and counting calls.
    struct StaticUpstream {
        answers: Vec<Record>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StaticUpstream {
        fn answering(answers: Vec<Record>) -> Arc<Self> {
            Arc::new(Self {
                answers,
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                answers: Vec::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for StaticUpstream {
        async fn resolve(&self, _query: &ZoneQuery) -> Result<Message, DnsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DnsError::UpstreamTimeout("127.0.0.1:53".parse().unwrap()));
            }
            let mut reply = Message::new();
            reply.set_message_type(MessageType::Response);
            reply.set_recursion_available(true);
            reply.add_answers(self.answers.clone());
            Ok(reply)
        }
    }

    /// Seeded source that counts probability draws.
    struct Counting {
        inner: StdRandom,
        draws: AtomicUsize,
    }

    impl Counting {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: StdRandom::seeded(11),
                draws: AtomicUsize::new(0),
            })
        }

        fn draws(&self) -> usize {
            self.draws.load(Ordering::SeqCst)
        }
    }

    impl RandomSource for Counting {
        fn probability(&self) -> f64 {
            self.draws.fetch_add(1, Ordering::SeqCst);
            self.inner.probability()
        }

        fn index(&self, len: usize) -> usize {
            self.inner.index(len)
        }
    }

    fn zone(text: &str) -> Zone {
        Zone::new(parse_zone(text, 1).unwrap())
    }

    fn query(name: &str, rtype: RecordType) -> ZoneQuery {
        ZoneQuery::parse(name, rtype).unwrap()
    }

    fn a_record(name: &str, addr: &str) -> Record {
        let q = query(name, RecordType::A);
        ZoneRecord::a(&q.name, addr.parse().unwrap())
            .record()
            .clone()
    }

    fn ipv4_of(record: &Record) -> Ipv4Addr {
        match record.data() {
            RData::A(a) => a.0,
            other => panic!("expected A rdata, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exact_match_answers_locally() {
        let upstream = StaticUpstream::answering(Vec::new());
        let engine = ResolutionEngine::new(
            zone("example.com A [\"1.2.3.4\"]\n"),
            Mutation::Passthrough,
            upstream.clone(),
            Arc::new(StdRandom::seeded(1)),
        );

        let resolution = engine
            .resolve(&query("example.com", RecordType::A))
            .await
            .unwrap();

        assert_eq!(resolution.stage, Stage::Authoritative);
        assert_eq!(resolution.answers.len(), 1);
        assert_eq!(ipv4_of(&resolution.answers[0]), Ipv4Addr::new(1, 2, 3, 4));
        assert_eq!(resolution.answers[0].ttl(), DEFAULT_TTL);
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_any_returns_every_record_for_name() {
        let engine = ResolutionEngine::new(
            zone(
                "example.com A [\"1.2.3.4\"]\n\
                 example.com TXT hello\n\
                 example.com MX [\"mail.example.com\"]\n\
                 other.com A [\"9.9.9.9\"]\n",
            ),
            Mutation::Passthrough,
            StaticUpstream::answering(Vec::new()),
            Arc::new(StdRandom::seeded(1)),
        );

        let resolution = engine
            .resolve(&query("example.com", RecordType::ANY))
            .await
            .unwrap();

        let types: Vec<RecordType> = resolution.answers.iter().map(|r| r.record_type()).collect();
        assert_eq!(types, vec![RecordType::A, RecordType::TXT, RecordType::MX]);
    }

    #[tokio::test]
    async fn test_repeated_queries_are_identical() {
        let engine = ResolutionEngine::new(
            zone("example.com A [\"1.2.3.4\"]\nexample.com A [\"5.6.7.8\"]\n"),
            Mutation::Passthrough,
            StaticUpstream::answering(Vec::new()),
            Arc::new(StdRandom::seeded(1)),
        );
        let q = query("example.com", RecordType::A);

        let first = engine.resolve(&q).await.unwrap();
        let second = engine.resolve(&q).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.answers.len(), 2);
    }

    #[tokio::test]
    async fn test_soa_fallback_for_subdomain() {
        let upstream = StaticUpstream::answering(Vec::new());
        let engine = ResolutionEngine::new(
            zone("example.com SOA [\"ns1.example.com\", \"admin.example.com\"]\n"),
            Mutation::Passthrough,
            upstream.clone(),
            Arc::new(StdRandom::seeded(1)),
        );

        let resolution = engine
            .resolve(&query("sub.example.com", RecordType::A))
            .await
            .unwrap();

        assert_eq!(resolution.stage, Stage::SoaAuthority);
        assert_eq!(resolution.answers.len(), 1);
        assert_eq!(resolution.answers[0].record_type(), RecordType::SOA);
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_name_is_proxied() {
        let upstream = StaticUpstream::answering(vec![a_record("elsewhere.org", "8.8.8.8")]);
        let engine = ResolutionEngine::new(
            zone("example.com A [\"1.2.3.4\"]\n"),
            Mutation::Passthrough,
            upstream.clone(),
            Arc::new(StdRandom::seeded(1)),
        );

        let resolution = engine
            .resolve(&query("elsewhere.org", RecordType::A))
            .await
            .unwrap();

        assert_eq!(resolution.stage, Stage::Upstream);
        assert!(!resolution.is_authoritative());
        assert_eq!(ipv4_of(&resolution.answers[0]), Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn test_upstream_failure_propagates() {
        let engine = ResolutionEngine::new(
            Zone::default(),
            Mutation::Passthrough,
            StaticUpstream::failing(),
            Arc::new(StdRandom::seeded(1)),
        );

        let err = engine
            .resolve(&query("elsewhere.org", RecordType::A))
            .await
            .unwrap_err();
        assert!(matches!(err, DnsError::UpstreamTimeout(_)));
    }

    #[tokio::test]
    async fn test_injection_is_permanent() {
        let upstream = StaticUpstream::answering(Vec::new());
        let random = Counting::new();
        let engine = ResolutionEngine::new(
            zone("example.com A [\"1.2.3.4\"]\n"),
            Mutation::Inject(Injector::new(1.0, vec![Ipv4Addr::new(54, 68, 132, 136)])),
            upstream.clone(),
            random.clone(),
        );
        let q = query("evil.test", RecordType::A);

        let first = engine.resolve(&q).await.unwrap();
        assert_eq!(first.stage, Stage::Injected);
        assert_eq!(ipv4_of(&first.answers[0]), Ipv4Addr::new(54, 68, 132, 136));
        assert_eq!(random.draws(), 1);

        let second = engine.resolve(&q).await.unwrap();
        assert_eq!(second.stage, Stage::Authoritative);
        assert_eq!(second.answers, first.answers);
        assert_eq!(random.draws(), 1);
        assert_eq!(engine.zone().len(), 2);
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_injection_declined_falls_through() {
        let upstream = StaticUpstream::answering(Vec::new());
        let engine = ResolutionEngine::new(
            Zone::default(),
            Mutation::Inject(Injector::new(0.0, vec![Ipv4Addr::new(6, 6, 6, 6)])),
            upstream.clone(),
            Arc::new(StdRandom::seeded(1)),
        );

        let resolution = engine
            .resolve(&query("evil.test", RecordType::A))
            .await
            .unwrap();
        assert_eq!(resolution.stage, Stage::Upstream);
        assert!(engine.zone().is_empty());
    }

    #[tokio::test]
    async fn test_injection_skips_non_address_queries() {
        let random = Counting::new();
        let engine = ResolutionEngine::new(
            Zone::default(),
            Mutation::Inject(Injector::new(1.0, vec![Ipv4Addr::new(6, 6, 6, 6)])),
            StaticUpstream::answering(Vec::new()),
            random.clone(),
        );

        let resolution = engine
            .resolve(&query("evil.test", RecordType::AAAA))
            .await
            .unwrap();
        assert_eq!(resolution.stage, Stage::Upstream);
        assert_eq!(random.draws(), 0);
    }

    #[tokio::test]
    async fn test_injection_reuses_zone_addresses() {
        let engine = ResolutionEngine::new(
            zone("known.example A [\"10.1.1.1\"]\n"),
            Mutation::Inject(Injector::new(1.0, Vec::new())),
            StaticUpstream::answering(Vec::new()),
            Arc::new(StdRandom::seeded(1)),
        );

        let resolution = engine
            .resolve(&query("evil.test", RecordType::A))
            .await
            .unwrap();
        assert_eq!(resolution.stage, Stage::Injected);
        assert_eq!(ipv4_of(&resolution.answers[0]), Ipv4Addr::new(10, 1, 1, 1));
    }

    #[tokio::test]
    async fn test_injection_failure_is_isolated() {
        let upstream = StaticUpstream::answering(Vec::new());
        let engine = ResolutionEngine::new(
            zone("test SOA [\"ns1.test\", \"admin.test\"]\n"),
            Mutation::Inject(Injector::new(1.0, Vec::new())),
            upstream.clone(),
            Arc::new(StdRandom::seeded(1)),
        );

        let resolution = engine
            .resolve(&query("evil.test", RecordType::A))
            .await
            .unwrap();
        assert_eq!(resolution.stage, Stage::SoaAuthority);
        assert_eq!(engine.zone().len(), 1);
        assert_eq!(upstream.calls(), 0);
    }

    fn classifier(dir: &tempfile::TempDir, pool: &[&str], p: f64) -> Classifier {
        let pool = BadAddressPool::new(pool.iter().map(|a| a.parse().unwrap()).collect());
        let store = ClassificationStore::open(dir.path().join("ips.json"), pool, p).unwrap();
        Classifier::new(store, "ntp")
    }

    #[tokio::test]
    async fn test_classification_substitutes_and_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = StaticUpstream::answering(vec![a_record("pool.ntp.org", "5.5.5.5")]);
        let engine = ResolutionEngine::new(
            Zone::default(),
            Mutation::Classify(classifier(&dir, &["9.9.9.9"], 1.0)),
            upstream,
            Arc::new(StdRandom::seeded(1)),
        );
        let q = query("pool.ntp.org", RecordType::A);

        for _ in 0..2 {
            let resolution = engine.resolve(&q).await.unwrap();
            assert_eq!(resolution.answers.len(), 1);
            assert_eq!(ipv4_of(&resolution.answers[0]), Ipv4Addr::new(9, 9, 9, 9));
            assert_eq!(resolution.answers[0].name().to_string(), "pool.ntp.org.");
        }
    }

    #[tokio::test]
    async fn test_classification_ignores_unmarked_names() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = StaticUpstream::answering(vec![a_record("example.org", "5.5.5.5")]);
        let engine = ResolutionEngine::new(
            Zone::default(),
            Mutation::Classify(classifier(&dir, &["9.9.9.9"], 1.0)),
            upstream,
            Arc::new(StdRandom::seeded(1)),
        );

        let resolution = engine
            .resolve(&query("example.org", RecordType::A))
            .await
            .unwrap();
        assert_eq!(ipv4_of(&resolution.answers[0]), Ipv4Addr::new(5, 5, 5, 5));

        let Mutation::Classify(classifier) = engine.mutation() else {
            panic!("expected classifier");
        };
        assert_eq!(classifier.store().bad_count(), 0);
        assert_eq!(classifier.store().good_count(), 0);
    }

    #[tokio::test]
    async fn test_classification_skips_zone_answers() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ResolutionEngine::new(
            zone("time.ntp.example A [\"1.1.1.1\"]\n"),
            Mutation::Classify(classifier(&dir, &["9.9.9.9"], 1.0)),
            StaticUpstream::answering(Vec::new()),
            Arc::new(StdRandom::seeded(1)),
        );

        let resolution = engine
            .resolve(&query("time.ntp.example", RecordType::A))
            .await
            .unwrap();
        assert_eq!(resolution.stage, Stage::Authoritative);
        assert_eq!(ipv4_of(&resolution.answers[0]), Ipv4Addr::new(1, 1, 1, 1));
    }
}
