//! Record matching predicates.

use hickory_proto::rr::RecordType;

use crate::record::{ZoneQuery, ZoneRecord};

/// Exact match: same name, and the query asks for `ANY` or the record's type.
pub fn matches(record: &ZoneRecord, query: &ZoneQuery) -> bool {
    query.name == *record.name()
        && (query.query_type == RecordType::ANY || query.query_type == record.record_type())
}

/// Authority match: an SOA record whose name is the query name or one of its
/// parent domains.
pub fn matches_authority(record: &ZoneRecord, query: &ZoneQuery) -> bool {
    record.record_type() == RecordType::SOA && record.name().zone_of(&query.name)
}
