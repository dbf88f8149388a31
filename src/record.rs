//! Zone records and the rules for building them from zone-file arguments.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use hickory_proto::rr::rdata::{A, AAAA, CNAME, MX, NAPTR, NS, PTR, SOA, SRV, TXT};
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecoder, Restrict};
use serde_json::Value;

use crate::error::RecordError;

/// TTL for NS and SOA records.
pub const AUTHORITY_TTL: u32 = 86_400;

/// TTL for every other record kind.
pub const DEFAULT_TTL: u32 = 300;

/// SOA refresh used when the zone omits timings.
pub const SOA_REFRESH: i32 = 3600;

/// SOA retry used when the zone omits timings.
pub const SOA_RETRY: i32 = 10_800;

/// SOA expire used when the zone omits timings.
pub const SOA_EXPIRE: i32 = 86_400;

/// SOA minimum used when the zone omits timings.
pub const SOA_MINIMUM: u32 = 3600;

/// Longest character-string a TXT record can carry.
pub const TXT_CHUNK_LEN: usize = 255;

/// A question as seen by the resolution pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneQuery {
    /// Queried name.
    pub name: LowerName,
    /// Queried type, possibly `ANY`.
    pub query_type: RecordType,
}

impl ZoneQuery {
    /// Create a query for an already-normalized name.
    pub fn new(name: LowerName, query_type: RecordType) -> Self {
        Self { name, query_type }
    }

    /// Create a query from a textual name.
    pub fn parse(name: &str, query_type: RecordType) -> Result<Self, hickory_proto::ProtoError> {
        Ok(Self::new(LowerName::from(fqdn(name)?), query_type))
    }
}

impl fmt::Display for ZoneQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.query_type)
    }
}

/// A record served from the local zone.
///
/// The owner name is kept lower-cased next to the wire record so matching
/// never has to re-normalize it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneRecord {
    name: LowerName,
    record: Record,
}

impl ZoneRecord {
    /// Build a record from a zone line's name, type and arguments.
    ///
    /// `serial` completes SOA records that only name their servers.
    pub fn from_args(
        name: &str,
        rtype: &str,
        args: Vec<Value>,
        serial: u32,
    ) -> Result<Self, RecordError> {
        let rtype = parse_type(rtype)?;
        let owner = fqdn(name)?;
        let rdata = build_rdata(rtype, &args, serial)?;
        Ok(Self::from_rdata(owner, rdata))
    }

    /// Build an A record, as used for synthetic answers.
    pub fn a(name: &LowerName, addr: Ipv4Addr) -> Self {
        Self::from_rdata(Name::from(name.clone()), RData::A(A::from(addr)))
    }

    fn from_rdata(owner: Name, rdata: RData) -> Self {
        let ttl = ttl_for(rdata.record_type());
        let mut record = Record::from_rdata(owner.clone(), ttl, rdata);
        record.set_dns_class(DNSClass::IN);

        Self {
            name: LowerName::from(owner),
            record,
        }
    }

    /// Owner name, lower-cased.
    pub fn name(&self) -> &LowerName {
        &self.name
    }

    /// Record type.
    pub fn record_type(&self) -> RecordType {
        self.record.record_type()
    }

    /// The wire record.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// IPv4 address carried by an A record.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match self.record.data() {
            RData::A(a) => Some(a.0),
            _ => None,
        }
    }
}

impl fmt::Display for ZoneRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.record, f)
    }
}

/// TTL given to records of `rtype`.
pub fn ttl_for(rtype: RecordType) -> u32 {
    match rtype {
        RecordType::NS | RecordType::SOA => AUTHORITY_TTL,
        _ => DEFAULT_TTL,
    }
}

/// Parse a domain name as fully qualified.
pub fn fqdn(name: &str) -> Result<Name, hickory_proto::ProtoError> {
    let trimmed = name.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Ok(Name::root());
    }
    Name::from_ascii(format!("{trimmed}."))
}

/// Split text into TXT character-strings of at most [`TXT_CHUNK_LEN`] bytes.
///
/// Chunks end on character boundaries and concatenate back to `text`.
pub fn split_txt(text: &str) -> Vec<String> {
    if text.len() <= TXT_CHUNK_LEN {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::with_capacity(text.len() / TXT_CHUNK_LEN + 1);
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + TXT_CHUNK_LEN).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        chunks.push(text[start..end].to_string());
        start = end;
    }
    chunks
}

/// Type names are matched exactly; `a` is not `A`.
fn parse_type(rtype: &str) -> Result<RecordType, RecordError> {
    let rtype = match rtype {
        "A" => RecordType::A,
        "AAAA" => RecordType::AAAA,
        "CAA" => RecordType::CAA,
        "CNAME" => RecordType::CNAME,
        "MX" => RecordType::MX,
        "NAPTR" => RecordType::NAPTR,
        "NS" => RecordType::NS,
        "PTR" => RecordType::PTR,
        "SOA" => RecordType::SOA,
        "SRV" => RecordType::SRV,
        // SPF is served as TXT
        "TXT" | "SPF" => RecordType::TXT,
        _ => return Err(RecordError::UnknownType(rtype.to_string())),
    };
    Ok(rtype)
}

fn build_rdata(rtype: RecordType, args: &[Value], serial: u32) -> Result<RData, RecordError> {
    let rdata = match rtype {
        RecordType::A => {
            arity(rtype, args, &[1], "1")?;
            RData::A(A::from(parse_arg::<Ipv4Addr>(rtype, args, 0)?))
        }
        RecordType::AAAA => {
            arity(rtype, args, &[1], "1")?;
            RData::AAAA(AAAA::from(parse_arg::<Ipv6Addr>(rtype, args, 0)?))
        }
        RecordType::CNAME => {
            arity(rtype, args, &[1], "1")?;
            RData::CNAME(CNAME(name_arg(rtype, args, 0)?))
        }
        RecordType::NS => {
            arity(rtype, args, &[1], "1")?;
            RData::NS(NS(name_arg(rtype, args, 0)?))
        }
        RecordType::PTR => {
            arity(rtype, args, &[1], "1")?;
            RData::PTR(PTR(name_arg(rtype, args, 0)?))
        }
        RecordType::MX => {
            arity(rtype, args, &[1, 2], "1 or 2")?;
            let preference = if args.len() == 2 {
                int_arg(rtype, args, 1)?
            } else {
                10
            };
            RData::MX(MX::new(preference, name_arg(rtype, args, 0)?))
        }
        RecordType::SRV => {
            arity(rtype, args, &[4], "4")?;
            RData::SRV(SRV::new(
                int_arg(rtype, args, 0)?,
                int_arg(rtype, args, 1)?,
                int_arg(rtype, args, 2)?,
                name_arg(rtype, args, 3)?,
            ))
        }
        RecordType::NAPTR => {
            arity(rtype, args, &[6], "6")?;
            RData::NAPTR(NAPTR::new(
                int_arg(rtype, args, 0)?,
                int_arg(rtype, args, 1)?,
                bytes_arg(rtype, args, 2)?,
                bytes_arg(rtype, args, 3)?,
                bytes_arg(rtype, args, 4)?,
                name_arg(rtype, args, 5)?,
            ))
        }
        RecordType::SOA => RData::SOA(build_soa(args, serial)?),
        RecordType::CAA => build_caa(args)?,
        RecordType::TXT => {
            arity(rtype, args, &[1], "1")?;
            RData::TXT(TXT::new(txt_strings(rtype, &args[0])?))
        }
        other => return Err(RecordError::UnknownType(other.to_string())),
    };
    Ok(rdata)
}

fn build_soa(args: &[Value], serial: u32) -> Result<SOA, RecordError> {
    let rtype = RecordType::SOA;
    arity(rtype, args, &[2, 3, 7], "2, 3 or 7")?;

    let mname = name_arg(rtype, args, 0)?;
    let rname = name_arg(rtype, args, 1)?;

    let timings: Vec<Value> = match args.len() {
        2 => {
            return Ok(SOA::new(
                mname,
                rname,
                serial,
                SOA_REFRESH,
                SOA_RETRY,
                SOA_EXPIRE,
                SOA_MINIMUM,
            ))
        }
        3 => match &args[2] {
            Value::Array(times) if times.len() == 5 => times.clone(),
            _ => {
                return Err(invalid(
                    rtype,
                    2,
                    "expected [serial, refresh, retry, expire, minimum]",
                ))
            }
        },
        _ => args[2..].to_vec(),
    };

    Ok(SOA::new(
        mname,
        rname,
        int_arg(rtype, &timings, 0)?,
        int_arg(rtype, &timings, 1)?,
        int_arg(rtype, &timings, 2)?,
        int_arg(rtype, &timings, 3)?,
        int_arg(rtype, &timings, 4)?,
    ))
}

/// `[flags, tag, value]`, assembled in wire form and decoded so the value is
/// checked the same way as a CAA record received off the wire.
fn build_caa(args: &[Value]) -> Result<RData, RecordError> {
    let rtype = RecordType::CAA;
    arity(rtype, args, &[3], "3")?;

    let flags: u8 = int_arg(rtype, args, 0)?;
    let tag = str_arg(rtype, args, 1)?;
    if tag.is_empty() || tag.len() > 15 || !tag.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(invalid(rtype, 1, "tag must be 1 to 15 ASCII letters or digits"));
    }
    let value = str_arg(rtype, args, 2)?;

    let mut wire = Vec::with_capacity(2 + tag.len() + value.len());
    wire.push(flags);
    wire.push(tag.len() as u8);
    wire.extend_from_slice(tag.as_bytes());
    wire.extend_from_slice(value.as_bytes());

    let length = u16::try_from(wire.len()).map_err(|_| invalid(rtype, 2, "value too long"))?;
    let mut decoder = BinDecoder::new(&wire);
    RData::read(&mut decoder, rtype, Restrict::new(length))
        .map_err(|e| invalid(rtype, 2, e.to_string()))
}

fn txt_strings(rtype: RecordType, arg: &Value) -> Result<Vec<String>, RecordError> {
    match arg {
        Value::String(text) => Ok(split_txt(text)),
        Value::Array(parts) => {
            let mut strings = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    Value::String(text) => strings.extend(split_txt(text)),
                    _ => return Err(invalid(rtype, 0, "expected a list of strings")),
                }
            }
            Ok(strings)
        }
        _ => Err(invalid(rtype, 0, "expected a string or a list of strings")),
    }
}

fn arity(
    rtype: RecordType,
    args: &[Value],
    allowed: &[usize],
    expected: &'static str,
) -> Result<(), RecordError> {
    if allowed.contains(&args.len()) {
        Ok(())
    } else {
        Err(RecordError::Arity {
            rtype,
            expected,
            got: args.len(),
        })
    }
}

fn invalid(rtype: RecordType, index: usize, reason: impl Into<String>) -> RecordError {
    RecordError::InvalidArgument {
        rtype,
        index,
        reason: reason.into(),
    }
}

fn str_arg(rtype: RecordType, args: &[Value], index: usize) -> Result<&str, RecordError> {
    args[index]
        .as_str()
        .ok_or_else(|| invalid(rtype, index, "expected a string"))
}

fn name_arg(rtype: RecordType, args: &[Value], index: usize) -> Result<Name, RecordError> {
    Ok(fqdn(str_arg(rtype, args, index)?)?)
}

fn bytes_arg(rtype: RecordType, args: &[Value], index: usize) -> Result<Box<[u8]>, RecordError> {
    Ok(str_arg(rtype, args, index)?
        .as_bytes()
        .to_vec()
        .into_boxed_slice())
}

fn parse_arg<T>(rtype: RecordType, args: &[Value], index: usize) -> Result<T, RecordError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    str_arg(rtype, args, index)?
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(rtype, index, e.to_string()))
}

fn int_arg<T>(rtype: RecordType, args: &[Value], index: usize) -> Result<T, RecordError>
where
    T: TryFrom<i64>,
{
    args[index]
        .as_i64()
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| invalid(rtype, index, format!("expected an integer, got {}", args[index])))
}
