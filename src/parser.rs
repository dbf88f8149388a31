//! Zone file parsing.
//!
//! ```text
//! # comment
//! example.com       A     ["1.2.3.4"]
//! example.com       SOA   ["ns1.example.com", "admin.example.com"]
//! example.com       TXT   some free text
//! long.example.com  TXT   ["first part",
//!                          "second part"]
//! ```
//!
//! A logical record starts on a line that does not begin with whitespace and
//! absorbs every following indented line, trimmed and joined without a
//! separator. Each logical line is `<name> <type> <args>` where `<args>` is a
//! JSON array when it starts with `[` and a single string argument otherwise.

use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::error::{DnsError, RecordError, ZoneParseError};
use crate::record::ZoneRecord;

/// A record definition with continuations folded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    /// 1-based number of the physical line the record starts on.
    pub number: usize,
    /// Joined text.
    pub text: String,
}

/// Fold physical lines into logical records, dropping comments and blanks.
pub fn logical_lines(text: &str) -> Vec<LogicalLine> {
    let mut lines = Vec::new();
    let mut current: Option<LogicalLine> = None;

    for (index, raw) in text.lines().enumerate() {
        if raw.starts_with('#') {
            continue;
        }
        let line = raw.trim_end();
        if line.is_empty() {
            continue;
        }

        let continuation = line.starts_with(char::is_whitespace);
        match current.as_mut() {
            Some(open) if continuation => open.text.push_str(line.trim_start()),
            _ => {
                if let Some(done) = current.take() {
                    lines.push(done);
                }
                current = Some(LogicalLine {
                    number: index + 1,
                    text: line.trim_start().to_string(),
                });
            }
        }
    }

    if let Some(done) = current {
        lines.push(done);
    }
    lines
}

/// Split a logical line into name, type and the raw argument tail.
fn split_fields(line: &str) -> Option<(&str, &str, &str)> {
    let line = line.trim_start();
    let name_end = line.find(char::is_whitespace)?;
    let (name, rest) = line.split_at(name_end);

    let rest = rest.trim_start();
    let type_end = rest.find(char::is_whitespace)?;
    let (rtype, tail) = rest.split_at(type_end);

    let tail = tail.trim();
    if tail.is_empty() {
        return None;
    }
    Some((name, rtype, tail))
}

/// Turn the argument tail into a list of arguments.
fn parse_arguments(tail: &str) -> Result<Vec<Value>, RecordError> {
    if tail.starts_with('[') {
        Ok(serde_json::from_str(tail)?)
    } else {
        Ok(vec![Value::String(tail.to_string())])
    }
}

fn parse_line(line: &str, serial: u32) -> Result<ZoneRecord, RecordError> {
    let (name, rtype, tail) = split_fields(line).ok_or(RecordError::MissingFields)?;
    let args = parse_arguments(tail)?;
    ZoneRecord::from_args(name, rtype, args, serial)
}

/// Parse a zone description into records, preserving order.
///
/// The first bad line aborts the whole parse.
pub fn parse_zone(text: &str, serial: u32) -> Result<Vec<ZoneRecord>, ZoneParseError> {
    logical_lines(text)
        .into_iter()
        .map(|line| {
            parse_line(&line.text, serial).map_err(|cause| ZoneParseError {
                line_number: line.number,
                line: line.text,
                cause,
            })
        })
        .collect()
}

/// Load and parse a zone file.
pub fn load_zone_file(path: &Path, serial: u32) -> Result<Vec<ZoneRecord>, DnsError> {
    if !path.exists() {
        return Err(DnsError::MissingZoneFile(path.to_path_buf()));
    }

    info!(path = %path.display(), "loading zone file");
    let text = std::fs::read_to_string(path)?;
    let records = parse_zone(&text, serial)?;

    for (index, record) in records.iter().enumerate() {
        info!(index = index + 1, record = %record, "zone record");
    }
    info!(count = records.len(), "zone resource records loaded");

    Ok(records)
}
