//! Parser for `ls -l --full-time` output.
//!
//! Containers expose no stat or readdir RPC, so metadata is scraped from
//! coreutils text. The format is not a stable contract: every line is parsed
//! on its own and lines that do not carry enough fields are skipped.
//!
//! A full-time line has nine whitespace separated fields:
//!
//! ```text
//! -rw-r--r-- 1 root root 4096 2024-01-02 15:04:05.123456789 +0800 notes.txt
//! ```
//!
//! The name is everything from the ninth field to the end of the line, so
//! names with embedded spaces survive.

use chrono::{DateTime, NaiveDateTime};

use crate::entry::{EntryKind, RawEntry};
use crate::path;

/// Minimum number of fields a line must have to be parsed.
pub const MIN_FIELDS: usize = 9;

/// Separator between link name and target in symlink lines.
const LINK_ARROW: &str = " -> ";

/// Parse every usable line of an `ls -l --full-time` listing.
pub fn parse_listing(output: &str) -> Vec<RawEntry> {
    output.lines().filter_map(parse_line).collect()
}

/// Parse `ls -ld --full-time <path>` output into a single entry.
///
/// The name field then holds the path as given on the command line, so the
/// entry name is reduced to its final component.
pub fn parse_stat(output: &str) -> Option<RawEntry> {
    let mut entry = output.lines().find_map(parse_line)?;
    let name = path::base_name(&entry.name);
    if !name.is_empty() {
        entry.name = name.to_string();
    }
    Some(entry)
}

/// Parse one listing line, `None` if it is a header or truncated.
pub fn parse_line(line: &str) -> Option<RawEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields = split_fields(line);
    if fields.len() < MIN_FIELDS {
        return None;
    }

    let mode = fields[0].1;
    // Device nodes print "major, minor" where the size would be.
    let shift = usize::from(fields[4].1.ends_with(','));
    if fields.len() < MIN_FIELDS + shift {
        return None;
    }

    let size = if shift == 0 {
        fields[4].1.parse::<u64>().unwrap_or(0)
    } else {
        0
    };
    let modified = parse_timestamp(
        fields[5 + shift].1,
        fields[6 + shift].1,
        fields[7 + shift].1,
    );

    let name_start = fields[8 + shift].0;
    let raw_name = line[name_start..].trim_end();

    let mut kind = match mode.as_bytes().first() {
        Some(b'd') => EntryKind::Directory,
        Some(b'l') => EntryKind::Symlink,
        _ => EntryKind::File,
    };

    let (name, link_target) = match (kind, raw_name.split_once(LINK_ARROW)) {
        (EntryKind::Symlink, Some((name, target))) => (name.to_string(), Some(target.to_string())),
        _ => (raw_name.to_string(), None),
    };
    if name.is_empty() {
        return None;
    }
    if kind == EntryKind::Symlink && link_target.is_none() {
        kind = EntryKind::File;
    }

    let bytes = mode.as_bytes();
    Some(RawEntry {
        name,
        kind,
        size,
        modified,
        can_read: bytes.get(1) == Some(&b'r'),
        can_write: bytes.get(2) == Some(&b'w'),
        link_target,
    })
}

/// Split a line into fields, keeping each field's byte offset.
fn split_fields(line: &str) -> Vec<(usize, &str)> {
    let mut fields = Vec::new();
    let mut start = None;
    for (idx, ch) in line.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                fields.push((s, &line[s..idx]));
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(s) = start {
        fields.push((s, &line[s..]));
    }
    fields
}

/// Unix seconds of a full-time stamp, 0 when unparsable.
fn parse_timestamp(date: &str, time: &str, zone: &str) -> i64 {
    let stamp = format!("{date} {time} {zone}");
    if let Ok(parsed) = DateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S%.f %z") {
        return parsed.timestamp();
    }
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc().timestamp())
        .unwrap_or(0)
}
