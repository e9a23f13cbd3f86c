//! Conditions that decide whether a file needs updating.
//!
//! Each condition tests the installed file and contributes to the decision
//! through its combinator: an `or` condition asks for an update when it
//! holds, an `or-not` condition when it does not. The file needs updating if
//! any condition asks for it. A task without conditions always updates.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::error::{TaskError, TaskResult};
use crate::feed::{Combinator, ConditionDescriptor};
use crate::fetch::calculate_file_checksum;

/// Seconds between 1601-01-01 (file-time epoch) and 1970-01-01.
const FILETIME_UNIX_OFFSET_SECS: u64 = 11_644_473_600;

/// File-time ticks (100 ns) per second.
const FILETIME_TICKS_PER_SEC: u64 = 10_000_000;

/// Convert a Windows file-time integer to a `SystemTime`.
pub fn filetime_to_system_time(filetime: u64) -> SystemTime {
    let secs = filetime / FILETIME_TICKS_PER_SEC;
    let nanos = (filetime % FILETIME_TICKS_PER_SEC) as u32 * 100;
    if secs >= FILETIME_UNIX_OFFSET_SECS {
        UNIX_EPOCH + Duration::new(secs - FILETIME_UNIX_OFFSET_SECS, nanos)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::new(FILETIME_UNIX_OFFSET_SECS - secs, 0))
            .unwrap_or(UNIX_EPOCH)
    }
}

/// Convert a `SystemTime` to a Windows file-time integer.
pub fn system_time_to_filetime(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => {
            (since.as_secs() + FILETIME_UNIX_OFFSET_SECS) * FILETIME_TICKS_PER_SEC
                + u64::from(since.subsec_nanos()) / 100
        }
        Err(e) => FILETIME_UNIX_OFFSET_SECS
            .saturating_sub(e.duration().as_secs())
            .saturating_mul(FILETIME_TICKS_PER_SEC),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeComparison {
    Is,
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateComparison {
    Older,
    Newer,
    Is,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionKind {
    FileExists,
    FileSize { what: SizeComparison, size: u64 },
    FileDate { what: DateComparison, timestamp: SystemTime },
    FileChecksum { sha256: String },
}

/// A parsed, evaluable condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub kind: ConditionKind,
    pub combinator: Combinator,
}

impl Condition {
    pub fn from_descriptor(descriptor: &ConditionDescriptor) -> TaskResult<Self> {
        let kind = match normalized_kind(&descriptor.kind).as_str() {
            "fileexists" => ConditionKind::FileExists,
            "filesize" => ConditionKind::FileSize {
                what: match lowercase(descriptor.field("what").unwrap_or("is")).as_str() {
                    "is" => SizeComparison::Is,
                    "above" => SizeComparison::Above,
                    "below" => SizeComparison::Below,
                    other => return Err(invalid(descriptor, "what", other)),
                },
                size: parse_number(descriptor, "size")?,
            },
            "filedate" => ConditionKind::FileDate {
                what: match lowercase(descriptor.field("what").unwrap_or("older")).as_str() {
                    "older" => DateComparison::Older,
                    "newer" => DateComparison::Newer,
                    "is" => DateComparison::Is,
                    other => return Err(invalid(descriptor, "what", other)),
                },
                timestamp: filetime_to_system_time(parse_number(descriptor, "timestamp")?),
            },
            "filechecksum" => {
                let kind = descriptor.field("checksumType").unwrap_or("sha256");
                if !kind.eq_ignore_ascii_case("sha256") {
                    return Err(invalid(descriptor, "checksumType", kind));
                }
                ConditionKind::FileChecksum {
                    sha256: descriptor.require("checksum")?.to_ascii_lowercase(),
                }
            }
            "fileversion" => {
                return Err(TaskError::Configuration(
                    "file version conditions are not supported; use fileChecksum or fileDate"
                        .to_string(),
                ))
            }
            _ => {
                return Err(TaskError::Configuration(format!(
                    "unknown condition kind '{}'",
                    descriptor.kind
                )))
            }
        };
        Ok(Self {
            kind,
            combinator: descriptor.combinator,
        })
    }

    /// Whether the condition's test holds for the file at `path`.
    ///
    /// Tests other than existence never hold for a missing file.
    pub fn holds(&self, path: &Path) -> TaskResult<bool> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return Ok(false),
        };

        Ok(match &self.kind {
            ConditionKind::FileExists => true,
            ConditionKind::FileSize { what, size } => match what {
                SizeComparison::Is => metadata.len() == *size,
                SizeComparison::Above => metadata.len() > *size,
                SizeComparison::Below => metadata.len() < *size,
            },
            ConditionKind::FileDate { what, timestamp } => {
                let modified = metadata
                    .modified()
                    .map_err(|e| TaskError::io("fileDate condition", path, e))?;
                let file_secs = unix_secs(modified);
                let want_secs = unix_secs(*timestamp);
                match what {
                    DateComparison::Older => file_secs < want_secs,
                    DateComparison::Newer => file_secs > want_secs,
                    DateComparison::Is => file_secs == want_secs,
                }
            }
            ConditionKind::FileChecksum { sha256 } => {
                calculate_file_checksum(path)?.eq_ignore_ascii_case(sha256)
            }
        })
    }

    /// Whether this condition asks for an update of the file at `path`.
    pub fn wants_update(&self, path: &Path) -> TaskResult<bool> {
        let holds = self.holds(path)?;
        Ok(match self.combinator {
            Combinator::Or => holds,
            Combinator::OrNot => !holds,
        })
    }
}

/// Parse every condition descriptor of a task.
pub fn parse_conditions(descriptors: &[ConditionDescriptor]) -> TaskResult<Vec<Condition>> {
    descriptors.iter().map(Condition::from_descriptor).collect()
}

/// Whether the file at `path` needs updating under `conditions`.
pub fn update_needed(conditions: &[Condition], path: &Path) -> TaskResult<bool> {
    if conditions.is_empty() {
        return Ok(true);
    }
    for condition in conditions {
        if condition.wants_update(path)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn normalized_kind(kind: &str) -> String {
    let kind = lowercase(kind);
    kind.strip_suffix("condition").unwrap_or(&kind).to_string()
}

fn lowercase(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

fn unix_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

fn parse_number(descriptor: &ConditionDescriptor, field: &str) -> TaskResult<u64> {
    let raw = descriptor.require(field)?;
    raw.parse().map_err(|_| invalid(descriptor, field, raw))
}

fn invalid(descriptor: &ConditionDescriptor, field: &str, value: &str) -> TaskError {
    TaskError::Configuration(format!(
        "{} condition has invalid value '{}' for '{}'",
        descriptor.kind, value, field
    ))
}
