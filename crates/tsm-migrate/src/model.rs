//! Source file identity and cursor keys
//!
//! Decom log objects live under `{scope}/decom_logs/{tlm|cmd}/{TARGET}/`
//! with basenames of the form
//! `{start}__{end}__{TARGET}__{PACKET}.bin[.gz]` where `start` and `end`
//! are zero-padded `YYYYMMDDHHMMSSnnnnnnnnn` digit strings. Zero padding
//! makes lexicographic order chronological, which is what the cursor
//! comparison relies on.

use serde::{Deserialize, Serialize};

/// Marker for files containing every packet of a target rather than one
pub const ALL_PACKETS: &str = "ALL";

/// Log category: telemetry or command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Telemetry,
    Command,
}

impl LogCategory {
    /// Path segment under `decom_logs/`
    pub fn path_segment(&self) -> &'static str {
        match self {
            LogCategory::Telemetry => "tlm",
            LogCategory::Command => "cmd",
        }
    }

    /// Destination table prefix
    pub fn table_prefix(&self) -> &'static str {
        match self {
            LogCategory::Telemetry => "TLM",
            LogCategory::Command => "CMD",
        }
    }
}

impl std::fmt::Display for LogCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// A single source object in the logs bucket
///
/// Immutable; produced by the listing pass and consumed once per run
/// unless resumed via the progress cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    /// Full object key in the bucket
    pub path: String,
    pub category: LogCategory,
    pub target: String,
    pub packet: String,
    /// Start timestamp digits from the filename, used for ordering and
    /// cursor comparison
    pub start: String,
    pub compressed: bool,
}

impl LogFile {
    /// Parse a bucket key into a `LogFile`
    ///
    /// Returns `None` for keys that are not decom log files (wrong prefix,
    /// wrong extension, or an unparseable basename).
    pub fn from_key(key: &str) -> Option<Self> {
        let category = if key.contains("/decom_logs/tlm/") {
            LogCategory::Telemetry
        } else if key.contains("/decom_logs/cmd/") {
            LogCategory::Command
        } else {
            return None;
        };

        let compressed = key.ends_with(".bin.gz");
        if !compressed && !key.ends_with(".bin") {
            return None;
        }

        let basename = key.rsplit('/').next()?;
        let stem = basename
            .strip_suffix(".bin.gz")
            .or_else(|| basename.strip_suffix(".bin"))?;

        // {start}__{end}__{TARGET}__{PACKET}
        let parts: Vec<&str> = stem.split("__").collect();
        if parts.len() != 4 {
            return None;
        }
        let start = parts[0];
        if start.is_empty() || !start.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        Some(Self {
            path: key.to_string(),
            category,
            target: parts[2].to_string(),
            packet: parts[3].to_string(),
            start: start.to_string(),
            compressed,
        })
    }

    /// File identifier persisted in the progress cursor
    ///
    /// The start timestamp orders files within a key; ties cannot occur
    /// because a (target, packet) pair never opens two logs in the same
    /// nanosecond.
    pub fn cursor_id(&self) -> &str {
        &self.start
    }

    /// Cursor key this file belongs to
    pub fn cursor_key(&self) -> CursorKey {
        CursorKey {
            category: self.category,
            target: self.target.clone(),
            packet: self.packet.clone(),
        }
    }
}

/// Per-(category, target, packet) progress cursor key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CursorKey {
    pub category: LogCategory,
    pub target: String,
    pub packet: String,
}

impl CursorKey {
    /// Key string used in the progress store
    pub fn store_key(&self, scope: &str) -> String {
        format!(
            "{}:migrate:cursor:{}:{}:{}",
            scope, self.category, self.target, self.packet
        )
    }
}

impl std::fmt::Display for CursorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.category, self.target, self.packet)
    }
}

/// Listing prefix for one (scope, category, target)
pub fn listing_prefix(scope: &str, category: LogCategory, target: &str) -> String {
    format!("{}/decom_logs/{}/{}/", scope, category.path_segment(), target)
}
