//! Batch builder
//!
//! Accumulates coerced records per destination table and yields a closed
//! batch when a table reaches the configured record cap or an explicit
//! flush is requested (end of file, end of run, deadline). The grouping
//! key is derived purely from record identity (direction + target +
//! packet), never from arrival order.

use crate::coerce::{coerce, CoercedField};
use crate::decoder::DecodedRecord;
use crate::model::LogCategory;
use std::collections::HashMap;

/// One record after coercion, bound for a destination table
#[derive(Debug, Clone)]
pub struct CoercedRecord {
    pub time_nsec: u64,
    pub fields: Vec<(String, CoercedField)>,
}

impl CoercedRecord {
    /// Coerce every field of a decoded record
    pub fn from_decoded(record: &DecodedRecord) -> Self {
        Self {
            time_nsec: record.time_nsec,
            fields: record
                .fields
                .iter()
                .map(|(name, value)| (name.clone(), coerce(value)))
                .collect(),
        }
    }
}

/// An ordered sequence of coerced records for one destination table
///
/// Flushed atomically: the whole batch is ingested together or retried
/// as a whole.
#[derive(Debug, Clone)]
pub struct Batch {
    pub table: String,
    pub records: Vec<CoercedRecord>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Destination table name for a packet
///
/// `TLM__{TARGET}__{PACKET}` or `CMD__{TARGET}__{PACKET}`, with anything
/// outside `[A-Za-z0-9_]` replaced by `_` so the name is valid on the
/// wire and in SQL.
pub fn table_name(category: LogCategory, target: &str, packet: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect()
    };
    format!(
        "{}__{}__{}",
        category.table_prefix(),
        sanitize(target),
        sanitize(packet)
    )
}

/// Accumulates records into bounded per-table batches
pub struct BatchBuilder {
    max_records: usize,
    pending: HashMap<String, Vec<CoercedRecord>>,
}

impl BatchBuilder {
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            pending: HashMap::new(),
        }
    }

    /// Add one record; returns the closed batch if its table hit the cap
    pub fn push(&mut self, record: &DecodedRecord) -> Option<Batch> {
        let table = table_name(record.category, &record.target, &record.packet);
        let rows = self.pending.entry(table.clone()).or_default();
        rows.push(CoercedRecord::from_decoded(record));

        if rows.len() >= self.max_records {
            let records = std::mem::take(rows);
            Some(Batch { table, records })
        } else {
            None
        }
    }

    /// Number of records currently accumulated across all tables
    pub fn pending_records(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Close and return every non-empty batch
    pub fn flush(&mut self) -> Vec<Batch> {
        let mut batches: Vec<Batch> = self
            .pending
            .drain()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(table, records)| Batch { table, records })
            .collect();
        // Deterministic flush order for logging and tests
        batches.sort_by(|a, b| a.table.cmp(&b.table));
        batches
    }
}
