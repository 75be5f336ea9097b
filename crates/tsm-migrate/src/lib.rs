//! TSM Migrate - Telemetry store migration engine
//!
//! Moves decommutated telemetry and command packet logs from object
//! storage into a time-series database: download, decode, coerce to
//! destination column types, batch, and ingest over the HTTP line
//! protocol, checkpointing a per-(category, target, packet) cursor so
//! interrupted runs resume without reprocessing.
//!
//! # Pipeline
//!
//! - [`storage`]: list and download decom log files, newest first
//! - [`decoder`]: stream framed packet entries out of a file
//! - [`coerce`]: map source field types onto destination column types,
//!   substituting finite sentinels for non-finite floats
//! - [`batch`]: group coerced records into bounded per-table batches
//! - [`ingest`]: serialize batches to the line protocol and POST them
//! - [`progress`]: durable per-key resume cursors
//! - [`orchestrator`]: ties it together with pacing and retries

pub mod batch;
pub mod coerce;
pub mod config;
pub mod decoder;
pub mod ingest;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod storage;
