//! Migration orchestrator
//!
//! Top-level loop: list candidate files newest-first for every configured
//! (category, target) pair, then decode -> coerce -> batch -> ingest ->
//! checkpoint each file in sequence, with deliberate pacing between
//! batches and a longer pause every N files so the migration never
//! competes with live telemetry processing for I/O.
//!
//! State machine per run:
//! `Idle -> Listing -> ProcessingFile -> Pausing -> Listing -> Drained`,
//! with `Error` reachable from `ProcessingFile` on unrecoverable failure.
//!
//! Ordering invariants:
//! - files for one (category, target, packet) key are processed strictly
//!   newest-first;
//! - a key's cursor advances only after every batch of the file has been
//!   acknowledged by the destination, and only forward;
//! - a failed or interrupted file never advances its cursor and is
//!   picked up again on the next run.

use crate::batch::BatchBuilder;
use crate::config::Config;
use crate::decoder::{Decoded, PacketLogDecoder};
use crate::ingest::IngestSink;
use crate::model::{LogCategory, LogFile, ALL_PACKETS};
use crate::progress::ProgressStore;
use crate::storage::LogStore;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tsm_common::MigrateError;

/// Whether the orchestrator exits after one pass or keeps re-listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run exactly one listing pass and exit; files that failed are
    /// retried on the next invocation
    OneShot,
    /// Sleep between passes and keep re-listing until cancelled
    Service,
}

/// Orchestrator state, logged on transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Listing,
    ProcessingFile,
    Pausing,
    Drained,
    Error,
}

/// Currently-defined targets and packets
///
/// Files for targets or packets no longer defined in the system are
/// skipped; `ALL`-packet files always process for a known target.
/// Loaded from a JSON file of the form
/// `{"tlm": {"INST": ["HEALTH"]}, "cmd": {"INST": ["COLLECT"]}}`.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct TargetCatalog {
    #[serde(default)]
    tlm: HashMap<String, HashSet<String>>,
    #[serde(default)]
    cmd: HashMap<String, HashSet<String>>,
}

impl TargetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("parsing target catalog")
    }

    pub fn add_target(
        &mut self,
        target: &str,
        tlm_packets: impl IntoIterator<Item = String>,
        cmd_packets: impl IntoIterator<Item = String>,
    ) {
        self.tlm
            .entry(target.to_string())
            .or_default()
            .extend(tlm_packets);
        self.cmd
            .entry(target.to_string())
            .or_default()
            .extend(cmd_packets);
    }

    pub fn targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self
            .tlm
            .keys()
            .chain(self.cmd.keys())
            .map(String::as_str)
            .collect();
        targets.sort_unstable();
        targets.dedup();
        targets
    }

    /// Should this file be migrated under the current definitions?
    pub fn is_current(&self, file: &LogFile) -> bool {
        let packets = match file.category {
            LogCategory::Telemetry => self.tlm.get(&file.target),
            LogCategory::Command => self.cmd.get(&file.target),
        };
        match packets {
            None => false,
            Some(_) if file.packet == ALL_PACKETS => true,
            Some(packets) => packets.contains(&file.packet),
        }
    }
}

/// Process-wide run state: pacing counters and statistics
///
/// Explicit value passed through the loop rather than ambient globals,
/// so independent sessions can run and be tested side by side.
#[derive(Debug, Default, Clone)]
pub struct MigrationSession {
    pub files_processed: u64,
    pub files_failed: u64,
    pub files_skipped: u64,
    pub records_ingested: u64,
    pub batches_ingested: u64,
    pub decode_faults: u64,
    pub pauses_taken: u64,
    files_since_pause: u32,
}

impl MigrationSession {
    fn summary(&self) -> String {
        format!(
            "files: {} processed, {} failed, {} skipped; records: {}; batches: {}; decode faults: {}; pauses: {}",
            self.files_processed,
            self.files_failed,
            self.files_skipped,
            self.records_ingested,
            self.batches_ingested,
            self.decode_faults,
            self.pauses_taken
        )
    }
}

/// Outcome of processing one file
enum FileOutcome {
    /// Every batch acknowledged; safe to advance the cursor
    Completed { records: u64, faults: u64 },
    /// Cancelled mid-file after finishing the in-flight batch
    Interrupted,
    /// Corruption or exhausted ingestion retries; cursor untouched
    Failed { error: anyhow::Error },
}

/// The migration engine
pub struct Migrator {
    config: Config,
    catalog: TargetCatalog,
    store: Arc<dyn LogStore>,
    sink: Arc<dyn IngestSink>,
    progress: Arc<dyn ProgressStore>,
    cancel: CancellationToken,
    mode: RunMode,
    state: State,
}

impl Migrator {
    pub fn new(
        config: Config,
        catalog: TargetCatalog,
        store: Arc<dyn LogStore>,
        sink: Arc<dyn IngestSink>,
        progress: Arc<dyn ProgressStore>,
        cancel: CancellationToken,
        mode: RunMode,
    ) -> Self {
        Self {
            config,
            catalog,
            store,
            sink,
            progress,
            cancel,
            mode,
            state: State::Idle,
        }
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "State transition");
            self.state = state;
        }
    }

    /// Cancellable sleep; returns true when cancelled
    ///
    /// Always yields at least once so a zero-duration configuration
    /// cannot starve the runtime of an await point.
    async fn pace(&self, duration: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    /// Run one listing pass (one-shot) or keep re-listing until cancelled
    /// (service mode), returning the final session statistics
    pub async fn run(mut self) -> Result<MigrationSession> {
        info!(
            mode = ?self.mode,
            scope = %self.config.scope,
            batch_size = self.config.batch_size,
            "Starting telemetry store migration"
        );

        // Let the other target processes start before generating load
        if self.pace(self.config.initial_delay()).await {
            return Ok(MigrationSession::default());
        }

        let mut session = MigrationSession::default();

        loop {
            let drained = match self.listing_pass(&mut session).await {
                Ok(drained) => drained,
                Err(e) => {
                    self.set_state(State::Error);
                    error!(error = %e, "Migration run failed: {}", session.summary());
                    return Err(e);
                },
            };

            if self.cancel.is_cancelled() {
                info!("Migration cancelled: {}", session.summary());
                return Ok(session);
            }

            if drained {
                self.set_state(State::Drained);
            }

            // A failed file stays pending until the next invocation (or
            // the next service pass); one-shot never retries it in-run
            if self.mode == RunMode::OneShot {
                info!("Migration pass complete: {}", session.summary());
                return Ok(session);
            }

            debug!(drained, "Pass complete; sleeping before next listing pass");
            if self.pace(self.config.pause_duration()).await {
                info!("Migration cancelled: {}", session.summary());
                return Ok(session);
            }
        }
    }

    /// One pass over every configured (category, target): list, filter,
    /// process. Returns true when nothing was left to process.
    async fn listing_pass(&mut self, session: &mut MigrationSession) -> Result<bool> {
        let mut drained = true;

        let targets: Vec<String> = self
            .catalog
            .targets()
            .into_iter()
            .map(String::from)
            .collect();
        for target in targets {
            for category in [LogCategory::Telemetry, LogCategory::Command] {
                if self.cancel.is_cancelled() {
                    return Ok(false);
                }

                self.set_state(State::Listing);
                let files = self
                    .store
                    .list(category, &target)
                    .await
                    .with_context(|| format!("listing {}/{}", category, target))?;

                let pending = self.filter_pending(files, session).await?;
                if !pending.is_empty() {
                    drained = false;
                }

                for file in pending {
                    if self.cancel.is_cancelled() {
                        return Ok(false);
                    }
                    self.process_one(&file, session).await?;

                    // Long pause after a burst of files, so the shared
                    // storage and database get room to breathe
                    if session.files_since_pause >= self.config.files_before_pause {
                        self.set_state(State::Pausing);
                        info!(
                            pause_seconds = self.config.pause_seconds,
                            "Pausing to reduce load on live systems"
                        );
                        session.pauses_taken += 1;
                        session.files_since_pause = 0;
                        if self.pace(self.config.pause_duration()).await {
                            return Ok(false);
                        }
                    }
                }
            }
        }

        Ok(drained)
    }

    /// Drop files that are obsolete or at/before the key's cursor
    async fn filter_pending(
        &self,
        files: Vec<LogFile>,
        session: &mut MigrationSession,
    ) -> Result<Vec<LogFile>> {
        let mut pending = Vec::new();
        let mut cursors: HashMap<String, Option<String>> = HashMap::new();

        for file in files {
            if !self.catalog.is_current(&file) {
                debug!(file = %file.path, "Skipping obsolete target/packet");
                session.files_skipped += 1;
                continue;
            }

            let key = file.cursor_key();
            let cursor = match cursors.get(&key.store_key(&self.config.scope)) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = self.progress.get(&key).await?;
                    cursors.insert(key.store_key(&self.config.scope), fetched.clone());
                    fetched
                },
            };

            // Resume without reprocessing: anything at or before the
            // cursor already made it into the destination
            if let Some(cursor) = cursor {
                if file.cursor_id() <= cursor.as_str() {
                    session.files_skipped += 1;
                    continue;
                }
            }

            pending.push(file);
        }

        Ok(pending)
    }

    /// Process one file end to end and advance its cursor on success
    async fn process_one(&mut self, file: &LogFile, session: &mut MigrationSession) -> Result<()> {
        self.set_state(State::ProcessingFile);
        info!(file = %file.path, "Processing file");

        match self.process_file(file, session).await {
            FileOutcome::Completed { records, faults } => {
                // Durably acknowledged end to end; only now may the
                // cursor move. Files are processed newest-first, so an
                // older completion must never regress the cursor; it
                // only advances.
                let key = file.cursor_key();
                let stored = self
                    .progress
                    .get(&key)
                    .await
                    .with_context(|| format!("reading cursor for {}", key))?;
                if stored.as_deref().is_none_or(|c| file.cursor_id() > c) {
                    self.progress
                        .set(&key, file.cursor_id())
                        .await
                        .with_context(|| format!("advancing cursor for {}", key))?;
                }

                session.files_processed += 1;
                session.files_since_pause += 1;
                session.records_ingested += records;
                session.decode_faults += faults;
                info!(
                    file = %file.path,
                    records,
                    decode_faults = faults,
                    "File migrated"
                );
            },
            FileOutcome::Interrupted => {
                info!(file = %file.path, "Interrupted mid-file; cursor not advanced");
            },
            FileOutcome::Failed { error } => {
                session.files_failed += 1;
                warn!(
                    file = %file.path,
                    error = %error,
                    "File failed; cursor not advanced, will retry next run"
                );
            },
        }

        Ok(())
    }

    /// Decode, coerce, batch, and ingest one file
    async fn process_file(&self, file: &LogFile, session: &mut MigrationSession) -> FileOutcome {
        let data = match self.store.fetch(file).await {
            Ok(data) => data,
            Err(e) => {
                return FileOutcome::Failed {
                    error: e.context("downloading file"),
                }
            },
        };

        let mut decoder =
            match PacketLogDecoder::new(std::io::Cursor::new(&data), file.category) {
                Ok(decoder) => decoder,
                Err(reason) => {
                    return FileOutcome::Failed {
                        error: MigrateError::FileCorruption {
                            path: file.path.clone(),
                            reason,
                        }
                        .into(),
                    }
                },
            };

        let mut builder = BatchBuilder::new(self.config.batch_size);
        let mut records: u64 = 0;

        loop {
            match decoder.next_entry() {
                Decoded::Record(record) => {
                    records += 1;
                    if let Some(batch) = builder.push(&record) {
                        if let Err(reason) = self.ingest_with_retry(&batch, session).await {
                            return reason;
                        }
                        if self.pace(self.config.sleep_duration()).await {
                            return FileOutcome::Interrupted;
                        }
                    }
                },
                Decoded::Skip { reason } => {
                    debug!(file = %file.path, reason = %reason, "Skipping malformed entry");
                },
                Decoded::Fatal { reason } => {
                    // Framing lost; report how far we validly got
                    return FileOutcome::Failed {
                        error: MigrateError::FileCorruption {
                            path: file.path.clone(),
                            reason: format!(
                                "corrupt after offset {}: {}",
                                decoder.offset(),
                                reason
                            ),
                        }
                        .into(),
                    };
                },
                Decoded::Eof => break,
            }
        }

        // End of file is an explicit flush point
        for batch in builder.flush() {
            if let Err(reason) = self.ingest_with_retry(&batch, session).await {
                return reason;
            }
        }

        FileOutcome::Completed {
            records,
            faults: decoder.faults(),
        }
    }

    /// Ingest one batch with bounded retries and exponential backoff
    ///
    /// The adapter reports failure without retrying; retry lives here so
    /// it stays strictly ordered before cursor advancement.
    async fn ingest_with_retry(
        &self,
        batch: &crate::batch::Batch,
        session: &mut MigrationSession,
    ) -> std::result::Result<(), FileOutcome> {
        let attempts = self.config.ingest_retries.max(1);

        for attempt in 1..=attempts {
            match self.sink.ingest(batch).await {
                Ok(()) => {
                    session.batches_ingested += 1;
                    return Ok(());
                },
                Err(e) if attempt < attempts => {
                    let backoff = Duration::from_millis(
                        self.config
                            .ingest_backoff_ms
                            .saturating_mul(2u64.saturating_pow(attempt - 1)),
                    );
                    warn!(
                        table = %batch.table,
                        attempt,
                        error = %e,
                        "Batch ingestion failed, backing off"
                    );
                    if self.pace(backoff).await {
                        return Err(FileOutcome::Interrupted);
                    }
                },
                Err(e) => {
                    return Err(FileOutcome::Failed {
                        error: anyhow::Error::new(e)
                            .context(format!("ingestion failed after {} attempts", attempts)),
                    });
                },
            }
        }

        // attempts >= 1, so the loop always returns
        unreachable!("retry loop exits via return")
    }
}
