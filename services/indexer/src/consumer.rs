//! Stream consumer loop
//!
//! One consumer per logical stream. A producer task forwards source
//! entries into a bounded channel (capacity = high-water mark, so a slow
//! store stops the source instead of growing a buffer). The consumer waits
//! for the first buffered entry, drains up to `batch_size` more without
//! waiting, and applies the batch in one transaction that also upserts the
//! stream cursor. Nothing of a failed batch is committed; transient
//! failures retry the identical batch with backoff, everything else stops
//! the loop. Shutdown is honoured between batches and during backoff, never
//! inside a transaction.
//!
//! State: `Idle → Fetching → Buffering → Draining → Committing → Idle`,
//! `Stopped` once the loop exits for any reason.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;
use venue_store::{load_cursor, save_cursor, Cursor, RelationalStore, StoreError, Transaction};

use crate::decoder::{DecodeError, Decoded, Decoder, MalformedPolicy, StreamSchema};
use crate::dispatcher;
use crate::handlers::{HandlerContext, HandlerError};
use crate::metrics::ConsumerMetrics;
use crate::source::{EntryStream, SourceError, StreamEntry, StreamSource};

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per batch, the first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling from the initial backoff.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub stream: String,
    pub schema: StreamSchema,
    pub batch_size: usize,
    /// Entries buffered ahead of the batch being applied.
    pub high_water_mark: usize,
    /// Upper bound on one batch transaction, commit included.
    pub batch_timeout: Duration,
    pub retry: RetryPolicy,
    pub malformed: MalformedPolicy,
    /// Resubscribe after this delay when the source runs dry; `None` stops.
    pub follow: Option<Duration>,
}

impl ConsumerConfig {
    pub fn new(stream: impl Into<String>, schema: StreamSchema) -> Self {
        Self {
            stream: stream.into(),
            schema,
            batch_size: 100,
            high_water_mark: 1000,
            batch_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            malformed: schema.default_policy(),
            follow: None,
        }
    }
}

// ── State and results ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    /// Waiting for the next entry.
    Fetching,
    /// Draining the buffer into a batch.
    Buffering,
    /// Applying a batch of `entries`.
    Draining { entries: usize },
    Committing,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    SourceExhausted,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerReport {
    pub stream: String,
    pub batches_committed: u64,
    /// Entries dispatched, undo entries included.
    pub entries_applied: u64,
    pub undo_applied: u64,
    pub skipped: u64,
    pub retries: u64,
    pub last_cursor: Cursor,
    pub exit: ExitReason,
}

#[derive(Debug, Default)]
struct BatchOutcome {
    applied: u64,
    undone: u64,
    skipped: u64,
    last: Cursor,
}

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Decode error at cursor {cursor}: {source}")]
    Decode {
        cursor: Cursor,
        #[source]
        source: DecodeError,
    },

    #[error("Handler error at cursor {cursor} ({kind}): {source}")]
    Handler {
        cursor: Cursor,
        kind: &'static str,
        #[source]
        source: HandlerError,
    },

    #[error("Batch ending at cursor {cursor} timed out after {after:?}")]
    Timeout { cursor: Cursor, after: Duration },

    #[error("Batch failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ConsumerError>,
    },
}

impl ConsumerError {
    /// Whether the identical batch may succeed on another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ConsumerError::Store(e) => e.is_transient(),
            ConsumerError::Handler { source, .. } => source.is_transient(),
            ConsumerError::Timeout { .. } => true,
            ConsumerError::Source(_)
            | ConsumerError::Decode { .. }
            | ConsumerError::RetriesExhausted { .. } => false,
        }
    }
}

// ── Consumer ────────────────────────────────────────────────────────

/// Resolves once shutdown is requested. A dropped sender never requests it.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

async fn forward(
    mut entries: EntryStream,
    sender: mpsc::Sender<Result<StreamEntry, SourceError>>,
) {
    while let Some(item) = entries.next().await {
        let failed = item.is_err();
        if sender.send(item).await.is_err() || failed {
            break;
        }
    }
}

pub struct Consumer<S: RelationalStore> {
    store: S,
    config: ConsumerConfig,
    decoder: Decoder,
    metrics: Arc<ConsumerMetrics>,
    state: watch::Sender<ConsumerState>,
}

impl<S: RelationalStore> Consumer<S> {
    pub fn new(store: S, config: ConsumerConfig) -> Self {
        let decoder = Decoder::new(config.schema, config.malformed);
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            store,
            config,
            decoder,
            metrics: Arc::new(ConsumerMetrics::new()),
            state,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<ConsumerMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    /// Consume the stream until it runs dry (unless following), shutdown is
    /// requested, or a fatal error occurs.
    pub async fn run(
        &self,
        source: &dyn StreamSource,
        shutdown: watch::Receiver<bool>,
    ) -> Result<ConsumerReport, ConsumerError> {
        let run_id = Uuid::now_v7();
        let span = info_span!("consumer", stream = %self.config.stream, run_id = %run_id);
        let result = self.run_inner(source, shutdown).instrument(span).await;

        self.set_state(ConsumerState::Stopped);
        self.metrics.log_summary(&self.config.stream);
        match &result {
            Ok(report) => info!(
                stream = %self.config.stream,
                exit = ?report.exit,
                cursor = %report.last_cursor,
                "Consumer stopped"
            ),
            Err(e) => error!(stream = %self.config.stream, error = %e, "Consumer failed"),
        }
        result
    }

    async fn run_inner(
        &self,
        source: &dyn StreamSource,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ConsumerReport, ConsumerError> {
        let stream = self.config.stream.clone();
        let start = {
            let mut tx = self.store.begin().await?;
            load_cursor(&mut tx, &stream).await?
        };
        info!(
            stream = %stream,
            schema = %self.config.schema,
            cursor = %start,
            batch_size = self.config.batch_size,
            high_water_mark = self.config.high_water_mark,
            "Consumer starting"
        );

        let mut report = ConsumerReport {
            stream: stream.clone(),
            batches_committed: 0,
            entries_applied: 0,
            undo_applied: 0,
            skipped: 0,
            retries: 0,
            last_cursor: start,
            exit: ExitReason::SourceExhausted,
        };

        loop {
            self.set_state(ConsumerState::Fetching);
            let entries = source.subscribe(&stream, report.last_cursor).await?;
            let exit = self.consume(entries, &mut shutdown, &mut report).await?;

            match (exit, self.config.follow) {
                (ExitReason::SourceExhausted, Some(delay)) => {
                    self.set_state(ConsumerState::Idle);
                    tokio::select! {
                        biased;
                        _ = wait_for_shutdown(&mut shutdown) => {
                            report.exit = ExitReason::Shutdown;
                            return Ok(report);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                (exit, _) => {
                    report.exit = exit;
                    return Ok(report);
                }
            }
        }
    }

    /// Drain one subscription.
    async fn consume(
        &self,
        entries: EntryStream,
        shutdown: &mut watch::Receiver<bool>,
        report: &mut ConsumerReport,
    ) -> Result<ExitReason, ConsumerError> {
        let (sender, mut receiver) = mpsc::channel(self.config.high_water_mark.max(1));
        let producer = tokio::spawn(forward(entries, sender));
        let result = self.drain(&mut receiver, shutdown, report).await;
        producer.abort();
        result
    }

    async fn drain(
        &self,
        receiver: &mut mpsc::Receiver<Result<StreamEntry, SourceError>>,
        shutdown: &mut watch::Receiver<bool>,
        report: &mut ConsumerReport,
    ) -> Result<ExitReason, ConsumerError> {
        let batch_size = self.config.batch_size.max(1);
        loop {
            self.set_state(ConsumerState::Fetching);
            let next = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => return Ok(ExitReason::Shutdown),
                next = receiver.recv() => next,
            };
            let first = match next {
                None => return Ok(ExitReason::SourceExhausted),
                Some(entry) => entry?,
            };

            self.set_state(ConsumerState::Buffering);
            let mut batch = Vec::with_capacity(batch_size);
            let mut pending = None;
            let mut candidate = Some(first);
            while let Some(entry) = candidate.take() {
                let last = batch
                    .last()
                    .map(|e: &StreamEntry| e.cursor)
                    .unwrap_or(report.last_cursor);
                if entry.cursor > last {
                    batch.push(entry);
                } else {
                    debug!(cursor = %entry.cursor, last = %last, "Dropping redelivered entry");
                }
                if batch.len() >= batch_size {
                    break;
                }
                match receiver.try_recv() {
                    Ok(Ok(entry)) => candidate = Some(entry),
                    Ok(Err(e)) => pending = Some(e),
                    Err(_) => {}
                }
            }

            if !batch.is_empty() {
                self.set_state(ConsumerState::Draining {
                    entries: batch.len(),
                });
                let outcome = match self.apply_with_retry(&batch, shutdown, report).await? {
                    Some(outcome) => outcome,
                    None => return Ok(ExitReason::Shutdown),
                };
                report.batches_committed += 1;
                report.entries_applied += outcome.applied;
                report.undo_applied += outcome.undone;
                report.skipped += outcome.skipped;
                report.last_cursor = outcome.last;
                self.set_state(ConsumerState::Idle);
            }

            if let Some(e) = pending {
                return Err(e.into());
            }
        }
    }

    /// `None` when shutdown arrived while waiting to retry; nothing of the
    /// batch was committed then.
    async fn apply_with_retry(
        &self,
        batch: &[StreamEntry],
        shutdown: &mut watch::Receiver<bool>,
        report: &mut ConsumerReport,
    ) -> Result<Option<BatchOutcome>, ConsumerError> {
        let last = batch.last().map(|e| e.cursor).unwrap_or(report.last_cursor);
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let started = Instant::now();
            let result =
                match tokio::time::timeout(self.config.batch_timeout, self.apply_batch(batch))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ConsumerError::Timeout {
                        cursor: last,
                        after: self.config.batch_timeout,
                    }),
                };

            match result {
                Ok(outcome) => {
                    self.metrics.record_commit(
                        outcome.applied,
                        outcome.undone,
                        outcome.skipped,
                        outcome.last.0,
                        started.elapsed().as_nanos() as u64,
                    );
                    info!(
                        entries = batch.len(),
                        applied = outcome.applied,
                        undone = outcome.undone,
                        skipped = outcome.skipped,
                        cursor = %outcome.last,
                        attempt,
                        "Batch committed"
                    );
                    return Ok(Some(outcome));
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    self.metrics.record_abort();
                    self.metrics.record_retry();
                    report.retries += 1;
                    let delay = self.config.retry.backoff(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Batch aborted, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = wait_for_shutdown(shutdown) => {
                            info!(cursor = %last, attempt, "Shutdown during retry backoff");
                            return Ok(None);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    self.metrics.record_abort();
                    error!(error = %e, attempts = attempt, "Batch retries exhausted");
                    return Err(ConsumerError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    self.metrics.record_abort();
                    error!(error = %e, cursor = %last, "Fatal batch error");
                    return Err(e);
                }
            }
        }
    }

    /// One transaction: every entry, then the cursor, then commit.
    async fn apply_batch(&self, batch: &[StreamEntry]) -> Result<BatchOutcome, ConsumerError> {
        let mut tx = self.store.begin().await?;
        let mut outcome = BatchOutcome::default();

        for entry in batch {
            outcome.last = entry.cursor;
            let event = match self
                .decoder
                .decode(&entry.payload)
                .map_err(|source| ConsumerError::Decode {
                    cursor: entry.cursor,
                    source,
                })? {
                Decoded::Event(event) => event,
                Decoded::Skipped { reason } => {
                    debug!(cursor = %entry.cursor, reason = %reason, "Entry skipped");
                    outcome.skipped += 1;
                    continue;
                }
            };

            let kind = event.event.kind();
            let mut ctx = HandlerContext::new(&mut tx, &event, entry.timestamp, entry.undo);
            dispatcher::apply(&mut ctx, &event)
                .await
                .map_err(|source| ConsumerError::Handler {
                    cursor: entry.cursor,
                    kind,
                    source,
                })?;

            debug!(cursor = %entry.cursor, kind, undo = entry.undo, "Entry applied");
            outcome.applied += 1;
            if entry.undo {
                outcome.undone += 1;
            }
        }

        save_cursor(&mut tx, &self.config.stream, outcome.last).await?;
        self.set_state(ConsumerState::Committing);
        tx.commit().await?;
        Ok(outcome)
    }
}
