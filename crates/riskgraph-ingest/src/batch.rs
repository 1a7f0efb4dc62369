//! Batch executor: buffers descriptors into bounded transactions, commits
//! them in submission order, and retries transient failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use riskgraph_core::{EntityType, MutationDescriptor, PipelineConfig, RecordError};
use riskgraph_graph::{apply, ApplyError, ApplyStats, ConnectionManager, GraphStore, StoreError};

use crate::report::{LoadReport, RecordRef};

/// Cooperative cancellation, checked before each record is pulled and
/// before each batch is submitted.
/// Clone is cheap (inner Arc).
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A record after mapping: either a descriptor to write or a record error.
#[derive(Debug, Clone)]
pub struct MappedRecord {
    pub record: RecordRef,
    pub outcome: Result<MutationDescriptor, RecordError>,
}

/// Why a stage stopped early.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AbortReason {
    #[error(transparent)]
    Connection(StoreError),

    #[error("cancelled")]
    Cancelled,
}

/// A stage that stopped early, with everything counted up to that point.
#[derive(Debug, thiserror::Error)]
#[error("{} stage aborted: {reason}", .report.entity)]
pub struct StageAbort {
    pub report: LoadReport,
    pub reason: AbortReason,
}

type Pending = (RecordRef, MutationDescriptor);

pub struct BatchExecutor<'a, S> {
    conn: &'a ConnectionManager<S>,
    config: &'a PipelineConfig,
    cancel: CancelFlag,
}

impl<'a, S: GraphStore> BatchExecutor<'a, S> {
    pub fn new(conn: &'a ConnectionManager<S>, config: &'a PipelineConfig, cancel: CancelFlag) -> Self {
        Self {
            conn,
            config,
            cancel,
        }
    }

    /// Load one stage's mapped records. Batches are committed strictly in
    /// order; a fatal store error or cancellation stops the stage.
    pub async fn submit<I>(&self, entity: EntityType, items: I) -> Result<LoadReport, StageAbort>
    where
        I: IntoIterator<Item = MappedRecord>,
    {
        let batch_size = self.config.batch_size.max(1);
        let mut report = LoadReport::new(entity);
        report.start();

        let mut batch: Vec<Pending> = Vec::with_capacity(batch_size);
        let mut items = items.into_iter();
        loop {
            if self.cancel.is_cancelled() {
                return Err(abort(report, AbortReason::Cancelled));
            }
            let Some(item) = items.next() else {
                break;
            };
            report.records_seen += 1;
            self.log_progress(&report);

            match item.outcome {
                Ok(descriptor) => batch.push((item.record, descriptor)),
                Err(e) => {
                    tracing::debug!(%entity, record = %item.record, kind = ?e.kind(), error = %e, "Record rejected by mapper");
                    report.record_failure(item.record, e);
                }
            }

            if batch.len() >= batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                if let Err(reason) = self.flush(&mut report, full).await {
                    return Err(abort(report, reason));
                }
            }
        }

        if !batch.is_empty() {
            if let Err(reason) = self.flush(&mut report, batch).await {
                return Err(abort(report, reason));
            }
        }

        report.finish();
        Ok(report)
    }

    /// Commit one batch, retrying transaction errors with doubling backoff.
    /// On exhausted retries every record of the batch is marked failed and
    /// the stage carries on.
    async fn flush(&self, report: &mut LoadReport, batch: Vec<Pending>) -> Result<(), AbortReason> {
        if self.cancel.is_cancelled() {
            return Err(AbortReason::Cancelled);
        }

        let batch = Arc::new(batch);
        let mut attempt: u32 = 0;
        loop {
            match self.commit_batch(Arc::clone(&batch)).await {
                Ok(outcomes) => {
                    tally(report, &batch, outcomes);
                    tracing::debug!(entity = %report.entity, size = batch.len(), attempt, "Batch committed");
                    return Ok(());
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(entity = %report.entity, error = %e, "Connection lost, aborting stage");
                    return Err(AbortReason::Connection(e));
                }
                Err(e) if attempt < self.config.max_retries => {
                    let backoff = self.config.backoff_ms(attempt);
                    tracing::warn!(
                        entity = %report.entity,
                        attempt = attempt + 1,
                        backoff_ms = backoff,
                        error = %e,
                        "Batch failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        entity = %report.entity,
                        size = batch.len(),
                        attempts = attempt + 1,
                        error = %e,
                        "Batch failed, retries exhausted"
                    );
                    let message = e.to_string();
                    for (record, _) in batch.iter() {
                        report.record_failure(
                            record.clone(),
                            RecordError::TransactionExhausted {
                                attempts: attempt + 1,
                                message: message.clone(),
                            },
                        );
                    }
                    return Ok(());
                }
            }
        }
    }

    /// One attempt: a fresh session and transaction for the whole batch.
    /// Per-descriptor rejections are collected; a store error rolls back.
    async fn commit_batch(
        &self,
        batch: Arc<Vec<Pending>>,
    ) -> Result<Vec<Result<ApplyStats, RecordError>>, StoreError> {
        let mut session = self.conn.acquire_session().await?;
        session
            .run_in_transaction(move |txn| {
                Box::pin(async move {
                    let mut outcomes = Vec::with_capacity(batch.len());
                    for (_, descriptor) in batch.iter() {
                        match apply(txn, descriptor).await {
                            Ok(stats) => outcomes.push(Ok(stats)),
                            Err(ApplyError::Rejected(e)) => outcomes.push(Err(e)),
                            Err(ApplyError::Store(e)) => return Err(e),
                        }
                    }
                    Ok(outcomes)
                })
            })
            .await
    }

    fn log_progress(&self, report: &LoadReport) {
        let every = self.config.progress_interval;
        if every > 0 && report.records_seen % every == 0 {
            tracing::info!(
                entity = %report.entity,
                records_seen = report.records_seen,
                nodes_upserted = report.nodes_upserted,
                records_failed = report.records_failed,
                "Stage progress"
            );
        }
    }
}

fn tally(report: &mut LoadReport, batch: &[Pending], outcomes: Vec<Result<ApplyStats, RecordError>>) {
    for ((record, _), outcome) in batch.iter().zip(outcomes) {
        match outcome {
            Ok(stats) => {
                report.nodes_upserted += stats.nodes;
                report.edges_upserted += stats.edges;
            }
            Err(e) => {
                tracing::debug!(entity = %report.entity, %record, kind = ?e.kind(), error = %e, "Record rejected by writer");
                report.record_failure(record.clone(), e);
            }
        }
    }
}

fn abort(mut report: LoadReport, reason: AbortReason) -> StageAbort {
    report.abort(reason.to_string());
    StageAbort { report, reason }
}
