//! Pipeline orchestrator: runs one stage per entity type in dependency order.
//!
//! Each stage streams its raw records through the mapper into the batch
//! executor. A fatal store error stops the run; later stages stay `Pending`
//! because their references would point into an untrustworthy graph.

use std::collections::BTreeMap;
use std::time::Instant;

use riskgraph_core::{EntityType, PipelineConfig, RawRecord, RecordError};
use riskgraph_graph::{ConnectionManager, GraphStore};

use crate::batch::{AbortReason, BatchExecutor, CancelFlag, MappedRecord};
use crate::mapper::map_record;
use crate::report::{RecordRef, RunReport};

/// A lazy, finite stream of decoded rows for one entity type. A row the
/// source could not decode is an `Err` at its position in the stream.
pub type RecordStream = Box<dyn Iterator<Item = Result<RawRecord, RecordError>> + Send>;

/// Input for a run: at most one stream per entity type. Entity types without
/// a stream load zero records.
#[derive(Default)]
pub struct RecordSources {
    streams: BTreeMap<EntityType, RecordStream>,
}

impl RecordSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<I>(&mut self, entity: EntityType, records: I)
    where
        I: IntoIterator<Item = RawRecord>,
        I::IntoIter: Send + 'static,
    {
        self.insert_decoded(entity, records.into_iter().map(Ok));
    }

    /// Like `insert`, for sources whose rows can fail to decode.
    pub fn insert_decoded<I>(&mut self, entity: EntityType, rows: I)
    where
        I: IntoIterator<Item = Result<RawRecord, RecordError>>,
        I::IntoIter: Send + 'static,
    {
        self.streams.insert(entity, Box::new(rows.into_iter()));
    }

    /// Builder-style `insert`.
    pub fn with<I>(mut self, entity: EntityType, records: I) -> Self
    where
        I: IntoIterator<Item = RawRecord>,
        I::IntoIter: Send + 'static,
    {
        self.insert(entity, records);
        self
    }

    pub fn contains(&self, entity: EntityType) -> bool {
        self.streams.contains_key(&entity)
    }

    fn take(&mut self, entity: EntityType) -> Option<RecordStream> {
        self.streams.remove(&entity)
    }
}

/// A run that stopped early. `report` holds every stage as far as it got.
#[derive(Debug, thiserror::Error)]
#[error("Import aborted during {stage} stage: {reason}")]
pub struct RunAborted {
    pub report: RunReport,
    pub stage: EntityType,
    pub reason: AbortReason,
}

pub struct Pipeline<'a, S> {
    conn: &'a ConnectionManager<S>,
    config: PipelineConfig,
    cancel: CancelFlag,
}

impl<'a, S: GraphStore> Pipeline<'a, S> {
    pub fn new(conn: &'a ConnectionManager<S>, config: PipelineConfig) -> Self {
        Self {
            conn,
            config,
            cancel: CancelFlag::new(),
        }
    }

    /// Share a cancel flag with the caller (e.g. a Ctrl-C handler).
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }
    /// Load every stage in `EntityType::LOAD_ORDER`.
    pub async fn run(&self, mut sources: RecordSources) -> Result<RunReport, RunAborted> {
        let started = Instant::now();
        let mut run = RunReport::pending();

        if self.config.ensure_constraints {
            if let Err(e) = self
                .conn
                .store()
                .ensure_constraints(&EntityType::LOAD_ORDER)
                .await
            {
                if e.is_fatal() {
                    let first = EntityType::LOAD_ORDER[0];
                    let reason = AbortReason::Connection(e);
                    let mut stage = run.stage(first).clone();
                    stage.abort(reason.to_string());
                    run.set_stage(stage);
                    return Err(RunAborted {
                        report: run,
                        stage: first,
                        reason,
                    });
                }
                tracing::warn!(error = %e, "Could not ensure uniqueness constraints, continuing");
            }
        }

        let executor = BatchExecutor::new(self.conn, &self.config, self.cancel.clone());

        for entity in EntityType::LOAD_ORDER {
            let records = sources.take(entity);
            if records.is_none() {
                tracing::info!(%entity, "No source for stage, nothing to load");
            }

            let mapped = records
                .into_iter()
                .flatten()
                .enumerate()
                .map(|(index, row)| match row {
                    Ok(raw) => map_one(entity, index as u64, &raw),
                    Err(e) => MappedRecord {
                        record: RecordRef {
                            index: index as u64,
                            key: None,
                        },
                        outcome: Err(e),
                    },
                });

            tracing::info!(%entity, "Stage started");
            match executor.submit(entity, mapped).await {
                Ok(report) => {
                    tracing::info!(
                        %entity,
                        status = ?report.status,
                        records_seen = report.records_seen,
                        nodes_upserted = report.nodes_upserted,
                        edges_upserted = report.edges_upserted,
                        records_failed = report.records_failed,
                        "Stage finished"
                    );
                    run.set_stage(report);
                }
                Err(abort) => {
                    tracing::error!(%entity, reason = %abort.reason, "Stage aborted, skipping dependent stages");
                    run.set_stage(abort.report);
                    return Err(RunAborted {
                        report: run,
                        stage: entity,
                        reason: abort.reason,
                    });
                }
            }
        }

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            records_failed = run.total_failed(),
            "Import complete"
        );
        Ok(run)
    }
}

fn map_one(entity: EntityType, index: u64, raw: &RawRecord) -> MappedRecord {
    let outcome = map_record(entity, raw);
    let key = outcome
        .as_ref()
        .ok()
        .and_then(|d| d.primary_key())
        .map(|k| k.key.clone());
    MappedRecord {
        record: RecordRef { index, key },
        outcome,
    }
}
