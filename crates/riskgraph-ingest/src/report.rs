//! Per-stage load reports and the run-level aggregate.

use std::fmt;

use serde::Serialize;

use riskgraph_core::{EntityType, RecordError};

/// Lifecycle of one stage: `Pending -> Running -> {Completed,
/// CompletedWithErrors, Aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Aborted,
}

/// Identifies an input record in failure lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordRef {
    /// 0-based position within the stage's input.
    pub index: u64,
    /// Natural key, when the record got far enough to have one.
    pub key: Option<String>,
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "#{} ({key})", self.index),
            None => write!(f, "#{}", self.index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    pub record: RecordRef,
    pub error: RecordError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub entity: EntityType,
    pub status: StageStatus,
    pub records_seen: u64,
    pub nodes_upserted: u64,
    pub edges_upserted: u64,
    pub records_failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub failures: Vec<RecordFailure>,
}

impl LoadReport {
    pub fn new(entity: EntityType) -> Self {
        Self {
            entity,
            status: StageStatus::Pending,
            records_seen: 0,
            nodes_upserted: 0,
            edges_upserted: 0,
            records_failed: 0,
            abort_reason: None,
            failures: Vec::new(),
        }
    }

    pub fn start(&mut self) {
        self.status = StageStatus::Running;
    }

    pub fn record_failure(&mut self, record: RecordRef, error: RecordError) {
        self.records_failed += 1;
        self.failures.push(RecordFailure { record, error });
    }

    /// Completed, or CompletedWithErrors if any record failed.
    pub fn finish(&mut self) {
        self.status = if self.records_failed == 0 {
            StageStatus::Completed
        } else {
            StageStatus::CompletedWithErrors
        };
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        self.status = StageStatus::Aborted;
        self.abort_reason = Some(reason.into());
    }
}

/// One report per entity type, in load order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub stages: Vec<LoadReport>,
}

impl RunReport {
    /// Every stage `Pending`.
    pub fn pending() -> Self {
        Self {
            stages: EntityType::LOAD_ORDER
                .iter()
                .map(|e| LoadReport::new(*e))
                .collect(),
        }
    }

    pub fn stage(&self, entity: EntityType) -> &LoadReport {
        &self.stages[entity.stage_index()]
    }

    pub(crate) fn set_stage(&mut self, report: LoadReport) {
        let idx = report.entity.stage_index();
        self.stages[idx] = report;
    }

    /// True when no stage aborted.
    pub fn is_success(&self) -> bool {
        self.stages
            .iter()
            .all(|s| s.status != StageStatus::Aborted)
    }

    pub fn total_failed(&self) -> u64 {
        self.stages.iter().map(|s| s.records_failed).sum()
    }
}
