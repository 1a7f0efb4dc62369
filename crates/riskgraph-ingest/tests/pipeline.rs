//! End-to-end pipeline tests against the in-memory store, with injected
//! store failures.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use riskgraph_core::{
    EdgeUpsert, EntityType, NodeKey, NodeUpsert, PipelineConfig, PropertyValue, RawRecord,
    RecordError, RelType,
};
use riskgraph_graph::memory::MemoryTxn;
use riskgraph_graph::{ConnectionManager, GraphStore, GraphTxn, MemoryStore, StoreError};
use riskgraph_ingest::source::csv_records;
use riskgraph_ingest::{AbortReason, CancelFlag, Pipeline, RecordSources, StageStatus};

// ── Failure injection ────────────────────────────────────────────

/// Commits fail while `remaining` is nonzero (`None` means forever), for
/// transactions that wrote a node of `entity` (any transaction if `None`).
#[derive(Debug)]
struct FailurePlan {
    entity: Option<EntityType>,
    remaining: Option<u32>,
    error: StoreError,
    injected: u32,
}

#[derive(Debug, Clone)]
struct FlakyStore {
    inner: MemoryStore,
    plan: Arc<Mutex<Option<FailurePlan>>>,
    /// Raised after the first successful commit.
    cancel_on_commit: Option<CancelFlag>,
}

impl FlakyStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            plan: Arc::new(Mutex::new(None)),
            cancel_on_commit: None,
        }
    }

    fn cancel_after_commit(mut self, cancel: CancelFlag) -> Self {
        self.cancel_on_commit = Some(cancel);
        self
    }

    fn fail(self, entity: Option<EntityType>, remaining: Option<u32>, error: StoreError) -> Self {
        *self.plan.lock().unwrap() = Some(FailurePlan {
            entity,
            remaining,
            error,
            injected: 0,
        });
        self
    }

    fn injected(&self) -> u32 {
        self.plan.lock().unwrap().as_ref().map_or(0, |p| p.injected)
    }

    fn should_fail(&self, touched: &BTreeSet<EntityType>) -> Option<StoreError> {
        let mut guard = self.plan.lock().unwrap();
        let plan = guard.as_mut()?;
        if plan.entity.is_some_and(|e| !touched.contains(&e)) {
            return None;
        }
        match plan.remaining {
            Some(0) => return None,
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        plan.injected += 1;
        Some(plan.error.clone())
    }
}

struct FlakyTxn {
    inner: MemoryTxn,
    store: FlakyStore,
    touched: BTreeSet<EntityType>,
}

#[async_trait]
impl GraphStore for FlakyStore {
    type Txn = FlakyTxn;

    async fn begin(&self) -> Result<FlakyTxn, StoreError> {
        Ok(FlakyTxn {
            inner: self.inner.begin().await?,
            store: self.clone(),
            touched: BTreeSet::new(),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn ensure_constraints(&self, entities: &[EntityType]) -> Result<(), StoreError> {
        self.inner.ensure_constraints(entities).await
    }
}

#[async_trait]
impl GraphTxn for FlakyTxn {
    async fn node_exists(&mut self, key: &NodeKey) -> Result<bool, StoreError> {
        self.inner.node_exists(key).await
    }

    async fn merge_node(&mut self, node: &NodeUpsert) -> Result<(), StoreError> {
        self.touched.insert(node.key.entity);
        self.inner.merge_node(node).await
    }

    async fn merge_edge(&mut self, edge: &EdgeUpsert) -> Result<(), StoreError> {
        self.inner.merge_edge(edge).await
    }

    async fn commit(self) -> Result<(), StoreError> {
        if let Some(e) = self.store.should_fail(&self.touched) {
            self.inner.rollback().await?;
            return Err(e);
        }
        self.inner.commit().await?;
        if let Some(cancel) = &self.store.cancel_on_commit {
            cancel.cancel();
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

// ── Fixtures ─────────────────────────────────────────────────────

fn rec(fields: &[(&str, &str)]) -> RawRecord {
    fields.iter().map(|(k, v)| (*k, *v)).collect()
}

fn config() -> PipelineConfig {
    PipelineConfig {
        batch_size: 10,
        max_retries: 3,
        retry_backoff_ms: 1,
        ..PipelineConfig::default()
    }
}

fn sample_sources() -> RecordSources {
    RecordSources::new()
        .with(
            EntityType::Account,
            vec![
                rec(&[("login", "U1"), ("phone", "13800000001")]),
                rec(&[("login", "u2")]),
            ],
        )
        .with(
            EntityType::Customer,
            vec![
                rec(&[("customerId", "C1"), ("accountRef", "u1"), ("phone", "13800000001")]),
                rec(&[("customerId", "c2"), ("accountRef", "u2")]),
            ],
        )
        .with(
            EntityType::Linkman,
            vec![rec(&[("customerRef", "c1"), ("linkmanId", "13900000000"), ("relation", "spouse")])],
        )
        .with(
            EntityType::GpsEvent,
            vec![rec(&[
                ("customerRef", "c1"),
                ("lat", "31.2"),
                ("lng", "121.5"),
                ("timestamp", "2024-03-01 08:00:00"),
            ])],
        )
        .with(
            EntityType::Order,
            vec![rec(&[("orderId", "ORD-1"), ("customerRef", "c2"), ("status", "signed")])],
        )
        .with(
            EntityType::BlacklistEntry,
            vec![rec(&[("customerRef", "c2"), ("reason", "overdue")])],
        )
}

fn customer(id: &str) -> NodeKey {
    NodeKey::new(EntityType::Customer, id)
}

fn account(id: &str) -> NodeKey {
    NodeKey::new(EntityType::Account, id)
}

fn linkmen(customer_refs: &[&str]) -> Vec<RawRecord> {
    customer_refs
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let id = format!("1390000000{i}");
            rec(&[("customerRef", *c), ("linkmanId", id.as_str())])
        })
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_run_builds_graph() {
    let conn = ConnectionManager::new(MemoryStore::new(), 2);
    let run = Pipeline::new(&conn, config())
        .run(sample_sources())
        .await
        .unwrap();

    assert!(run.is_success());
    assert!(run.stages.iter().all(|s| s.status == StageStatus::Completed));

    let store = conn.store();
    assert_eq!(store.node_count_for(EntityType::Account), 2);
    assert_eq!(store.node_count_for(EntityType::Customer), 2);
    assert_eq!(store.node_count_for(EntityType::Linkman), 1);
    assert_eq!(store.node_count_for(EntityType::GpsEvent), 1);
    assert_eq!(store.node_count_for(EntityType::Order), 1);
    assert_eq!(store.node_count_for(EntityType::BlacklistEntry), 1);

    assert!(store.has_edge(&account("u1"), &customer("c1"), RelType::Owns));
    assert!(store.has_edge(&account("u2"), &customer("c2"), RelType::Owns));
    assert!(store.has_edge(
        &customer("c1"),
        &NodeKey::new(EntityType::Linkman, "13900000000"),
        RelType::Contacts
    ));
    assert!(store.has_edge(
        &customer("c2"),
        &NodeKey::new(EntityType::Order, "ORD-1"),
        RelType::Placed
    ));
    assert!(store.has_edge(
        &customer("c2"),
        &NodeKey::new(EntityType::BlacklistEntry, "customer:c2:overdue"),
        RelType::Flagged
    ));
    assert_eq!(store.edge_count_for(RelType::LocatedAt), 1);

    let stage = run.stage(EntityType::Customer);
    assert_eq!(stage.records_seen, 2);
    assert_eq!(stage.nodes_upserted, 2);
    assert_eq!(stage.edges_upserted, 2);
}

#[tokio::test]
async fn test_account_owns_customer() {
    let conn = ConnectionManager::new(MemoryStore::new(), 1);
    let sources = RecordSources::new()
        .with(EntityType::Account, vec![rec(&[("login", "u1")])])
        .with(
            EntityType::Customer,
            vec![rec(&[("customerId", "c1"), ("accountRef", "u1")])],
        );

    Pipeline::new(&conn, config()).run(sources).await.unwrap();

    let store = conn.store();
    assert_eq!(store.node_count(), 2);
    assert!(store.node(&account("u1")).is_some());
    assert!(store.node(&customer("c1")).is_some());
    assert_eq!(store.edge_count(), 1);
    assert!(store.has_edge(&account("u1"), &customer("c1"), RelType::Owns));
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let conn = ConnectionManager::new(MemoryStore::new(), 2);

    Pipeline::new(&conn, config())
        .run(sample_sources())
        .await
        .unwrap();
    let nodes = conn.store().node_count();
    let edges = conn.store().edge_count();

    let second = Pipeline::new(&conn, config())
        .run(sample_sources())
        .await
        .unwrap();

    assert!(second.is_success());
    assert_eq!(conn.store().node_count(), nodes);
    assert_eq!(conn.store().edge_count(), edges);
}

#[tokio::test]
async fn test_dangling_linkman_is_rejected_without_orphans() {
    let conn = ConnectionManager::new(MemoryStore::new(), 1);
    let sources = RecordSources::new()
        .with(EntityType::Customer, vec![rec(&[("customerId", "c1")])])
        .with(
            EntityType::Linkman,
            vec![rec(&[("customerRef", "c9"), ("linkmanId", "13900000000")])],
        );

    let run = Pipeline::new(&conn, config()).run(sources).await.unwrap();

    let stage = run.stage(EntityType::Linkman);
    assert_eq!(stage.status, StageStatus::CompletedWithErrors);
    assert_eq!(stage.records_failed, 1);
    assert_eq!(
        stage.failures[0].error,
        RecordError::DanglingReference { key: customer("c9") }
    );
    assert_eq!(conn.store().node_count_for(EntityType::Linkman), 0);
    assert_eq!(conn.store().edge_count(), 0);
}

#[tokio::test]
async fn test_one_bad_record_does_not_sink_its_batch() {
    let conn = ConnectionManager::new(MemoryStore::new(), 1);
    let mut refs = vec!["c1"; 10];
    refs[6] = "ghost";
    let sources = RecordSources::new()
        .with(EntityType::Customer, vec![rec(&[("customerId", "c1")])])
        .with(EntityType::Linkman, linkmen(&refs));

    let run = Pipeline::new(&conn, config()).run(sources).await.unwrap();

    let stage = run.stage(EntityType::Linkman);
    assert_eq!(stage.records_seen, 10);
    assert_eq!(stage.nodes_upserted, 9);
    assert_eq!(stage.edges_upserted, 9);
    assert_eq!(stage.records_failed, 1);
    assert_eq!(stage.failures[0].record.index, 6);
    assert_eq!(conn.store().node_count_for(EntityType::Linkman), 9);
    assert_eq!(conn.store().edge_count_for(RelType::Contacts), 9);
}

#[tokio::test]
async fn test_invalid_records_are_reported_with_position() {
    let conn = ConnectionManager::new(MemoryStore::new(), 1);
    let sources = RecordSources::new().with(
        EntityType::Account,
        vec![rec(&[("login", "u1")]), rec(&[("phone", "138")]), rec(&[("login", "  ")])],
    );

    let run = Pipeline::new(&conn, config()).run(sources).await.unwrap();

    let stage = run.stage(EntityType::Account);
    assert_eq!(stage.records_seen, 3);
    assert_eq!(stage.nodes_upserted, 1);
    let failed: Vec<u64> = stage.failures.iter().map(|f| f.record.index).collect();
    assert_eq!(failed, vec![1, 2]);
    assert!(matches!(stage.failures[0].error, RecordError::Validation { .. }));
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let store = FlakyStore::new(MemoryStore::new()).fail(
        Some(EntityType::Customer),
        Some(2),
        StoreError::Transaction("deadlock detected".into()),
    );
    let conn = ConnectionManager::new(store, 1);

    let run = Pipeline::new(&conn, config())
        .run(sample_sources())
        .await
        .unwrap();

    assert_eq!(conn.store().injected(), 2);
    assert_eq!(run.stage(EntityType::Customer).status, StageStatus::Completed);
    assert_eq!(run.stage(EntityType::Customer).nodes_upserted, 2);
    assert_eq!(conn.store().inner.node_count_for(EntityType::Customer), 2);
    assert!(run.is_success());
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_batch_and_continue() {
    let store = FlakyStore::new(MemoryStore::new()).fail(
        Some(EntityType::Customer),
        None,
        StoreError::Transaction("lock timeout".into()),
    );
    let conn = ConnectionManager::new(store, 1);
    let config = PipelineConfig {
        max_retries: 2,
        ..config()
    };

    let run = Pipeline::new(&conn, config)
        .run(sample_sources())
        .await
        .unwrap();

    let stage = run.stage(EntityType::Customer);
    assert_eq!(stage.status, StageStatus::CompletedWithErrors);
    assert_eq!(stage.records_failed, 2);
    assert_eq!(stage.nodes_upserted, 0);
    assert!(stage.failures.iter().all(|f| matches!(
        f.error,
        RecordError::TransactionExhausted { attempts: 3, .. }
    )));
    assert_eq!(conn.store().injected(), 3);

    // Later stages still run; their customer references now dangle.
    let linkman = run.stage(EntityType::Linkman);
    assert_eq!(linkman.status, StageStatus::CompletedWithErrors);
    assert!(matches!(
        linkman.failures[0].error,
        RecordError::DanglingReference { .. }
    ));
    assert_eq!(run.stage(EntityType::Account).status, StageStatus::Completed);
}

#[tokio::test]
async fn test_connection_loss_aborts_run() {
    let store = FlakyStore::new(MemoryStore::new()).fail(
        Some(EntityType::Customer),
        None,
        StoreError::Connection("connection reset".into()),
    );
    let conn = ConnectionManager::new(store, 1);

    let aborted = Pipeline::new(&conn, config())
        .run(sample_sources())
        .await
        .unwrap_err();

    assert_eq!(aborted.stage, EntityType::Customer);
    assert!(matches!(aborted.reason, AbortReason::Connection(_)));
    // Connection errors are not retried.
    assert_eq!(conn.store().injected(), 1);

    let report = &aborted.report;
    assert_eq!(report.stage(EntityType::Account).status, StageStatus::Completed);
    assert_eq!(report.stage(EntityType::Customer).status, StageStatus::Aborted);
    assert!(report
        .stage(EntityType::Customer)
        .abort_reason
        .as_deref()
        .is_some_and(|r| r.contains("connection reset")));
    for entity in &EntityType::LOAD_ORDER[2..] {
        assert_eq!(report.stage(*entity).status, StageStatus::Pending);
        assert_eq!(report.stage(*entity).records_seen, 0);
    }
    assert_eq!(conn.store().inner.node_count_for(EntityType::Linkman), 0);
}

#[tokio::test]
async fn test_last_write_wins_within_a_run() {
    let conn = ConnectionManager::new(MemoryStore::new(), 1);
    let sources = RecordSources::new().with(
        EntityType::Customer,
        vec![
            rec(&[("customerId", "c1"), ("phone", "111")]),
            rec(&[("customerId", "C1"), ("identityNo", "id-2")]),
        ],
    );

    let run = Pipeline::new(&conn, config()).run(sources).await.unwrap();

    assert_eq!(run.stage(EntityType::Customer).nodes_upserted, 2);
    assert_eq!(conn.store().node_count_for(EntityType::Customer), 1);
    let props = conn.store().node(&customer("c1")).unwrap();
    assert_eq!(props.get("phone"), None);
    assert_eq!(
        props.get("identity_no"),
        Some(&PropertyValue::String("id-2".into()))
    );
}

#[tokio::test]
async fn test_batches_commit_in_order_across_many_records() {
    let conn = ConnectionManager::new(MemoryStore::new(), 1);
    let accounts: Vec<RawRecord> = (0..25)
        .map(|i| {
            let login = format!("u{i}");
            rec(&[("login", login.as_str())])
        })
        .collect();
    let sources = RecordSources::new().with(EntityType::Account, accounts);
    let config = PipelineConfig {
        batch_size: 7,
        ..config()
    };

    let run = Pipeline::new(&conn, config).run(sources).await.unwrap();

    assert_eq!(run.stage(EntityType::Account).nodes_upserted, 25);
    // ceil(25 / 7)
    assert_eq!(conn.store().commits(), 4);
}

#[tokio::test]
async fn test_cancel_aborts_before_next_batch() {
    let conn = ConnectionManager::new(MemoryStore::new(), 1);
    let cancel = CancelFlag::new();
    cancel.cancel();

    let aborted = Pipeline::new(&conn, config())
        .with_cancel(cancel)
        .run(sample_sources())
        .await
        .unwrap_err();

    assert_eq!(aborted.stage, EntityType::Account);
    assert_eq!(aborted.reason, AbortReason::Cancelled);
    assert_eq!(
        aborted.report.stage(EntityType::Account).abort_reason.as_deref(),
        Some("cancelled")
    );
    assert_eq!(conn.store().node_count(), 0);
}

#[tokio::test]
async fn test_cancel_between_batches_keeps_committed_work() {
    let cancel = CancelFlag::new();
    let store = FlakyStore::new(MemoryStore::new()).cancel_after_commit(cancel.clone());
    let conn = ConnectionManager::new(store, 1);
    let accounts: Vec<RawRecord> = (0..25)
        .map(|i| {
            let login = format!("u{i}");
            rec(&[("login", login.as_str())])
        })
        .collect();
    let sources = RecordSources::new()
        .with(EntityType::Account, accounts)
        .with(EntityType::Customer, vec![rec(&[("customerId", "c1")])]);

    let aborted = Pipeline::new(&conn, config())
        .with_cancel(cancel)
        .run(sources)
        .await
        .unwrap_err();

    assert_eq!(aborted.stage, EntityType::Account);
    assert_eq!(aborted.reason, AbortReason::Cancelled);

    let stage = aborted.report.stage(EntityType::Account);
    assert_eq!(stage.status, StageStatus::Aborted);
    assert_eq!(stage.abort_reason.as_deref(), Some("cancelled"));
    assert_eq!(stage.nodes_upserted, 10);

    // The first batch stays committed; nothing after it is written.
    assert_eq!(conn.store().inner.commits(), 1);
    assert_eq!(conn.store().inner.node_count_for(EntityType::Account), 10);
    for entity in &EntityType::LOAD_ORDER[1..] {
        assert_eq!(aborted.report.stage(*entity).status, StageStatus::Pending);
    }
}

#[tokio::test]
async fn test_customer_with_unloaded_account_is_dangling() {
    let conn = ConnectionManager::new(MemoryStore::new(), 1);
    let sources = RecordSources::new()
        .with(EntityType::Account, vec![rec(&[("login", "u1")])])
        .with(
            EntityType::Customer,
            vec![rec(&[("customerId", "c1"), ("accountRef", "u404")])],
        );

    let run = Pipeline::new(&conn, config()).run(sources).await.unwrap();

    let stage = run.stage(EntityType::Customer);
    assert_eq!(stage.status, StageStatus::CompletedWithErrors);
    assert_eq!(
        stage.failures[0].error,
        RecordError::DanglingReference { key: account("u404") }
    );
    assert!(conn.store().node(&customer("c1")).is_none());
    assert_eq!(conn.store().edge_count_for(RelType::Owns), 0);
}

#[tokio::test]
async fn test_undecodable_csv_row_is_counted_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("login.csv");
    std::fs::write(&path, b"login\nu1\n\xff\xfe\n\" \"\n").unwrap();

    let conn = ConnectionManager::new(MemoryStore::new(), 1);
    let mut sources = RecordSources::new();
    sources.insert_decoded(EntityType::Account, csv_records(&path).unwrap());

    let run = Pipeline::new(&conn, config()).run(sources).await.unwrap();

    let stage = run.stage(EntityType::Account);
    assert_eq!(stage.records_seen, 3);
    assert_eq!(stage.nodes_upserted, 1);
    let failed: Vec<u64> = stage.failures.iter().map(|f| f.record.index).collect();
    assert_eq!(failed, vec![1, 2]);
    assert!(matches!(stage.failures[0].error, RecordError::Mapping { .. }));
    assert!(matches!(stage.failures[1].error, RecordError::Validation { .. }));
}
