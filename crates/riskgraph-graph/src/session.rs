//! Scoped session and transaction handling over any `GraphStore`.
//!
//! One `ConnectionManager` is created per run and passed by reference to every
//! component that talks to the store. A `Session` holds one permit of the
//! manager's semaphore and releases it when dropped, on every exit path.

use futures::future::BoxFuture;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::client::{GraphClient, GraphConfig};
use crate::store::{GraphStore, GraphTxn, StoreError};

pub struct ConnectionManager<S> {
    store: S,
    sessions: Semaphore,
}

impl<S: GraphStore> ConnectionManager<S> {
    pub fn new(store: S, max_sessions: usize) -> Self {
        Self {
            store,
            sessions: Semaphore::new(max_sessions.max(1)),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Check out a session, waiting if `max_sessions` are already in use.
    pub async fn acquire_session(&self) -> Result<Session<'_, S>, StoreError> {
        let permit = self
            .sessions
            .acquire()
            .await
            .map_err(|_| StoreError::Connection("connection manager is closed".to_string()))?;
        Ok(Session {
            store: &self.store,
            _permit: permit,
        })
    }

    /// Sessions currently free.
    pub fn available_sessions(&self) -> usize {
        self.sessions.available_permits()
    }

    /// Refuse further sessions. Sessions already checked out keep working.
    pub fn close(&self) {
        self.sessions.close();
    }
}

impl ConnectionManager<GraphClient> {
    /// Connect to Neo4j, retrying per `config.connect_retries`.
    pub async fn connect(config: &GraphConfig, max_sessions: usize) -> Result<Self, StoreError> {
        let client = GraphClient::connect_with_retry(config).await?;
        Ok(Self::new(client, max_sessions))
    }
}

/// A checked-out session. Transactions run one at a time per session.
pub struct Session<'a, S> {
    store: &'a S,
    _permit: SemaphorePermit<'a>,
}

impl<'a, S: GraphStore> Session<'a, S> {
    /// Run `work` inside a transaction: commit if it returns `Ok`, roll back
    /// and propagate if it returns `Err`.
    pub async fn run_in_transaction<T, F>(&mut self, work: F) -> Result<T, StoreError>
    where
        F: for<'t> FnOnce(&'t mut S::Txn) -> BoxFuture<'t, Result<T, StoreError>>,
    {
        let mut txn = self.store.begin().await?;

        match work(&mut txn).await {
            Ok(value) => {
                txn.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback failed after transaction error");
                }
                Err(e)
            }
        }
    }
}
