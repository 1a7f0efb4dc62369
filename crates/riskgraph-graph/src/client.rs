//! Neo4j connection management and shared graph client.

use std::time::Duration;

use neo4rs::{ConfigBuilder, Graph, Query};
use serde::Deserialize;

use crate::store::{GraphStore, StoreError};

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
    /// Attempts for the initial connect before the run is aborted.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_password() -> String {
    "riskgraph-dev".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}

fn default_connect_retries() -> u32 {
    3
}

fn default_connect_backoff_ms() -> u64 {
    1000
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: default_password(),
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
            connect_retries: default_connect_retries(),
            connect_backoff_ms: default_connect_backoff_ms(),
        }
    }
}

/// Thread-safe Neo4j graph client with connection pooling.
///
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j and verify the server answers.
    pub async fn connect(config: &GraphConfig) -> Result<Self, StoreError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let client = Self { graph };
        client.ping().await.map_err(|e| match e {
            StoreError::Transaction(msg) => StoreError::Connection(msg),
            other => other,
        })?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(client)
    }

    /// Connect, retrying with doubling backoff up to `connect_retries` extra times.
    pub async fn connect_with_retry(config: &GraphConfig) -> Result<Self, StoreError> {
        let mut attempt = 0;
        loop {
            match Self::connect(config).await {
                Ok(client) => return Ok(client),
                Err(e) if attempt < config.connect_retries => {
                    let backoff = config
                        .connect_backoff_ms
                        .saturating_mul(1u64 << attempt.min(16));
                    tracing::warn!(
                        uri = %config.uri,
                        attempt = attempt + 1,
                        backoff_ms = backoff,
                        error = %e,
                        "Neo4j connect failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(uri = %config.uri, attempts = attempt + 1, error = %e, "Neo4j unreachable");
                    return Err(e);
                }
            }
        }
    }

    /// Execute a write-only query outside any explicit transaction.
    pub async fn run(&self, query: Query) -> Result<(), StoreError> {
        self.graph.run(query).await?;
        Ok(())
    }

    /// Execute a read query and return the first row, if any.
    pub async fn query_one(&self, query: Query) -> Result<Option<neo4rs::Row>, StoreError> {
        let mut stream = self.graph.execute(query).await?;
        Ok(stream.next().await?)
    }

    /// Begin a transaction.
    pub async fn start_txn(&self) -> Result<neo4rs::Txn, StoreError> {
        Ok(self.graph.start_txn().await?)
    }
}

impl From<neo4rs::Error> for StoreError {
    fn from(e: neo4rs::Error) -> Self {
        if is_connection_error(&e) {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Transaction(e.to_string())
        }
    }
}

/// Errors that mean the store cannot be reached at all. Everything else
/// (deadlocks, timeouts, constraint races, protocol hiccups) is worth a retry.
fn is_connection_error(e: &neo4rs::Error) -> bool {
    matches!(
        e,
        neo4rs::Error::ConnectionError
            | neo4rs::Error::IOError { .. }
            | neo4rs::Error::AuthenticationError(_)
            | neo4rs::Error::UnsupportedScheme(_)
            | neo4rs::Error::InvalidDnsName(_)
    )
}
