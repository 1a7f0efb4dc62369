//! Configuration for the riskgraph-import loader.
//!
//! Loaded from an optional `riskgraph.toml` and `RISKGRAPH__` environment
//! variables. `NEO4J_URI`, `NEO4J_USER` and `NEO4J_PASSWORD` (also read from
//! `.env`) override the `[neo4j]` section.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use riskgraph_core::{EntityType, PipelineConfig};
use riskgraph_graph::GraphConfig;

use crate::error::{IngestError, Result};

/// Where each entity type's CSV export lives.
///
/// Loaded from the `[sources]` section. File names are relative to `dir`.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceFiles {
    /// Directory holding the exports (default: ".").
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_account")]
    pub account: String,

    #[serde(default = "default_customer")]
    pub customer: String,

    #[serde(default = "default_linkman")]
    pub linkman: String,

    #[serde(default = "default_gps_event")]
    pub gps_event: String,

    #[serde(default = "default_order")]
    pub order: String,

    #[serde(default = "default_blacklist_entry")]
    pub blacklist_entry: String,
}

impl SourceFiles {
    pub fn file_name(&self, entity: EntityType) -> &str {
        match entity {
            EntityType::Account => &self.account,
            EntityType::Customer => &self.customer,
            EntityType::Linkman => &self.linkman,
            EntityType::GpsEvent => &self.gps_event,
            EntityType::Order => &self.order,
            EntityType::BlacklistEntry => &self.blacklist_entry,
        }
    }

    pub fn path_for(&self, entity: EntityType) -> PathBuf {
        self.dir.join(self.file_name(entity))
    }
}

fn default_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_account() -> String {
    "login.csv".to_string()
}

fn default_customer() -> String {
    "customer.csv".to_string()
}

fn default_linkman() -> String {
    "linkman.csv".to_string()
}

fn default_gps_event() -> String {
    "gps.csv".to_string()
}

fn default_order() -> String {
    "order.csv".to_string()
}

fn default_blacklist_entry() -> String {
    "blacklist.csv".to_string()
}

impl Default for SourceFiles {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            account: default_account(),
            customer: default_customer(),
            linkman: default_linkman(),
            gps_event: default_gps_event(),
            order: default_order(),
            blacklist_entry: default_blacklist_entry(),
        }
    }
}

/// Everything the importer needs, one field per config section.
#[derive(Debug, Clone, Default)]
pub struct ImportConfig {
    pub neo4j: GraphConfig,
    pub pipeline: PipelineConfig,
    pub sources: SourceFiles,
}

impl ImportConfig {
    /// Load from `<file_prefix>.toml` (optional), `.env`, and the environment.
    pub fn load(file_prefix: &str) -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "Could not read .env file");
            }
        }

        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("RISKGRAPH")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("neo4j.uri", std::env::var("NEO4J_URI").ok())
            .and_then(|b| b.set_override_option("neo4j.user", std::env::var("NEO4J_USER").ok()))
            .and_then(|b| {
                b.set_override_option("neo4j.password", std::env::var("NEO4J_PASSWORD").ok())
            })
            .and_then(|b| b.build())
            .map_err(|e| IngestError::Config(e.to_string()))?;

        Self::from_config(&cfg)
    }

    /// Read each section, falling back to defaults when a section is absent.
    pub fn from_config(cfg: &config::Config) -> Result<Self> {
        Ok(Self {
            neo4j: section(cfg, "neo4j")?,
            pipeline: section(cfg, "pipeline")?,
            sources: section(cfg, "sources")?,
        })
    }

    /// Override the source directory (e.g. from `--data-dir`).
    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.sources.dir = dir.as_ref().to_path_buf();
        self
    }
}

fn section<T>(cfg: &config::Config, name: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match cfg.get::<T>(name) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => Ok(T::default()),
        Err(e) => Err(IngestError::Config(format!("[{name}]: {e}"))),
    }
}
