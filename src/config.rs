use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::data::{DataReader, DatasetVariant, FsReader, HttpReader};
use crate::departments::PLACEHOLDER;
use crate::transactions::{JoinTable, OutlierBounds, TransactionColumns};
use crate::types::Crs;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
    #[serde(default)]
    pub transactions: Vec<TransactionConfig>,
}

/// Where CSV objects are read from: an HTTPS object store or a local mirror.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub base_url: Option<String>,
    pub local_dir: Option<PathBuf>,
    /// Name of the environment variable holding a bearer token.
    pub token_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_ttl_secs() -> u64 {
    600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

/// A per-department hazard layer.
#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub name: String,
    /// Object path, with a `{dept}` slot for per-department layers,
    /// e.g. `base sykinet/base_innondation{dept}.csv`.
    pub path_template: String,
    pub crs: Crs,
    pub variant: DatasetVariant,
}

/// A pre-joined transaction table.
#[derive(Debug, Deserialize, Clone)]
pub struct TransactionConfig {
    pub name: String,
    pub path: String,
    pub columns: TransactionColumns,
    pub join: JoinTable,
    #[serde(default = "default_scatter_bounds")]
    pub scatter_bounds: OutlierBounds,
    #[serde(default = "default_box_bounds")]
    pub box_bounds: OutlierBounds,
}

fn default_scatter_bounds() -> OutlierBounds {
    OutlierBounds {
        max_surface: Some(400.0),
        max_price: Some(1e6),
        ..OutlierBounds::default()
    }
}

fn default_box_bounds() -> OutlierBounds {
    OutlierBounds {
        max_price_per_area: Some(1e4),
        ..OutlierBounds::default()
    }
}

impl DatasetConfig {
    pub fn per_department(&self) -> bool {
        self.path_template.contains(PLACEHOLDER)
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match (&self.store.base_url, &self.store.local_dir) {
            (Some(_), Some(_)) => bail!("store: set either base_url or local_dir, not both"),
            (None, None) => bail!("store: one of base_url or local_dir is required"),
            _ => {}
        }

        let mut names = HashSet::new();
        for dataset in &self.datasets {
            if !names.insert(dataset.name.as_str()) {
                bail!("duplicate dataset name '{}'", dataset.name);
            }
            if dataset.path_template.matches(PLACEHOLDER).count() > 1 {
                bail!("dataset '{}': path_template has more than one {} slot", dataset.name, PLACEHOLDER);
            }
        }

        let mut names = HashSet::new();
        for tx in &self.transactions {
            if !names.insert(tx.name.as_str()) {
                bail!("duplicate transaction table name '{}'", tx.name);
            }
        }
        Ok(())
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.name == name)
    }

    pub fn transaction_table(&self, name: &str) -> Option<&TransactionConfig> {
        self.transactions.iter().find(|t| t.name == name)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    /// Builds the reader the store section describes.
    pub fn reader(&self) -> Result<Arc<dyn DataReader>> {
        if let Some(dir) = &self.store.local_dir {
            return Ok(Arc::new(FsReader::new(dir.clone())));
        }
        let base_url = self
            .store
            .base_url
            .as_deref()
            .ok_or_else(|| anyhow!("store: base_url missing"))?;
        let token = match &self.store.token_env {
            Some(var) => Some(std::env::var(var).with_context(|| format!("store token variable {} is not set", var))?),
            None => None,
        };
        let reader = HttpReader::new(base_url, Duration::from_secs(self.store.timeout_secs), token)?;
        Ok(Arc::new(reader))
    }
}
