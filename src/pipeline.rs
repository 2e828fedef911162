use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::data::{self, DataReader, DatasetVariant};
use crate::error::Result;
use crate::transactions::{self, RawTransaction, TransactionColumns};
use crate::types::{Crs, HazardDataset};

/// Everything that changes the outcome of a dataset load.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetKey {
    pub path: String,
    pub crs: Crs,
    pub variant: DatasetVariant,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub path: String,
    pub columns: TransactionColumns,
}

#[derive(Debug)]
pub struct LoadedTransactions {
    pub raw: Vec<RawTransaction>,
    pub malformed: usize,
}

/// Loads through an injected reader and memoizes results.
pub struct HazardService {
    reader: Arc<dyn DataReader>,
    datasets: TtlCache<DatasetKey, HazardDataset>,
    transactions: TtlCache<TransactionKey, LoadedTransactions>,
}

impl HazardService {
    pub fn new(reader: Arc<dyn DataReader>, ttl: Duration) -> Self {
        Self {
            reader,
            datasets: TtlCache::new(ttl),
            transactions: TtlCache::new(ttl),
        }
    }

    pub fn dataset(&self, path: &str, crs: Crs, variant: DatasetVariant) -> Result<Arc<HazardDataset>> {
        let key = DatasetKey {
            path: path.to_string(),
            crs,
            variant,
        };
        if let Some(hit) = self.datasets.get(&key) {
            tracing::debug!("cache hit for {}", path);
            return Ok(hit);
        }
        self.datasets
            .get_or_try_insert_with(&key, || data::load(self.reader.as_ref(), path, crs, variant))
    }

    pub fn transactions(&self, path: &str, columns: &TransactionColumns) -> Result<Arc<LoadedTransactions>> {
        let key = TransactionKey {
            path: path.to_string(),
            columns: columns.clone(),
        };
        self.transactions.get_or_try_insert_with(&key, || {
            let (raw, malformed) = transactions::load_transactions(self.reader.as_ref(), path, columns)?;
            Ok(LoadedTransactions { raw, malformed })
        })
    }

    /// Forgets every memoized load.
    pub fn clear_cache(&self) -> usize {
        let dropped = self.datasets.clear() + self.transactions.clear();
        tracing::info!("Cache cleared ({} entries)", dropped);
        dropped
    }
}
