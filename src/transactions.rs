//! Real-estate transactions joined with hazard categories.

use std::collections::HashMap;

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};

use crate::categories::{drought_zone_keys, flood_label_keys, CategorySpec, MappingTable};
use crate::data::DataReader;
use crate::error::{PipelineError, Result};
use crate::types::{AggregatedArea, CategoryTotal, Measure, TransactionRecord};

/// A sale before the hazard join.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub key: String,
    pub surface: f64,
    pub price: f64,
}

/// Upper bounds applied as strict `<` filters. `None` disables a bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlierBounds {
    #[serde(default)]
    pub max_price_per_area: Option<f64>,
    #[serde(default)]
    pub max_surface: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
}

impl OutlierBounds {
    pub fn admits(&self, record: &TransactionRecord) -> bool {
        let below = |value: f64, bound: Option<f64>| bound.map_or(true, |b| value < b);
        below(record.price_per_area, self.max_price_per_area)
            && below(record.surface, self.max_surface)
            && below(record.price, self.max_price)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JoinedTransactions {
    pub records: Vec<TransactionRecord>,
    pub non_positive_surface: usize,
    pub outliers: usize,
    pub unmatched_keys: usize,
}

/// Which built-in key table a transaction source joins on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinTable {
    /// `Risque_innond` label text, long or short form.
    FloodLabels,
    /// `zone_niveau` drought level, 0 to 3.
    DroughtZones,
}

impl JoinTable {
    pub fn keys(&self) -> HashMap<String, CategorySpec> {
        match self {
            JoinTable::FloodLabels => flood_label_keys(),
            JoinTable::DroughtZones => drought_zone_keys(),
        }
    }

    pub fn table(&self) -> MappingTable {
        match self {
            JoinTable::FloodLabels => MappingTable::flood_grid(),
            JoinTable::DroughtZones => MappingTable::drought_zones(),
        }
    }
}

/// Trims the key and writes integral numbers without a fraction (`1.0` -> `1`).
pub fn join_key(raw: &str) -> String {
    let raw = raw.trim();
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => (v as i64).to_string(),
        _ => raw.to_string(),
    }
}

/// Joins each transaction to its hazard category and derives price per area.
///
/// Rows with a non-positive surface are dropped before dividing; keys missing
/// from `hazard_category_by_key` resolve to `unclassified`.
pub fn build(
    transactions: &[RawTransaction],
    hazard_category_by_key: &HashMap<String, CategorySpec>,
    unclassified: &CategorySpec,
    bounds: &OutlierBounds,
) -> JoinedTransactions {
    let mut joined = JoinedTransactions::default();

    for tx in transactions {
        if tx.surface.is_nan() || tx.surface <= 0.0 {
            joined.non_positive_surface += 1;
            continue;
        }
        let key = join_key(&tx.key);
        let category = match hazard_category_by_key.get(&key) {
            Some(category) => category.clone(),
            None => {
                joined.unmatched_keys += 1;
                unclassified.clone()
            }
        };
        let record = TransactionRecord {
            key,
            surface: tx.surface,
            price: tx.price,
            price_per_area: tx.price / tx.surface,
            category,
        };
        if bounds.admits(&record) {
            joined.records.push(record);
        } else {
            joined.outliers += 1;
        }
    }

    joined
}

/// Columns of a pre-joined transaction CSV.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionColumns {
    pub key: String,
    pub surface: String,
    #[serde(default = "default_price_column")]
    pub price: String,
}

fn default_price_column() -> String {
    "valeur_fonciere".to_string()
}

/// Reads raw transactions; rows with unparseable numbers are skipped and counted.
pub fn load_transactions(
    reader: &dyn DataReader,
    path: &str,
    columns: &TransactionColumns,
) -> Result<(Vec<RawTransaction>, usize)> {
    let body = reader.read(path)?;
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(body.as_bytes());
    let headers = rdr.headers().map_err(|e| PipelineError::schema(path, e))?.clone();

    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| PipelineError::schema(path, format!("missing '{}' column", name)))
    };
    let key_idx = position(&columns.key)?;
    let surface_idx = position(&columns.surface)?;
    let price_idx = position(&columns.price)?;

    let mut transactions = Vec::new();
    let mut malformed = 0;
    for result in rdr.records() {
        let record = result.map_err(|e| PipelineError::schema(path, e))?;
        let number = |idx: usize| record.get(idx).and_then(|v| v.trim().parse::<f64>().ok()).filter(|v| v.is_finite());
        match (number(surface_idx), number(price_idx)) {
            (Some(surface), Some(price)) => transactions.push(RawTransaction {
                key: record.get(key_idx).unwrap_or("").to_string(),
                surface,
                price,
            }),
            _ => malformed += 1,
        }
    }

    if malformed > 0 {
        tracing::warn!("{}: skipped {} transactions with unparseable surface or price", path, malformed);
    }
    tracing::info!("Loaded {} transactions from {}", transactions.len(), path);
    Ok((transactions, malformed))
}

/// Transactions per category, every table category included.
pub fn count_by_category(records: &[TransactionRecord], table: &MappingTable) -> AggregatedArea {
    let buckets: Vec<CategoryTotal> = table
        .all()
        .map(|category| CategoryTotal {
            category: category.clone(),
            value: records.iter().filter(|r| r.category.rank == category.rank).count() as f64,
        })
        .collect();
    AggregatedArea {
        measure: Measure::Count,
        total: buckets.iter().map(|b| b.value).sum(),
        buckets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryReader;

    fn tx(key: &str, surface: f64, price: f64) -> RawTransaction {
        RawTransaction {
            key: key.to_string(),
            surface,
            price,
        }
    }

    fn drought() -> (HashMap<String, CategorySpec>, CategorySpec) {
        let table = JoinTable::DroughtZones;
        (table.keys(), table.table().unclassified().clone())
    }

    #[test]
    fn zero_surface_is_excluded_before_division() {
        let (keys, unclassified) = drought();
        let joined = build(
            &[tx("1.0", 0.0, 100_000.0), tx("1.0", -5.0, 1.0), tx("1.0", 50.0, 100_000.0)],
            &keys,
            &unclassified,
            &OutlierBounds::default(),
        );
        assert_eq!(joined.non_positive_surface, 2);
        assert_eq!(joined.records.len(), 1);
        assert_eq!(joined.records[0].price_per_area, 2_000.0);
        assert_eq!(joined.records[0].category.canonical_label, "low");
        assert_eq!(joined.records[0].category.display_label, "Faible");
    }

    #[test]
    fn price_per_area_bound_is_strict() {
        let (keys, unclassified) = drought();
        let sale = [tx("2", 100.0, 1_000_000.0)];

        let at = OutlierBounds {
            max_price_per_area: Some(1e4),
            ..OutlierBounds::default()
        };
        let joined = build(&sale, &keys, &unclassified, &at);
        assert!(joined.records.is_empty());
        assert_eq!(joined.outliers, 1);

        let above = OutlierBounds {
            max_price_per_area: Some(1.1e4),
            ..OutlierBounds::default()
        };
        let joined = build(&sale, &keys, &unclassified, &above);
        assert_eq!(joined.records.len(), 1);
        assert_eq!(joined.records[0].price_per_area, 10_000.0);
    }

    #[test]
    fn scatter_bounds_filter_surface_and_price() {
        let (keys, unclassified) = drought();
        let bounds = OutlierBounds {
            max_surface: Some(400.0),
            max_price: Some(1e6),
            ..OutlierBounds::default()
        };
        let joined = build(
            &[tx("0", 400.0, 10.0), tx("0", 80.0, 1e6), tx("0", 80.0, 200_000.0)],
            &keys,
            &unclassified,
            &bounds,
        );
        assert_eq!(joined.records.len(), 1);
        assert_eq!(joined.outliers, 2);
    }

    #[test]
    fn unknown_keys_are_unclassified() {
        let (keys, unclassified) = drought();
        let joined = build(&[tx("9", 10.0, 10.0)], &keys, &unclassified, &OutlierBounds::default());
        assert_eq!(joined.unmatched_keys, 1);
        assert!(joined.records[0].category.is_unclassified());
    }

    #[test]
    fn keys_are_normalized() {
        assert_eq!(join_key(" 3.0 "), "3");
        assert_eq!(join_key("2A"), "2A");
        assert_eq!(
            join_key("Zones potentiellement sujettes aux débordements de nappe "),
            "Zones potentiellement sujettes aux débordements de nappe"
        );
    }

    #[test]
    fn loads_and_counts_pre_joined_csv() {
        let reader = MemoryReader::new();
        reader.insert(
            "base_innond_final.csv",
            "valeur_fonciere,surface_reelle_bati,Risque_innond\n\
             200000,50,Zones potentiellement sujettes aux inondations de cave\n\
             150000,,Zones potentiellement sujettes aux inondations de cave\n\
             300000,100,Pas de débordement de nappe ni d'inondation de cave\n",
        );
        let columns = TransactionColumns {
            key: "Risque_innond".to_string(),
            surface: "surface_reelle_bati".to_string(),
            price: default_price_column(),
        };
        let (raw, malformed) = load_transactions(&reader, "base_innond_final.csv", &columns).unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(malformed, 1);

        let join = JoinTable::FloodLabels;
        let table = join.table();
        let joined = build(&raw, &join.keys(), table.unclassified(), &OutlierBounds::default());
        let counts = count_by_category(&joined.records, &table);
        assert_eq!(counts.get("cellar-flood"), Some(1.0));
        assert_eq!(counts.get("no-risk"), Some(1.0));
        assert_eq!(counts.get("groundwater-rise"), Some(0.0));
        assert_eq!(counts.total, 2.0);
    }

    #[test]
    fn flood_join_accepts_long_and_short_labels() {
        let join = JoinTable::FloodLabels;
        let table = join.table();
        let sales = [
            tx("Pas de risques", 50.0, 100_000.0),
            tx("Inondations de cave", 50.0, 100_000.0),
            tx("Débordements de nappe", 50.0, 100_000.0),
            tx("Pas de débordement de nappe ni d'inondation de cave", 50.0, 100_000.0),
            tx("Zones potentiellement sujettes aux inondations de cave", 50.0, 100_000.0),
            tx("Zones potentiellement sujettes aux débordements de nappe", 50.0, 100_000.0),
        ];
        let joined = build(&sales, &join.keys(), table.unclassified(), &OutlierBounds::default());

        assert_eq!(joined.unmatched_keys, 0);
        let labels: Vec<&str> = joined.records.iter().map(|r| r.category.canonical_label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["no-risk", "cellar-flood", "groundwater-rise", "no-risk", "cellar-flood", "groundwater-rise"]
        );
        let counts = count_by_category(&joined.records, &table);
        assert_eq!(counts.get("unclassified"), Some(0.0));
        assert_eq!(counts.get("cellar-flood"), Some(2.0));
    }

    #[test]
    fn drought_zones_run_from_very_low_to_very_high() {
        let (keys, unclassified) = drought();
        let joined = build(
            &[tx("0.0", 10.0, 10.0), tx("3.0", 10.0, 10.0)],
            &keys,
            &unclassified,
            &OutlierBounds::default(),
        );
        let labels: Vec<&str> = joined.records.iter().map(|r| r.category.canonical_label.as_str()).collect();
        assert_eq!(labels, vec!["very-low", "very-high"]);
        assert_eq!(unclassified.rank, 4);
    }

    #[test]
    fn missing_surface_column_is_schema_error() {
        let reader = MemoryReader::new();
        reader.insert("t.csv", "valeur_fonciere,zone_niveau\n1,0\n");
        let columns = TransactionColumns {
            key: "zone_niveau".to_string(),
            surface: "surface_terrain".to_string(),
            price: default_price_column(),
        };
        assert!(matches!(
            load_transactions(&reader, "t.csv", &columns),
            Err(PipelineError::Schema { .. })
        ));
    }
}
