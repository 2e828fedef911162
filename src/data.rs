use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use csv::{ReaderBuilder, StringRecord};
use parking_lot::RwLock;
use rayon::prelude::*;
use reqwest::blocking::Client;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::categories::{parse_grid_code, DroughtTiers, MappingTable};
use crate::error::{PipelineError, Result};
use crate::geometry;
use crate::types::{Crs, HazardDataset, HazardRecord, HazardValue, LoadReport};

/// Read access to the object store, already authenticated.
pub trait DataReader: Send + Sync {
    fn read(&self, path: &str) -> Result<String>;
}

/// Objects served over HTTPS, e.g. `https://storage.googleapis.com/<bucket>`.
pub struct HttpReader {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl HttpReader {
    pub fn new(base_url: &str, timeout: Duration, token: Option<String>) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| PipelineError::unavailable(base_url, e))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::unavailable(base_url, e))?;
        Ok(Self { client, base, token })
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| PipelineError::unavailable(path, "base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }
}

impl DataReader for HttpReader {
    fn read(&self, path: &str) -> Result<String> {
        let url = self.url_for(path)?;
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(|e| PipelineError::unavailable(path, e))
    }
}

/// Objects mirrored into a local directory.
pub struct FsReader {
    root: PathBuf,
}

impl FsReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DataReader for FsReader {
    /// Invalid UTF-8 is replaced, as the HTTP reader does.
    fn read(&self, path: &str) -> Result<String> {
        let full = self.root.join(path);
        let bytes = fs::read(&full).map_err(|e| PipelineError::unavailable(path, e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// In-memory objects, keyed by path.
#[derive(Default)]
pub struct MemoryReader {
    objects: RwLock<HashMap<String, String>>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, body: &str) {
        self.objects.write().insert(path.to_string(), body.to_string());
    }
}

impl DataReader for MemoryReader {
    fn read(&self, path: &str) -> Result<String> {
        self.objects
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| PipelineError::unavailable(path, "no such object"))
    }
}

/// Which hazard indicator a resource carries, and how it is coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetVariant {
    /// Integer `gridcode` column.
    FloodGrid,
    /// Text `ALEA` column.
    DroughtLevel { tiers: DroughtTiers },
    /// Percentage columns folded into a `NIVEAU` ratio.
    HazardShare,
}

pub const GEOMETRY_COLUMN: &str = "geometry";
pub const GRIDCODE_COLUMN: &str = "gridcode";
pub const LEVEL_COLUMN: &str = "ALEA";

// Per-department exports use `pct_*` names, the regional summary `% surface NIVEAU = <level>`.
pub const SHARE_POSITIVE_COLUMNS: [&str; 6] = [
    "pct_moyen",
    "pct_fort",
    "pct_innond_caves",
    "pct_debord_nappes",
    "% surface NIVEAU = 2.0",
    "% surface NIVEAU = 3.0",
];
pub const SHARE_NEUTRAL_COLUMNS: [&str; 5] = [
    "pct_nulle",
    "pct_faible",
    "pct_sans_risque",
    "% surface NIVEAU = 0.0",
    "% surface NIVEAU = 1.0",
];

impl DatasetVariant {
    pub fn table(&self) -> MappingTable {
        match self {
            DatasetVariant::FloodGrid => MappingTable::flood_grid(),
            DatasetVariant::DroughtLevel { tiers } => MappingTable::drought_levels(*tiers),
            DatasetVariant::HazardShare => MappingTable::share(),
        }
    }
}

/// Column positions resolved from the header row.
enum HazardColumns {
    Single(usize),
    Share { positive: Vec<usize>, neutral: Vec<usize> },
}

fn resolve_columns(path: &str, headers: &StringRecord, variant: DatasetVariant) -> Result<(usize, HazardColumns)> {
    let col_indices: HashMap<&str, usize> = headers.iter().enumerate().map(|(i, h)| (h.trim(), i)).collect();

    let geometry = *col_indices
        .get(GEOMETRY_COLUMN)
        .ok_or_else(|| PipelineError::schema(path, "missing 'geometry' column"))?;

    let single = |name: &str| {
        col_indices
            .get(name)
            .copied()
            .map(HazardColumns::Single)
            .ok_or_else(|| PipelineError::schema(path, format!("missing '{}' column", name)))
    };

    let hazard = match variant {
        DatasetVariant::FloodGrid => single(GRIDCODE_COLUMN)?,
        DatasetVariant::DroughtLevel { .. } => single(LEVEL_COLUMN)?,
        DatasetVariant::HazardShare => {
            let pick = |names: &[&str]| -> Vec<usize> { names.iter().filter_map(|n| col_indices.get(n).copied()).collect() };
            let positive = pick(&SHARE_POSITIVE_COLUMNS);
            let neutral = pick(&SHARE_NEUTRAL_COLUMNS);
            if positive.is_empty() && neutral.is_empty() {
                return Err(PipelineError::schema(path, "no percentage columns"));
            }
            HazardColumns::Share { positive, neutral }
        }
    };

    Ok((geometry, hazard))
}

/// Risk-positive share of all percentage columns, 0 when they sum to 0.
pub fn share_ratio(positive: &[f64], neutral: &[f64]) -> f64 {
    let risk: f64 = positive.iter().sum();
    let total = risk + neutral.iter().sum::<f64>();
    if total == 0.0 {
        0.0
    } else {
        risk / total
    }
}

fn coerce(record: &StringRecord, columns: &HazardColumns, variant: DatasetVariant) -> (String, HazardValue) {
    match columns {
        HazardColumns::Single(idx) => {
            let raw = record.get(*idx).unwrap_or("").to_string();
            let value = match variant {
                DatasetVariant::FloodGrid => parse_grid_code(&raw).map(HazardValue::Code),
                _ => Some(raw.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| HazardValue::Level(s.to_string())),
            };
            (raw, value.unwrap_or(HazardValue::Unparsed))
        }
        HazardColumns::Share { positive, neutral } => {
            let parse = |idxs: &[usize]| -> Option<Vec<f64>> {
                idxs.iter()
                    .map(|i| record.get(*i).and_then(|v| v.trim().parse::<f64>().ok()).filter(|v| v.is_finite()))
                    .collect()
            };
            let raw = positive
                .iter()
                .chain(neutral.iter())
                .map(|i| record.get(*i).unwrap_or(""))
                .collect::<Vec<_>>()
                .join(";");
            let value = match (parse(positive), parse(neutral)) {
                (Some(p), Some(n)) => HazardValue::Share(share_ratio(&p, &n)),
                _ => HazardValue::Unparsed,
            };
            (raw, value)
        }
    }
}

/// Retrieves a CSV resource and turns it into a hazard dataset.
///
/// Rows whose geometry does not decode are dropped and counted; hazard values
/// that do not coerce are kept as unclassified and counted.
pub fn load(reader: &dyn DataReader, path: &str, declared_crs: Crs, variant: DatasetVariant) -> Result<HazardDataset> {
    let body = reader.read(path)?;
    tracing::info!("Loaded {} ({} bytes)", path, body.len());

    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(body.as_bytes());
    let headers = rdr.headers().map_err(|e| PipelineError::schema(path, e))?.clone();
    let (geometry_idx, columns) = resolve_columns(path, &headers, variant)?;

    let rows = rdr
        .records()
        .collect::<std::result::Result<Vec<StringRecord>, _>>()
        .map_err(|e| PipelineError::schema(path, e))?;

    let table = variant.table();
    let decoded: Vec<Option<HazardRecord>> = rows
        .par_iter()
        .map(|row| {
            let geometry = geometry::decode(row.get(geometry_idx).unwrap_or("")).ok()?;
            let (raw_value, hazard) = coerce(row, &columns, variant);
            let category = table.classify(&hazard);
            Some(HazardRecord {
                geometry,
                raw_value,
                hazard,
                category,
            })
        })
        .collect();

    let mut report = LoadReport {
        rows_read: rows.len(),
        ..LoadReport::default()
    };
    let mut records = Vec::with_capacity(decoded.len());
    for record in decoded {
        match record {
            Some(record) => {
                if record.hazard == HazardValue::Unparsed {
                    report.coercion_failures += 1;
                }
                records.push(record);
            }
            None => report.dropped_geometries += 1,
        }
    }

    if report.dropped_geometries > 0 {
        tracing::warn!("{}: dropped {} rows with malformed geometry", path, report.dropped_geometries);
    }
    if report.coercion_failures > 0 {
        tracing::warn!(
            "{}: {} hazard values could not be coerced ({:.1}%), kept as unclassified",
            path,
            report.coercion_failures,
            report.coercion_failure_rate() * 100.0
        );
    }

    Ok(HazardDataset::new(declared_crs, table, records, report))
}
