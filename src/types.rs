use std::fmt;
use std::str::FromStr;

use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{Coord, Geometry, Point, Rect};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::categories::{CategorySpec, MappingTable};
use crate::error::PipelineError;

/// Coordinate reference systems the pipeline knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    /// Geographic WGS84, degrees (EPSG:4326).
    #[serde(rename = "EPSG:4326")]
    Wgs84,
    /// RGF93 / Lambert-93, metres (EPSG:2154).
    #[serde(rename = "EPSG:2154")]
    Lambert93,
}

impl Crs {
    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::Lambert93 => 2154,
        }
    }

    /// Whether coordinates are linear units, so area and distance are meaningful.
    pub fn is_projected(&self) -> bool {
        matches!(self, Crs::Lambert93)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        let code = code
            .strip_prefix("EPSG:")
            .or_else(|| code.strip_prefix("epsg:"))
            .unwrap_or(code);
        match code {
            "4326" => Ok(Crs::Wgs84),
            "2154" => Ok(Crs::Lambert93),
            _ => Err(PipelineError::UnsupportedCrs(s.to_string())),
        }
    }
}

/// Hazard indicator after type coercion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum HazardValue {
    Code(i64),
    Level(String),
    /// Continuous share of risk-positive surface, in [0, 1].
    Share(f64),
    /// The raw value could not be coerced.
    Unparsed,
}

#[derive(Debug, Clone)]
pub struct HazardRecord {
    pub geometry: Geometry<f64>,
    /// Hazard indicator exactly as read from the source.
    pub raw_value: String,
    pub hazard: HazardValue,
    pub category: CategorySpec,
}

/// Per-row outcomes of a load, reported next to the dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub rows_read: usize,
    pub dropped_geometries: usize,
    pub coercion_failures: usize,
}

impl LoadReport {
    pub fn coercion_failure_rate(&self) -> f64 {
        let kept = self.rows_read.saturating_sub(self.dropped_geometries);
        if kept == 0 {
            0.0
        } else {
            self.coercion_failures as f64 / kept as f64
        }
    }
}

// Wrapper for RTree indexing
#[derive(Debug, Clone)]
pub struct RecordEnvelope {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for RecordEnvelope {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Records sharing one CRS, indexed by envelope.
#[derive(Clone)]
pub struct HazardDataset {
    crs: Crs,
    table: MappingTable,
    records: Vec<HazardRecord>,
    report: LoadReport,
    tree: RTree<RecordEnvelope>,
}

impl fmt::Debug for HazardDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HazardDataset")
            .field("crs", &self.crs)
            .field("table", &self.table.name())
            .field("records", &self.records.len())
            .field("report", &self.report)
            .finish()
    }
}

impl HazardDataset {
    pub fn new(crs: Crs, table: MappingTable, records: Vec<HazardRecord>, report: LoadReport) -> Self {
        let items: Vec<RecordEnvelope> = records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                record.geometry.bounding_rect().map(|rect| RecordEnvelope {
                    index,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();

        Self {
            crs,
            table,
            records,
            report,
            tree: RTree::bulk_load(items),
        }
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    pub fn records(&self) -> &[HazardRecord] {
        &self.records
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when every geometry is a point or multipoint.
    pub fn is_point_dataset(&self) -> bool {
        !self.records.is_empty()
            && self
                .records
                .iter()
                .all(|r| matches!(r.geometry, Geometry::Point(_) | Geometry::MultiPoint(_)))
    }

    /// Union of all record envelopes.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.records
            .iter()
            .filter_map(|r| r.geometry.bounding_rect())
            .reduce(|acc, rect| {
                Rect::new(
                    Coord {
                        x: acc.min().x.min(rect.min().x),
                        y: acc.min().y.min(rect.min().y),
                    },
                    Coord {
                        x: acc.max().x.max(rect.max().x),
                        y: acc.max().y.max(rect.max().y),
                    },
                )
            })
    }

    /// First record whose geometry contains the point, in dataset coordinates.
    pub fn record_at(&self, x: f64, y: f64) -> Option<&HazardRecord> {
        let point = Point::new(x, y);
        let envelope = AABB::from_point([x, y]);

        let mut candidates: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|c| c.index)
            .collect();
        // keep source order so overlapping records resolve deterministically
        candidates.sort_unstable();

        candidates
            .into_iter()
            .filter_map(|i| self.records.get(i))
            .find(|record| record.geometry.contains(&point))
    }
}

/// What an aggregation summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    /// Square metres, on a projected CRS.
    Area,
    Count,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryTotal {
    pub category: CategorySpec,
    pub value: f64,
}

/// Per-category totals in rank order; the unclassified bucket is last.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedArea {
    pub measure: Measure,
    pub buckets: Vec<CategoryTotal>,
    pub total: f64,
}

impl AggregatedArea {
    pub fn get(&self, canonical_label: &str) -> Option<f64> {
        self.buckets
            .iter()
            .find(|b| b.category.canonical_label == canonical_label)
            .map(|b| b.value)
    }

    pub fn classified(&self) -> impl Iterator<Item = &CategoryTotal> {
        self.buckets.iter().filter(|b| !b.category.is_unclassified())
    }
}

/// A real-estate sale joined with a hazard category.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRecord {
    pub key: String,
    pub surface: f64,
    pub price: f64,
    pub price_per_area: f64,
    pub category: CategorySpec,
}
