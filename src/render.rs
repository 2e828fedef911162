//! Chart-shaped views of pipeline output for the presentation layer.

use geojson::{Feature, FeatureCollection, JsonObject};
use serde::Serialize;
use serde_json::json;

use crate::categories::{CategorySpec, Color, MappingTable};
use crate::error::Result;
use crate::geometry::reproject;
use crate::types::{AggregatedArea, Crs, HazardDataset, HazardValue, LoadReport, Measure, TransactionRecord};

// Share of the extent added on each side of a map
const BOUNDS_PADDING: f64 = 0.02;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "chart", rename_all = "snake_case")]
pub enum ChartData {
    Choropleth(Choropleth),
    Pie(PieChart),
    Scatter(ScatterPlot),
    BoxPlot(BoxPlot),
}

#[derive(Debug, Clone, Serialize)]
pub struct LegendItem {
    pub label: String,
    pub display_label: String,
    pub color: Color,
    pub rank: u32,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choropleth {
    pub title: String,
    /// Always WGS84, which is what web map clients expect.
    pub crs: Crs,
    /// `[min_x, min_y, max_x, max_y]`, padded.
    pub bounds: Option<[f64; 4]>,
    pub legend: Vec<LegendItem>,
    pub features: FeatureCollection,
    pub report: LoadReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct PieSlice {
    pub label: String,
    pub display_label: String,
    pub color: Color,
    pub rank: u32,
    pub value: f64,
    pub fraction: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PieChart {
    pub title: String,
    pub measure: Measure,
    pub total: f64,
    pub slices: Vec<PieSlice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScatterPoint {
    pub surface: f64,
    pub price: f64,
    pub label: String,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScatterPlot {
    pub title: String,
    pub points: Vec<ScatterPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FiveNumbers {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoxGroup {
    pub label: String,
    pub display_label: String,
    pub color: Color,
    pub rank: u32,
    pub count: usize,
    pub stats: Option<FiveNumbers>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoxPlot {
    pub title: String,
    pub groups: Vec<BoxGroup>,
}

fn legend_item(category: &CategorySpec, count: usize) -> LegendItem {
    LegendItem {
        label: category.canonical_label.clone(),
        display_label: category.display_label.clone(),
        color: category.color.clone(),
        rank: category.rank,
        count,
    }
}

pub fn choropleth(title: &str, dataset: &HazardDataset) -> Result<ChartData> {
    let web = reproject(dataset, Crs::Wgs84)?;

    let features = web
        .records()
        .iter()
        .map(|record| {
            let mut properties = JsonObject::new();
            properties.insert("category".to_string(), json!(record.category.canonical_label));
            properties.insert("label".to_string(), json!(record.category.display_label));
            properties.insert("color".to_string(), json!(record.category.color));
            properties.insert("rank".to_string(), json!(record.category.rank));
            properties.insert("raw".to_string(), json!(record.raw_value));
            if let HazardValue::Share(share) = record.hazard {
                properties.insert("share".to_string(), json!(share));
            }
            Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(&record.geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let legend = web
        .table()
        .all()
        .map(|category| {
            let count = web.records().iter().filter(|r| r.category.rank == category.rank).count();
            legend_item(category, count)
        })
        .collect();

    let bounds = web.bounds().map(|rect| {
        let dx = rect.width() * BOUNDS_PADDING;
        let dy = rect.height() * BOUNDS_PADDING;
        [rect.min().x - dx, rect.min().y - dy, rect.max().x + dx, rect.max().y + dy]
    });

    Ok(ChartData::Choropleth(Choropleth {
        title: title.to_string(),
        crs: Crs::Wgs84,
        bounds,
        legend,
        features: FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        },
        report: web.report().clone(),
    }))
}

pub fn pie(title: &str, aggregated: &AggregatedArea) -> ChartData {
    let slices = aggregated
        .buckets
        .iter()
        .map(|bucket| PieSlice {
            label: bucket.category.canonical_label.clone(),
            display_label: bucket.category.display_label.clone(),
            color: bucket.category.color.clone(),
            rank: bucket.category.rank,
            value: bucket.value,
            fraction: if aggregated.total > 0.0 {
                bucket.value / aggregated.total
            } else {
                0.0
            },
        })
        .collect();

    ChartData::Pie(PieChart {
        title: title.to_string(),
        measure: aggregated.measure,
        total: aggregated.total,
        slices,
    })
}

pub fn scatter(title: &str, records: &[TransactionRecord]) -> ChartData {
    ChartData::Scatter(ScatterPlot {
        title: title.to_string(),
        points: records
            .iter()
            .map(|r| ScatterPoint {
                surface: r.surface,
                price: r.price,
                label: r.category.canonical_label.clone(),
                color: r.category.color.clone(),
            })
            .collect(),
    })
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (pos - lower as f64)
}

pub fn five_numbers(values: &[f64]) -> Option<FiveNumbers> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(FiveNumbers {
        min: sorted[0],
        q1: quantile(&sorted, 0.25),
        median: quantile(&sorted, 0.5),
        q3: quantile(&sorted, 0.75),
        max: sorted[sorted.len() - 1],
    })
}

/// Price per area by category, in rank order.
pub fn box_plot(title: &str, records: &[TransactionRecord], table: &MappingTable) -> ChartData {
    let groups = table
        .all()
        .map(|category| {
            let values: Vec<f64> = records
                .iter()
                .filter(|r| r.category.rank == category.rank)
                .map(|r| r.price_per_area)
                .collect();
            BoxGroup {
                label: category.canonical_label.clone(),
                display_label: category.display_label.clone(),
                color: category.color.clone(),
                rank: category.rank,
                count: values.len(),
                stats: five_numbers(&values),
            }
        })
        .collect();

    ChartData::BoxPlot(BoxPlot {
        title: title.to_string(),
        groups,
    })
}
