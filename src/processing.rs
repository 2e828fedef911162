use geo::algorithm::area::Area;
use geo::Geometry;

use crate::error::{PipelineError, Result};
use crate::geometry::reproject;
use crate::types::{AggregatedArea, CategoryTotal, Crs, HazardDataset, HazardRecord, Measure};

fn record_measure(record: &HazardRecord, measure: Measure) -> f64 {
    match measure {
        Measure::Count => 1.0,
        Measure::Area => match record.geometry {
            Geometry::Point(_) | Geometry::MultiPoint(_) => 0.0,
            ref g => g.unsigned_area(),
        },
    }
}

/// Sums area (or counts points) per category, in rank order.
///
/// Polygon datasets must be on a projected CRS; use [`aggregate_in`] to
/// reproject on the way.
pub fn aggregate(dataset: &HazardDataset) -> Result<AggregatedArea> {
    let measure = if dataset.is_point_dataset() {
        Measure::Count
    } else {
        Measure::Area
    };
    if measure == Measure::Area && !dataset.crs().is_projected() {
        return Err(PipelineError::UnprojectedArea(dataset.crs()));
    }

    let table = dataset.table();
    let mut buckets: Vec<CategoryTotal> = table
        .all()
        .map(|category| CategoryTotal {
            category: category.clone(),
            value: 0.0,
        })
        .collect();

    for record in dataset.records() {
        let value = record_measure(record, measure);
        // ranks are unique within a table
        match buckets.iter_mut().find(|b| b.category.rank == record.category.rank) {
            Some(bucket) => bucket.value += value,
            None => {
                if let Some(last) = buckets.last_mut() {
                    last.value += value;
                }
            }
        }
    }

    let total = buckets.iter().map(|b| b.value).sum();
    Ok(AggregatedArea { measure, buckets, total })
}

/// Reprojects to `metric` when needed, then aggregates.
pub fn aggregate_in(dataset: &HazardDataset, metric: Crs) -> Result<AggregatedArea> {
    if !metric.is_projected() {
        return Err(PipelineError::UnprojectedArea(metric));
    }
    if dataset.crs() == metric {
        aggregate(dataset)
    } else {
        aggregate(&reproject(dataset, metric)?)
    }
}
