use geo::{Coord, Geometry, MapCoords};
use proj4rs::Proj;
use wkt::TryFromWkt;

use crate::error::{PipelineError, Result};
use crate::types::{Crs, HazardDataset, HazardRecord};

const WGS84_DEF: &str = "+proj=longlat +datum=WGS84 +no_defs";
const LAMBERT93_DEF: &str = "+proj=lcc +lat_0=46.5 +lon_0=3 +lat_1=49 +lat_2=44 +x_0=700000 +y_0=6600000 \
     +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs";

/// Parses a WKT string. The CRS is whatever the caller declares.
pub fn decode(text: &str) -> Result<Geometry<f64>> {
    let text = text.trim();
    if text.is_empty() {
        return Err(PipelineError::MalformedGeometry("empty geometry".to_string()));
    }
    Geometry::<f64>::try_from_wkt_str(text).map_err(|e| PipelineError::MalformedGeometry(e.to_string()))
}

fn proj_for(crs: Crs) -> Result<Proj> {
    let def = match crs {
        Crs::Wgs84 => WGS84_DEF,
        Crs::Lambert93 => LAMBERT93_DEF,
    };
    Proj::from_proj_string(def).map_err(|e| PipelineError::Projection {
        from: crs,
        to: crs,
        reason: e.to_string(),
    })
}

/// Transforms coordinates between two supported systems.
pub struct Reprojector {
    from: Crs,
    to: Crs,
    src: Proj,
    dst: Proj,
}

impl Reprojector {
    pub fn new(from: Crs, to: Crs) -> Result<Self> {
        Ok(Self {
            from,
            to,
            src: proj_for(from)?,
            dst: proj_for(to)?,
        })
    }

    pub fn coord(&self, c: Coord<f64>) -> Result<Coord<f64>> {
        if self.from == self.to {
            return Ok(c);
        }
        // proj4rs works in radians for geographic systems
        let mut point = match self.from {
            Crs::Wgs84 => (c.x.to_radians(), c.y.to_radians(), 0.0),
            Crs::Lambert93 => (c.x, c.y, 0.0),
        };
        proj4rs::transform::transform(&self.src, &self.dst, &mut point).map_err(|e| PipelineError::Projection {
            from: self.from,
            to: self.to,
            reason: e.to_string(),
        })?;
        let out = match self.to {
            Crs::Wgs84 => Coord {
                x: point.0.to_degrees(),
                y: point.1.to_degrees(),
            },
            Crs::Lambert93 => Coord { x: point.0, y: point.1 },
        };
        if out.x.is_finite() && out.y.is_finite() {
            Ok(out)
        } else {
            Err(PipelineError::Projection {
                from: self.from,
                to: self.to,
                reason: format!("non-finite result for ({}, {})", c.x, c.y),
            })
        }
    }

    pub fn geometry(&self, geometry: &Geometry<f64>) -> Result<Geometry<f64>> {
        geometry.try_map_coords(|c| self.coord(c))
    }
}

/// Returns a new dataset with every geometry expressed in `target`.
pub fn reproject(dataset: &HazardDataset, target: Crs) -> Result<HazardDataset> {
    if dataset.crs() == target {
        return Ok(dataset.clone());
    }
    let reprojector = Reprojector::new(dataset.crs(), target)?;

    let records = dataset
        .records()
        .iter()
        .map(|record| {
            Ok(HazardRecord {
                geometry: reprojector.geometry(&record.geometry)?,
                ..record.clone()
            })
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(
        "Reprojected {} records from {} to {}",
        records.len(),
        dataset.crs(),
        target
    );

    Ok(HazardDataset::new(
        target,
        dataset.table().clone(),
        records,
        dataset.report().clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::MappingTable;
    use crate::types::{HazardValue, LoadReport};
    use approx::assert_abs_diff_eq;
    use geo::{Area, Point};

    #[test]
    fn decode_is_deterministic() {
        let text = "POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))";
        let a = decode(text).unwrap();
        let b = decode(text).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.unsigned_area(), 100.0);
    }

    #[test]
    fn decode_multipolygon_and_point() {
        let mp = decode("MULTIPOLYGON(((0 0, 1 0, 1 1, 0 0)),((5 5, 6 5, 6 6, 5 5)))").unwrap();
        assert!(matches!(mp, Geometry::MultiPolygon(_)));
        let p = decode("POINT(652000 6862000)").unwrap();
        assert_eq!(p, Geometry::Point(Point::new(652000.0, 6862000.0)));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode(""), Err(PipelineError::MalformedGeometry(_))));
        assert!(matches!(decode("POLYGON((0 0, 1"), Err(PipelineError::MalformedGeometry(_))));
        assert!(matches!(decode("not wkt"), Err(PipelineError::MalformedGeometry(_))));
    }

    #[test]
    fn lambert93_origin_projects_to_false_origin() {
        let r = Reprojector::new(Crs::Wgs84, Crs::Lambert93).unwrap();
        let c = r.coord(Coord { x: 3.0, y: 46.5 }).unwrap();
        assert_abs_diff_eq!(c.x, 700_000.0, epsilon = 1.0);
        assert_abs_diff_eq!(c.y, 6_600_000.0, epsilon = 1.0);
    }

    #[test]
    fn paris_lands_in_expected_lambert93_range() {
        let r = Reprojector::new(Crs::Wgs84, Crs::Lambert93).unwrap();
        let c = r.coord(Coord { x: 2.3522, y: 48.8566 }).unwrap();
        assert_abs_diff_eq!(c.x, 652_000.0, epsilon = 2_000.0);
        assert_abs_diff_eq!(c.y, 6_862_000.0, epsilon = 2_000.0);
    }

    #[test]
    fn round_trip_is_within_tolerance() {
        let geometry = decode("POLYGON((-1.5 43.2, 7.2 43.7, 6.1 49.0, -4.4 48.4, -1.5 43.2))").unwrap();
        let table = MappingTable::flood_grid();
        let record = HazardRecord {
            geometry: geometry.clone(),
            raw_value: "1".to_string(),
            hazard: HazardValue::Code(1),
            category: table.classify(&HazardValue::Code(1)),
        };
        let dataset = HazardDataset::new(Crs::Wgs84, table, vec![record], LoadReport::default());

        let projected = reproject(&dataset, Crs::Lambert93).unwrap();
        assert_eq!(projected.crs(), Crs::Lambert93);
        // input untouched
        assert_eq!(dataset.records()[0].geometry, geometry);

        let back = reproject(&projected, Crs::Wgs84).unwrap();
        let (Geometry::Polygon(original), Geometry::Polygon(returned)) = (&geometry, &back.records()[0].geometry)
        else {
            panic!("polygon expected");
        };
        for (a, b) in original.exterior().coords().zip(returned.exterior().coords()) {
            assert_abs_diff_eq!(a.x, b.x, epsilon = 1e-6);
            assert_abs_diff_eq!(a.y, b.y, epsilon = 1e-6);
        }
    }
}
