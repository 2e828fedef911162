use approx::assert_abs_diff_eq;
use std::sync::Arc;
use std::time::Duration;

use hazard_atlas::categories::DroughtTiers;
use hazard_atlas::data::{DatasetVariant, MemoryReader};
use hazard_atlas::departments::department_path;
use hazard_atlas::pipeline::HazardService;
use hazard_atlas::processing::{aggregate, aggregate_in};
use hazard_atlas::render::{self, ChartData};
use hazard_atlas::transactions::{self, JoinTable, OutlierBounds, TransactionColumns};
use hazard_atlas::types::{Crs, Measure};
use hazard_atlas::PipelineError;

const FLOOD_TEMPLATE: &str = "base sykinet/base_innondation{dept}.csv";

fn square(x0: f64, y0: f64, side: f64) -> String {
    format!(
        "\"POLYGON(({x0} {y0}, {x1} {y0}, {x1} {y1}, {x0} {y1}, {x0} {y0}))\"",
        x0 = x0,
        y0 = y0,
        x1 = x0 + side,
        y1 = y0 + side
    )
}

fn service() -> HazardService {
    let reader = MemoryReader::new();
    reader.insert(
        "base sykinet/base_innondation33.csv",
        &format!(
            "geometry,gridcode\n{},0\n{},1\n{},2\n",
            square(400_000.0, 6_400_000.0, 100.0),
            square(400_100.0, 6_400_000.0, 200.0),
            square(400_300.0, 6_400_000.0, 300.0),
        ),
    );
    reader.insert(
        "base sykinet/df_secheresse33.csv",
        "geometry,ALEA\n\"POINT(3.0 46.5)\",Faible\n\"POINT(3.1 46.5)\",Fort\n\"POINT(3.2 46.5)\",Fort\n",
    );
    reader.insert(
        "base sykinet/base_sech_final_maison.csv",
        "valeur_fonciere,surface_terrain,zone_niveau\n\
         120000,350,0.0\n\
         90000,0,1.0\n\
         700000,320,3.0\n\
         150000,300,3.0\n",
    );
    HazardService::new(Arc::new(reader), Duration::from_secs(600))
}

#[test]
fn grid_codes_aggregate_in_rank_order() {
    let service = service();
    let path = department_path(FLOOD_TEMPLATE, "33").unwrap();
    let dataset = service.dataset(&path, Crs::Lambert93, DatasetVariant::FloodGrid).unwrap();
    assert_eq!(dataset.report().dropped_geometries, 0);

    let aggregated = aggregate(&dataset).unwrap();
    assert_eq!(aggregated.measure, Measure::Area);

    let classified: Vec<(&str, u32)> = aggregated
        .classified()
        .map(|b| (b.category.canonical_label.as_str(), b.category.rank))
        .collect();
    assert_eq!(
        classified,
        vec![("no-risk", 0), ("groundwater-rise", 1), ("cellar-flood", 2)]
    );
    let areas: Vec<f64> = aggregated.classified().map(|b| b.value).collect();
    for (area, expected) in areas.iter().zip([10_000.0, 40_000.0, 90_000.0]) {
        assert_abs_diff_eq!(*area, expected, epsilon = 1e-3);
    }
    assert_abs_diff_eq!(aggregated.total, 140_000.0, epsilon = 1e-3);
}

#[test]
fn geographic_points_are_counted_and_mapped() {
    let service = service();
    let variant = DatasetVariant::DroughtLevel {
        tiers: DroughtTiers::Four,
    };
    let dataset = service
        .dataset("base sykinet/df_secheresse33.csv", Crs::Wgs84, variant)
        .unwrap();

    let counts = aggregate(&dataset).unwrap();
    assert_eq!(counts.measure, Measure::Count);
    assert_eq!(counts.get("none"), Some(0.0));
    assert_eq!(counts.get("low"), Some(1.0));
    assert_eq!(counts.get("high"), Some(2.0));

    // same result after a detour through Lambert-93
    let projected = aggregate_in(&dataset, Crs::Lambert93).unwrap();
    assert_eq!(projected.get("high"), Some(2.0));

    let ChartData::Choropleth(map) = render::choropleth("drought 33", &dataset).unwrap() else {
        panic!("choropleth expected");
    };
    assert_eq!(map.features.features.len(), 3);
    assert_eq!(map.legend.len(), 5);
}

#[test]
fn transactions_join_and_filter() {
    let service = service();
    let columns = TransactionColumns {
        key: "zone_niveau".to_string(),
        surface: "surface_terrain".to_string(),
        price: "valeur_fonciere".to_string(),
    };
    let loaded = service
        .transactions("base sykinet/base_sech_final_maison.csv", &columns)
        .unwrap();
    assert_eq!(loaded.raw.len(), 4);

    let join = JoinTable::DroughtZones;
    let table = join.table();
    let bounds = OutlierBounds {
        max_price_per_area: Some(1.5e3),
        ..OutlierBounds::default()
    };
    let joined = transactions::build(&loaded.raw, &join.keys(), table.unclassified(), &bounds);

    assert_eq!(joined.non_positive_surface, 1);
    assert_eq!(joined.outliers, 1);
    let labels: Vec<&str> = joined.records.iter().map(|r| r.category.canonical_label.as_str()).collect();
    assert_eq!(labels, vec!["very-low", "very-high"]);

    let ChartData::BoxPlot(plot) = render::box_plot("houses", &joined.records, &table) else {
        panic!("box plot expected");
    };
    assert_eq!(plot.groups[3].label, "very-high");
    assert_eq!(plot.groups[3].stats.unwrap().median, 500.0);
}

#[test]
fn unknown_department_and_missing_object() {
    assert!(matches!(
        department_path(FLOOD_TEMPLATE, "99"),
        Err(PipelineError::UnknownDepartment(_))
    ));

    let service = service();
    let path = department_path(FLOOD_TEMPLATE, "2A").unwrap();
    let err = service.dataset(&path, Crs::Lambert93, DatasetVariant::FloodGrid).unwrap_err();
    assert!(matches!(err, PipelineError::ResourceUnavailable { .. }));
}
