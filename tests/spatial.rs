mod common;

use otuscope::compose::compose;
use otuscope::export::{ExportFormat, Exporter, VecSink, rewrap_longitude};
use otuscope::filter::ContextualFilter;
use otuscope::interface::CancelToken;
use otuscope::taxonomy::TaxonomyPath;

use common::*;

#[test]
fn rewrap_moves_longitudes_into_the_window_around_the_center() {
    assert_eq!(rewrap_longitude(179.0, 150.0), 179.0);
    assert_eq!(rewrap_longitude(-179.5, 150.0), 180.5);
    assert_eq!(rewrap_longitude(190.0, 0.0), -170.0);
    assert_eq!(rewrap_longitude(-170.0, 0.0), -170.0);
    // Window is half open at the top.
    assert_eq!(rewrap_longitude(330.0, 150.0), -30.0);
}

#[test]
fn rewrap_handles_absurd_magnitudes_without_looping() {
    let wrapped = rewrap_longitude(1e18, 150.0);
    assert!(wrapped.is_finite());
    assert!((-30.0..330.0).contains(&wrapped));
    let wrapped = rewrap_longitude(-1e18, 150.0);
    assert!(wrapped.is_finite());
    assert!((-30.0..330.0).contains(&wrapped));
    assert!(rewrap_longitude(f64::INFINITY, 150.0).is_nan());
    assert!(rewrap_longitude(f64::NAN, 150.0).is_nan());
}

#[test]
fn samples_with_non_finite_coordinates_are_skipped() {
    let store = setup();
    store
        .insert_sample(&otuscope::store::SampleRow {
            latitude: Some(-20.0),
            longitude: Some(f64::INFINITY),
            ..blank_sample(6)
        })
        .unwrap();
    let catalog = catalog(&store);
    let population = compose(
        &store,
        None,
        AMP_16S,
        TaxonomyPath::new(),
        ContextualFilter::empty(),
        ContextualFilter::empty(),
        200,
    );
    let mut sink = VecSink::new();
    Exporter::new(&catalog, &population, 150.0)
        .run(
            ExportFormat::SpatialAggregate,
            &[],
            &mut sink,
            &CancelToken::new(),
        )
        .unwrap();
    let points: Vec<serde_json::Value> = serde_json::from_slice(&sink.entries()[0].1).unwrap();
    assert_eq!(points.len(), 4);
    assert!(
        points
            .iter()
            .all(|p| p["samples"] != serde_json::json!([6]))
    );
}

fn spatial_points(center: f64) -> Vec<serde_json::Value> {
    let store = setup();
    let catalog = catalog(&store);
    let population = compose(
        &store,
        None,
        AMP_16S,
        TaxonomyPath::new(),
        ContextualFilter::empty(),
        ContextualFilter::empty(),
        2,
    );
    let mut sink = VecSink::new();
    Exporter::new(&catalog, &population, center)
        .run(
            ExportFormat::SpatialAggregate,
            &[],
            &mut sink,
            &CancelToken::new(),
        )
        .unwrap();
    let entries = sink.entries();
    assert_eq!(entries[0].0, "spatial.json");
    serde_json::from_slice(&entries[0].1).unwrap()
}

#[test]
fn samples_without_coordinates_are_skipped_and_the_rest_aggregate_per_point() {
    let points = spatial_points(150.0);
    // Four located samples at four distinct coordinates; the fifth has none.
    assert_eq!(points.len(), 4);

    let brisbane = points
        .iter()
        .find(|p| p["samples"] == serde_json::json!([1]))
        .unwrap();
    // Sample 1 observes two OTUs with counts 5 and 3.
    assert_eq!(brisbane["richness"], 2);
    assert_eq!(brisbane["abundance"], 8);
    assert_eq!(brisbane["latitude"], -27.5);
    assert_eq!(brisbane["longitude"], 153.0);
}

#[test]
fn dateline_neighbors_end_up_numerically_close() {
    let points = spatial_points(150.0);
    let longitudes: Vec<f64> = points
        .iter()
        .map(|p| p["longitude"].as_f64().unwrap())
        .collect();
    let fiji = longitudes.iter().copied().find(|l| *l == 179.0).unwrap();
    let across = longitudes.iter().copied().find(|l| *l == 180.5).unwrap();
    assert!((across - fiji).abs() < 2.0);
}

#[test]
fn points_with_no_matching_observations_report_zero_richness() {
    let points = spatial_points(150.0);
    // Sample 4 only observes an ITS OTU, outside the 16S population stream.
    let across = points
        .iter()
        .find(|p| p["samples"] == serde_json::json!([4]))
        .unwrap();
    assert_eq!(across["richness"], 0);
    assert_eq!(across["abundance"], 0);
}
