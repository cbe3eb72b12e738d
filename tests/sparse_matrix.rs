mod common;

use otuscope::compose::compose;
use otuscope::error::OtuscopeError;
use otuscope::export::{ExportFormat, Exporter, VecSink};
use otuscope::filter::{CombineMode, ContextualFilter, ContextualPredicateTerm};
use otuscope::interface::CancelToken;
use otuscope::taxonomy::TaxonomyPath;

use common::*;

fn entry<'a>(entries: &'a [(String, Vec<u8>)], name: &str) -> &'a [u8] {
    entries
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, body)| body.as_slice())
        .unwrap_or_else(|| panic!("missing entry {name}"))
}

#[test]
fn matrix_covers_every_sample_and_streams_triples_in_first_seen_row_order() {
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
    Exporter::new(&catalog, &population, 150.0)
        .run(ExportFormat::SparseMatrix, &[], &mut sink, &CancelToken::new())
        .unwrap();
    let entries = sink.entries();
    assert_eq!(
        entries.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
        vec!["samples.json", "data.json", "taxa.json"]
    );

    let samples: Vec<serde_json::Value> =
        serde_json::from_slice(entry(&entries, "samples.json")).unwrap();
    // The sample with zero observations still gets a column.
    assert_eq!(samples.len(), 5);
    assert_eq!(samples[4]["sample_id"], 5);
    assert_eq!(samples[0]["ph"], 5.5);

    let triples: Vec<(usize, usize, i64)> =
        serde_json::from_slice(entry(&entries, "data.json")).unwrap();
    // Stream order is (sample_id, otu_id); taxon rows are numbered as they
    // first appear: OTU 1 -> 0, OTU 2 -> 1, OTU 3 -> 2.
    assert_eq!(
        triples,
        vec![(0, 0, 5), (1, 0, 3), (1, 1, 7), (2, 1, 2), (0, 2, 1)]
    );

    let taxa: Vec<serde_json::Value> =
        serde_json::from_slice(entry(&entries, "taxa.json")).unwrap();
    assert_eq!(taxa.len(), 3);
    assert_eq!(taxa[0]["code"], "OTU_A");
    assert_eq!(taxa[0]["ranks"][0], "Bacteria");
    assert_eq!(taxa[0]["ranks"][3], serde_json::Value::Null);
    assert_eq!(taxa[2]["code"], "OTU_C");
}

#[test]
fn integrity_warnings_flag_samples_without_dropping_them() {
    let store = setup();
    let catalog = catalog(&store);
    let population = compose(
        &store,
        None,
        AMP_16S,
        TaxonomyPath::new(),
        ContextualFilter::empty(),
        ContextualFilter::new(
            CombineMode::Or,
            vec![ContextualPredicateTerm::RangeNumeric {
                field: "ph",
                lo: Some(0.0),
                hi: Some(4.5),
            }],
        ),
        200,
    );
    let mut sink = VecSink::new();
    Exporter::new(&catalog, &population, 150.0)
        .run(ExportFormat::SparseMatrix, &[], &mut sink, &CancelToken::new())
        .unwrap();
    let entries = sink.entries();
    let samples: Vec<serde_json::Value> =
        serde_json::from_slice(entry(&entries, "samples.json")).unwrap();
    assert_eq!(samples.len(), 5);
    let flagged: Vec<u64> = samples
        .iter()
        .filter(|s| s["integrity_warning"] == true)
        .map(|s| s["sample_id"].as_u64().unwrap())
        .collect();
    assert_eq!(flagged, vec![4]);
}

#[test]
fn a_cancelled_token_aborts_the_export() {
    let store = setup();
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
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut sink = VecSink::new();
    let outcome = Exporter::new(&catalog, &population, 150.0).run(
        ExportFormat::SparseMatrix,
        &[],
        &mut sink,
        &cancel,
    );
    assert!(matches!(outcome, Err(OtuscopeError::Canceled)));
}
