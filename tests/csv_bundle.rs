mod common;

use otuscope::compose::compose;
use otuscope::export::{ExportFormat, Exporter, VecSink};
use otuscope::filter::ContextualFilter;
use otuscope::interface::CancelToken;
use otuscope::taxonomy::TaxonomyPath;

use common::*;

fn kingdoms() -> Vec<(i64, String)> {
    vec![
        (BACTERIA, "Bacteria".to_string()),
        (FUNGI, "Fungi".to_string()),
    ]
}

#[test]
fn empty_kingdom_partitions_produce_no_entry() {
    let store = setup();
    let catalog = catalog(&store);
    // The 16S population has no fungal OTUs, so only Bacteria.csv appears.
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
        .run(
            ExportFormat::TaxonCsvBundle,
            &kingdoms(),
            &mut sink,
            &CancelToken::new(),
        )
        .unwrap();
    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "Bacteria.csv");

    let body = String::from_utf8(entries[0].1.clone()).unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 6, "header plus five observation rows");
    assert_eq!(
        lines[0],
        "sample_id,otu_code,count,amplicon,kingdom,phylum,class,order,family,genus,species,traits"
    );
    assert_eq!(
        lines[1],
        "1,OTU_A,5,16S,Bacteria,Proteobacteria,Gammaproteobacteria,,,,,"
    );
}

#[test]
fn trait_fields_with_delimiters_are_quoted() {
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
    let mut sink = VecSink::new();
    Exporter::new(&catalog, &population, 150.0)
        .run(
            ExportFormat::TaxonCsvBundle,
            &kingdoms(),
            &mut sink,
            &CancelToken::new(),
        )
        .unwrap();
    let body = String::from_utf8(sink.entries()[0].1.clone()).unwrap();
    // OTU_B carries a trait string containing a comma.
    assert!(body.contains("1,OTU_B,3,16S,Bacteria,Firmicutes,Bacilli,,,,,\"gram+,rod\""));
}

#[test]
fn partitioning_respects_an_already_pinned_kingdom() {
    let store = setup();
    let catalog = catalog(&store);
    let population = compose(
        &store,
        None,
        AMP_ITS,
        TaxonomyPath::from_slots(&[Some(FUNGI)]),
        ContextualFilter::empty(),
        ContextualFilter::empty(),
        200,
    );
    let mut sink = VecSink::new();
    Exporter::new(&catalog, &population, 150.0)
        .run(
            ExportFormat::TaxonCsvBundle,
            &kingdoms(),
            &mut sink,
            &CancelToken::new(),
        )
        .unwrap();
    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "Fungi.csv");
    let body = String::from_utf8(entries[0].1.clone()).unwrap();
    assert!(body.contains("4,OTU_D,9,ITS,Fungi,Ascomycota,,,,,,"));
}
