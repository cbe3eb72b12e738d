use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use otuscope::compose::{compose, fingerprint};
use otuscope::filter::{CombineMode, ContextualFilter, ContextualPredicateTerm};
use otuscope::schema::SchemaCatalog;
use otuscope::store::{OtuRecord, SqliteStore};
use otuscope::taxonomy::{TaxonomyPath, kingdom_options, resolve_cascade};

fn populated_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert_ontology_term("amplicon", 1, "16S").unwrap();
    store.insert_ontology_term("kingdom", 10, "Bacteria").unwrap();
    for phylum in 0..50i64 {
        store
            .insert_ontology_term("phylum", 100 + phylum, &format!("Phylum {phylum}"))
            .unwrap();
    }
    for otu in 0..1000u64 {
        store
            .insert_otu(&OtuRecord {
                otu_id: otu,
                code: format!("OTU_{otu}"),
                amplicon: 1,
                ranks: [Some(10), Some(100 + (otu as i64 % 50)), None, None, None, None, None],
                traits: None,
            })
            .unwrap();
    }
    for sample in 0..200u64 {
        store
            .insert_sample(&otuscope::store::SampleRow {
                sample_id: sample,
                latitude: Some(-30.0 + sample as f64 * 0.1),
                longitude: Some(140.0 + sample as f64 * 0.2),
                depth: None,
                ph: Some(4.0 + (sample % 40) as f64 * 0.1),
                organic_carbon: None,
                date_sampled: None,
                time_sampled: None,
                sample_site: None,
                notes: None,
                env_material: None,
                vegetation_type: None,
            })
            .unwrap();
        for otu in 0..10u64 {
            store
                .insert_observation(sample, (sample * 7 + otu * 13) % 1000, 1 + otu as i64)
                .unwrap();
        }
    }
    store
}

fn filter() -> ContextualFilter {
    ContextualFilter::new(
        CombineMode::And,
        vec![
            ContextualPredicateTerm::RangeNumeric {
                field: "ph",
                lo: Some(4.5),
                hi: Some(7.0),
            },
            ContextualPredicateTerm::StringContains {
                field: "sample_site",
                substring: "forest".to_string(),
                complement: false,
            },
        ],
    )
}

fn criterion_benchmark(c: &mut Criterion) {
    let store = populated_store();
    let catalog = SchemaCatalog::load(&store).unwrap();
    let kingdoms = kingdom_options(&catalog, &store, 1).unwrap();
    let path = TaxonomyPath::from_slots(&[Some(10)]);
    let contextual = filter();
    let empty = ContextualFilter::empty();

    c.bench_function("fingerprint", |b| {
        b.iter(|| {
            black_box(fingerprint(
                black_box(1),
                black_box(&path),
                black_box(&contextual),
                black_box(&empty),
            ))
        })
    });

    c.bench_function("resolve cascade at phylum", |b| {
        b.iter(|| {
            black_box(resolve_cascade(&catalog, &store, &kingdoms, 1, black_box(&path)).unwrap())
        })
    });

    c.bench_function("select sample ids", |b| {
        b.iter(|| {
            let population = compose(
                &store,
                None,
                1,
                path,
                contextual.clone(),
                empty.clone(),
                200,
            );
            black_box(population.sample_ids().unwrap())
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
