#![allow(dead_code)]

use chrono::{NaiveDate, NaiveTime};

use otuscope::schema::SchemaCatalog;
use otuscope::store::{OtuRecord, SampleRow, SqliteStore};

/// Amplicon ids in the fixture dataset.
pub const AMP_16S: i64 = 1;
pub const AMP_ITS: i64 = 2;

/// Ontology ids in the fixture dataset.
pub const BACTERIA: i64 = 10;
pub const FUNGI: i64 = 11;
pub const PROTEOBACTERIA: i64 = 20;
pub const FIRMICUTES: i64 = 21;
pub const ASCOMYCOTA: i64 = 22;
pub const GAMMAPROTEOBACTERIA: i64 = 30;
pub const BACILLI: i64 = 31;
pub const SOIL: i64 = 100;
pub const SEDIMENT: i64 = 101;
pub const FOREST: i64 = 200;
pub const GRASSLAND: i64 = 201;

pub fn blank_sample(sample_id: u64) -> SampleRow {
    SampleRow {
        sample_id,
        latitude: None,
        longitude: None,
        depth: None,
        ph: None,
        organic_carbon: None,
        date_sampled: None,
        time_sampled: None,
        sample_site: None,
        notes: None,
        env_material: None,
        vegetation_type: None,
    }
}

/// Small synthetic dataset: two amplicons, four OTUs, five samples (one with
/// no coordinates and no observations, two straddling the dateline).
pub fn setup() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    for (ontology, id, label) in [
        ("amplicon", AMP_16S, "16S"),
        ("amplicon", AMP_ITS, "ITS"),
        ("kingdom", BACTERIA, "Bacteria"),
        ("kingdom", FUNGI, "Fungi"),
        ("phylum", PROTEOBACTERIA, "Proteobacteria"),
        ("phylum", FIRMICUTES, "Firmicutes"),
        ("phylum", ASCOMYCOTA, "Ascomycota"),
        ("class", GAMMAPROTEOBACTERIA, "Gammaproteobacteria"),
        ("class", BACILLI, "Bacilli"),
        ("env_material", SOIL, "soil"),
        ("env_material", SEDIMENT, "sediment"),
        ("vegetation_type", FOREST, "forest"),
        ("vegetation_type", GRASSLAND, "grassland"),
    ] {
        store.insert_ontology_term(ontology, id, label).unwrap();
    }

    store
        .insert_otu(&OtuRecord {
            otu_id: 1,
            code: "OTU_A".to_string(),
            amplicon: AMP_16S,
            ranks: [
                Some(BACTERIA),
                Some(PROTEOBACTERIA),
                Some(GAMMAPROTEOBACTERIA),
                None,
                None,
                None,
                None,
            ],
            traits: None,
        })
        .unwrap();
    store
        .insert_otu(&OtuRecord {
            otu_id: 2,
            code: "OTU_B".to_string(),
            amplicon: AMP_16S,
            ranks: [
                Some(BACTERIA),
                Some(FIRMICUTES),
                Some(BACILLI),
                None,
                None,
                None,
                None,
            ],
            traits: Some("gram+,rod".to_string()),
        })
        .unwrap();
    store
        .insert_otu(&OtuRecord {
            otu_id: 3,
            code: "OTU_C".to_string(),
            amplicon: AMP_16S,
            ranks: [
                Some(BACTERIA),
                Some(PROTEOBACTERIA),
                None,
                None,
                None,
                None,
                None,
            ],
            traits: None,
        })
        .unwrap();
    store
        .insert_otu(&OtuRecord {
            otu_id: 4,
            code: "OTU_D".to_string(),
            amplicon: AMP_ITS,
            ranks: [
                Some(FUNGI),
                Some(ASCOMYCOTA),
                None,
                None,
                None,
                None,
                None,
            ],
            traits: None,
        })
        .unwrap();

    store
        .insert_sample(&SampleRow {
            latitude: Some(-27.5),
            longitude: Some(153.0),
            depth: Some(0.1),
            ph: Some(5.5),
            organic_carbon: Some(1.2),
            date_sampled: NaiveDate::from_ymd_opt(2020, 1, 15),
            time_sampled: NaiveTime::from_hms_opt(9, 30, 0),
            sample_site: Some("Brisbane forest".to_string()),
            notes: Some("baseline".to_string()),
            env_material: Some(SOIL),
            vegetation_type: Some(FOREST),
            ..blank_sample(1)
        })
        .unwrap();
    store
        .insert_sample(&SampleRow {
            latitude: Some(-35.0),
            longitude: Some(149.0),
            ph: Some(7.2),
            date_sampled: NaiveDate::from_ymd_opt(2021, 6, 1),
            sample_site: Some("Canberra grassland".to_string()),
            env_material: Some(SEDIMENT),
            vegetation_type: Some(GRASSLAND),
            ..blank_sample(2)
        })
        .unwrap();
    store
        .insert_sample(&SampleRow {
            latitude: Some(-17.0),
            longitude: Some(179.0),
            ph: Some(8.1),
            sample_site: Some("Fiji reef".to_string()),
            env_material: Some(SOIL),
            ..blank_sample(3)
        })
        .unwrap();
    store
        .insert_sample(&SampleRow {
            latitude: Some(-17.2),
            longitude: Some(-179.5),
            ph: Some(4.0),
            env_material: Some(SEDIMENT),
            ..blank_sample(4)
        })
        .unwrap();
    store.insert_sample(&blank_sample(5)).unwrap();

    for (sample_id, otu_id, count) in [
        (1, 1, 5),
        (1, 2, 3),
        (2, 2, 7),
        (2, 3, 2),
        (3, 1, 1),
        (4, 4, 9),
    ] {
        store.insert_observation(sample_id, otu_id, count).unwrap();
    }
    store
}

pub fn catalog(store: &SqliteStore) -> SchemaCatalog {
    SchemaCatalog::load(store).unwrap()
}
