use core::hash::BuildHasherDefault;
use std::collections::HashMap;

// bimap keeps the one-to-one mapping between ontology ids and their labels
use bimap::BiMap;
use seahash::SeaHasher;
use serde::{Deserialize, Serialize};

use crate::error::{OtuscopeError, Result};
use crate::store::RowSource;

// ------------- Identifiers -------------
pub type OntologyId = i64;
pub type AmpliconId = i64;
pub type SampleId = u64;
pub type OtuId = u64;

pub type IdHasher = BuildHasherDefault<SeaHasher>;
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

/// Ontology backing the amplicon (marker) selector. The amplicon is a gating
/// dimension, not a rank: it restricts which OTU population rank lookups and
/// exports run against.
pub const AMPLICON_ONTOLOGY: &str = "amplicon";

// ------------- Rank -------------
/// One level of the strict taxonomic hierarchy, kingdom down to species.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl Rank {
    pub const ALL: [Rank; 7] = [
        Rank::Kingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Genus,
        Rank::Species,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Rank::Kingdom => "kingdom",
            Rank::Phylum => "phylum",
            Rank::Class => "class",
            Rank::Order => "order",
            Rank::Family => "family",
            Rank::Genus => "genus",
            Rank::Species => "species",
        }
    }

    /// Each rank is backed by an ontology of the same name.
    pub fn ontology(&self) -> &'static str {
        self.name()
    }

    /// Column holding this rank's ontology id on the OTU table.
    pub fn column(&self) -> &'static str {
        match self {
            Rank::Kingdom => "kingdom_id",
            Rank::Phylum => "phylum_id",
            Rank::Class => "class_id",
            Rank::Order => "order_id",
            Rank::Family => "family_id",
            Rank::Genus => "genus_id",
            Rank::Species => "species_id",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(i: usize) -> Option<Rank> {
        Rank::ALL.get(i).copied()
    }
}

// ------------- Attributes -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Date,
    Time,
    Float,
    String,
    Ontology,
    SampleId,
}

/// Static description of one filterable contextual field. Built once from the
/// table below and never mutated at request time; the name doubles as the
/// column name on the sample table.
#[derive(Debug, Clone, Copy)]
pub struct AttributeDescriptor {
    pub name: &'static str,
    pub display_name: &'static str,
    pub semantic_type: SemanticType,
    pub unit: Option<&'static str>,
    pub ontology_ref: Option<&'static str>,
    /// Longitude-like fields get dateline-wrapping range semantics downstream.
    pub wraps_dateline: bool,
}

const ATTRIBUTES: &[AttributeDescriptor] = &[
    AttributeDescriptor {
        name: "sample_id",
        display_name: "Sample ID",
        semantic_type: SemanticType::SampleId,
        unit: None,
        ontology_ref: None,
        wraps_dateline: false,
    },
    AttributeDescriptor {
        name: "latitude",
        display_name: "Latitude",
        semantic_type: SemanticType::Float,
        unit: Some("°"),
        ontology_ref: None,
        wraps_dateline: false,
    },
    AttributeDescriptor {
        name: "longitude",
        display_name: "Longitude",
        semantic_type: SemanticType::Float,
        unit: Some("°"),
        ontology_ref: None,
        wraps_dateline: true,
    },
    AttributeDescriptor {
        name: "depth",
        display_name: "Depth",
        semantic_type: SemanticType::Float,
        unit: Some("m"),
        ontology_ref: None,
        wraps_dateline: false,
    },
    AttributeDescriptor {
        name: "ph",
        display_name: "pH",
        semantic_type: SemanticType::Float,
        unit: None,
        ontology_ref: None,
        wraps_dateline: false,
    },
    AttributeDescriptor {
        name: "organic_carbon",
        display_name: "Organic carbon",
        semantic_type: SemanticType::Float,
        unit: Some("%"),
        ontology_ref: None,
        wraps_dateline: false,
    },
    AttributeDescriptor {
        name: "date_sampled",
        display_name: "Date sampled",
        semantic_type: SemanticType::Date,
        unit: None,
        ontology_ref: None,
        wraps_dateline: false,
    },
    AttributeDescriptor {
        name: "time_sampled",
        display_name: "Time sampled",
        semantic_type: SemanticType::Time,
        unit: None,
        ontology_ref: None,
        wraps_dateline: false,
    },
    AttributeDescriptor {
        name: "sample_site",
        display_name: "Sample site",
        semantic_type: SemanticType::String,
        unit: None,
        ontology_ref: None,
        wraps_dateline: false,
    },
    AttributeDescriptor {
        name: "notes",
        display_name: "Notes",
        semantic_type: SemanticType::String,
        unit: None,
        ontology_ref: None,
        wraps_dateline: false,
    },
    AttributeDescriptor {
        name: "env_material",
        display_name: "Environmental material",
        semantic_type: SemanticType::Ontology,
        unit: None,
        ontology_ref: Some("env_material"),
        wraps_dateline: false,
    },
    AttributeDescriptor {
        name: "vegetation_type",
        display_name: "Vegetation type",
        semantic_type: SemanticType::Ontology,
        unit: None,
        ontology_ref: Some("vegetation_type"),
        wraps_dateline: false,
    },
];

// ------------- Ontology -------------
/// A closed id↔label vocabulary, bulk loaded once from the row source.
/// Lookups are O(1) in either direction.
#[derive(Debug)]
pub struct Ontology {
    terms: BiMap<OntologyId, String>,
    by_label: Vec<(OntologyId, String)>,
}

impl Ontology {
    pub fn new(mut terms: Vec<(OntologyId, String)>) -> Self {
        terms.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        let mut map = BiMap::new();
        for (id, label) in &terms {
            map.insert(*id, label.clone());
        }
        Self {
            terms: map,
            by_label: terms,
        }
    }

    pub fn label(&self, id: OntologyId) -> Option<&str> {
        self.terms.get_by_left(&id).map(|s| s.as_str())
    }

    pub fn id(&self, label: &str) -> Option<OntologyId> {
        self.terms.get_by_right(label).copied()
    }

    pub fn contains(&self, id: OntologyId) -> bool {
        self.terms.contains_left(&id)
    }

    /// All terms, sorted by label.
    pub fn values(&self) -> &[(OntologyId, String)] {
        &self.by_label
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }
}

// ------------- Schema Catalog -------------
/// Read-only catalog of every contextual attribute, the rank hierarchy and all
/// ontology vocabularies. Loaded once at startup and shared between requests;
/// a forced reload means building a fresh catalog.
#[derive(Debug)]
pub struct SchemaCatalog {
    by_name: HashMap<&'static str, &'static AttributeDescriptor, OtherHasher>,
    ontologies: HashMap<&'static str, Ontology, OtherHasher>,
}

impl SchemaCatalog {
    /// Bulk load every ontology the attribute table and the rank hierarchy
    /// reference, plus the amplicon selector vocabulary.
    pub fn load(source: &dyn RowSource) -> Result<Self> {
        let mut by_name: HashMap<&'static str, &'static AttributeDescriptor, OtherHasher> =
            HashMap::default();
        for attribute in ATTRIBUTES {
            by_name.insert(attribute.name, attribute);
        }
        let mut ontologies: HashMap<&'static str, Ontology, OtherHasher> = HashMap::default();
        let mut refs: Vec<&'static str> = vec![AMPLICON_ONTOLOGY];
        refs.extend(Rank::ALL.iter().map(|r| r.ontology()));
        refs.extend(ATTRIBUTES.iter().filter_map(|a| a.ontology_ref));
        for name in refs {
            let terms = source.ontology_terms(name)?;
            ontologies.insert(name, Ontology::new(terms));
        }
        Ok(Self {
            by_name,
            ontologies,
        })
    }

    pub fn describe_attribute(&self, name: &str) -> Result<&AttributeDescriptor> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| OtuscopeError::UnknownAttribute(name.to_string()))
    }

    /// Declared attribute names in their catalog order.
    pub fn attribute_names(&self) -> Vec<&'static str> {
        ATTRIBUTES.iter().map(|a| a.name).collect()
    }

    pub fn attributes(&self) -> &'static [AttributeDescriptor] {
        ATTRIBUTES
    }

    pub fn ontology(&self, ontology_ref: &str) -> Result<&Ontology> {
        self.ontologies
            .get(ontology_ref)
            .ok_or_else(|| OtuscopeError::UnknownOntology(ontology_ref.to_string()))
    }

    /// All (id, label) pairs of an ontology, sorted by label.
    pub fn ontology_values(&self, ontology_ref: &str) -> Result<&[(OntologyId, String)]> {
        Ok(self.ontology(ontology_ref)?.values())
    }

    pub fn ontology_id_for_label(&self, ontology_ref: &str, label: &str) -> Result<OntologyId> {
        self.ontology(ontology_ref)?
            .id(label)
            .ok_or_else(|| OtuscopeError::UnknownOntologyValue {
                ontology: ontology_ref.to_string(),
                label: label.to_string(),
            })
    }

    pub fn ontology_label(&self, ontology_ref: &str, id: OntologyId) -> Option<&str> {
        self.ontologies.get(ontology_ref)?.label(id)
    }

    pub fn rank_label(&self, rank: Rank, id: OntologyId) -> Option<&str> {
        self.ontology_label(rank.ontology(), id)
    }

    pub fn amplicon_label(&self, id: AmpliconId) -> Option<&str> {
        self.ontology_label(AMPLICON_ONTOLOGY, id)
    }
}
