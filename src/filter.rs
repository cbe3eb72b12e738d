//! Contextual predicate compiler.
//!
//! Raw filter specifications arrive as loosely structured values (one per
//! requested filter) and are compiled into typed predicate terms by looking up
//! each field in the [`SchemaCatalog`](crate::schema::SchemaCatalog) and
//! dispatching on its semantic type. Compilation is permissive but reported:
//! a term either compiles fully or contributes one [`FilterError`] to the
//! accumulated error list, and one bad term never aborts the rest.

use chrono::{NaiveDate, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::error::{FilterError, FilterErrorKind};
use crate::schema::{OntologyId, SampleId, SchemaCatalog, SemanticType};

/// Accepted date input formats, tried in order. Month-name forms also accept
/// the corresponding abbreviation.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%y", "%d/%m/%Y", "%d-%B-%Y", "%d %B %Y"];
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];

lazy_static! {
    static ref SQUEEZE: Regex = Regex::new(r"\s+").unwrap();
}

// ------------- Terms -------------
/// A typed, validated predicate over one contextual attribute. Constructed
/// only by [`compile_contextual_filter`], never directly.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextualPredicateTerm {
    RangeNumeric {
        field: &'static str,
        lo: Option<f64>,
        hi: Option<f64>,
    },
    /// Longitude-like ranges keep their own variant so a lo > hi pair can mean
    /// "crosses the dateline" downstream instead of "empty".
    RangeLongitude {
        field: &'static str,
        lo: Option<f64>,
        hi: Option<f64>,
    },
    RangeDate {
        field: &'static str,
        lo: Option<NaiveDate>,
        hi: Option<NaiveDate>,
    },
    RangeTime {
        field: &'static str,
        lo: Option<NaiveTime>,
        hi: Option<NaiveTime>,
    },
    StringContains {
        field: &'static str,
        substring: String,
        complement: bool,
    },
    OntologyEquals {
        field: &'static str,
        id: OntologyId,
    },
    SampleIdIn {
        ids: Vec<SampleId>,
    },
}

impl ContextualPredicateTerm {
    /// Stable textual form used when canonicalizing a filter for
    /// fingerprinting. Two equal terms always render identically.
    pub fn canonical_token(&self) -> String {
        match self {
            ContextualPredicateTerm::RangeNumeric { field, lo, hi } => {
                format!("num:{field}:{lo:?}:{hi:?}")
            }
            ContextualPredicateTerm::RangeLongitude { field, lo, hi } => {
                format!("lon:{field}:{lo:?}:{hi:?}")
            }
            ContextualPredicateTerm::RangeDate { field, lo, hi } => {
                format!("date:{field}:{lo:?}:{hi:?}")
            }
            ContextualPredicateTerm::RangeTime { field, lo, hi } => {
                format!("time:{field}:{lo:?}:{hi:?}")
            }
            ContextualPredicateTerm::StringContains {
                field,
                substring,
                complement,
            } => format!("str:{field}:{complement}:{substring}"),
            ContextualPredicateTerm::OntologyEquals { field, id } => {
                format!("ont:{field}:{id}")
            }
            ContextualPredicateTerm::SampleIdIn { ids } => {
                let rendered: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
                format!("ids:{}", rendered.join(","))
            }
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            ContextualPredicateTerm::RangeNumeric { field, .. }
            | ContextualPredicateTerm::RangeLongitude { field, .. }
            | ContextualPredicateTerm::RangeDate { field, .. }
            | ContextualPredicateTerm::RangeTime { field, .. }
            | ContextualPredicateTerm::StringContains { field, .. }
            | ContextualPredicateTerm::OntologyEquals { field, .. } => field,
            ContextualPredicateTerm::SampleIdIn { .. } => "sample_id",
        }
    }
}

// ------------- Filter -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    And,
    Or,
}

impl CombineMode {
    pub fn keyword(&self) -> &'static str {
        match self {
            CombineMode::And => "and",
            CombineMode::Or => "or",
        }
    }
}

/// An ordered list of predicate terms plus the mode combining them. An empty
/// filter matches everything.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextualFilter {
    pub mode: CombineMode,
    pub terms: Vec<ContextualPredicateTerm>,
}

impl ContextualFilter {
    pub fn empty() -> Self {
        Self {
            mode: CombineMode::And,
            terms: Vec::new(),
        }
    }

    pub fn new(mode: CombineMode, terms: Vec<ContextualPredicateTerm>) -> Self {
        Self { mode, terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }
}

// ------------- Raw specs -------------
/// One filter specification as it arrives from the outside: a field name, an
/// optional operator and whichever payload keys the operator needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFilterSpec {
    pub field: String,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default)]
    pub id: Option<OntologyId>,
    #[serde(default)]
    pub ids: Option<Vec<SampleId>>,
}

// ------------- Parsing helpers -------------
/// Parse a date in any of the accepted formats.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let cleaned = SQUEEZE.replace_all(raw.trim(), " ");
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(&cleaned, f).ok())
}

pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let cleaned = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(cleaned, f).ok())
}

fn parse_float(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn bad(field: &str, kind: FilterErrorKind) -> FilterError {
    FilterError {
        field: field.to_string(),
        kind,
    }
}

/// Parse both ends of a range payload with one parser; at least one bound must
/// be present and parsable.
fn parse_bounds<T>(
    spec: &RawFilterSpec,
    parse: impl Fn(&str) -> Option<T>,
) -> std::result::Result<(Option<T>, Option<T>), FilterError> {
    let parse_end = |raw: &Option<String>| -> std::result::Result<Option<T>, FilterError> {
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => parse(text)
                .map(Some)
                .ok_or_else(|| bad(&spec.field, FilterErrorKind::InvalidRangeValue(text.into()))),
        }
    };
    let lo = parse_end(&spec.from)?;
    let hi = parse_end(&spec.to)?;
    if lo.is_none() && hi.is_none() {
        return Err(bad(
            &spec.field,
            FilterErrorKind::InvalidRangeValue("no bounds given".into()),
        ));
    }
    Ok((lo, hi))
}

fn compile_term(
    catalog: &SchemaCatalog,
    spec: &RawFilterSpec,
) -> std::result::Result<ContextualPredicateTerm, FilterError> {
    let attribute = catalog
        .describe_attribute(&spec.field)
        .map_err(|_| bad(&spec.field, FilterErrorKind::UnknownAttribute))?;
    let field = attribute.name;
    match attribute.semantic_type {
        SemanticType::SampleId => {
            let mut ids = spec.ids.clone().unwrap_or_default();
            if ids.is_empty() {
                return Err(bad(field, FilterErrorKind::EmptySampleIdSet));
            }
            ids.sort_unstable();
            ids.dedup();
            Ok(ContextualPredicateTerm::SampleIdIn { ids })
        }
        SemanticType::Ontology => {
            let id = spec
                .id
                .ok_or_else(|| bad(field, FilterErrorKind::MissingOntologyValue))?;
            let known = attribute
                .ontology_ref
                .and_then(|o| catalog.ontology(o).ok())
                .is_some_and(|o| o.contains(id));
            if !known {
                return Err(bad(field, FilterErrorKind::InvalidOntologyValue(id)));
            }
            Ok(ContextualPredicateTerm::OntologyEquals { field, id })
        }
        SemanticType::Date => {
            let (lo, hi) = parse_bounds(spec, parse_date)?;
            Ok(ContextualPredicateTerm::RangeDate { field, lo, hi })
        }
        SemanticType::Time => {
            let (lo, hi) = parse_bounds(spec, parse_time)?;
            Ok(ContextualPredicateTerm::RangeTime { field, lo, hi })
        }
        SemanticType::Float => {
            let (lo, hi) = parse_bounds(spec, parse_float)?;
            if attribute.wraps_dateline {
                Ok(ContextualPredicateTerm::RangeLongitude { field, lo, hi })
            } else {
                Ok(ContextualPredicateTerm::RangeNumeric { field, lo, hi })
            }
        }
        SemanticType::String => {
            // An empty substring is permitted and matches everything.
            let substring = spec.contains.clone().unwrap_or_default();
            let complement = spec.operator.as_deref() == Some("complement");
            Ok(ContextualPredicateTerm::StringContains {
                field,
                substring,
                complement,
            })
        }
    }
}

/// Compile a batch of raw specs into a [`ContextualFilter`]. Terms that fail
/// validation are reported in the returned error list; the caller decides
/// whether a non-empty list is fatal.
pub fn compile_contextual_filter(
    catalog: &SchemaCatalog,
    mode: CombineMode,
    specs: &[RawFilterSpec],
) -> (ContextualFilter, Vec<FilterError>) {
    let mut terms = Vec::with_capacity(specs.len());
    let mut errors = Vec::new();
    for spec in specs {
        match compile_term(catalog, spec) {
            Ok(term) => terms.push(term),
            Err(e) => errors.push(e),
        }
    }
    (ContextualFilter::new(mode, terms), errors)
}
