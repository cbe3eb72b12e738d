//! Query composition.
//!
//! [`compose`] combines a taxonomy path and two contextual filters into one
//! logical row selection and wraps it in a [`MatchingPopulation`] handle. The
//! handle is request scoped: it builds nothing until one of its
//! materializations is asked for, and the large observation stream is never
//! cached.

use std::fmt;

use roaring::RoaringTreemap;
use tracing::debug;

use crate::cache::{ResultCache, TtlClass};
use crate::error::Result;
use crate::filter::{ContextualFilter, ContextualPredicateTerm};
use crate::schema::{AmpliconId, OntologyId, OtuId, Rank, SampleId, SchemaCatalog};
use crate::store::{ObservationRow, RowSource, SampleRow};
use crate::taxonomy::TaxonomyPath;

// ------------- Selection -------------
/// The logical row-selection expression: which samples belong to the matching
/// population. Built here, executed only by the row source.
#[derive(Debug, Clone)]
pub struct Selection {
    pub amplicon: AmpliconId,
    pub taxonomy: TaxonomyPath,
    pub contextual: ContextualFilter,
}

impl Selection {
    /// Narrow this selection to one kingdom, for per-kingdom export
    /// partitions. Returns `None` when the path already pins a different
    /// kingdom (the partition cannot match anything).
    pub fn with_kingdom(&self, kingdom: OntologyId) -> Option<Selection> {
        match self.taxonomy.get(Rank::Kingdom) {
            Some(existing) if existing != kingdom => None,
            Some(_) => Some(self.clone()),
            None => {
                let mut narrowed = self.clone();
                narrowed.taxonomy = TaxonomyPath::from_slots(&[Some(kingdom)]);
                Some(narrowed)
            }
        }
    }
}

// ------------- Fingerprint -------------
/// Deterministic 256-bit digest of a query's semantic content, used as the
/// cache key. Filter terms are canonicalized (sorted by their stable token)
/// before hashing, so term order does not change the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hash_filter(hasher: &mut blake3::Hasher, filter: &ContextualFilter) {
    hasher.update(filter.mode.keyword().as_bytes());
    let mut tokens: Vec<String> = filter
        .terms
        .iter()
        .map(ContextualPredicateTerm::canonical_token)
        .collect();
    tokens.sort();
    for token in tokens {
        hasher.update(&(token.len() as u64).to_le_bytes());
        hasher.update(token.as_bytes());
    }
}

pub fn fingerprint(
    amplicon: AmpliconId,
    taxonomy: &TaxonomyPath,
    contextual: &ContextualFilter,
    integrity: &ContextualFilter,
) -> QueryFingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&amplicon.to_le_bytes());
    for slot in taxonomy.slots() {
        match slot {
            Some(id) => {
                hasher.update(&[1]);
                hasher.update(&id.to_le_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
    }
    hash_filter(&mut hasher, contextual);
    hash_filter(&mut hasher, integrity);
    QueryFingerprint(hasher.finalize().to_hex().to_string())
}

// ------------- MatchingPopulation -------------
/// Opaque, lazily evaluated reference to the set of sample/observation rows a
/// fingerprint selects. Owned by one request; only the cached materialized
/// forms outlive it.
pub struct MatchingPopulation<'a> {
    source: &'a dyn RowSource,
    cache: Option<&'a ResultCache>,
    selection: Selection,
    integrity: ContextualFilter,
    fingerprint: QueryFingerprint,
    page_size: usize,
}

pub fn compose<'a>(
    source: &'a dyn RowSource,
    cache: Option<&'a ResultCache>,
    amplicon: AmpliconId,
    taxonomy: TaxonomyPath,
    contextual: ContextualFilter,
    integrity: ContextualFilter,
    page_size: usize,
) -> MatchingPopulation<'a> {
    let fingerprint = fingerprint(amplicon, &taxonomy, &contextual, &integrity);
    debug!(%fingerprint, "composed query");
    MatchingPopulation {
        source,
        cache,
        selection: Selection {
            amplicon,
            taxonomy,
            contextual,
        },
        integrity,
        fingerprint,
        page_size,
    }
}

impl<'a> MatchingPopulation<'a> {
    pub fn fingerprint(&self) -> &QueryFingerprint {
        &self.fingerprint
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn integrity_filter(&self) -> &ContextualFilter {
        &self.integrity
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// The matching sample ids as a bitset. Cache eligible.
    pub fn sample_ids(&self) -> Result<RoaringTreemap> {
        let key = format!("samples:{}", self.fingerprint);
        match self.cache {
            Some(cache) => cache.get_or_compute_ids(&key, TtlClass::Default, || {
                self.source.select_sample_ids(&self.selection)
            }),
            None => self.source.select_sample_ids(&self.selection),
        }
    }

    /// Samples matching the integrity-warning filter, restricted to the
    /// matching population. These samples are flagged, never dropped.
    pub fn integrity_flagged_ids(&self) -> Result<RoaringTreemap> {
        if self.integrity.is_empty() {
            return Ok(RoaringTreemap::new());
        }
        let flagged_selection = Selection {
            contextual: self.integrity.clone(),
            ..self.selection.clone()
        };
        let flagged = self.source.select_sample_ids(&flagged_selection)?;
        Ok(&flagged & &self.sample_ids()?)
    }

    /// Every matching sample with its contextual attributes, in sample id
    /// order. Cache eligible; fetched in bounded pages either way.
    pub fn samples_with_attributes(&self) -> Result<Vec<SampleRow>> {
        let key = format!("attrs:{}", self.fingerprint);
        match self.cache {
            Some(cache) => {
                cache.get_or_compute(&key, TtlClass::Default, || self.fetch_all_samples())
            }
            None => self.fetch_all_samples(),
        }
    }

    fn fetch_all_samples(&self) -> Result<Vec<SampleRow>> {
        let mut samples = Vec::new();
        let mut cursor: Option<SampleId> = None;
        loop {
            let page = self
                .source
                .sample_page(&self.selection, cursor, self.page_size)?;
            let full = page.len() == self.page_size;
            cursor = page.last().map(|s| s.sample_id);
            samples.extend(page);
            if !full {
                return Ok(samples);
            }
        }
    }

    /// Lazy stream of (sample, taxon, count) rows in (sample_id, otu_id)
    /// order, fetched in bounded pages. Never cached: the result sets are too
    /// large and too rarely repeated.
    pub fn observation_rows(&self) -> ObservationIter<'_> {
        ObservationIter {
            source: self.source,
            selection: &self.selection,
            page: Vec::new().into_iter(),
            cursor: None,
            page_size: self.page_size,
            exhausted: false,
        }
    }

    /// A handle over the same request narrowed to one kingdom, for the
    /// per-taxon export partitions. Partition handles skip the cache.
    pub fn narrow_to_kingdom(&self, kingdom: OntologyId) -> Option<MatchingPopulation<'a>> {
        let selection = self.selection.with_kingdom(kingdom)?;
        let fingerprint = fingerprint(
            selection.amplicon,
            &selection.taxonomy,
            &selection.contextual,
            &self.integrity,
        );
        Some(MatchingPopulation {
            source: self.source,
            cache: None,
            selection,
            integrity: self.integrity.clone(),
            fingerprint,
            page_size: self.page_size,
        })
    }

    /// Human readable summary, used in notification mails and the info text
    /// of exported bundles.
    pub fn describe(&self, catalog: &SchemaCatalog) -> String {
        let mut lines = Vec::new();
        let amplicon = catalog
            .amplicon_label(self.selection.amplicon)
            .unwrap_or("<unknown>");
        lines.push(format!("amplicon: {amplicon}"));
        let constraints = self.selection.taxonomy.constraints();
        if constraints.is_empty() {
            lines.push("taxonomy: all".to_string());
        } else {
            let parts: Vec<String> = constraints
                .iter()
                .map(|(rank, id)| {
                    let label = catalog.rank_label(*rank, *id).unwrap_or("<unknown>");
                    format!("{} = {}", rank.name(), label)
                })
                .collect();
            lines.push(format!("taxonomy: {}", parts.join(", ")));
        }
        if self.selection.contextual.is_empty() {
            lines.push("filters: none".to_string());
        } else {
            let parts: Vec<String> = self
                .selection
                .contextual
                .terms
                .iter()
                .map(|t| render_term(catalog, t))
                .collect();
            lines.push(format!(
                "filters ({}): {}",
                self.selection.contextual.mode.keyword(),
                parts.join("; ")
            ));
        }
        if !self.integrity.is_empty() {
            let parts: Vec<String> = self
                .integrity
                .terms
                .iter()
                .map(|t| render_term(catalog, t))
                .collect();
            lines.push(format!(
                "integrity warnings ({}): {}",
                self.integrity.mode.keyword(),
                parts.join("; ")
            ));
        }
        lines.push(format!("fingerprint: {}", self.fingerprint));
        lines.join("\n")
    }
}

fn bound<T: fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "*".to_string(),
    }
}

fn render_term(catalog: &SchemaCatalog, term: &ContextualPredicateTerm) -> String {
    match term {
        ContextualPredicateTerm::RangeNumeric { field, lo, hi }
        | ContextualPredicateTerm::RangeLongitude { field, lo, hi } => {
            format!("{field} in [{}..{}]", bound(lo), bound(hi))
        }
        ContextualPredicateTerm::RangeDate { field, lo, hi } => {
            format!("{field} in [{}..{}]", bound(lo), bound(hi))
        }
        ContextualPredicateTerm::RangeTime { field, lo, hi } => {
            format!("{field} in [{}..{}]", bound(lo), bound(hi))
        }
        ContextualPredicateTerm::StringContains {
            field,
            substring,
            complement,
        } => {
            if *complement {
                format!("{field} does not contain '{substring}'")
            } else {
                format!("{field} contains '{substring}'")
            }
        }
        ContextualPredicateTerm::OntologyEquals { field, id } => {
            let label = catalog
                .describe_attribute(field)
                .ok()
                .and_then(|a| a.ontology_ref)
                .and_then(|o| catalog.ontology_label(o, *id))
                .map(str::to_string)
                .unwrap_or_else(|| id.to_string());
            format!("{field} = {label}")
        }
        ContextualPredicateTerm::SampleIdIn { ids } => {
            format!("sample_id in {} given ids", ids.len())
        }
    }
}

// ------------- Observation stream -------------
pub struct ObservationIter<'a> {
    source: &'a dyn RowSource,
    selection: &'a Selection,
    page: std::vec::IntoIter<ObservationRow>,
    cursor: Option<(SampleId, OtuId)>,
    page_size: usize,
    exhausted: bool,
}

impl Iterator for ObservationIter<'_> {
    type Item = Result<ObservationRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.page.next() {
                self.cursor = Some((row.sample_id, row.otu.otu_id));
                return Some(Ok(row));
            }
            if self.exhausted {
                return None;
            }
            match self
                .source
                .observation_page(self.selection, self.cursor, self.page_size)
            {
                Ok(rows) => {
                    if rows.len() < self.page_size {
                        self.exhausted = true;
                    }
                    if rows.is_empty() {
                        return None;
                    }
                    self.page = rows.into_iter();
                }
                Err(e) => {
                    // A failed read is fatal for the stream; no internal retry.
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
