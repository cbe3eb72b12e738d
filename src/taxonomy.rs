//! Taxonomy path vectors and the cascading options resolver.
//!
//! A taxonomy path pins a prefix of the rank hierarchy to ontology ids. The
//! resolver walks the ranks left to right against the OTU population of one
//! amplicon and reports the first rank that is unset or no longer yields any
//! rows, together with the values still selectable there.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::schema::{AmpliconId, OntologyId, Rank, SchemaCatalog};
use crate::store::RowSource;

// ------------- TaxonomyPath -------------
/// Ordered rank-value vector. Invariant: set values form a prefix — a value at
/// rank i implies values at all ranks above i. Construction and mutation
/// enforce this by clearing everything from the first gap onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaxonomyPath {
    slots: [Option<OntologyId>; 7],
}

impl TaxonomyPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw per-rank values, clearing any suffix after the first
    /// unset rank. Extra entries beyond the rank count are ignored.
    pub fn from_slots(raw: &[Option<OntologyId>]) -> Self {
        let mut path = Self::default();
        for (i, value) in raw.iter().take(path.slots.len()).enumerate() {
            match value {
                Some(id) => path.slots[i] = Some(*id),
                None => break,
            }
        }
        path
    }

    pub fn get(&self, rank: Rank) -> Option<OntologyId> {
        self.slots[rank.index()]
    }

    /// Set one rank, clearing every deeper rank (their previous values can no
    /// longer be assumed valid under the new prefix). Setting a rank below a
    /// gap leaves the path cleared from the gap onward.
    pub fn set(&mut self, rank: Rank, id: OntologyId) {
        self.slots[rank.index()] = Some(id);
        for slot in self.slots.iter_mut().skip(rank.index() + 1) {
            *slot = None;
        }
        let slots = self.slots;
        *self = Self::from_slots(&slots);
    }

    pub fn is_empty(&self) -> bool {
        self.slots[0].is_none()
    }

    /// Number of leading set ranks.
    pub fn depth(&self) -> usize {
        self.slots.iter().take_while(|s| s.is_some()).count()
    }

    /// The set (rank, id) prefix, shallow to deep.
    pub fn constraints(&self) -> Vec<(Rank, OntologyId)> {
        Rank::ALL
            .iter()
            .filter_map(|rank| self.get(*rank).map(|id| (*rank, id)))
            .collect()
    }

    pub fn slots(&self) -> &[Option<OntologyId>; 7] {
        &self.slots
    }
}

// ------------- Cascade -------------
/// Answer to "what can still be chosen?". `target_rank` is `None` when the
/// whole vector is valid (hierarchy fully specified, nothing to offer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeOutcome {
    pub target_rank: Option<Rank>,
    pub possibilities: Vec<(OntologyId, String)>,
    pub clear: Vec<Rank>,
}

impl CascadeOutcome {
    pub fn fully_specified() -> Self {
        Self {
            target_rank: None,
            possibilities: Vec::new(),
            clear: Vec::new(),
        }
    }
}

/// Resolve ids to labels via the rank's ontology and sort by label. Ids with
/// no ontology row are a data integrity problem: logged and skipped.
fn labeled_options(
    catalog: &SchemaCatalog,
    rank: Rank,
    ids: Vec<OntologyId>,
) -> Vec<(OntologyId, String)> {
    let mut options: Vec<(OntologyId, String)> = Vec::with_capacity(ids.len());
    for id in ids {
        match catalog.rank_label(rank, id) {
            Some(label) => options.push((id, label.to_string())),
            None => warn!(rank = rank.name(), id, "skipping taxon with no ontology row"),
        }
    }
    options.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
    options
}

/// Full option list at the kingdom rank for one amplicon. This list never
/// depends on earlier selections, so it is computed once and cached.
pub fn kingdom_options(
    catalog: &SchemaCatalog,
    source: &dyn RowSource,
    amplicon: AmpliconId,
) -> Result<Vec<(OntologyId, String)>> {
    let ids = source.distinct_rank_values(amplicon, &[], Rank::Kingdom)?;
    Ok(labeled_options(catalog, Rank::Kingdom, ids))
}

/// Walk the ranks left to right. The first rank that is unset, or set but
/// yielding zero rows under the constraints above it, becomes the target; it
/// and every deeper rank are reported in `clear`. The kingdom rank takes the
/// precomputed option list instead of running a narrowing query.
pub fn resolve_cascade(
    catalog: &SchemaCatalog,
    source: &dyn RowSource,
    kingdoms: &[(OntologyId, String)],
    amplicon: AmpliconId,
    path: &TaxonomyPath,
) -> Result<CascadeOutcome> {
    let mut confirmed: Vec<(Rank, OntologyId)> = Vec::new();
    let mut target: Option<Rank> = None;
    for rank in Rank::ALL {
        match path.get(rank) {
            Some(id) => {
                confirmed.push((rank, id));
                if !source.taxon_exists(amplicon, &confirmed)? {
                    debug!(rank = rank.name(), id, "rank value yields zero rows");
                    confirmed.pop();
                    target = Some(rank);
                    break;
                }
            }
            None => {
                target = Some(rank);
                break;
            }
        }
    }
    let Some(target_rank) = target else {
        return Ok(CascadeOutcome::fully_specified());
    };
    let clear: Vec<Rank> = Rank::ALL[target_rank.index()..].to_vec();
    let possibilities = if target_rank == Rank::Kingdom {
        kingdoms.to_vec()
    } else {
        let ids = source.distinct_rank_values(amplicon, &confirmed, target_rank)?;
        labeled_options(catalog, target_rank, ids)
    };
    Ok(CascadeOutcome {
        target_rank: Some(target_rank),
        possibilities,
        clear,
    })
}
