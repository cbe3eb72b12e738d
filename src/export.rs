//! Streaming export writers.
//!
//! Every format is produced from the same matching population in one pass over
//! the deterministic observation stream, with bounded working state: dense
//! index maps and per-point aggregates grow with the number of distinct taxa
//! or locations, never with the observation count. Output leaves through a
//! [`ChunkSink`] as a sequence of named entries, so the caller decides whether
//! chunks land in files, an archive or a channel.
//!
//! Two failure policies apply throughout. Losing the row source mid-stream is
//! fatal and aborts the export. A single bad row (an ontology id with no term,
//! an observation pointing at a sample outside the population) is logged and
//! skipped, never fatal.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use roaring::RoaringTreemap;

use crate::compose::MatchingPopulation;
use crate::error::{OtuscopeError, Result};
use crate::interface::CancelToken;
use crate::schema::{IdHasher, OntologyId, OtuId, Rank, SampleId, SchemaCatalog};
use crate::store::ObservationRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    SparseMatrix,
    TaxonCsvBundle,
    SpatialAggregate,
}

// ------------- Chunk protocol -------------
/// One unit of export output. `BeginEntry` opens a named entry (a file in the
/// produced bundle); `Data` bytes belong to the most recently opened entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportChunk {
    BeginEntry { name: String },
    Data(Vec<u8>),
}

/// Receiver of export output. `send` returning an error aborts the export.
pub trait ChunkSink: Send {
    fn send(&mut self, chunk: ExportChunk) -> Result<()>;
}

/// In-memory sink, used in tests and for small synchronous exports.
#[derive(Debug, Default)]
pub struct VecSink {
    pub chunks: Vec<ExportChunk>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reassemble chunks into (entry name, bytes) pairs in emission order.
    pub fn entries(&self) -> Vec<(String, Vec<u8>)> {
        let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
        for chunk in &self.chunks {
            match chunk {
                ExportChunk::BeginEntry { name } => entries.push((name.clone(), Vec::new())),
                ExportChunk::Data(bytes) => {
                    if let Some((_, body)) = entries.last_mut() {
                        body.extend_from_slice(bytes);
                    }
                }
            }
        }
        entries
    }
}

impl ChunkSink for VecSink {
    fn send(&mut self, chunk: ExportChunk) -> Result<()> {
        self.chunks.push(chunk);
        Ok(())
    }
}

// ------------- Longitude rewrap -------------
/// Move a longitude into the window [center - 180, center + 180). Keeps a
/// region that straddles the dateline visually contiguous when the map is
/// centered away from Greenwich. Non-finite input yields NaN; callers must
/// screen coordinates before grouping on the result.
pub fn rewrap_longitude(longitude: f64, center: f64) -> f64 {
    let base = center - 180.0;
    (longitude - base).rem_euclid(360.0) + base
}

// ------------- Output rows -------------
#[derive(Debug, Serialize)]
struct SampleEntry<'a> {
    #[serde(flatten)]
    sample: &'a crate::store::SampleRow,
    integrity_warning: bool,
}

#[derive(Debug, Serialize)]
struct TaxonEntry {
    otu_id: OtuId,
    code: String,
    ranks: [Option<String>; 7],
}

#[derive(Debug, Serialize)]
struct SpatialPoint {
    latitude: f64,
    longitude: f64,
    richness: u64,
    abundance: i64,
    samples: Vec<SampleId>,
}

// ------------- Exporter -------------
pub struct Exporter<'a> {
    catalog: &'a SchemaCatalog,
    population: &'a MatchingPopulation<'a>,
    longitude_center: f64,
}

impl<'a> Exporter<'a> {
    pub fn new(
        catalog: &'a SchemaCatalog,
        population: &'a MatchingPopulation<'a>,
        longitude_center: f64,
    ) -> Self {
        Self {
            catalog,
            population,
            longitude_center,
        }
    }

    pub fn run(
        &self,
        format: ExportFormat,
        kingdoms: &[(OntologyId, String)],
        sink: &mut dyn ChunkSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        info!(?format, fingerprint = %self.population.fingerprint(), "export started");
        match format {
            ExportFormat::SparseMatrix => self.sparse_matrix(sink, cancel),
            ExportFormat::TaxonCsvBundle => self.taxon_csv_bundle(kingdoms, sink, cancel),
            ExportFormat::SpatialAggregate => self.spatial_aggregate(sink, cancel),
        }
    }

    fn check_cancel(cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(OtuscopeError::Canceled);
        }
        Ok(())
    }

    /// Sparse observation matrix: `samples.json` (every matching sample, with
    /// its attributes and integrity flag, defining the column order),
    /// `data.json` ([taxon row, sample column, count] triples) and
    /// `taxa.json` (row order, assigned on first appearance in the stream).
    /// Samples with zero observations still appear as columns.
    fn sparse_matrix(&self, sink: &mut dyn ChunkSink, cancel: &CancelToken) -> Result<()> {
        let flagged = self.population.integrity_flagged_ids()?;
        let samples = self.population.samples_with_attributes()?;

        let mut columns: HashMap<SampleId, usize, IdHasher> = HashMap::default();
        sink.send(ExportChunk::BeginEntry {
            name: "samples.json".to_string(),
        })?;
        sink.send(ExportChunk::Data(b"[".to_vec()))?;
        for (i, sample) in samples.iter().enumerate() {
            Self::check_cancel(cancel)?;
            columns.insert(sample.sample_id, i);
            let entry = SampleEntry {
                sample,
                integrity_warning: flagged.contains(sample.sample_id),
            };
            let mut bytes = if i == 0 { Vec::new() } else { b",".to_vec() };
            bytes.append(&mut serde_json::to_vec(&entry)?);
            sink.send(ExportChunk::Data(bytes))?;
        }
        sink.send(ExportChunk::Data(b"]".to_vec()))?;

        // Taxon rows are indexed in first-seen order while the triples stream
        // out, so the matrix needs no second pass over the observations.
        let mut rows: HashMap<OtuId, usize, IdHasher> = HashMap::default();
        let mut taxa: Vec<TaxonEntry> = Vec::new();
        sink.send(ExportChunk::BeginEntry {
            name: "data.json".to_string(),
        })?;
        sink.send(ExportChunk::Data(b"[".to_vec()))?;
        let mut first = true;
        for row in self.population.observation_rows() {
            Self::check_cancel(cancel)?;
            let row = row?;
            let Some(&column) = columns.get(&row.sample_id) else {
                warn!(
                    sample_id = row.sample_id,
                    otu_id = row.otu.otu_id,
                    "skipping observation outside the sample population"
                );
                continue;
            };
            let next = rows.len();
            let taxon_row = *rows.entry(row.otu.otu_id).or_insert_with(|| {
                taxa.push(taxon_entry(self.catalog, &row));
                next
            });
            let triple = serde_json::to_vec(&(taxon_row, column, row.count))?;
            let mut bytes = if first { Vec::new() } else { b",".to_vec() };
            first = false;
            bytes.extend_from_slice(&triple);
            sink.send(ExportChunk::Data(bytes))?;
        }
        sink.send(ExportChunk::Data(b"]".to_vec()))?;

        sink.send(ExportChunk::BeginEntry {
            name: "taxa.json".to_string(),
        })?;
        sink.send(ExportChunk::Data(serde_json::to_vec(&taxa)?))?;
        info!(
            samples = samples.len(),
            taxa = taxa.len(),
            "sparse matrix export finished"
        );
        Ok(())
    }

    /// One CSV per kingdom present in the matching population. A kingdom whose
    /// partition yields zero rows produces no entry at all; the entry and its
    /// header line are only emitted once the first row materializes.
    fn taxon_csv_bundle(
        &self,
        kingdoms: &[(OntologyId, String)],
        sink: &mut dyn ChunkSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        let amplicon_label = self
            .catalog
            .amplicon_label(self.population.selection().amplicon)
            .unwrap_or("unknown")
            .to_string();
        for (kingdom, label) in kingdoms {
            Self::check_cancel(cancel)?;
            let Some(partition) = self.population.narrow_to_kingdom(*kingdom) else {
                continue;
            };
            let mut opened = false;
            let mut emitted = 0usize;
            for row in partition.observation_rows() {
                Self::check_cancel(cancel)?;
                let row = row?;
                let Some(line) = self.csv_line(&amplicon_label, &row) else {
                    continue;
                };
                if !opened {
                    sink.send(ExportChunk::BeginEntry {
                        name: format!("{label}.csv"),
                    })?;
                    sink.send(ExportChunk::Data(CSV_HEADER.as_bytes().to_vec()))?;
                    opened = true;
                }
                sink.send(ExportChunk::Data(line.into_bytes()))?;
                emitted += 1;
            }
            if opened {
                info!(kingdom = label.as_str(), rows = emitted, "csv partition written");
            }
        }
        Ok(())
    }

    /// One observation as a CSV line, or `None` when the row carries a rank id
    /// with no ontology term (logged and skipped).
    fn csv_line(&self, amplicon_label: &str, row: &ObservationRow) -> Option<String> {
        let mut fields: Vec<String> = vec![
            row.sample_id.to_string(),
            csv_field(&row.otu.code),
            row.count.to_string(),
            csv_field(amplicon_label),
        ];
        for rank in Rank::ALL {
            match row.otu.ranks[rank.index()] {
                None => fields.push(String::new()),
                Some(id) => match self.catalog.rank_label(rank, id) {
                    Some(label) => fields.push(csv_field(label)),
                    None => {
                        warn!(
                            otu_id = row.otu.otu_id,
                            rank = rank.name(),
                            id,
                            "skipping observation with unresolvable rank id"
                        );
                        return None;
                    }
                },
            }
        }
        fields.push(csv_field(row.otu.traits.as_deref().unwrap_or("")));
        Some(format!("{}\n", fields.join(",")))
    }

    /// Group the matching samples by (latitude, rewrapped longitude) and
    /// aggregate taxon richness and total abundance per point. Point keys are
    /// rounded coordinates in a sorted map, so output order is deterministic.
    fn spatial_aggregate(&self, sink: &mut dyn ChunkSink, cancel: &CancelToken) -> Result<()> {
        struct Accumulator {
            latitude: f64,
            longitude: f64,
            otus: RoaringTreemap,
            abundance: i64,
            samples: Vec<SampleId>,
        }

        let mut located: HashMap<SampleId, (String, String), IdHasher> = HashMap::default();
        let mut points: BTreeMap<(String, String), Accumulator> = BTreeMap::new();
        for sample in self.population.samples_with_attributes()? {
            Self::check_cancel(cancel)?;
            let (Some(latitude), Some(longitude)) = (sample.latitude, sample.longitude) else {
                warn!(sample_id = sample.sample_id, "skipping sample with no coordinates");
                continue;
            };
            if !latitude.is_finite() || !longitude.is_finite() {
                warn!(
                    sample_id = sample.sample_id,
                    latitude, longitude, "skipping sample with non-finite coordinates"
                );
                continue;
            }
            let longitude = rewrap_longitude(longitude, self.longitude_center);
            let key = (format!("{latitude:.4}"), format!("{longitude:.4}"));
            located.insert(sample.sample_id, key.clone());
            points
                .entry(key)
                .or_insert_with(|| Accumulator {
                    latitude,
                    longitude,
                    otus: RoaringTreemap::new(),
                    abundance: 0,
                    samples: Vec::new(),
                })
                .samples
                .push(sample.sample_id);
        }

        for row in self.population.observation_rows() {
            Self::check_cancel(cancel)?;
            let row = row?;
            let Some(point) = located.get(&row.sample_id).and_then(|key| points.get_mut(key))
            else {
                continue;
            };
            point.otus.insert(row.otu.otu_id);
            point.abundance += row.count;
        }

        sink.send(ExportChunk::BeginEntry {
            name: "spatial.json".to_string(),
        })?;
        sink.send(ExportChunk::Data(b"[".to_vec()))?;
        for (i, accumulator) in points.into_values().enumerate() {
            Self::check_cancel(cancel)?;
            let point = SpatialPoint {
                latitude: accumulator.latitude,
                longitude: accumulator.longitude,
                richness: accumulator.otus.len(),
                abundance: accumulator.abundance,
                samples: accumulator.samples,
            };
            let mut bytes = if i == 0 { Vec::new() } else { b",".to_vec() };
            bytes.append(&mut serde_json::to_vec(&point)?);
            sink.send(ExportChunk::Data(bytes))?;
        }
        sink.send(ExportChunk::Data(b"]".to_vec()))?;
        Ok(())
    }
}

/// Row descriptor for the taxa index of the sparse matrix. A rank id with no
/// ontology term keeps the raw id as its label, logged once here.
fn taxon_entry(catalog: &SchemaCatalog, row: &ObservationRow) -> TaxonEntry {
    let mut ranks: [Option<String>; 7] = Default::default();
    for rank in Rank::ALL {
        ranks[rank.index()] = row.otu.ranks[rank.index()].map(|id| {
            catalog.rank_label(rank, id).map(str::to_string).unwrap_or_else(|| {
                warn!(
                    otu_id = row.otu.otu_id,
                    rank = rank.name(),
                    id,
                    "rank id has no ontology term"
                );
                id.to_string()
            })
        });
    }
    TaxonEntry {
        otu_id: row.otu.otu_id,
        code: row.otu.code.clone(),
        ranks,
    }
}

const CSV_HEADER: &str =
    "sample_id,otu_code,count,amplicon,kingdom,phylum,class,order,family,genus,species,traits\n";

/// Quote a CSV field when it contains a delimiter, quote or line break.
fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}
