//! Threaded export orchestration.
//!
//! An export runs on its own worker thread and hands chunks to the consumer
//! through a bounded channel, so a slow consumer applies backpressure to the
//! row source instead of buffering the whole bundle. Dropping the receiver or
//! flipping the [`CancelToken`] stops the worker at the next chunk boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::{self, JoinHandle};

use serde::Deserialize;
use tracing::{info, warn};

use crate::cache::ResultCache;
use crate::compose::compose;
use crate::error::{OtuscopeError, Result};
use crate::export::{ChunkSink, ExportChunk, ExportFormat, Exporter};
use crate::filter::{CombineMode, ContextualFilter, RawFilterSpec};
use crate::schema::{AmpliconId, OntologyId, SchemaCatalog};
use crate::store::RowSource;
use crate::taxonomy::TaxonomyPath;

// ------------- CancelToken -------------
/// Shared cancellation flag. Cloning shares the flag; a flipped token stays
/// flipped.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ------------- Requests -------------
/// An export request as it arrives from the outside.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportRequest {
    pub amplicon: AmpliconId,
    /// Per-rank ontology ids, kingdom first. Shorter vectors leave the deeper
    /// ranks unset.
    #[serde(default)]
    pub taxonomy: Vec<Option<OntologyId>>,
    #[serde(default = "default_mode")]
    pub mode: CombineMode,
    #[serde(default)]
    pub filters: Vec<RawFilterSpec>,
    #[serde(default)]
    pub integrity_filters: Vec<RawFilterSpec>,
    /// Combine mode of the integrity terms. Defaults to `or`: any matching
    /// condition flags the sample.
    #[serde(default = "default_integrity_mode")]
    pub integrity_mode: CombineMode,
    pub format: ExportFormat,
}

fn default_mode() -> CombineMode {
    CombineMode::And
}

fn default_integrity_mode() -> CombineMode {
    CombineMode::Or
}

/// A cascading-options request: the amplicon plus the current rank vector.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionsRequest {
    pub amplicon: AmpliconId,
    #[serde(default)]
    pub taxonomy: Vec<Option<OntologyId>>,
}

// ------------- Channel sink -------------
/// Sink that forwards chunks into a bounded channel. A dropped receiver turns
/// into [`OtuscopeError::Canceled`] at the worker.
pub struct ChannelSink {
    tx: SyncSender<ExportChunk>,
}

impl ChunkSink for ChannelSink {
    fn send(&mut self, chunk: ExportChunk) -> Result<()> {
        self.tx.send(chunk).map_err(|_| OtuscopeError::Canceled)
    }
}

// ------------- Export worker -------------
/// Everything a worker thread needs to run one export on its own.
pub struct ExportJob {
    pub catalog: Arc<SchemaCatalog>,
    pub source: Arc<dyn RowSource>,
    pub cache: Option<Arc<ResultCache>>,
    pub kingdoms: Vec<(OntologyId, String)>,
    pub amplicon: AmpliconId,
    pub taxonomy: TaxonomyPath,
    pub contextual: ContextualFilter,
    pub integrity: ContextualFilter,
    pub format: ExportFormat,
    pub page_size: usize,
    pub longitude_center: f64,
}

/// Handle to a running export: the chunk receiver, the cancel switch and the
/// worker's final verdict.
pub struct ExportHandle {
    cancel: CancelToken,
    pub chunks: Receiver<ExportChunk>,
    worker: JoinHandle<Result<()>>,
}

impl ExportHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the worker and return its outcome. Call after draining (or
    /// dropping) the chunk receiver, since the worker blocks on a full channel.
    pub fn join(self) -> Result<()> {
        drop(self.chunks);
        self.worker
            .join()
            .map_err(|_| OtuscopeError::Lock("export worker panicked".to_string()))?
    }
}

/// Spawn the worker thread for one export job.
pub fn start_export(job: ExportJob, channel_depth: usize) -> Result<ExportHandle> {
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let (tx, chunks) = sync_channel(channel_depth);
    let worker = thread::Builder::new()
        .name("otuscope-export".to_string())
        .spawn(move || {
            let mut sink = ChannelSink { tx };
            let population = compose(
                job.source.as_ref(),
                job.cache.as_deref(),
                job.amplicon,
                job.taxonomy,
                job.contextual,
                job.integrity,
                job.page_size,
            );
            let exporter = Exporter::new(job.catalog.as_ref(), &population, job.longitude_center);
            let outcome = exporter.run(job.format, &job.kingdoms, &mut sink, &worker_cancel);
            match &outcome {
                Ok(()) => info!("export worker finished"),
                Err(OtuscopeError::Canceled) => info!("export worker canceled"),
                Err(e) => warn!(error = %e, "export worker failed"),
            }
            outcome
        })?;
    Ok(ExportHandle {
        cancel,
        chunks,
        worker,
    })
}
