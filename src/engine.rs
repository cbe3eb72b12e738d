//! The engine facade.
//!
//! [`Engine`] wires the schema catalog, the row source and the result cache
//! together and exposes the operations external callers use: cascading
//! taxonomy options, filter compilation, query composition and the export
//! entry points. One engine serves many concurrent requests; all shared state
//! is behind `Arc`.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cache::{CacheStore, ResultCache, TtlClass};
use crate::compose::{self, MatchingPopulation, fingerprint};
use crate::config::Settings;
use crate::error::{FilterError, OtuscopeError, Result};
use crate::export::{ChunkSink, Exporter};
use crate::filter::{self, CombineMode, ContextualFilter, RawFilterSpec};
use crate::interface::{
    CancelToken, ExportHandle, ExportJob, ExportRequest, OptionsRequest, start_export,
};
use crate::schema::{AMPLICON_ONTOLOGY, AmpliconId, OntologyId, SchemaCatalog};
use crate::store::RowSource;
use crate::taxonomy::{self, CascadeOutcome, TaxonomyPath};

pub struct Engine {
    catalog: Arc<SchemaCatalog>,
    source: Arc<dyn RowSource>,
    cache: Arc<ResultCache>,
    page_size: usize,
    longitude_center: f64,
    channel_depth: usize,
}

impl Engine {
    /// Load the catalog from the source and assemble the engine.
    pub fn new(
        source: Arc<dyn RowSource>,
        cache_store: Arc<dyn CacheStore>,
        settings: &Settings,
    ) -> Result<Self> {
        let catalog = Arc::new(SchemaCatalog::load(source.as_ref())?);
        let cache = Arc::new(ResultCache::new(
            cache_store,
            Duration::from_secs(settings.default_cache_ttl_secs),
        ));
        info!(
            attributes = catalog.attribute_names().len(),
            "engine ready"
        );
        Ok(Self {
            catalog,
            source,
            cache,
            page_size: settings.page_size,
            longitude_center: settings.longitude_center,
            channel_depth: settings.channel_depth,
        })
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Kingdom options for one amplicon never depend on other selections, so
    /// they live in the cache until explicit invalidation.
    fn kingdom_options(&self, amplicon: AmpliconId) -> Result<Vec<(OntologyId, String)>> {
        let key = format!("kingdoms:{amplicon}");
        self.cache.get_or_compute(&key, TtlClass::Forever, || {
            taxonomy::kingdom_options(&self.catalog, self.source.as_ref(), amplicon)
        })
    }

    /// Precompute the kingdom option list of every amplicon, typically at
    /// startup or after a dataset reload.
    pub fn warm_kingdom_options(&self) -> Result<()> {
        for (amplicon, label) in self.catalog.ontology_values(AMPLICON_ONTOLOGY)? {
            let options = self.kingdom_options(*amplicon)?;
            info!(
                amplicon = label.as_str(),
                kingdoms = options.len(),
                "kingdom options warmed"
            );
        }
        Ok(())
    }

    /// Answer "what can still be chosen?" for a rank vector. An empty vector
    /// is answered from the precomputed kingdom list without touching the OTU
    /// population.
    pub fn resolve_cascading_options(&self, request: &OptionsRequest) -> Result<CascadeOutcome> {
        let path = TaxonomyPath::from_slots(&request.taxonomy);
        let kingdoms = self.kingdom_options(request.amplicon)?;
        // Same digest scheme as the sample-set keys, over the query's two
        // cascade-relevant dimensions.
        let empty = ContextualFilter::empty();
        let key = format!(
            "cascade:{}",
            fingerprint(request.amplicon, &path, &empty, &empty)
        );
        self.cache.get_or_compute(&key, TtlClass::Week, || {
            taxonomy::resolve_cascade(
                &self.catalog,
                self.source.as_ref(),
                &kingdoms,
                request.amplicon,
                &path,
            )
        })
    }

    /// Compile raw filter specs, reporting rejected terms instead of failing.
    pub fn compile_contextual_filter(
        &self,
        mode: CombineMode,
        specs: &[RawFilterSpec],
    ) -> (ContextualFilter, Vec<FilterError>) {
        filter::compile_contextual_filter(&self.catalog, mode, specs)
    }

    /// Compile raw specs for a context where a rejected term invalidates the
    /// whole request.
    fn compile_strict(&self, mode: CombineMode, specs: &[RawFilterSpec]) -> Result<ContextualFilter> {
        let (compiled, errors) = filter::compile_contextual_filter(&self.catalog, mode, specs);
        if errors.is_empty() {
            return Ok(compiled);
        }
        let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        Err(OtuscopeError::InvalidRequest(rendered.join("; ")))
    }

    pub fn compose_query(
        &self,
        amplicon: AmpliconId,
        taxonomy: TaxonomyPath,
        contextual: ContextualFilter,
        integrity: ContextualFilter,
    ) -> MatchingPopulation<'_> {
        compose::compose(
            self.source.as_ref(),
            Some(&self.cache),
            amplicon,
            taxonomy,
            contextual,
            integrity,
            self.page_size,
        )
    }

    fn compiled_request(
        &self,
        request: &ExportRequest,
    ) -> Result<(TaxonomyPath, ContextualFilter, ContextualFilter)> {
        let path = TaxonomyPath::from_slots(&request.taxonomy);
        let contextual = self.compile_strict(request.mode, &request.filters)?;
        let integrity = self.compile_strict(request.integrity_mode, &request.integrity_filters)?;
        Ok((path, contextual, integrity))
    }

    /// Run an export synchronously into the given sink.
    pub fn export(
        &self,
        request: &ExportRequest,
        sink: &mut dyn ChunkSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        let (path, contextual, integrity) = self.compiled_request(request)?;
        let kingdoms = self.kingdom_options(request.amplicon)?;
        let population = self.compose_query(request.amplicon, path, contextual, integrity);
        Exporter::new(&self.catalog, &population, self.longitude_center).run(
            request.format,
            &kingdoms,
            sink,
            cancel,
        )
    }

    /// Spawn an export on its own worker thread and return the streaming
    /// handle.
    pub fn start_export(&self, request: &ExportRequest) -> Result<ExportHandle> {
        let (path, contextual, integrity) = self.compiled_request(request)?;
        let kingdoms = self.kingdom_options(request.amplicon)?;
        start_export(
            ExportJob {
                catalog: Arc::clone(&self.catalog),
                source: Arc::clone(&self.source),
                cache: Some(Arc::clone(&self.cache)),
                kingdoms,
                amplicon: request.amplicon,
                taxonomy: path,
                contextual,
                integrity,
                format: request.format,
                page_size: self.page_size,
                longitude_center: self.longitude_center,
            },
            self.channel_depth,
        )
    }

    /// Human readable summary of what an export request will select.
    pub fn describe_export(&self, request: &ExportRequest) -> Result<String> {
        let (path, contextual, integrity) = self.compiled_request(request)?;
        let population = self.compose_query(request.amplicon, path, contextual, integrity);
        Ok(population.describe(&self.catalog))
    }

    /// Drop every cached entry, including the pre-warmed kingdom lists.
    pub fn invalidate_caches(&self) {
        self.cache.invalidate_all();
    }
}
