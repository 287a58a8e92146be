//! Top-level comparison coordinator.
//!
//! A comparison resolves revisions and files, extracts every file's content
//! at both revisions up front, renders both sides of every view (each board
//! layer, or the whole schematic) on a bounded pool of scoped worker threads
//! through the shared [`RenderCache`], then composites each pair in request
//! order.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use image::RgbaImage;

use crate::cache::RenderCache;
use crate::composite::DiffCompositor;
use crate::config::Config;
use crate::extractor::{Content, ContentExtractor, ContentHash};
use crate::invoker::{RenderInvoker, RenderResult};
use crate::repository::{Repository, VersionControl};
use crate::resolver::{ComparisonRequest, Resolution, ResolveInput, RevisionResolver};
use crate::{
    CanvasRect, ComparisonStatus, ComparisonSummary, DesignFile, DiffStatus, DiffSummary, Error,
    LayerSummary, PixelCounts, Result, RevisionPair,
};

/// Diff of one rendered view of a file: a board layer, or the whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDiff {
    /// Board layer, `None` for a whole-file view.
    pub layer: Option<String>,
    /// Comparison outcome of this view.
    pub status: DiffStatus,
    /// Union canvas in design-space pixels.
    pub canvas: CanvasRect,
    /// Pixel classification counts.
    pub counts: PixelCounts,
    /// Composite image, absent for inconclusive and empty comparisons.
    pub composite: Option<RgbaImage>,
    /// Failure detail for inconclusive views.
    pub detail: Option<String>,
}

impl LayerDiff {
    /// Fraction of non-unchanged pixels.
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        self.counts.magnitude()
    }

    /// Serializable metadata for the serving layer.
    #[must_use]
    pub fn summary(&self) -> LayerSummary {
        LayerSummary {
            layer: self.layer.clone(),
            status: self.status,
            magnitude: self.magnitude(),
            counts: self.counts,
            detail: self.detail.clone(),
        }
    }
}

/// Diff of one design file across all of its views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    /// File that was compared.
    pub file: DesignFile,
    /// Comparison outcome; inconclusive when any view is.
    pub status: DiffStatus,
    /// Pixel counts summed over every view.
    pub counts: PixelCounts,
    /// Per-view diffs in render order.
    pub layers: Vec<LayerDiff>,
    /// Content hash of the old side.
    pub old_hash: Option<ContentHash>,
    /// Content hash of the new side.
    pub new_hash: Option<ContentHash>,
    /// Failure details of the inconclusive views.
    pub detail: Option<String>,
}

impl DiffResult {
    fn from_layers(
        file: &DesignFile,
        layers: Vec<LayerDiff>,
        old: &Content,
        new: &Content,
    ) -> Self {
        let failures: Vec<String> = layers
            .iter()
            .filter(|view| view.status == DiffStatus::Inconclusive)
            .map(|view| {
                let detail = view.detail.as_deref().unwrap_or("render failed");
                match &view.layer {
                    Some(layer) => format!("{layer}: {detail}"),
                    None => detail.to_owned(),
                }
            })
            .collect();
        let status = if failures.is_empty() {
            layers.first().map_or(DiffStatus::NoContent, |view| view.status)
        } else {
            DiffStatus::Inconclusive
        };
        Self {
            file: file.clone(),
            status,
            counts: layers.iter().map(|view| view.counts).sum(),
            layers,
            old_hash: old.hash().cloned(),
            new_hash: new.hash().cloned(),
            detail: (!failures.is_empty()).then(|| failures.join("; ")),
        }
    }

    /// Fraction of non-unchanged pixels over every view.
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        self.counts.magnitude()
    }

    /// View of a single board layer.
    #[must_use]
    pub fn layer(&self, name: &str) -> Option<&LayerDiff> {
        self.layers
            .iter()
            .find(|view| view.layer.as_deref() == Some(name))
    }

    /// Composite of a file rendered as one whole-file view.
    #[must_use]
    pub fn composite(&self) -> Option<&RgbaImage> {
        match self.layers.as_slice() {
            [view] if view.layer.is_none() => view.composite.as_ref(),
            _ => None,
        }
    }

    /// Serializable metadata for the serving layer.
    #[must_use]
    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            file: self.file.clone(),
            status: self.status,
            magnitude: self.magnitude(),
            counts: self.counts,
            old_hash: self.old_hash.as_ref().map(ToString::to_string),
            new_hash: self.new_hash.as_ref().map(ToString::to_string),
            detail: self.detail.clone(),
            layers: self.layers.iter().map(LayerDiff::summary).collect(),
        }
    }
}

/// Result of a full run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonOutcome {
    /// Whether anything was compared.
    pub status: ComparisonStatus,
    /// Revisions that were compared.
    pub revisions: RevisionPair,
    /// Per-file results in request order; empty for
    /// [`ComparisonStatus::NoRelevantChanges`].
    pub results: Vec<DiffResult>,
}

impl ComparisonOutcome {
    /// Serializable metadata for the serving layer.
    #[must_use]
    pub fn summary(&self) -> ComparisonSummary {
        ComparisonSummary {
            revisions: self.revisions.clone(),
            status: self.status,
            files: self.results.iter().map(DiffResult::summary).collect(),
        }
    }
}

/// Tuning for [`DiffOrchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Maximum concurrent render jobs.
    pub worker_limit: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            worker_limit: num_cpus::get().max(1),
        }
    }
}

type Source = dyn VersionControl + Send + 'static;
type SharedSource = Arc<Mutex<Source>>;

/// One rendered view: a file index and the layer rendered, if any.
#[derive(Debug, Clone, Copy)]
struct View<'a> {
    file: usize,
    layer: Option<&'a str>,
}

/// Coordinates resolution, extraction, rendering and compositing.
pub struct DiffOrchestrator {
    source: SharedSource,
    invoker: RenderInvoker,
    cache: Arc<RenderCache>,
    compositor: DiffCompositor,
    options: OrchestratorOptions,
}

impl DiffOrchestrator {
    /// Assemble an orchestrator from its collaborators. The cache may be
    /// shared with other orchestrators.
    #[must_use]
    pub fn new(
        source: impl VersionControl + Send + 'static,
        invoker: RenderInvoker,
        cache: Arc<RenderCache>,
        compositor: DiffCompositor,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            invoker,
            cache,
            compositor,
            options,
        }
    }

    /// Orchestrator over `repository` wired from configuration: the external
    /// command renderer, a fresh cache, and the configured palette.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid palette settings.
    pub fn from_config(repository: Repository, config: &Config) -> Result<Self> {
        let registry = kidivis_renderers::default_registry(config.renderer.clone());
        for renderer in registry.summaries() {
            tracing::info!(
                renderer = %renderer.id,
                kind = %renderer.kind,
                version = %renderer.version,
                "renderer registered"
            );
        }
        Ok(Self::new(
            repository,
            RenderInvoker::new(registry),
            Arc::new(RenderCache::new()),
            DiffCompositor::new(config.composite_options()?),
            OrchestratorOptions {
                worker_limit: config.worker_limit(),
            },
        ))
    }

    /// Open the repository enclosing `path` and wire it from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRepository`] when `path` is not under version
    /// control, plus the errors of [`DiffOrchestrator::from_config`].
    pub fn open(path: &Path, config: &Config) -> Result<Self> {
        Self::from_config(Repository::open(path)?, config)
    }

    /// Shared render cache.
    #[must_use]
    pub fn cache(&self) -> Arc<RenderCache> {
        Arc::clone(&self.cache)
    }

    /// Resolve revisions and files without rendering.
    ///
    /// # Errors
    ///
    /// Propagates [`RevisionResolver::resolve`] failures.
    pub fn resolve(&self, input: &ResolveInput) -> Result<Resolution> {
        let source = self.lock_source()?;
        RevisionResolver::new(&*source).resolve(input)
    }

    /// Resolve and compare. [`Resolution::NoRelevantChanges`] yields an
    /// outcome without results and starts no render.
    ///
    /// # Errors
    ///
    /// Propagates resolution failures and the fatal errors of
    /// [`DiffOrchestrator::compare`].
    pub fn run(&self, input: &ResolveInput) -> Result<ComparisonOutcome> {
        match self.resolve(input)? {
            Resolution::NoRelevantChanges { revisions } => {
                tracing::info!(
                    old = %revisions.old.short_label(),
                    new = %revisions.new.short_label(),
                    "no relevant changes"
                );
                Ok(ComparisonOutcome {
                    status: ComparisonStatus::NoRelevantChanges,
                    revisions,
                    results: Vec::new(),
                })
            }
            Resolution::Ready(request) => {
                let results = self.compare(&request)?;
                Ok(ComparisonOutcome {
                    status: ComparisonStatus::Compared,
                    revisions: request.revisions,
                    results,
                })
            }
        }
    }

    /// Render and composite every view of every file of `request`. Render
    /// failures only mark the affected file inconclusive.
    ///
    /// # Errors
    ///
    /// Returns extraction failures, [`Error::CacheKeyConflict`], and
    /// [`Error::Internal`] when a worker panics.
    pub fn compare(&self, request: &ComparisonRequest) -> Result<Vec<DiffResult>> {
        let span = tracing::info_span!(
            "compare",
            old = %request.revisions.old.short_label(),
            new = %request.revisions.new.short_label(),
        );
        let _entered = span.enter();

        let contents = self.extract(request)?;
        let views: Vec<Vec<Option<String>>> = request
            .files
            .iter()
            .map(|file| self.invoker.views(file.kind))
            .collect();
        let jobs: Vec<View<'_>> = views
            .iter()
            .enumerate()
            .flat_map(|(file, layers)| {
                layers.iter().map(move |layer| View {
                    file,
                    layer: layer.as_deref(),
                })
            })
            .collect();
        let renders = self.render_all(&request.files, &contents, &jobs)?;

        let mut diffs = jobs
            .iter()
            .zip(renders.chunks_exact(2))
            .map(|(view, pair)| {
                self.diff_view(&request.files[view.file], view.layer, &pair[0], &pair[1])
            })
            .collect::<Vec<_>>()
            .into_iter();
        let results = request
            .files
            .iter()
            .zip(&contents)
            .zip(&views)
            .map(|((file, (old, new)), layers)| {
                let file_diffs: Vec<LayerDiff> = diffs.by_ref().take(layers.len()).collect();
                let result = DiffResult::from_layers(file, file_diffs, old, new);
                match result.status {
                    DiffStatus::Inconclusive => tracing::warn!(
                        path = %file.path,
                        detail = result.detail.as_deref().unwrap_or_default(),
                        "comparison inconclusive"
                    ),
                    status => tracing::info!(
                        path = %file.path,
                        status = ?status,
                        views = result.layers.len(),
                        magnitude = result.magnitude(),
                        "compared"
                    ),
                }
                result
            })
            .collect();
        Ok(results)
    }

    fn extract(&self, request: &ComparisonRequest) -> Result<Vec<(Content, Content)>> {
        let source = self.lock_source()?;
        let extractor = ContentExtractor::new(&*source);
        request
            .files
            .iter()
            .map(|file| {
                Ok((
                    extractor.read(&request.revisions.old, file)?,
                    extractor.read(&request.revisions.new, file)?,
                ))
            })
            .collect()
    }

    /// Render both sides of every view; output index `2i` is view `i` at
    /// OLD, `2i + 1` at NEW.
    fn render_all(
        &self,
        files: &[DesignFile],
        contents: &[(Content, Content)],
        views: &[View<'_>],
    ) -> Result<Vec<Arc<RenderResult>>> {
        let jobs = views.len() * 2;
        let workers = self.options.worker_limit.clamp(1, jobs.max(1));
        let next = &AtomicUsize::new(0);
        tracing::debug!(jobs, workers, "starting render pool");

        let finished = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        loop {
                            let job = next.fetch_add(1, Ordering::Relaxed);
                            if job >= jobs {
                                break;
                            }
                            let view = &views[job / 2];
                            let (old, new) = &contents[view.file];
                            let content = if job % 2 == 0 { old } else { new };
                            let rendered = self.render_cached(&files[view.file], view.layer, content);
                            let fatal = rendered.is_err();
                            done.push((job, rendered));
                            if fatal {
                                next.store(jobs, Ordering::Relaxed);
                                break;
                            }
                        }
                        done
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| Error::Internal("render worker panicked"))
                })
                .collect::<Vec<_>>()
        });

        let mut slots: Vec<Option<Arc<RenderResult>>> = vec![None; jobs];
        for worker in finished {
            for (job, rendered) in worker? {
                slots[job] = Some(rendered?);
            }
        }
        slots
            .into_iter()
            .map(|slot| slot.ok_or(Error::Internal("render job produced no result")))
            .collect()
    }

    fn render_cached(
        &self,
        file: &DesignFile,
        layer: Option<&str>,
        content: &Content,
    ) -> Result<Arc<RenderResult>> {
        let Content::Present(blob) = content else {
            return Ok(Arc::new(RenderResult::empty()));
        };
        match self.invoker.key(file.kind, layer, blob) {
            Some(key) => self
                .cache
                .get_or_render(&key, || self.invoker.render_blob(file, layer, blob)),
            None => Ok(Arc::new(self.invoker.render_blob(file, layer, blob))),
        }
    }

    fn diff_view(
        &self,
        file: &DesignFile,
        layer: Option<&str>,
        old: &RenderResult,
        new: &RenderResult,
    ) -> LayerDiff {
        let composition = self.compositor.compose(old, new);
        tracing::debug!(
            path = %file.path,
            layer = layer.unwrap_or_default(),
            status = ?composition.status,
            magnitude = composition.magnitude(),
            "composited view"
        );
        LayerDiff {
            layer: layer.map(str::to_owned),
            status: composition.status,
            canvas: composition.canvas,
            counts: composition.counts,
            composite: composition.image,
            detail: composition.detail,
        }
    }

    fn lock_source(&self) -> Result<MutexGuard<'_, Source>> {
        self.source
            .lock()
            .map_err(|_| Error::Internal("repository lock poisoned"))
    }
}

impl std::fmt::Debug for DiffOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffOrchestrator")
            .field("cache", &self.cache)
            .field("compositor", &self.compositor)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
