//! Render invocation: materializes content and drives the external renderer.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::extractor::{Content, ContentBlob, ContentHash};
use crate::{CanvasRect, DesignFile, DesignKind, Raster, RenderRequest, RendererRegistry};

const TEMP_PREFIX: &str = "kidivis-";

/// How a render attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderStatus {
    /// The renderer produced a raster.
    Rendered,
    /// The file was absent; the raster is a zero-extent blank canvas.
    Empty,
    /// The renderer failed or timed out. The raster carries no information.
    Failed {
        /// Failure description including captured renderer output.
        detail: String,
    },
}

/// Raster plus the status of the attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    /// Rendered pixels placed in design space.
    pub raster: Raster,
    /// Outcome of the render attempt.
    pub status: RenderStatus,
}

impl RenderResult {
    /// Successful render.
    #[must_use]
    pub const fn rendered(raster: Raster) -> Self {
        Self {
            raster,
            status: RenderStatus::Rendered,
        }
    }

    /// Deterministic blank result for a file absent at a revision.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            raster: Raster::empty(),
            status: RenderStatus::Empty,
        }
    }

    /// Failed render.
    #[must_use]
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            raster: Raster::empty(),
            status: RenderStatus::Failed {
                detail: detail.into(),
            },
        }
    }

    /// Whether the attempt failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.status, RenderStatus::Failed { .. })
    }

    /// Whether this is the blank result of an absent file.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self.status, RenderStatus::Empty)
    }

    /// Failure description, if the attempt failed.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        match &self.status {
            RenderStatus::Failed { detail } => Some(detail),
            _ => None,
        }
    }

    /// Canvas covered by the raster in design space.
    #[must_use]
    pub fn extent(&self) -> CanvasRect {
        self.raster.extent()
    }
}

/// Identity of a cached render.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderKey {
    /// Hash of the rendered file content.
    pub content_hash: ContentHash,
    /// Renderer kind.
    pub kind: DesignKind,
    /// Layer rendered; `None` for the whole file.
    pub layer: Option<String>,
    /// Version of the renderer contract.
    pub renderer_version: String,
}

impl fmt::Display for RenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.content_hash.short())?;
        if let Some(layer) = &self.layer {
            write!(f, "/{layer}")?;
        }
        write!(f, ":{}", self.renderer_version)
    }
}

/// Turns design file content into render results via the registered
/// renderers. Never fails: problems are reported through [`RenderStatus`].
#[derive(Debug, Clone)]
pub struct RenderInvoker {
    registry: Arc<RendererRegistry>,
}

impl RenderInvoker {
    /// Create an invoker backed by the provided registry.
    #[must_use]
    pub fn new(registry: RendererRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Access the underlying registry.
    #[must_use]
    pub fn registry(&self) -> Arc<RendererRegistry> {
        Arc::clone(&self.registry)
    }

    /// Views rendered for files of `kind`: one entry per layer the renderer
    /// splits the kind into, or a single whole-file view.
    #[must_use]
    pub fn views(&self, kind: DesignKind) -> Vec<Option<String>> {
        let layers = self
            .registry
            .get(kind)
            .map(|renderer| renderer.layers(kind).to_vec())
            .unwrap_or_default();
        if layers.is_empty() {
            vec![None]
        } else {
            layers.into_iter().map(Some).collect()
        }
    }

    /// Cache key for rendering `layer` of `blob` as `kind`; `None` when no
    /// renderer is registered for the kind.
    #[must_use]
    pub fn key(&self, kind: DesignKind, layer: Option<&str>, blob: &ContentBlob) -> Option<RenderKey> {
        let renderer = self.registry.get(kind)?;
        Some(RenderKey {
            content_hash: blob.hash().clone(),
            kind,
            layer: layer.map(str::to_owned),
            renderer_version: renderer.version().to_owned(),
        })
    }

    /// Render one view of a file's content. Absent content short-circuits
    /// to the empty result without invoking any renderer.
    #[must_use]
    pub fn render(&self, file: &DesignFile, layer: Option<&str>, content: &Content) -> RenderResult {
        match content {
            Content::Present(blob) => self.render_blob(file, layer, blob),
            Content::NotPresent => RenderResult::empty(),
        }
    }

    /// Materialize `blob` into a private temporary directory and render it.
    /// The directory is removed on every exit path.
    #[must_use]
    pub fn render_blob(&self, file: &DesignFile, layer: Option<&str>, blob: &ContentBlob) -> RenderResult {
        let Some(renderer) = self.registry.get(file.kind) else {
            return RenderResult::failed(format!("no renderer registered for {} files", file.kind));
        };

        let workspace = match tempfile::Builder::new().prefix(TEMP_PREFIX).tempdir() {
            Ok(dir) => dir,
            Err(err) => return RenderResult::failed(format!("failed to create render directory: {err}")),
        };
        let input_dir = workspace.path().join("src");
        let output_dir = workspace.path().join("out");
        for dir in [&input_dir, &output_dir] {
            if let Err(err) = std::fs::create_dir_all(dir) {
                return RenderResult::failed(format!("failed to create {}: {err}", dir.display()));
            }
        }
        let input = input_dir.join(file.file_name());
        if let Err(err) = std::fs::write(&input, blob.bytes()) {
            return RenderResult::failed(format!("failed to write {}: {err}", input.display()));
        }

        let started = Instant::now();
        let mut request = RenderRequest::new(input, output_dir, file.kind);
        if let Some(layer) = layer {
            request = request.with_layer(layer);
        }
        let result = match renderer.render(&request) {
            Ok(raster) => {
                tracing::info!(
                    path = %file.path,
                    layer = layer.unwrap_or_default(),
                    hash = %blob.hash().short(),
                    renderer = renderer.id(),
                    width = raster.image.width(),
                    height = raster.image.height(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "rendered"
                );
                RenderResult::rendered(raster)
            }
            Err(err) => {
                tracing::warn!(
                    path = %file.path,
                    layer = layer.unwrap_or_default(),
                    hash = %blob.hash().short(),
                    renderer = renderer.id(),
                    error = %err,
                    "render failed"
                );
                RenderResult::failed(err.to_string())
            }
        };

        if let Err(err) = workspace.close() {
            tracing::warn!(error = %err, "failed to remove render directory");
        }
        result
    }
}
