mod registry;
mod types;

pub use registry::{RendererRegistry, RendererSummary};
pub use types::{CanvasRect, Raster, RenderError, RenderRequest, RendererResult};

use kidivis_api::DesignKind;

/// Trait implemented by external renderer integrations.
///
/// Implementations must be deterministic: the same input bytes and the same
/// reported [`Renderer::version`] must produce the same raster, since cached
/// renders are keyed on exactly that pair.
pub trait Renderer: Send + Sync {
    /// Stable identifier used for lookup and logging.
    fn id(&self) -> &'static str;

    /// Design kinds this renderer handles.
    fn kinds(&self) -> &[DesignKind];

    /// Version string identifying the rendering contract.
    fn version(&self) -> &str;

    /// Layers rendered separately for `kind`, in render order. An empty
    /// list renders the whole file as one view.
    fn layers(&self, kind: DesignKind) -> &[String] {
        let _ = kind;
        &[]
    }

    /// Render the design file described by the request.
    ///
    /// # Errors
    ///
    /// Implementors should surface process, timeout and output failures.
    fn render(&self, request: &RenderRequest) -> RendererResult<Raster>;
}
