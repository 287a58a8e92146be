//! Public data models shared with the serving layer.
//!
//! The serializable types live in `kidivis_api` so that a web front end can
//! depend on them without pulling in git or image handling; renderer-facing
//! types come from `kidivis_render_api`.

pub use kidivis_api::{
    ComparisonStatus, ComparisonSummary, DesignFile, DesignKind, DiffStatus, DiffSummary,
    LayerSummary, PixelCounts, Revision, RevisionId, RevisionPair, WORKING_TREE_REF,
};
pub use kidivis_render_api::{
    CanvasRect, Raster, RenderError, RenderRequest, Renderer, RendererRegistry, RendererResult,
};
