//! Renderer implementations shipped with kidivis.

mod command;
mod settings;

pub use command::CommandRenderer;
pub use settings::CommandSettings;

use kidivis_render_api::RendererRegistry;

/// Build a renderer registry that routes every design kind to the external
/// command described by `settings`.
#[must_use]
pub fn default_registry(settings: CommandSettings) -> RendererRegistry {
    let mut registry = RendererRegistry::new();
    registry.register(CommandRenderer::new(settings));
    registry
}
