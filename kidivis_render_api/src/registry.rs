//! Registry keeps track of the renderer responsible for each design kind.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use kidivis_api::DesignKind;
use serde::{Deserialize, Serialize};

use super::Renderer;

/// Summary information about a registered renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererSummary {
    /// Stable identifier for the renderer.
    pub id: String,
    /// Kind the renderer is registered for.
    pub kind: DesignKind,
    /// Reported renderer version.
    pub version: String,
}

/// In-memory registry mapping design kinds to renderers.
#[derive(Clone, Default)]
pub struct RendererRegistry {
    renderers: BTreeMap<DesignKind, Arc<dyn Renderer>>,
}

impl RendererRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a renderer for every kind it declares, replacing earlier ones.
    pub fn register<R>(&mut self, renderer: R)
    where
        R: Renderer + 'static,
    {
        self.register_arc(Arc::new(renderer));
    }

    /// Register a shared renderer for every kind it declares.
    pub fn register_arc(&mut self, renderer: Arc<dyn Renderer>) {
        for kind in renderer.kinds() {
            self.renderers.insert(*kind, Arc::clone(&renderer));
        }
    }

    /// Retrieve the renderer for a kind.
    #[must_use]
    pub fn get(&self, kind: DesignKind) -> Option<Arc<dyn Renderer>> {
        self.renderers.get(&kind).cloned()
    }

    /// Kinds that have a renderer.
    pub fn kinds(&self) -> impl Iterator<Item = DesignKind> + '_ {
        self.renderers.keys().copied()
    }

    /// Summaries of all registrations, ordered by kind.
    #[must_use]
    pub fn summaries(&self) -> Vec<RendererSummary> {
        self.renderers
            .iter()
            .map(|(kind, renderer)| RendererSummary {
                id: renderer.id().to_owned(),
                kind: *kind,
                version: renderer.version().to_owned(),
            })
            .collect()
    }
}

impl fmt::Debug for RendererRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererRegistry")
            .field("renderers", &self.summaries())
            .finish()
    }
}
