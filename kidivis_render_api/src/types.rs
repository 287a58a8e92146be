use std::io;
use std::path::PathBuf;
use std::time::Duration;

use image::RgbaImage;
use kidivis_api::DesignKind;
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in design-space pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CanvasRect {
    /// Left edge.
    pub x: i64,
    /// Top edge.
    pub y: i64,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl CanvasRect {
    /// Rectangle with zero extent at the origin.
    pub const EMPTY: Self = Self {
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    };

    /// Construct a rectangle.
    #[must_use]
    pub const fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when the rectangle covers no pixels.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge; `None` when it does not fit in an `i64`.
    #[must_use]
    pub const fn right(&self) -> Option<i64> {
        self.x.checked_add(self.width as i64)
    }

    /// Exclusive bottom edge; `None` when it does not fit in an `i64`.
    #[must_use]
    pub const fn bottom(&self) -> Option<i64> {
        self.y.checked_add(self.height as i64)
    }

    /// Number of pixels covered.
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether the design-space pixel lies inside the rectangle.
    #[must_use]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        let inside = |offset: Option<i64>, extent: u32| {
            offset.is_some_and(|offset| offset >= 0 && offset < i64::from(extent))
        };
        inside(x.checked_sub(self.x), self.width) && inside(y.checked_sub(self.y), self.height)
    }

    /// Smallest rectangle covering both; empty rectangles contribute nothing.
    /// Returns `None` when the union's edges or size overflow.
    #[must_use]
    pub fn union(&self, other: &Self) -> Option<Self> {
        match (self.is_empty(), other.is_empty()) {
            (true, true) => Some(Self::EMPTY),
            (true, false) => other.right().and(other.bottom()).map(|_| *other),
            (false, true) => self.right().and(self.bottom()).map(|_| *self),
            (false, false) => {
                let x = self.x.min(other.x);
                let y = self.y.min(other.y);
                let right = self.right()?.max(other.right()?);
                let bottom = self.bottom()?.max(other.bottom()?);
                Some(Self {
                    x,
                    y,
                    width: u32::try_from(right.checked_sub(x)?).ok()?,
                    height: u32::try_from(bottom.checked_sub(y)?).ok()?,
                })
            }
        }
    }
}

/// A rendered raster positioned in design space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    /// RGBA pixel grid.
    pub image: RgbaImage,
    /// Design-space x coordinate of the top-left pixel.
    pub origin_x: i64,
    /// Design-space y coordinate of the top-left pixel.
    pub origin_y: i64,
}

impl Raster {
    /// Raster placed at the design-space origin.
    #[must_use]
    pub const fn new(image: RgbaImage) -> Self {
        Self {
            image,
            origin_x: 0,
            origin_y: 0,
        }
    }

    /// Raster placed at an explicit origin.
    #[must_use]
    pub const fn with_origin(image: RgbaImage, origin_x: i64, origin_y: i64) -> Self {
        Self {
            image,
            origin_x,
            origin_y,
        }
    }

    /// Zero-sized raster used for files absent at a revision.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(RgbaImage::new(0, 0))
    }

    /// Area covered by the raster in design space.
    #[must_use]
    pub fn extent(&self) -> CanvasRect {
        CanvasRect::new(
            self.origin_x,
            self.origin_y,
            self.image.width(),
            self.image.height(),
        )
    }
}

/// Input handed to a renderer: a materialized design file and a scratch
/// directory the renderer may write its output into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Path of the design file to render.
    pub input: PathBuf,
    /// Directory exclusively owned by this render attempt.
    pub output_dir: PathBuf,
    /// Kind of the design file.
    pub kind: DesignKind,
    /// Single layer to render; `None` renders the whole file.
    pub layer: Option<String>,
}

impl RenderRequest {
    /// Create a new render request for the whole file.
    #[must_use]
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, kind: DesignKind) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            kind,
            layer: None,
        }
    }

    /// Restrict the request to one layer.
    #[must_use]
    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }
}

/// Errors surfaced by renderer integrations.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The renderer process could not be started.
    #[error("failed to spawn renderer {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying spawn failure.
        #[source]
        source: io::Error,
    },
    /// The renderer did not finish within its time budget.
    #[error("renderer timed out after {}s", .timeout.as_secs_f64())]
    TimedOut {
        /// Budget that was exceeded.
        timeout: Duration,
    },
    /// The renderer exited unsuccessfully.
    #[error("renderer failed with status {code}: {}", .stderr.trim())]
    Exit {
        /// Exit code, or `terminated` when killed by a signal.
        code: String,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
    /// The renderer reported success but its output is unusable.
    #[error("renderer output unusable: {message}")]
    Output {
        /// Human-readable description.
        message: String,
    },
    /// Filesystem interaction failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Filesystem path involved in the failed operation.
        path: String,
        /// Source I/O error.
        #[source]
        source: io::Error,
    },
}

impl RenderError {
    /// Helper to construct an output failure from any displayable message.
    #[must_use]
    pub fn output(message: impl Into<String>) -> Self {
        Self::Output {
            message: message.into(),
        }
    }
}

/// Convenience result alias for renderer operations.
pub type RendererResult<T> = std::result::Result<T, RenderError>;
