//! `kidivis.toml` configuration.
//!
//! ```toml
//! [renderer]
//! program = "kidivis-render"
//! timeout_secs = 60
//!
//! [compare]
//! tolerance = 16
//! workers = 0          # 0 = one per CPU
//! include_unchanged = true
//! max_canvas_pixels = 100000000
//!
//! [palette]
//! removed = "#ff0000"
//! added = "#00ffff"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use std::path::{Path, PathBuf};

use image::Rgba;
use kidivis_renderers::CommandSettings;
use serde::{Deserialize, Serialize};

use crate::composite::{CompositeOptions, Palette, DEFAULT_MAX_CANVAS_PIXELS, DEFAULT_TOLERANCE};
use crate::logging::LogFormat;
use crate::{Error, Result};

/// File name looked up by [`Config::discover`].
pub const CONFIG_FILE_NAME: &str = "kidivis.toml";

const INLINE_ORIGIN: &str = "<inline>";

/// Complete configuration; every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// External renderer invocation.
    pub renderer: CommandSettings,
    /// Comparison behaviour.
    pub compare: CompareConfig,
    /// Composite colours.
    pub palette: PaletteConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// `[compare]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompareConfig {
    /// Per-channel tolerance for pixel equality.
    pub tolerance: u8,
    /// Render worker threads; `0` picks the CPU count.
    pub workers: usize,
    /// Keep design files that did not change between the revisions.
    pub include_unchanged: bool,
    /// Largest union canvas composited; bigger comparisons are inconclusive.
    pub max_canvas_pixels: u64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            workers: 0,
            include_unchanged: true,
            max_canvas_pixels: DEFAULT_MAX_CANVAS_PIXELS,
        }
    }
}

/// `[palette]` section; colours are `#rrggbb`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaletteConfig {
    /// Colour renders are flattened over.
    pub background: String,
    /// Unchanged pixels.
    pub unchanged: String,
    /// Ink only in the old revision.
    pub removed: String,
    /// Ink only in the new revision.
    pub added: String,
    /// Differing ink in both revisions.
    pub changed: String,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        let palette = Palette::default();
        Self {
            background: to_hex(palette.background),
            unchanged: to_hex(palette.unchanged),
            removed: to_hex(palette.removed),
            added: to_hex(palette.added),
            changed: to_hex(palette.changed),
        }
    }
}

impl PaletteConfig {
    /// Parse into a [`Palette`].
    ///
    /// # Errors
    ///
    /// Returns the name and value of the first malformed colour.
    pub fn to_palette(&self) -> std::result::Result<Palette, String> {
        let parse = |name: &str, value: &str| {
            parse_color(value).ok_or_else(|| format!("palette.{name} = {value:?} is not a #rrggbb colour"))
        };
        Ok(Palette {
            background: parse("background", &self.background)?,
            unchanged: parse("unchanged", &self.unchanged)?,
            removed: parse("removed", &self.removed)?,
            added: parse("added", &self.added)?,
            changed: parse("changed", &self.changed)?,
        })
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive when no environment override is set.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Read and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file cannot be read and
    /// [`Error::Config`] when it does not parse or validate.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        Self::parse(&source, &path.display().to_string())
    }

    /// Parse and validate configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for malformed or invalid settings.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Self::parse(source, INLINE_ORIGIN)
    }

    /// Load the first `kidivis.toml` found in `dirs`, or the defaults when
    /// none exists. Returns the path that was loaded alongside the config.
    ///
    /// # Errors
    ///
    /// Propagates [`Config::load`] failures for a file that exists.
    pub fn discover<P: AsRef<Path>>(dirs: &[P]) -> Result<(Self, Option<PathBuf>)> {
        for dir in dirs {
            let candidate = dir.as_ref().join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                let config = Self::load(&candidate)?;
                tracing::debug!(path = %candidate.display(), "loaded configuration");
                return Ok((config, Some(candidate)));
            }
        }
        Ok((Self::default(), None))
    }

    /// Compositor options derived from `[compare]` and `[palette]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for malformed palette colours.
    pub fn composite_options(&self) -> Result<CompositeOptions> {
        let palette = self.palette.to_palette().map_err(|message| Error::Config {
            origin: INLINE_ORIGIN.to_owned(),
            message,
        })?;
        Ok(CompositeOptions {
            tolerance: self.compare.tolerance,
            max_canvas_pixels: self.compare.max_canvas_pixels,
            palette,
        })
    }

    /// Number of render workers to run.
    #[must_use]
    pub fn worker_limit(&self) -> usize {
        match self.compare.workers {
            0 => num_cpus::get().max(1),
            workers => workers,
        }
    }

    fn parse(source: &str, origin: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|err| Error::Config {
            origin: origin.to_owned(),
            message: err.message().to_owned(),
        })?;
        config.check().map_err(|message| Error::Config {
            origin: origin.to_owned(),
            message,
        })?;
        Ok(config)
    }

    fn check(&self) -> std::result::Result<(), String> {
        let renderer = &self.renderer;
        if renderer.program.trim().is_empty() {
            return Err("renderer.program must not be empty".to_owned());
        }
        if renderer.timeout_secs == 0 {
            return Err("renderer.timeout_secs must be positive".to_owned());
        }
        for (name, args) in [
            ("pcb_args", &renderer.pcb_args),
            ("schematic_args", &renderer.schematic_args),
        ] {
            if !args.iter().any(|arg| arg.contains("{input}")) {
                return Err(format!("renderer.{name} must reference {{input}}"));
            }
        }
        if !renderer.layers.is_empty() && !renderer.pcb_args.iter().any(|arg| arg.contains("{layer}")) {
            return Err("renderer.pcb_args must reference {layer} when layers are set".to_owned());
        }
        for (index, layer) in renderer.layers.iter().enumerate() {
            if layer.trim().is_empty() || renderer.layers[..index].contains(layer) {
                return Err(format!("renderer.layers entry {layer:?} is empty or repeated"));
            }
        }
        if self.compare.max_canvas_pixels == 0 {
            return Err("compare.max_canvas_pixels must be positive".to_owned());
        }
        self.palette.to_palette()?;
        Ok(())
    }
}

/// Parse `#rrggbb` into an opaque colour.
#[must_use]
pub fn parse_color(value: &str) -> Option<Rgba<u8>> {
    let hex = value.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    Some(Rgba([channel(0..2)?, channel(2..4)?, channel(4..6)?, u8::MAX]))
}

fn to_hex(color: Rgba<u8>) -> String {
    let Rgba([r, g, b, _]) = color;
    format!("#{r:02x}{g:02x}{b:02x}")
}
