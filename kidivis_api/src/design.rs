use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a KiCad design file; selects the renderer invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignKind {
    /// A board layout (`.kicad_pcb`).
    Pcb,
    /// A schematic sheet (`.kicad_sch`).
    Schematic,
}

impl DesignKind {
    /// All supported kinds, in a stable order.
    pub const ALL: [Self; 2] = [Self::Pcb, Self::Schematic];

    /// File extension (without the dot) used by KiCad for this kind.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Pcb => "kicad_pcb",
            Self::Schematic => "kicad_sch",
        }
    }

    /// Short name used in cache keys and log output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pcb => "pcb",
            Self::Schematic => "sch",
        }
    }

    /// Infer the kind from a path's extension.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let (_, extension) = path.rsplit_once('.')?;
        Self::ALL
            .into_iter()
            .find(|kind| kind.extension() == extension)
    }
}

impl fmt::Display for DesignKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A design file tracked by a comparison, identified by its repository path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DesignFile {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    /// Renderer category of the file.
    pub kind: DesignKind,
}

impl DesignFile {
    /// Create a design file with an explicit kind.
    #[must_use]
    pub fn new(path: impl Into<String>, kind: DesignKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Create a design file, inferring the kind from the extension.
    #[must_use]
    pub fn from_path(path: impl Into<String>) -> Option<Self> {
        let path = path.into();
        let kind = DesignKind::from_path(&path)?;
        Some(Self { path, kind })
    }

    /// Final path component.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// File name without its extension.
    #[must_use]
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        name.rsplit_once('.').map_or(name, |(stem, _)| stem)
    }
}

impl fmt::Display for DesignFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
