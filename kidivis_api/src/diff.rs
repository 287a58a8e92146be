use serde::{Deserialize, Serialize};

use super::design::{DesignFile, DesignKind};
use super::revision::RevisionPair;

/// Outcome of comparing one design file across the two revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    /// Both revisions rendered.
    Modified,
    /// The file exists only in the new revision.
    Added,
    /// The file exists only in the old revision.
    Removed,
    /// At least one render failed; no composite was produced.
    Inconclusive,
    /// The file exists in neither revision.
    NoContent,
}

impl DiffStatus {
    /// Whether a composite image accompanies this status.
    #[must_use]
    pub const fn has_composite(self) -> bool {
        matches!(self, Self::Modified | Self::Added | Self::Removed)
    }
}

/// Whether a comparison produced per-file results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    /// Files were rendered and compared.
    Compared,
    /// No PCB or schematic differs between the revisions; nothing rendered.
    NoRelevantChanges,
}

/// Per-class pixel counts of a composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelCounts {
    /// Pixels in the union canvas.
    pub total: u64,
    /// Pixels classified as unchanged.
    pub unchanged: u64,
    /// Pixels present only in the old revision.
    pub removed: u64,
    /// Pixels present only in the new revision.
    pub added: u64,
    /// Pixels present in both revisions with different content.
    pub changed: u64,
}

impl PixelCounts {
    /// Counts with every class at zero.
    pub const ZERO: Self = Self {
        total: 0,
        unchanged: 0,
        removed: 0,
        added: 0,
        changed: 0,
    };

    /// Number of pixels that are not unchanged.
    #[must_use]
    pub const fn differing(&self) -> u64 {
        self.removed + self.added + self.changed
    }

    /// Fraction of differing pixels; zero for an empty canvas.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn magnitude(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.differing() as f64 / self.total as f64
        }
    }
}

impl std::ops::Add for PixelCounts {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            total: self.total + other.total,
            unchanged: self.unchanged + other.unchanged,
            removed: self.removed + other.removed,
            added: self.added + other.added,
            changed: self.changed + other.changed,
        }
    }
}

impl std::iter::Sum for PixelCounts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, counts| acc + counts)
    }
}

/// Serializable metadata for one rendered view of a file: a single PCB
/// layer, or the whole file when `layer` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    /// Board layer name such as `F.Cu`.
    #[serde(default)]
    pub layer: Option<String>,
    /// Comparison outcome for this view.
    pub status: DiffStatus,
    /// Fraction of non-unchanged pixels.
    pub magnitude: f64,
    /// Pixel classification counts.
    #[serde(default)]
    pub counts: PixelCounts,
    /// Failure detail for inconclusive views.
    #[serde(default)]
    pub detail: Option<String>,
}

/// Serializable metadata for one file's diff, as embedded by the serving layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// File that was compared.
    pub file: DesignFile,
    /// Comparison outcome.
    pub status: DiffStatus,
    /// Fraction of non-unchanged pixels.
    pub magnitude: f64,
    /// Pixel classification counts.
    #[serde(default)]
    pub counts: PixelCounts,
    /// Content hash of the old side, when present.
    #[serde(default)]
    pub old_hash: Option<String>,
    /// Content hash of the new side, when present.
    #[serde(default)]
    pub new_hash: Option<String>,
    /// Failure detail for inconclusive results.
    #[serde(default)]
    pub detail: Option<String>,
    /// Per-view breakdown in render order.
    #[serde(default)]
    pub layers: Vec<LayerSummary>,
}

impl DiffSummary {
    /// Kind of the compared file.
    #[must_use]
    pub const fn kind(&self) -> DesignKind {
        self.file.kind
    }
}

/// Serializable metadata for a whole comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    /// Revisions that were compared.
    pub revisions: RevisionPair,
    /// Whether anything was compared.
    pub status: ComparisonStatus,
    /// Per-file summaries in request order.
    #[serde(default)]
    pub files: Vec<DiffSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnitude_is_fraction_of_differing_pixels() {
        let counts = PixelCounts {
            total: 200,
            unchanged: 150,
            removed: 20,
            added: 20,
            changed: 10,
        };
        assert_eq!(counts.differing(), 50);
        assert!((counts.magnitude() - 0.25).abs() < f64::EPSILON);
        assert!(PixelCounts::ZERO.magnitude().abs() < f64::EPSILON);
    }

    #[test]
    fn only_rendered_statuses_carry_composites() {
        assert!(DiffStatus::Added.has_composite());
        assert!(!DiffStatus::Inconclusive.has_composite());
        assert!(!DiffStatus::NoContent.has_composite());
    }

    #[test]
    fn summary_defaults_are_applied() {
        let json = r#"{
            "file": { "path": "board.kicad_pcb", "kind": "pcb" },
            "status": "inconclusive",
            "magnitude": 0.0
        }"#;
        let summary: DiffSummary = serde_json::from_str(json).expect("deserialize summary");
        assert_eq!(summary.status, DiffStatus::Inconclusive);
        assert_eq!(summary.counts, PixelCounts::ZERO);
        assert!(summary.detail.is_none());
        assert!(summary.layers.is_empty());
        assert_eq!(summary.kind(), DesignKind::Pcb);
    }

    #[test]
    fn counts_add_per_class() {
        let copper = PixelCounts {
            total: 10,
            unchanged: 8,
            removed: 1,
            added: 1,
            changed: 0,
        };
        let silk = PixelCounts {
            total: 10,
            unchanged: 9,
            removed: 0,
            added: 0,
            changed: 1,
        };
        let total: PixelCounts = [copper, silk].into_iter().sum();
        assert_eq!(total.total, 20);
        assert_eq!(total.differing(), 3);
        assert_eq!(copper + PixelCounts::ZERO, copper);
    }

    #[test]
    fn no_relevant_changes_is_snake_case() {
        let json = serde_json::to_string(&ComparisonStatus::NoRelevantChanges).expect("serialize");
        assert_eq!(json, "\"no_relevant_changes\"");
    }
}
