//! Raster alignment and three-way diff compositing.
//!
//! Both rasters are placed on the union of their design-space canvases.
//! Every pixel of that union is classified as unchanged, removed, added or
//! changed and painted with the matching palette colour.

use image::{Rgba, RgbaImage};

use crate::invoker::{RenderResult, RenderStatus};
use crate::{CanvasRect, DiffStatus, PixelCounts, Raster};

/// Default per-channel tolerance for pixel equality and ink detection.
pub const DEFAULT_TOLERANCE: u8 = 16;

/// Default cap on the union canvas, in pixels.
pub const DEFAULT_MAX_CANVAS_PIXELS: u64 = 100_000_000;

/// Colours used to paint a composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    /// Colour rendered pixels are flattened over; also the "no ink" colour.
    pub background: Rgba<u8>,
    /// Pixels identical in both revisions.
    pub unchanged: Rgba<u8>,
    /// Ink present only in the old revision.
    pub removed: Rgba<u8>,
    /// Ink present only in the new revision.
    pub added: Rgba<u8>,
    /// Ink present in both revisions but different.
    pub changed: Rgba<u8>,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            background: Rgba([0xff, 0xff, 0xff, 0xff]),
            unchanged: Rgba([0xff, 0xff, 0xff, 0xff]),
            removed: Rgba([0xff, 0x00, 0x00, 0xff]),
            added: Rgba([0x00, 0xff, 0xff, 0xff]),
            changed: Rgba([0x7f, 0x7f, 0xff, 0xff]),
        }
    }
}

impl Palette {
    /// Colour for a pixel class.
    #[must_use]
    pub const fn color(&self, class: PixelClass) -> Rgba<u8> {
        match class {
            PixelClass::Unchanged => self.unchanged,
            PixelClass::Removed => self.removed,
            PixelClass::Added => self.added,
            PixelClass::Changed => self.changed,
        }
    }
}

/// Knobs for [`DiffCompositor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeOptions {
    /// Maximum per-channel difference still considered equal.
    pub tolerance: u8,
    /// Largest union canvas that is composited.
    pub max_canvas_pixels: u64,
    /// Output colours.
    pub palette: Palette,
}

impl Default for CompositeOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            max_canvas_pixels: DEFAULT_MAX_CANVAS_PIXELS,
            palette: Palette::default(),
        }
    }
}

/// Classification of one composite pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelClass {
    /// Same in both revisions, or covered by neither.
    Unchanged,
    /// Only the old revision has ink here.
    Removed,
    /// Only the new revision has ink here.
    Added,
    /// Both revisions have differing ink here.
    Changed,
}

/// Result of compositing two render results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composition {
    /// Outcome of the comparison.
    pub status: DiffStatus,
    /// Union canvas in design-space pixels.
    pub canvas: CanvasRect,
    /// Pixel classification counts over the canvas.
    pub counts: PixelCounts,
    /// Composite image, present when [`DiffStatus::has_composite`] holds.
    pub image: Option<RgbaImage>,
    /// Failure detail for inconclusive comparisons.
    pub detail: Option<String>,
}

impl Composition {
    /// Fraction of pixels that are not unchanged.
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        self.counts.magnitude()
    }

    fn without_image(status: DiffStatus, detail: Option<String>) -> Self {
        Self {
            status,
            canvas: CanvasRect::EMPTY,
            counts: PixelCounts::ZERO,
            image: None,
            detail,
        }
    }
}

/// Combines an old and a new render into a diff composite.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffCompositor {
    options: CompositeOptions,
}

impl DiffCompositor {
    /// Create a compositor with the given options.
    #[must_use]
    pub const fn new(options: CompositeOptions) -> Self {
        Self { options }
    }

    /// Options in effect.
    #[must_use]
    pub const fn options(&self) -> &CompositeOptions {
        &self.options
    }

    /// Composite `old` against `new`. A union canvas that overflows or
    /// exceeds [`CompositeOptions::max_canvas_pixels`] is inconclusive.
    #[must_use]
    pub fn compose(&self, old: &RenderResult, new: &RenderResult) -> Composition {
        let status = match (&old.status, &new.status) {
            (RenderStatus::Failed { .. }, _) | (_, RenderStatus::Failed { .. }) => {
                return Composition::without_image(DiffStatus::Inconclusive, failure_detail(old, new));
            }
            (RenderStatus::Empty, RenderStatus::Empty) => {
                return Composition::without_image(DiffStatus::NoContent, None);
            }
            (RenderStatus::Empty, RenderStatus::Rendered) => DiffStatus::Added,
            (RenderStatus::Rendered, RenderStatus::Empty) => DiffStatus::Removed,
            (RenderStatus::Rendered, RenderStatus::Rendered) => DiffStatus::Modified,
        };

        let Some(canvas) = old.extent().union(&new.extent()) else {
            return Composition::without_image(
                DiffStatus::Inconclusive,
                Some("union canvas exceeds the addressable range".to_owned()),
            );
        };
        if canvas.area() > self.options.max_canvas_pixels {
            return Composition::without_image(
                DiffStatus::Inconclusive,
                Some(format!(
                    "union canvas {}x{} exceeds the {} pixel limit",
                    canvas.width, canvas.height, self.options.max_canvas_pixels
                )),
            );
        }
        let mut image = RgbaImage::new(canvas.width, canvas.height);
        let mut counts = PixelCounts {
            total: canvas.area(),
            ..PixelCounts::ZERO
        };

        for (col, row, out) in image.enumerate_pixels_mut() {
            let x = canvas.x + i64::from(col);
            let y = canvas.y + i64::from(row);
            let class = self.classify(
                self.sample(&old.raster, x, y),
                self.sample(&new.raster, x, y),
            );
            match class {
                PixelClass::Unchanged => counts.unchanged += 1,
                PixelClass::Removed => counts.removed += 1,
                PixelClass::Added => counts.added += 1,
                PixelClass::Changed => counts.changed += 1,
            }
            *out = self.options.palette.color(class);
        }

        Composition {
            status,
            canvas,
            counts,
            image: Some(image),
            detail: None,
        }
    }

    /// Classify one design-space pixel from its flattened old and new
    /// samples; `None` means the side does not cover the pixel.
    #[must_use]
    pub fn classify(&self, old: Option<Rgba<u8>>, new: Option<Rgba<u8>>) -> PixelClass {
        match (old, new) {
            (None, None) => PixelClass::Unchanged,
            (Some(_), None) => PixelClass::Removed,
            (None, Some(_)) => PixelClass::Added,
            (Some(old), Some(new)) => {
                if self.within_tolerance(old, new) {
                    return PixelClass::Unchanged;
                }
                let background = self.options.palette.background;
                match (
                    !self.within_tolerance(old, background),
                    !self.within_tolerance(new, background),
                ) {
                    (true, false) => PixelClass::Removed,
                    (false, true) => PixelClass::Added,
                    _ => PixelClass::Changed,
                }
            }
        }
    }

    /// Flattened colour of `raster` at design-space `(x, y)`.
    fn sample(&self, raster: &Raster, x: i64, y: i64) -> Option<Rgba<u8>> {
        if !raster.extent().contains(x, y) {
            return None;
        }
        let col = u32::try_from(x - raster.origin_x).ok()?;
        let row = u32::try_from(y - raster.origin_y).ok()?;
        let pixel = raster.image.get_pixel_checked(col, row)?;
        Some(flatten(*pixel, self.options.palette.background))
    }

    fn within_tolerance(&self, a: Rgba<u8>, b: Rgba<u8>) -> bool {
        a.0.iter()
            .zip(b.0.iter())
            .take(3)
            .all(|(a, b)| a.abs_diff(*b) <= self.options.tolerance)
    }
}

/// Alpha-composite `pixel` over an opaque `background`.
fn flatten(pixel: Rgba<u8>, background: Rgba<u8>) -> Rgba<u8> {
    let Rgba([r, g, b, a]) = pixel;
    if a == u8::MAX {
        return pixel;
    }
    let alpha = u32::from(a);
    let blend = |fg: u8, bg: u8| {
        let mixed = (u32::from(fg) * alpha + u32::from(bg) * (255 - alpha) + 127) / 255;
        u8::try_from(mixed).unwrap_or(u8::MAX)
    };
    Rgba([
        blend(r, background.0[0]),
        blend(g, background.0[1]),
        blend(b, background.0[2]),
        u8::MAX,
    ])
}

fn failure_detail(old: &RenderResult, new: &RenderResult) -> Option<String> {
    let parts: Vec<String> = [("old", old), ("new", new)]
        .into_iter()
        .filter_map(|(side, result)| result.failure().map(|detail| format!("{side}: {detail}")))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn rendered(image: RgbaImage, x: i64, y: i64) -> RenderResult {
        RenderResult::rendered(Raster::with_origin(image, x, y))
    }

    fn outline(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
                BLACK
            } else {
                WHITE
            }
        })
    }

    #[test]
    fn identical_renders_are_all_unchanged() {
        let board = rendered(outline(40, 30), 0, 0);
        let composition = DiffCompositor::default().compose(&board, &board);

        assert_eq!(composition.status, DiffStatus::Modified);
        assert_eq!(composition.counts.unchanged, 40 * 30);
        assert!(composition.magnitude().abs() < f64::EPSILON);
        let image = composition.image.expect("composite");
        assert!(image.pixels().all(|pixel| *pixel == Palette::default().unchanged));
    }

    #[test]
    fn added_file_is_tinted_over_new_extent() {
        let new = rendered(outline(10, 8), 3, 4);
        let composition = DiffCompositor::default().compose(&RenderResult::empty(), &new);

        assert_eq!(composition.status, DiffStatus::Added);
        assert_eq!(composition.canvas, CanvasRect::new(3, 4, 10, 8));
        assert_eq!(composition.counts.added, 80);
        assert!((composition.magnitude() - 1.0).abs() < f64::EPSILON);
        let image = composition.image.expect("composite");
        assert!(image.pixels().all(|pixel| *pixel == Palette::default().added));
    }

    #[test]
    fn removed_file_is_tinted_over_old_extent() {
        let old = rendered(outline(6, 6), 0, 0);
        let composition = DiffCompositor::default().compose(&old, &RenderResult::empty());
        assert_eq!(composition.status, DiffStatus::Removed);
        assert_eq!(composition.counts.removed, 36);
    }

    #[test]
    fn taller_board_adds_the_new_rows() {
        let old = rendered(outline(100, 80), 0, 0);
        let new = rendered(outline(100, 100), 0, 0);
        let composition = DiffCompositor::default().compose(&old, &new);

        assert_eq!(composition.canvas, CanvasRect::new(0, 0, 100, 100));
        let image = composition.image.expect("composite");
        let palette = Palette::default();
        for y in 80..100 {
            for x in 0..100 {
                assert_eq!(*image.get_pixel(x, y), palette.added, "pixel {x},{y}");
            }
        }
        // Old bottom edge disappeared; side edges overlap.
        assert_eq!(*image.get_pixel(50, 79), palette.removed);
        assert_eq!(*image.get_pixel(0, 40), palette.unchanged);
        assert_eq!(composition.counts.added, 100 * 20);
    }

    #[test]
    fn origins_align_in_design_space() {
        let mut old_image = RgbaImage::from_pixel(10, 10, WHITE);
        old_image.put_pixel(5, 5, BLACK);
        let mut new_image = RgbaImage::from_pixel(10, 10, WHITE);
        new_image.put_pixel(3, 3, BLACK);

        // Both inks sit at design-space (7, 7).
        let old = rendered(old_image, 2, 2);
        let new = rendered(new_image, 4, 4);
        let composition = DiffCompositor::default().compose(&old, &new);

        assert_eq!(composition.canvas, CanvasRect::new(2, 2, 12, 12));
        let image = composition.image.expect("composite");
        assert_eq!(*image.get_pixel(5, 5), Palette::default().unchanged);
        assert_eq!(composition.counts.changed, 0);
        // L-shaped regions covered by one side only.
        assert_eq!(composition.counts.removed, 2 * 10 + 2 * 8);
        assert_eq!(composition.counts.added, 2 * 10 + 2 * 8);
    }

    #[test]
    fn failed_side_is_inconclusive_without_composite() {
        let old = rendered(outline(4, 4), 0, 0);
        let new = RenderResult::failed("renderer timed out after 60s");
        let composition = DiffCompositor::default().compose(&old, &new);

        assert_eq!(composition.status, DiffStatus::Inconclusive);
        assert!(composition.image.is_none());
        assert_eq!(
            composition.detail.as_deref(),
            Some("new: renderer timed out after 60s")
        );
    }

    #[test]
    fn distant_origins_are_inconclusive_instead_of_allocating() {
        let near = rendered(outline(1, 1), 0, 0);
        let far = rendered(outline(1, 1), 1 << 40, 1 << 40);
        let composition = DiffCompositor::default().compose(&near, &far);

        assert_eq!(composition.status, DiffStatus::Inconclusive);
        assert!(composition.image.is_none());
        assert!(composition.detail.is_some());

        let extreme = rendered(outline(4, 4), i64::MAX - 1, 0);
        let composition = DiffCompositor::default().compose(&RenderResult::empty(), &extreme);
        assert_eq!(composition.status, DiffStatus::Inconclusive);
    }

    #[test]
    fn canvas_over_the_pixel_limit_is_inconclusive() {
        let compositor = DiffCompositor::new(CompositeOptions {
            max_canvas_pixels: 99,
            ..CompositeOptions::default()
        });
        let old = rendered(outline(10, 10), 0, 0);
        let composition = compositor.compose(&old, &old);
        assert_eq!(composition.status, DiffStatus::Inconclusive);
        assert_eq!(
            composition.detail.as_deref(),
            Some("union canvas 10x10 exceeds the 99 pixel limit")
        );

        let small = rendered(outline(9, 11), 0, 0);
        assert_eq!(compositor.compose(&small, &small).status, DiffStatus::Modified);
    }

    #[test]
    fn absent_on_both_sides_is_no_content() {
        let composition =
            DiffCompositor::default().compose(&RenderResult::empty(), &RenderResult::empty());
        assert_eq!(composition.status, DiffStatus::NoContent);
        assert!(composition.image.is_none());
        assert_eq!(composition.counts, PixelCounts::ZERO);
    }

    #[test]
    fn overlapping_different_ink_is_changed() {
        let compositor = DiffCompositor::default();
        assert_eq!(
            compositor.classify(Some(BLACK), Some(Rgba([200, 0, 0, 255]))),
            PixelClass::Changed
        );
        assert_eq!(compositor.classify(Some(BLACK), Some(WHITE)), PixelClass::Removed);
        assert_eq!(compositor.classify(Some(WHITE), Some(BLACK)), PixelClass::Added);
        assert_eq!(compositor.classify(None, None), PixelClass::Unchanged);
    }

    #[test]
    fn tolerance_absorbs_antialiasing_noise() {
        let grey = Rgba([100, 100, 100, 255]);
        let noisy = Rgba([110, 95, 100, 255]);
        assert_eq!(
            DiffCompositor::default().classify(Some(grey), Some(noisy)),
            PixelClass::Unchanged
        );

        let strict = DiffCompositor::new(CompositeOptions {
            tolerance: 0,
            ..CompositeOptions::default()
        });
        assert_eq!(strict.classify(Some(grey), Some(noisy)), PixelClass::Changed);
    }

    #[test]
    fn transparent_pixels_flatten_to_background() {
        let clear = rendered(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])), 0, 0);
        let white = rendered(RgbaImage::from_pixel(4, 4, WHITE), 0, 0);
        let composition = DiffCompositor::default().compose(&clear, &white);
        assert_eq!(composition.counts.unchanged, 16);
    }

    fn arb_render() -> impl Strategy<Value = RenderResult> {
        (1u32..6, 1u32..6, -3i64..3, -3i64..3, any::<u64>()).prop_map(|(w, h, x, y, seed)| {
            let image = RgbaImage::from_fn(w, h, |col, row| {
                let bit = (seed >> ((col * 7 + row * 3) % 64)) & 1;
                if bit == 1 {
                    BLACK
                } else {
                    WHITE
                }
            });
            rendered(image, x, y)
        })
    }

    proptest! {
        #[test]
        fn swapping_sides_swaps_removed_and_added(a in arb_render(), b in arb_render()) {
            let compositor = DiffCompositor::default();
            let forward = compositor.compose(&a, &b);
            let backward = compositor.compose(&b, &a);

            prop_assert_eq!(forward.canvas, backward.canvas);
            prop_assert_eq!(forward.counts.removed, backward.counts.added);
            prop_assert_eq!(forward.counts.added, backward.counts.removed);
            prop_assert_eq!(forward.counts.changed, backward.counts.changed);
            prop_assert!((forward.magnitude() - backward.magnitude()).abs() < f64::EPSILON);
        }
    }
}
