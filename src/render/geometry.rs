use crate::config::OffsetConfig;

/// Axis-aligned pixel rectangle, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Layout of N bars inside the drawing area.
///
/// The usable width is the surface width minus left/right offsets and the
/// gaps between bars. Each bar gets `base_width` pixels; the first
/// `remainder` bars get one extra so the usable width is consumed exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarGeometry {
    pub bars: usize,
    pub padding: u32,
    pub left: u32,
    /// Y coordinate of the bars' bottom edge.
    pub baseline: u32,
    /// Height of a bar at full amplitude.
    pub bar_height: u32,
    pub base_width: u32,
    pub remainder: u32,
}

impl BarGeometry {
    pub fn compute(
        width: u32,
        height: u32,
        bars: usize,
        padding: u32,
        offset: &OffsetConfig,
    ) -> Self {
        let bars = bars.max(1);
        let n = bars as u32;

        let area_width = width.saturating_sub(offset.right);
        let baseline = height.saturating_sub(offset.bottom);

        let usable = area_width
            .saturating_sub(offset.left)
            .saturating_sub(padding.saturating_mul(n - 1));

        Self {
            bars,
            padding,
            left: offset.left,
            baseline,
            bar_height: baseline.saturating_sub(offset.top),
            base_width: (usable / n).max(1),
            remainder: if usable >= n { usable % n } else { 0 },
        }
    }

    pub fn bar_width(&self, index: usize) -> u32 {
        self.base_width
            .saturating_add(u32::from(index < self.remainder as usize))
    }

    /// Total horizontal extent of all bars and gaps, saturating at `u32::MAX`.
    pub fn span(&self) -> u32 {
        let n = self.bars as u32;
        self.base_width
            .saturating_mul(n)
            .saturating_add(self.remainder)
            .saturating_add(self.padding.saturating_mul(n - 1))
    }
}
