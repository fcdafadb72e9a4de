//! Toroidal grid geometry.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest dimension addressable by the 16-bit packed walker coordinates.
pub const MAX_PACKED_DIMENSION: u32 = u16::MAX as u32;

/// Host viewport in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub device_pixel_ratio: f64,
}

impl Viewport {
    #[must_use]
    pub const fn new(width: f64, height: f64, device_pixel_ratio: f64) -> Self {
        Self {
            width,
            height,
            device_pixel_ratio,
        }
    }
}

/// Simulation grid dimensions. Fixed for the lifetime of an engine; a change
/// means a full reallocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridSpec {
    width: u32,
    height: u32,
}

impl GridSpec {
    /// Smallest valid grid, used as a placeholder for released storage.
    pub const UNIT: Self = Self {
        width: 1,
        height: 1,
    };

    pub fn new(width: u32, height: u32) -> Result<Self, ConfigError> {
        if width == 0 || height == 0 {
            return Err(ConfigError::Invalid("grid dimensions must be non-zero"));
        }
        Ok(Self { width, height })
    }

    /// Sizes a grid for the viewport. The pixel ratio is floored at 1 and then
    /// capped, and each dimension rounds up to a multiple of `align` (never
    /// below `align`).
    #[must_use]
    pub fn from_viewport(viewport: Viewport, dpr_cap: f32, align: u32) -> Self {
        let align = align.max(1);
        let dpr = viewport.device_pixel_ratio.max(1.0).min(f64::from(dpr_cap));
        let dimension = |css: f64| -> u32 {
            let scaled = (css.max(0.0) * dpr / f64::from(align)).ceil();
            let blocks = if scaled.is_finite() { scaled as u32 } else { 1 };
            blocks.saturating_mul(align).max(align)
        };
        Self {
            width: dimension(viewport.width),
            height: dimension(viewport.height),
        }
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub const fn cells(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    #[must_use]
    pub const fn center(&self) -> (u32, u32) {
        (self.width / 2, self.height / 2)
    }

    #[must_use]
    pub fn min_dimension(&self) -> f32 {
        self.width.min(self.height) as f32
    }

    /// Row-major index of an in-bounds cell.
    #[must_use]
    pub const fn index(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    /// Wraps signed cell coordinates onto the torus.
    #[must_use]
    pub fn wrap(&self, x: i64, y: i64) -> (u32, u32) {
        (wrap_coord(x, self.width), wrap_coord(y, self.height))
    }

    /// Row-major index of arbitrary signed coordinates after wrapping.
    #[must_use]
    pub fn wrapped_index(&self, x: i64, y: i64) -> usize {
        let (wx, wy) = self.wrap(x, y);
        self.index(wx, wy)
    }

    /// Wraps a continuous position onto `[0, width) x [0, height)`.
    #[must_use]
    pub fn wrap_position(&self, x: f32, y: f32) -> (f32, f32) {
        (
            wrap_f32(x, self.width as f32),
            wrap_f32(y, self.height as f32),
        )
    }

    /// Shortest toroidal offset from the grid centre.
    #[must_use]
    pub fn offset_from_center(&self, x: u32, y: u32) -> (i32, i32) {
        let (cx, cy) = self.center();
        (
            wrap_delta(x as i32 - cx as i32, self.width),
            wrap_delta(y as i32 - cy as i32, self.height),
        )
    }

    /// Squared toroidal distance from the grid centre.
    #[must_use]
    pub fn distance_sq_from_center(&self, x: u32, y: u32) -> u32 {
        let (dx, dy) = self.offset_from_center(x, y);
        (dx * dx + dy * dy) as u32
    }

    /// Largest radius that stays unambiguous on the torus, less a padding.
    #[must_use]
    pub fn torus_max_radius(&self, edge_pad: f32) -> f32 {
        let w = self.width as f32;
        let h = self.height as f32;
        (0.5 * (w * w + h * h).sqrt() - edge_pad).max(1.0)
    }

    /// Whether walker coordinates fit the 16-bit packing used on the GPU.
    #[must_use]
    pub const fn fits_packed(&self) -> bool {
        self.width <= MAX_PACKED_DIMENSION && self.height <= MAX_PACKED_DIMENSION
    }
}

/// Wraps a signed coordinate into `[0, size)`.
#[must_use]
pub fn wrap_coord(value: i64, size: u32) -> u32 {
    if size == 0 {
        return 0;
    }
    value.rem_euclid(i64::from(size)) as u32
}

/// Wraps a continuous coordinate into `[0, extent)`.
#[must_use]
pub fn wrap_f32(value: f32, extent: f32) -> f32 {
    if extent <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    let wrapped = value.rem_euclid(extent);
    // rem_euclid can round up to `extent` for tiny negative inputs.
    if wrapped >= extent { 0.0 } else { wrapped }
}

/// Shortest signed displacement on a ring of `size` cells, in
/// `(-size/2, size/2]`.
#[must_use]
pub fn wrap_delta(delta: i32, size: u32) -> i32 {
    if size == 0 {
        return 0;
    }
    let size = size as i32;
    let mut d = delta.rem_euclid(size);
    if d > size / 2 {
        d -= size;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_sizing_floors_dpr_then_caps() {
        let grid = GridSpec::from_viewport(Viewport::new(800.0, 600.0, 1.0), 0.5, 32);
        // 800 * 0.5 = 400 -> 416, 600 * 0.5 = 300 -> 320
        assert_eq!((grid.width(), grid.height()), (416, 320));

        let retina = GridSpec::from_viewport(Viewport::new(800.0, 600.0, 3.0), 0.5, 32);
        assert_eq!(retina, grid, "a cap below 1 pins the multiplier");

        let uncapped = GridSpec::from_viewport(Viewport::new(100.0, 100.0, 0.25), 2.0, 32);
        assert_eq!(uncapped.width(), 128, "ratios below 1 are raised to 1");
    }

    #[test]
    fn viewport_sizing_never_drops_below_alignment() {
        let grid = GridSpec::from_viewport(Viewport::new(0.0, -5.0, 1.0), 0.5, 32);
        assert_eq!((grid.width(), grid.height()), (32, 32));
        let nan = GridSpec::from_viewport(Viewport::new(f64::NAN, 10.0, f64::NAN), 0.5, 16);
        assert!(nan.width() >= 16 && nan.height() >= 16);
    }

    #[test]
    fn wrap_delta_picks_shortest_path() {
        assert_eq!(wrap_delta(0, 10), 0);
        assert_eq!(wrap_delta(4, 10), 4);
        assert_eq!(wrap_delta(5, 10), 5);
        assert_eq!(wrap_delta(6, 10), -4);
        assert_eq!(wrap_delta(-6, 10), 4);
        assert_eq!(wrap_delta(-1, 10), -1);
        assert_eq!(wrap_delta(23, 10), 3);
    }

    #[test]
    fn wrap_handles_far_negative_coordinates() {
        let grid = GridSpec::new(7, 5).expect("grid");
        assert_eq!(grid.wrap(-1, -1), (6, 4));
        assert_eq!(grid.wrap(-15, 11), (6, 1));
        assert_eq!(grid.wrap(i64::from(i32::MIN), 0).0, wrap_coord(i64::from(i32::MIN), 7));
        assert_eq!(wrap_f32(-0.5, 4.0), 3.5);
        assert_eq!(wrap_f32(4.0, 4.0), 0.0);
        assert_eq!(wrap_f32(f32::NAN, 4.0), 0.0);
    }

    #[test]
    fn distance_from_center_wraps() {
        let grid = GridSpec::new(64, 64).expect("grid");
        assert_eq!(grid.distance_sq_from_center(32, 32), 0);
        assert_eq!(grid.distance_sq_from_center(35, 36), 25);
        // Cell 0 sits 32 cells left of centre, which is also 32 cells right.
        assert_eq!(grid.distance_sq_from_center(0, 32), 32 * 32);
    }

    #[test]
    fn packed_range_is_sixteen_bits() {
        assert!(GridSpec::new(65_535, 16).expect("grid").fits_packed());
        assert!(!GridSpec::new(65_536, 16).expect("grid").fits_packed());
    }
}
