//! Frontier radius tracking for DLA growth.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::grid::GridSpec;
use crate::settings::AnnulusSettings;

/// Squared toroidal distance from the centre to the farthest stuck cell.
///
/// Concurrent updaters only ever raise the value through `fetch_max`, so the
/// stored radius equals the true maximum regardless of interleaving.
#[derive(Debug)]
pub struct FrontierRadius {
    radius_sq: AtomicU32,
}

impl FrontierRadius {
    pub const INITIAL: u32 = 1;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            radius_sq: AtomicU32::new(Self::INITIAL),
        }
    }

    /// Records a candidate squared radius and returns the previous maximum.
    pub fn observe(&self, radius_sq: u32) -> u32 {
        self.radius_sq.fetch_max(radius_sq, Ordering::AcqRel)
    }

    #[must_use]
    pub fn radius_sq(&self) -> u32 {
        self.radius_sq.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn radius(&self) -> f32 {
        (self.radius_sq().max(1) as f32).sqrt()
    }

    pub fn reset(&self) {
        self.radius_sq.store(Self::INITIAL, Ordering::Release);
    }
}

impl Default for FrontierRadius {
    fn default() -> Self {
        Self::new()
    }
}

/// Band around the frontier inside which walkers are allowed to roam.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Annulus {
    /// Frontier radius the band was computed from.
    pub radius: f32,
    pub min_r: f32,
    pub max_r: f32,
    /// Radial spread used when respawning into the band.
    pub inner_band: f32,
    /// Gap between the frontier and a walker respawned after sticking.
    pub respawn_margin: f32,
    pub torus_max_r: f32,
}

impl Annulus {
    #[must_use]
    pub fn from_frontier(radius: f32, grid: GridSpec, settings: &AnnulusSettings) -> Self {
        let min_dim = grid.min_dimension();
        let torus_max_r = grid.torus_max_radius(settings.torus_edge_pad_px);
        let outer_band = settings.outer_min_px.max(settings.outer_frac * min_dim);
        let inner_band = settings.inner_min_px.max(settings.inner_frac * min_dim);
        let respawn_margin = settings
            .respawn_margin_min_px
            .max(settings.respawn_margin_frac * min_dim);
        let radius = radius.max(1.0);
        Self {
            radius,
            min_r: (radius - inner_band).max(1.0),
            max_r: (radius + outer_band).min(torus_max_r),
            inner_band,
            respawn_margin,
            torus_max_r,
        }
    }

    #[must_use]
    pub fn contains_sq(&self, r2: f32) -> bool {
        r2 <= self.max_r * self.max_r && r2 >= self.min_r * self.min_r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_only_raises() {
        let frontier = FrontierRadius::new();
        assert_eq!(frontier.radius_sq(), 1);
        assert_eq!(frontier.observe(49), 1);
        assert_eq!(frontier.observe(9), 49);
        assert_eq!(frontier.radius_sq(), 49);
        assert!((frontier.radius() - 7.0).abs() < 1e-6);
        frontier.reset();
        assert_eq!(frontier.radius_sq(), 1);
    }

    #[test]
    fn annulus_is_clamped_to_torus() {
        let grid = GridSpec::new(100, 100).expect("grid");
        let settings = AnnulusSettings::default();
        let near = Annulus::from_frontier(1.0, grid, &settings);
        assert_eq!(near.min_r, 1.0);
        assert!((near.max_r - 25.0).abs() < 1e-4);

        let far = Annulus::from_frontier(500.0, grid, &settings);
        assert!(far.max_r <= far.torus_max_r);
        assert!((far.torus_max_r - (0.5 * (20_000f32).sqrt() - 2.0)).abs() < 1e-3);
        assert!(far.contains_sq(far.max_r * far.max_r));
    }
}
