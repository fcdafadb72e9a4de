//! Diffusion-limited aggregation on the CPU.
//!
//! Walkers take one random step at a time. A walker that lands next to the
//! aggregate sticks: its cell becomes permanently occupied, remembers which
//! particle it touched, and blooms a small block of full intensity into the
//! visual field. The visual field fades slowly while occupied cells stay lit.

use std::f32::consts::TAU;

use rand::{Rng, rngs::SmallRng};
use tracing::{debug, info, trace};

use crate::budget::{FrameTiming, StepBudget};
use crate::engine::{FrameStats, SimulationEngine};
use crate::error::{EngineError, InvariantViolation};
use crate::field::{Field, FieldPair};
use crate::frontier::{Annulus, FrontierRadius};
use crate::grid::GridSpec;
use crate::invariants::DegeneracyMonitor;
use crate::settings::{Algorithm, InvariantMode, Settings, SpawnStrategy};
use crate::tier::Tier;

const EMPTY: u32 = 0;

/// A walker's current cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Walker {
    pub x: u32,
    pub y: u32,
}

/// One occupied cell of the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateParticle {
    pub x: u32,
    pub y: u32,
    /// Index of the particle this one stuck to; `None` only for the seed.
    pub parent: Option<u32>,
    /// Distance from the seed in parent links.
    pub generation: u32,
}

pub struct DlaEngine {
    settings: Settings,
    grid: GridSpec,
    field: FieldPair,
    /// Particle index plus one per cell; `EMPTY` when unoccupied.
    occupancy: Vec<u32>,
    aggregate: Vec<AggregateParticle>,
    walkers: Vec<Walker>,
    rng: SmallRng,
    frontier: FrontierRadius,
    annulus: Annulus,
    bucket_radius: Vec<f32>,
    bucket_scratch: Vec<usize>,
    budget: StepBudget,
    monitor: Option<DegeneracyMonitor>,
    frame: u64,
    steps_total: u64,
    growth_complete: bool,
    first_stick_logged: bool,
    disposed: bool,
}

impl DlaEngine {
    /// Allocates a fresh aggregate seeded at the grid centre.
    pub fn new(settings: Settings, grid: GridSpec) -> Result<Self, EngineError> {
        settings.validate()?;
        let dla = settings.dla;
        let buckets = dla.ring.angle_buckets as usize;
        let monitor = (settings.invariants != InvariantMode::Off)
            .then(|| DegeneracyMonitor::new(dla.degeneracy));
        let frontier = FrontierRadius::new();
        let annulus = Annulus::from_frontier(frontier.radius(), grid, &dla.annulus);
        let mut engine = Self {
            rng: settings.seeded_rng(),
            budget: StepBudget::new(settings.steps_per_frame, &dla),
            field: FieldPair::new(grid),
            occupancy: vec![EMPTY; grid.cells()],
            aggregate: Vec::new(),
            walkers: Vec::with_capacity(settings.walkers as usize),
            frontier,
            annulus,
            bucket_radius: vec![dla.ring.min_spawn_radius; buckets],
            bucket_scratch: Vec::with_capacity(buckets),
            monitor,
            frame: 0,
            steps_total: 0,
            growth_complete: false,
            first_stick_logged: false,
            disposed: false,
            grid,
            settings,
        };
        engine.seed();
        for _ in 0..engine.settings.walkers {
            let walker = engine.spawn_position(false);
            engine.walkers.push(walker);
        }
        info!(
            width = grid.width(),
            height = grid.height(),
            walkers = engine.walkers.len(),
            spawn = ?dla.spawn,
            "DLA engine seeded"
        );
        Ok(engine)
    }

    fn seed(&mut self) {
        let (cx, cy) = self.grid.center();
        let radius = self.settings.dla.seed_radius;
        self.field.clear();
        self.field.seed_block(cx, cy, radius, 1.0);
        self.occupy(cx, cy, None);
        let r = i64::from(radius);
        for dy in -r..=r {
            for dx in -r..=r {
                let (x, y) = self.grid.wrap(i64::from(cx) + dx, i64::from(cy) + dy);
                if self.occupancy[self.grid.index(x, y)] == EMPTY {
                    self.occupy(x, y, Some(0));
                }
            }
        }
    }

    /// Marks a cell occupied and links it into the aggregate.
    fn occupy(&mut self, x: u32, y: u32, parent: Option<u32>) {
        let generation = parent
            .and_then(|p| self.aggregate.get(p as usize))
            .map_or(0, |p| p.generation + 1);
        let id = self.aggregate.len() as u32;
        self.aggregate.push(AggregateParticle {
            x,
            y,
            parent,
            generation,
        });
        let idx = self.grid.index(x, y);
        self.occupancy[idx] = id + 1;

        let r2 = self.grid.distance_sq_from_center(x, y);
        self.frontier.observe(r2);
        let (dx, dy) = self.grid.offset_from_center(x, y);
        let bucket = self.bucket_of(dx as f32, dy as f32);
        let radius = (r2 as f32).sqrt();
        if let Some(slot) = self.bucket_radius.get_mut(bucket) {
            *slot = slot.max(radius);
        }
    }

    #[must_use]
    pub const fn grid_spec(&self) -> GridSpec {
        self.grid
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn occupied_count(&self) -> usize {
        self.aggregate.len()
    }

    #[must_use]
    pub fn is_occupied(&self, x: u32, y: u32) -> bool {
        x < self.grid.width()
            && y < self.grid.height()
            && self.occupancy[self.grid.index(x, y)] != EMPTY
    }

    #[must_use]
    pub fn aggregate(&self) -> &[AggregateParticle] {
        &self.aggregate
    }

    #[must_use]
    pub fn walkers(&self) -> &[Walker] {
        &self.walkers
    }

    #[must_use]
    pub fn frontier(&self) -> &FrontierRadius {
        &self.frontier
    }

    #[must_use]
    pub const fn frame_index(&self) -> u64 {
        self.frame
    }

    #[must_use]
    pub const fn growth_complete(&self) -> bool {
        self.growth_complete
    }

    #[must_use]
    pub fn field(&self) -> &Field {
        self.field.front()
    }

    /// Runs `count` single-walker steps straight into the back buffer without
    /// fading or publishing.
    pub fn run_steps(&mut self, count: u64) {
        if self.disposed || self.walkers.is_empty() {
            return;
        }
        for _ in 0..count {
            if self.growth_complete {
                break;
            }
            self.step();
        }
    }

    fn step(&mut self) {
        let i = self.rng.random_range(0..self.walkers.len());
        if self.settings.dla.spawn == SpawnStrategy::Annulus {
            self.confine_to_annulus(i);
        }

        let Walker { x, y } = self.walkers[i];
        let (mut nx, mut ny) = (i64::from(x), i64::from(y));
        let bias = self.settings.dla.center_bias;
        if bias > 0.0 && self.rng.random::<f32>() < bias {
            let (cx, cy) = self.grid.center();
            if self.rng.random::<f32>() < 0.5 {
                nx += i64::from(cx).cmp(&nx) as i64;
            } else {
                ny += i64::from(cy).cmp(&ny) as i64;
            }
        } else {
            match self.rng.random_range(0..4u8) {
                0 => nx += 1,
                1 => nx -= 1,
                2 => ny += 1,
                _ => ny -= 1,
            }
        }
        let (x, y) = self.grid.wrap(nx, ny);
        self.steps_total += 1;

        if self.occupancy[self.grid.index(x, y)] != EMPTY {
            // Walked onto the aggregate from a spawn point next to it.
            self.walkers[i] = self.spawn_position(false);
            return;
        }

        if let Some(parent) = self.touching(x, y) {
            self.stick(x, y, parent);
            self.walkers[i] = self.spawn_position(true);
            return;
        }

        self.walkers[i] = Walker { x, y };
        if self.settings.dla.spawn == SpawnStrategy::Ring && self.strayed_from_ring(x, y) {
            self.walkers[i] = self.spawn_position(false);
        }
    }

    /// First occupied neighbour within the Manhattan stick radius, nearest
    /// rings first. The cell itself is excluded.
    fn touching(&self, x: u32, y: u32) -> Option<u32> {
        let radius = i64::from(self.settings.dla.stick_radius);
        for dist in 1..=radius {
            for dx in -dist..=dist {
                let rem = dist - dx.abs();
                let offsets: &[i64] = if rem == 0 { &[0] } else { &[-rem, rem] };
                for &dy in offsets {
                    let idx = self
                        .grid
                        .wrapped_index(i64::from(x) + dx, i64::from(y) + dy);
                    let occupant = self.occupancy[idx];
                    if occupant != EMPTY {
                        return Some(occupant - 1);
                    }
                }
            }
        }
        None
    }

    fn stick(&mut self, x: u32, y: u32, parent: u32) {
        self.occupy(x, y, Some(parent));
        let bloom = self.settings.dla.bloom_radius;
        self.field.back_mut().seed_block(x, y, bloom, 1.0);
        if !self.first_stick_logged {
            self.first_stick_logged = true;
            info!(x, y, steps = self.steps_total, "first aggregation");
        }
        trace!(x, y, parent, size = self.aggregate.len(), "walker stuck");
        if let Some(max) = self.settings.dla.max_aggregate
            && self.aggregate.len() >= max as usize
        {
            self.growth_complete = true;
            info!(particles = self.aggregate.len(), "aggregate reached its cap");
        }
    }

    fn confine_to_annulus(&mut self, i: usize) {
        let mask = u64::from(self.settings.dla.annulus.refresh_mask);
        if self.steps_total & mask == 0 {
            self.annulus =
                Annulus::from_frontier(self.frontier.radius(), self.grid, &self.settings.dla.annulus);
        }
        let Walker { x, y } = self.walkers[i];
        let r2 = self.grid.distance_sq_from_center(x, y) as f32;
        if !self.annulus.contains_sq(r2) {
            self.walkers[i] = self.annulus_position(false);
        }
    }

    fn strayed_from_ring(&self, x: u32, y: u32) -> bool {
        let (dx, dy) = self.grid.offset_from_center(x, y);
        let (dx, dy) = (dx as f32, dy as f32);
        let bucket = self.bucket_of(dx, dy);
        let limit = self.bucket_radius[bucket] + self.settings.dla.ring.respawn_distance;
        (dx * dx + dy * dy).sqrt() > limit
    }

    fn bucket_of(&self, dx: f32, dy: f32) -> usize {
        let buckets = self.bucket_radius.len().max(1);
        let angle = dy.atan2(dx).rem_euclid(TAU);
        ((angle / TAU * buckets as f32) as usize).min(buckets - 1)
    }

    fn bucket_angle(&self, bucket: usize) -> f32 {
        bucket as f32 * TAU / self.bucket_radius.len().max(1) as f32
    }

    fn spawn_position(&mut self, after_stick: bool) -> Walker {
        match self.settings.dla.spawn {
            SpawnStrategy::Uniform => self.uniform_position(),
            SpawnStrategy::Ring => self
                .ring_position()
                .unwrap_or_else(|| self.uniform_position()),
            SpawnStrategy::Annulus => self.annulus_position(after_stick),
        }
    }

    fn uniform_position(&mut self) -> Walker {
        Walker {
            x: self.rng.random_range(0..self.grid.width()),
            y: self.rng.random_range(0..self.grid.height()),
        }
    }

    /// Spawns just outside the aggregate in a random direction whose spawn
    /// point is still on the grid.
    fn ring_position(&mut self) -> Option<Walker> {
        let ring = self.settings.dla.ring;
        let (cx, cy) = self.grid.center();
        let (cx, cy) = (cx as f32, cy as f32);
        let (w, h) = (self.grid.width() as f32, self.grid.height() as f32);

        let mut valid = std::mem::take(&mut self.bucket_scratch);
        valid.clear();
        valid.extend((0..self.bucket_radius.len()).filter(|&b| {
            let angle = self.bucket_angle(b);
            let r = self.bucket_radius[b] + ring.spawn_buffer;
            let x = cx + angle.cos() * r;
            let y = cy + angle.sin() * r;
            (0.0..w).contains(&x) && (0.0..h).contains(&y)
        }));
        let chosen = if valid.is_empty() {
            None
        } else {
            Some(valid[self.rng.random_range(0..valid.len())])
        };
        self.bucket_scratch = valid;

        let bucket = chosen?;
        let jitter = (self.rng.random::<f32>() - 0.5) * ring.angle_jitter;
        let angle = self.bucket_angle(bucket) + jitter;
        let r = self.bucket_radius[bucket] + ring.spawn_buffer;
        let (x, y) = self.grid.wrap(
            (cx + angle.cos() * r).floor() as i64,
            (cy + angle.sin() * r).floor() as i64,
        );
        Some(Walker { x, y })
    }

    /// Spawns onto the frontier band. After a stick the walker lands just
    /// beyond the current frontier; otherwise anywhere inside the inner band.
    fn annulus_position(&mut self, after_stick: bool) -> Walker {
        let band = self.annulus;
        let angle = self.rng.random::<f32>() * TAU;
        let u = self.rng.random::<f32>();
        let r = if after_stick {
            let margin = band.respawn_margin;
            (self.frontier.radius() + margin + u * margin).min(band.torus_max_r)
        } else {
            (band.radius + u * band.inner_band).clamp(1.0, band.torus_max_r)
        };
        let (cx, cy) = self.grid.center();
        let (x, y) = self.grid.wrap(
            (cx as f32 + r * angle.cos()).round() as i64,
            (cy as f32 + r * angle.sin()).round() as i64,
        );
        Walker { x, y }
    }

    /// Round-robin fade of one chunk of the back buffer.
    fn fade(&mut self) {
        let chunks = self.settings.dla.fade_chunks.max(1) as usize;
        let start = (self.frame % chunks as u64) as usize;
        let step = self.settings.dla.fade_step;
        let Self {
            field, occupancy, ..
        } = self;
        let cells = field.back_mut().cells_mut();
        for i in (start..cells.len()).step_by(chunks) {
            cells[i] = if occupancy[i] != EMPTY {
                1.0
            } else {
                (cells[i] - step).max(0.0)
            };
        }
    }
}

impl SimulationEngine for DlaEngine {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Dla
    }

    fn tier(&self) -> Tier {
        Tier::Canvas2d
    }

    fn grid(&self) -> GridSpec {
        self.grid
    }

    fn advance(&mut self, timing: FrameTiming) -> Result<FrameStats, EngineError> {
        if self.disposed {
            return Err(EngineError::Disposed);
        }
        self.field.check_len()?;
        if self.occupancy.len() != self.grid.cells() {
            return Err(InvariantViolation::BufferSizeMismatch {
                width: self.grid.width(),
                height: self.grid.height(),
                expected: self.grid.cells(),
                actual: self.occupancy.len(),
            }
            .into());
        }

        self.field.sync_back()?;
        let steps = self.budget.next_frame(timing);
        self.run_steps(u64::from(steps));
        self.fade();
        self.field.swap();
        self.frame += 1;

        let occupied = self.aggregate.len();
        let violation = self
            .monitor
            .as_mut()
            .and_then(|m| m.observe(self.frame, occupied, self.grid.cells()));
        if self.frame.is_multiple_of(60) {
            debug!(
                frame = self.frame,
                occupied,
                steps,
                walkers = self.walkers.len(),
                warmup_remaining = self.budget.warmup_remaining(),
                frontier = self.frontier.radius(),
                "DLA heartbeat"
            );
        }
        Ok(FrameStats {
            frame: self.frame,
            steps,
            occupied,
            violation,
        })
    }

    fn front(&self) -> Option<&Field> {
        (!self.disposed).then(|| self.field.front())
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.occupancy = Vec::new();
        self.walkers = Vec::new();
        self.aggregate = Vec::new();
        self.field = FieldPair::new(GridSpec::UNIT);
        debug!("DLA engine disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}
