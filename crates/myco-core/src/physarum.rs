//! Physarum (slime mould) agents on the CPU.
//!
//! Agents sense the presented field, steer, move and deposit into the back
//! buffer. A diffusion pass then blurs, decays and resolves the back buffer
//! into the presented one. Sensing never observes this frame's deposits, which
//! is what the GPU kernels do as well.

use std::f32::consts::TAU;

use rand::{Rng, rngs::SmallRng};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::budget::FrameTiming;
use crate::engine::{FrameStats, SimulationEngine};
use crate::error::EngineError;
use crate::field::{Field, FieldPair};
use crate::grid::GridSpec;
use crate::rng::Lcg;
use crate::settings::{Algorithm, Settings, SlimeParams, SlimeSpawn};
use crate::tier::Tier;

/// One slime agent. Its generator is private so results do not depend on
/// the order agents are processed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlimeAgent {
    pub x: f32,
    pub y: f32,
    /// Radians in `[0, 2π)`.
    pub heading: f32,
    pub rng: Lcg,
}

/// Steering decision for one agent step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steer {
    Straight,
    Left,
    Right,
}

/// Picks a direction from the three sensor readings. Ties between the side
/// sensors are broken by `coin`.
#[must_use]
pub fn steer(forward: f32, left: f32, right: f32, coin: bool) -> Steer {
    if forward >= left && forward >= right {
        Steer::Straight
    } else if left > right {
        Steer::Left
    } else if right > left {
        Steer::Right
    } else if coin {
        Steer::Right
    } else {
        Steer::Left
    }
}

fn sense(front: &Field, agent: &SlimeAgent, offset: f32, distance: f32) -> f32 {
    let angle = agent.heading + offset;
    let sx = (agent.x + angle.cos() * distance).round() as i64;
    let sy = (agent.y + angle.sin() * distance).round() as i64;
    front.sample(sx, sy)
}

/// Advances one agent by a single step. Returns whether it turned.
pub fn step_agent(agent: &mut SlimeAgent, front: &Field, back: &mut Field, params: &SlimeParams) -> bool {
    let forward = sense(front, agent, 0.0, params.sensor_distance);
    let left = sense(front, agent, -params.sensor_angle, params.sensor_distance);
    let right = sense(front, agent, params.sensor_angle, params.sensor_distance);

    // Coin drawn only when a turn is possible, matching the compute kernel's
    // generator stream.
    let can_turn = !(forward >= left && forward >= right);
    let coin = can_turn && agent.rng.next_u32() & 1 == 1;
    let decision = steer(forward, left, right, coin);
    match decision {
        Steer::Straight => {}
        Steer::Left => agent.heading -= params.turn_angle,
        Steer::Right => agent.heading += params.turn_angle,
    }
    agent.heading = agent.heading.rem_euclid(TAU);

    let grid = front.grid();
    let (x, y) = grid.wrap_position(
        agent.x + agent.heading.cos() * params.move_speed,
        agent.y + agent.heading.sin() * params.move_speed,
    );
    agent.x = x;
    agent.y = y;

    let (cx, cy) = (x.floor() as i64, y.floor() as i64);
    let deposited = front.sample(cx, cy) + params.deposit;
    back.put(cx, cy, deposited.min(1.0));
    decision != Steer::Straight
}

/// Blurs `src` with its 3x3 toroidal mean, decays, and writes into `dst`.
///
/// `dst = max(0, mix(src, mean3x3(src), diffuse) * (1 - decay))`. Rows are
/// processed in parallel.
pub fn diffuse_pass(src: &Field, dst: &mut Field, params: &SlimeParams) {
    let grid = src.grid();
    debug_assert_eq!(grid, dst.grid());
    let w = grid.width() as usize;
    let h = grid.height() as usize;
    let cells = src.cells();
    let keep = 1.0 - params.decay;
    let diffuse = params.diffuse;
    dst.cells_mut()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| {
            let rows = [(y + h - 1) % h, y, (y + 1) % h];
            for (x, out) in row.iter_mut().enumerate() {
                let cols = [(x + w - 1) % w, x, (x + 1) % w];
                let mut sum = 0.0;
                for r in rows {
                    for c in cols {
                        sum += cells[r * w + c];
                    }
                }
                let center = cells[y * w + x];
                let mixed = center + (sum / 9.0 - center) * diffuse;
                *out = (mixed * keep).clamp(0.0, 1.0);
            }
        });
}

pub struct PhysarumEngine {
    settings: Settings,
    grid: GridSpec,
    field: FieldPair,
    agents: Vec<SlimeAgent>,
    frame: u64,
    turns_last_frame: u64,
    disposed: bool,
}

impl PhysarumEngine {
    pub fn new(settings: Settings, grid: GridSpec) -> Result<Self, EngineError> {
        settings.validate()?;
        let mut rng = settings.seeded_rng();
        let agents = spawn_agents(&settings, grid, &mut rng);
        info!(
            width = grid.width(),
            height = grid.height(),
            agents = agents.len(),
            spawn = ?settings.slime.spawn_mode,
            "Physarum engine seeded"
        );
        Ok(Self {
            field: FieldPair::new(grid),
            agents,
            frame: 0,
            turns_last_frame: 0,
            disposed: false,
            grid,
            settings,
        })
    }

    #[must_use]
    pub fn agents(&self) -> &[SlimeAgent] {
        &self.agents
    }

    #[must_use]
    pub fn field(&self) -> &Field {
        self.field.front()
    }

    #[must_use]
    pub const fn turns_last_frame(&self) -> u64 {
        self.turns_last_frame
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// Spawns `settings.walkers` agents with random headings and odd LCG states.
pub fn spawn_agents(settings: &Settings, grid: GridSpec, rng: &mut SmallRng) -> Vec<SlimeAgent> {
    let (w, h) = (grid.width() as f32, grid.height() as f32);
    let (cx, cy) = (w * 0.5, h * 0.5);
    let radius = settings.slime.spawn_radius_frac * w.min(h);
    (0..settings.walkers)
        .map(|_| {
            let (x, y) = match settings.slime.spawn_mode {
                SlimeSpawn::Uniform => (rng.random_range(0.0..w), rng.random_range(0.0..h)),
                SlimeSpawn::Center => {
                    let r = radius * rng.random::<f32>().sqrt();
                    let a = rng.random::<f32>() * TAU;
                    grid.wrap_position(cx + r * a.cos(), cy + r * a.sin())
                }
            };
            SlimeAgent {
                x,
                y,
                heading: rng.random::<f32>() * TAU,
                rng: Lcg::new(rng.random::<u32>() | 1),
            }
        })
        .collect()
}

impl SimulationEngine for PhysarumEngine {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Slime
    }

    fn tier(&self) -> Tier {
        Tier::Canvas2d
    }

    fn grid(&self) -> GridSpec {
        self.grid
    }

    fn advance(&mut self, _timing: FrameTiming) -> Result<FrameStats, EngineError> {
        if self.disposed {
            return Err(EngineError::Disposed);
        }
        self.field.check_len()?;
        // Fixed-point settings are converted right before use.
        let params = self.settings.slime.params();
        let steps = self.settings.steps_per_frame;

        self.field.sync_back()?;
        let mut turns = 0u64;
        {
            let (front, back) = self.field.split();
            for agent in &mut self.agents {
                for _ in 0..steps {
                    if step_agent(agent, front, back, &params) {
                        turns += 1;
                    }
                }
            }
        }
        let (src, dst) = self.field.split_resolve();
        diffuse_pass(src, dst, &params);

        self.turns_last_frame = turns;
        self.frame += 1;
        let occupied = self.field.front().nonzero_count();
        if self.frame.is_multiple_of(60) {
            debug!(
                frame = self.frame,
                lit = occupied,
                turns,
                peak = self.field.front().max_value(),
                "Physarum heartbeat"
            );
        }
        Ok(FrameStats {
            frame: self.frame,
            steps,
            occupied,
            violation: None,
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
        self.agents = Vec::new();
        self.field = FieldPair::new(GridSpec::UNIT);
        debug!("Physarum engine disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}
