use myco_core::{
    DlaEngine, DlaSettings, FrameTiming, GridSpec, InvariantMode, PhysarumEngine, Settings,
    SimulationEngine, SlimeSettings, SlimeSpawn, SpawnStrategy, wrap_coord, wrap_f32,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

#[test]
fn wrapped_coordinates_stay_in_bounds() {
    let mut rng = SmallRng::seed_from_u64(11);
    for _ in 0..2_000 {
        let w = rng.random_range(1..300u32);
        let h = rng.random_range(1..300u32);
        let grid = GridSpec::new(w, h).expect("grid");
        // Bias toward the edges where off-by-one errors live.
        let edge = |rng: &mut SmallRng, size: u32| -> i64 {
            let size = i64::from(size);
            match rng.random_range(0..4u8) {
                0 => rng.random_range(-2..=1),
                1 => size + rng.random_range(-2..=1),
                2 => rng.random_range(-5 * size..5 * size),
                _ => rng.random_range(i64::from(i32::MIN)..i64::from(i32::MAX)),
            }
        };
        let x = edge(&mut rng, w);
        let y = edge(&mut rng, h);
        let (wx, wy) = grid.wrap(x, y);
        assert!(wx < w && wy < h, "({x}, {y}) -> ({wx}, {wy}) on {w}x{h}");
        assert_eq!(wx, wrap_coord(x, w));
        assert!(grid.wrapped_index(x, y) < grid.cells());

        let fx = rng.random_range(-3.0_f32..3.0) * w as f32;
        let fy = (h as f32) - rng.random_range(0.0_f32..1e-3);
        let (px, py) = grid.wrap_position(fx, fy);
        assert!((0.0..w as f32).contains(&px));
        assert!((0.0..h as f32).contains(&py));
        assert!((0.0..w as f32).contains(&wrap_f32(-f32::EPSILON, w as f32)));
    }
}

#[test]
fn walkers_and_agents_never_leave_the_grid() {
    let grid = GridSpec::new(33, 17).expect("grid");
    for spawn in [SpawnStrategy::Uniform, SpawnStrategy::Ring, SpawnStrategy::Annulus] {
        let settings = Settings {
            walkers: 48,
            steps_per_frame: 64,
            rng_seed: Some(3),
            invariants: InvariantMode::Off,
            dla: DlaSettings {
                spawn,
                center_bias: 0.2,
                ..DlaSettings::default()
            },
            ..Settings::default()
        };
        let mut engine = DlaEngine::new(settings, grid).expect("dla");
        for _ in 0..40 {
            engine.advance(FrameTiming::unknown()).expect("advance");
            for walker in engine.walkers() {
                assert!(walker.x < grid.width() && walker.y < grid.height());
            }
        }
    }

    let settings = Settings {
        algorithm: myco_core::Algorithm::Slime,
        walkers: 64,
        steps_per_frame: 4,
        rng_seed: Some(5),
        invariants: InvariantMode::Off,
        slime: SlimeSettings {
            spawn_mode: SlimeSpawn::Uniform,
            move_speed_mpx: 2_500,
            ..SlimeSettings::default()
        },
        ..Settings::default()
    };
    let mut engine = PhysarumEngine::new(settings, grid).expect("slime");
    for _ in 0..40 {
        engine.advance(FrameTiming::unknown()).expect("advance");
        for agent in engine.agents() {
            assert!((0.0..grid.width() as f32).contains(&agent.x));
            assert!((0.0..grid.height() as f32).contains(&agent.y));
        }
    }
}
