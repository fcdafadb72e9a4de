//! These tests need a compute-capable adapter and skip themselves otherwise.
//! Run: `cargo test -p myco-gfx --test gpu_tier -- --nocapture`

use std::rc::Rc;

use myco_core::{
    Algorithm, Backdrop, Compositor, EngineError, EngineFactory, FrameOutcome, FrameTiming,
    GridSpec, InvariantMode, InvariantViolation, Settings, SimulationEngine, ThemeColor, Tier,
    Viewport,
};
use myco_gfx::{GpuContext, GpuEngineFactory};

fn context() -> Option<Rc<GpuContext>> {
    match GpuContext::probe_blocking() {
        Ok(ctx) => Some(Rc::new(ctx)),
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            None
        }
    }
}

fn settings(algorithm: Algorithm) -> Settings {
    Settings {
        algorithm,
        rng_seed: Some(5),
        invariants: InvariantMode::Enforce,
        ..Settings::default()
    }
}

#[test]
fn dla_seed_is_visible_after_first_frame() {
    let Some(ctx) = context() else { return };
    let mut backdrop = Backdrop::new(
        settings(Algorithm::Dla),
        ThemeColor::rgb8(0x45, 0x45, 0x45),
        Some(Box::new(GpuEngineFactory::offscreen(ctx))),
    )
    .expect("backdrop");
    backdrop.mount(Viewport::new(256.0, 192.0, 1.0)).expect("mount");
    assert_eq!(backdrop.tier(), Tier::GpuCompute);
    assert!(backdrop.pixels().is_none(), "fields stay on the device");

    for _ in 0..4 {
        let outcome = backdrop.frame(FrameTiming::unknown()).expect("frame");
        assert!(matches!(outcome, FrameOutcome::Presented(_)));
    }
    let pixels = backdrop.capture().expect("capture").expect("pixels");
    let grid = backdrop.grid().expect("grid");
    assert_eq!((pixels.width(), pixels.height()), (grid.width(), grid.height()));
    let (cx, cy) = grid.center();
    assert_eq!(pixels.pixel(cx, cy), Some([0x45, 0x45, 0x45, 255]));
    assert!(pixels.visible_count() >= 25);
    assert_eq!(pixels.pixel(0, 0), Some([0, 0, 0, 0]));
}

#[test]
fn slime_trails_reach_the_readback() {
    let Some(ctx) = context() else { return };
    let mut backdrop = Backdrop::new(
        settings(Algorithm::Slime),
        ThemeColor::WHITE,
        Some(Box::new(GpuEngineFactory::offscreen(ctx))),
    )
    .expect("backdrop");
    backdrop.mount(Viewport::new(320.0, 240.0, 1.0)).expect("mount");
    for _ in 0..8 {
        backdrop.frame(FrameTiming::unknown()).expect("frame");
    }
    let pixels = backdrop.capture().expect("capture").expect("pixels");
    assert!(pixels.visible_count() > 0);
}

#[test]
fn resize_rebuilds_device_buffers() {
    let Some(ctx) = context() else { return };
    let mut backdrop = Backdrop::new(
        settings(Algorithm::Dla),
        ThemeColor::WHITE,
        Some(Box::new(GpuEngineFactory::offscreen(ctx))),
    )
    .expect("backdrop");
    let first = backdrop.mount(Viewport::new(128.0, 128.0, 1.0)).expect("mount");
    backdrop.frame(FrameTiming::unknown()).expect("frame");
    backdrop.resize(Viewport::new(256.0, 128.0, 1.0)).expect("resize");
    assert!(!backdrop.is_current(first));
    let grid = backdrop.grid().expect("grid");
    assert_eq!(backdrop.engine().map(|engine| engine.grid()), Some(grid));
    backdrop.frame(FrameTiming::unknown()).expect("frame");
    let pixels = backdrop.capture().expect("capture").expect("pixels");
    assert_eq!(pixels.width(), grid.width());
}

#[test]
fn oversized_grid_is_rejected() {
    let Some(ctx) = context() else { return };
    let factory = GpuEngineFactory::offscreen(ctx);
    let settings = settings(Algorithm::Dla);
    let compositor = Compositor::for_settings(&settings, ThemeColor::WHITE);
    let grid = GridSpec::new(70_000, 16).expect("grid");
    match factory.build(&settings, grid, &compositor) {
        Err(EngineError::Invariant(InvariantViolation::GridTooLarge { width, .. })) => {
            assert_eq!(width, 70_000);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("oversized grid was accepted"),
    }
}

#[test]
fn disposed_engine_refuses_frames() {
    let Some(ctx) = context() else { return };
    let factory = GpuEngineFactory::offscreen(ctx);
    let settings = settings(Algorithm::Slime);
    let compositor = Compositor::for_settings(&settings, ThemeColor::WHITE);
    let grid = GridSpec::new(64, 64).expect("grid");
    let mut engine = factory.build(&settings, grid, &compositor).expect("engine");
    engine.advance(FrameTiming::unknown()).expect("advance");
    engine.dispose();
    assert!(engine.is_disposed());
    assert!(matches!(
        engine.advance(FrameTiming::unknown()),
        Err(EngineError::Disposed)
    ));
    assert!(engine.capture(&compositor).expect("capture").is_none());
}
