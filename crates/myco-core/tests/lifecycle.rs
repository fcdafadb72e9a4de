use myco_core::{
    Algorithm, Backdrop, BackdropState, Capabilities, Compositor, CpuEngineFactory, EngineError,
    EngineFactory, FrameOutcome, FrameTiming, GridSpec, InvariantMode, ResizeOutcome, Settings,
    SimulationEngine, ThemeColor, Tier, Viewport,
};

fn settings(algorithm: Algorithm) -> Settings {
    Settings {
        algorithm,
        rng_seed: Some(21),
        invariants: InvariantMode::Enforce,
        ..Settings::default()
    }
}

struct NoAdapter;

impl EngineFactory for NoAdapter {
    fn tier(&self) -> Tier {
        Tier::GpuCompute
    }

    fn build(
        &self,
        _settings: &Settings,
        _grid: GridSpec,
        _compositor: &Compositor,
    ) -> Result<Box<dyn SimulationEngine>, EngineError> {
        Err(EngineError::Device("adapter request failed".into()))
    }
}

#[test]
fn resize_reallocates_with_fresh_seed() {
    let mut backdrop = Backdrop::new(
        settings(Algorithm::Dla),
        ThemeColor::rgb8(0x45, 0x45, 0x45),
        Some(Box::new(CpuEngineFactory)),
    )
    .expect("backdrop");
    let first = backdrop.mount(Viewport::new(800.0, 600.0, 1.0)).expect("mount");
    for _ in 0..20 {
        backdrop.frame(FrameTiming::unknown()).expect("frame");
    }
    let grown = backdrop
        .engine()
        .and_then(|engine| engine.front())
        .expect("front")
        .nonzero_count();
    assert!(grown >= 25);

    let outcome = backdrop
        .resize(Viewport::new(1600.0, 1200.0, 1.0))
        .expect("resize");
    let small = GridSpec::new(416, 320).expect("grid");
    let large = GridSpec::new(800, 608).expect("grid");
    assert_eq!(
        outcome,
        ResizeOutcome::Reallocated {
            from: small,
            to: large
        }
    );
    assert!(!backdrop.is_current(first));
    assert!(backdrop.is_current(backdrop.ticket()));

    let engine = backdrop.engine().expect("engine");
    assert_eq!(engine.grid(), large);
    let front = engine.front().expect("front");
    assert_eq!(front.nonzero_count(), 25, "only the new seed is lit");
    assert!(front.get(400, 304).expect("centre") > 0.0);
    assert_eq!(front.get(208, 160), Some(0.0), "old centre is not carried over");

    let pixels = backdrop.pixels().expect("pixels");
    assert_eq!((pixels.width(), pixels.height()), (800, 608));
    assert_eq!(pixels.visible_count(), 0);
    backdrop.frame(FrameTiming::unknown()).expect("frame");
    let pixels = backdrop.pixels().expect("pixels");
    assert_eq!(pixels.pixel(400, 304), Some([0x45, 0x45, 0x45, 255]));
}

#[test]
fn failed_gpu_probe_renders_on_canvas_in_one_frame() {
    let caps = Capabilities {
        gpu_compute: true,
        canvas_2d: true,
    };
    let mut backdrop = Backdrop::from_capabilities(
        settings(Algorithm::Slime),
        ThemeColor::WHITE,
        caps,
        Some(Box::new(NoAdapter)),
    )
    .expect("backdrop");
    assert_eq!(backdrop.tier(), Tier::GpuCompute);
    backdrop.mount(Viewport::new(320.0, 240.0, 2.0)).expect("mount");
    assert_eq!(backdrop.tier(), Tier::Canvas2d);
    assert_eq!(
        backdrop.engine().map(|engine| engine.algorithm()),
        Some(Algorithm::Slime)
    );

    let outcome = backdrop.frame(FrameTiming::unknown()).expect("frame");
    assert!(matches!(outcome, FrameOutcome::Presented(_)));
    assert!(backdrop.pixels().expect("pixels").visible_count() > 0);
}

#[test]
fn canvas_tier_runs_half_the_workload() {
    let mut backdrop = Backdrop::new(
        settings(Algorithm::Dla),
        ThemeColor::WHITE,
        Some(Box::new(CpuEngineFactory)),
    )
    .expect("backdrop");
    backdrop.mount(Viewport::new(256.0, 256.0, 1.0)).expect("mount");
    let FrameOutcome::Presented(stats) = backdrop.frame(FrameTiming::unknown()).expect("frame")
    else {
        panic!("expected a presented frame");
    };
    // Desktop: 4 steps, halved to 2, times the warm-up multiplier of 12.
    assert_eq!(stats.steps, 24);
}

#[test]
fn opacity_applies_without_reseeding() {
    let mut backdrop = Backdrop::new(
        settings(Algorithm::Dla),
        ThemeColor::WHITE,
        Some(Box::new(CpuEngineFactory)),
    )
    .expect("backdrop");
    let ticket = backdrop.mount(Viewport::new(128.0, 128.0, 1.0)).expect("mount");
    backdrop.set_opacity(0.5);
    assert!(backdrop.is_current(ticket));
    backdrop.frame(FrameTiming::unknown()).expect("frame");
    let grid = backdrop.grid().expect("grid");
    let (cx, cy) = grid.center();
    let pixel = backdrop.pixels().and_then(|p| p.pixel(cx, cy)).expect("pixel");
    assert_eq!(pixel, [255, 255, 255, 128]);

    backdrop.set_opacity(7.0);
    assert_eq!(backdrop.settings().opacity, 1.0);
}

#[test]
fn unmount_releases_everything() {
    let mut backdrop = Backdrop::new(
        settings(Algorithm::Slime),
        ThemeColor::WHITE,
        Some(Box::new(CpuEngineFactory)),
    )
    .expect("backdrop");
    let ticket = backdrop.mount(Viewport::new(200.0, 200.0, 1.0)).expect("mount");
    backdrop.frame(FrameTiming::unknown()).expect("frame");
    backdrop.unmount();
    assert_eq!(backdrop.state(), &BackdropState::Disposed);
    assert!(!backdrop.is_current(ticket));
    assert!(backdrop.engine().is_none());
    assert!(backdrop.pixels().is_none());
    assert!(backdrop.grid().is_none());
    assert_eq!(
        backdrop.resize(Viewport::new(400.0, 400.0, 1.0)).expect("resize"),
        ResizeOutcome::Unchanged
    );
    assert!(backdrop.capture().expect("capture").is_none());
}
