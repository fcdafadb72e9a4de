use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use myco_app::{RenderJob, TierRequest, load_settings, render, write_png};
use myco_core::{Algorithm, DeviceClass, ThemeColor, Viewport};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "myco-app",
    version,
    about = "Render the myco generative backdrop headlessly and save the layer as PNG"
)]
struct Cli {
    /// Growth pattern to render; overrides the config file and `--set`.
    #[arg(long, value_enum)]
    algorithm: Option<AlgorithmArg>,

    /// Viewport width in CSS pixels.
    #[arg(long, default_value_t = 1280.0)]
    width: f64,

    /// Viewport height in CSS pixels.
    #[arg(long, default_value_t = 720.0)]
    height: f64,

    /// Device pixel ratio reported by the host.
    #[arg(long, default_value_t = 1.0)]
    dpr: f64,

    /// Frames to simulate before capturing.
    #[arg(long, default_value_t = 120)]
    frames: u32,

    /// Rendering tier to attempt.
    #[arg(long, value_enum, default_value_t = TierArg::Auto)]
    tier: TierArg,

    /// JSON settings file layered over the device defaults.
    #[arg(long, env = "MYCO_CONFIG")]
    config: Option<PathBuf>,

    /// Individual settings overrides (e.g. `--set dla.spawn=annulus`).
    #[arg(long = "set", value_name = "PATH=VALUE")]
    knobs: Vec<String>,

    /// Theme colour as a CSS token (`#rrggbb`, `rgb(...)`).
    #[arg(long, default_value = "#ffffff")]
    color: String,

    /// Layer opacity in [0, 1].
    #[arg(long)]
    opacity: Option<f32>,

    /// Seed for walker and agent placement.
    #[arg(long)]
    seed: Option<u64>,

    /// Resize the viewport to WIDTHxHEIGHT halfway through the run.
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    resize_to: Option<(f64, f64)>,

    /// Use the mobile defaults regardless of viewport width.
    #[arg(long)]
    mobile: bool,

    /// PNG output path.
    #[arg(long, short, default_value = "myco.png")]
    out: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    Dla,
    Slime,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TierArg {
    Auto,
    Gpu,
    Canvas,
    Dom,
}

fn parse_size(s: &str) -> Result<(f64, f64), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{s}`"))?;
    let w: f64 = w.trim().parse().map_err(|_| format!("bad width in `{s}`"))?;
    let h: f64 = h.trim().parse().map_err(|_| format!("bad height in `{s}`"))?;
    if w <= 0.0 || h <= 0.0 {
        return Err(format!("size must be positive, got `{s}`"));
    }
    Ok((w, h))
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let class = if cli.mobile {
        DeviceClass::Mobile
    } else {
        DeviceClass::classify(cli.width, None)
    };
    let mut settings = load_settings(class, cli.config.as_deref(), &cli.knobs)
        .context("invalid settings")?;
    if let Some(algorithm) = cli.algorithm {
        settings.algorithm = match algorithm {
            AlgorithmArg::Dla => Algorithm::Dla,
            AlgorithmArg::Slime => Algorithm::Slime,
        };
    }
    if let Some(opacity) = cli.opacity {
        settings.set_opacity(opacity);
    }
    if cli.seed.is_some() {
        settings.rng_seed = cli.seed;
    }
    let color = ThemeColor::parse(&cli.color).context("invalid --color")?;
    if cli.frames == 0 {
        bail!("--frames must be at least 1");
    }

    let algorithm = settings.algorithm;
    info!(
        algorithm = %algorithm,
        device = ?class,
        width = cli.width,
        height = cli.height,
        "Starting myco backdrop render"
    );
    let report = render(RenderJob {
        settings,
        color,
        viewport: Viewport::new(cli.width, cli.height, cli.dpr),
        frames: cli.frames,
        tier: match cli.tier {
            TierArg::Auto => TierRequest::Auto,
            TierArg::Gpu => TierRequest::Gpu,
            TierArg::Canvas => TierRequest::Canvas,
            TierArg::Dom => TierRequest::Dom,
        },
        resize_to: cli.resize_to.map(|(w, h)| Viewport::new(w, h, cli.dpr)),
    })?;

    match &report.pixels {
        Some(pixels) => {
            write_png(pixels, &cli.out)?;
            println!(
                "{} on {} tier, {}x{} grid, {} frames in {:.1} ms -> {}",
                algorithm,
                report.tier,
                pixels.width(),
                pixels.height(),
                report.presented,
                report.elapsed.as_secs_f64() * 1000.0,
                cli.out.display()
            );
        }
        None => {
            warn!(tier = %report.tier, "no layer to capture; nothing written");
            println!("{} tier, nothing rendered", report.tier);
        }
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
