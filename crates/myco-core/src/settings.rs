//! Explicit configuration for a backdrop session.
//!
//! Hosts build a [`Settings`] once (usually through [`Settings::for_device`])
//! and hand it to the lifecycle manager. Nothing here is global; changing a
//! value means calling [`crate::Backdrop::reconfigure`], which reseeds.

use std::fmt;
use std::str::FromStr;

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};

use crate::compositor::AlphaMapping;
use crate::error::ConfigError;
use crate::tier::Tier;

/// Seed used when the host does not provide one.
pub const DEFAULT_RNG_SEED: u64 = 0x6D79_636F_BAC0_FFEE;

/// Viewports narrower than this many CSS pixels get mobile defaults.
pub const MOBILE_BREAKPOINT_PX: f64 = 768.0;

const MOBILE_AGENT_MARKERS: [&str; 8] = [
    "android",
    "webos",
    "iphone",
    "ipad",
    "ipod",
    "blackberry",
    "iemobile",
    "opera mini",
];

/// Which growth pattern the backdrop renders.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    Dla,
    #[serde(alias = "physarum")]
    Slime,
}

impl Algorithm {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Dla => "dla",
            Self::Slime => "slime",
        }
    }

    /// DLA branches read as solid lines; slime trails fade continuously.
    #[must_use]
    pub const fn alpha_mapping(self) -> AlphaMapping {
        match self {
            Self::Dla => AlphaMapping::Step,
            Self::Slime => AlphaMapping::Linear,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Algorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dla" => Ok(Self::Dla),
            "slime" | "physarum" => Ok(Self::Slime),
            _ => Err(ConfigError::Invalid("algorithm must be `dla` or `slime`")),
        }
    }
}

/// Coarse device class used to pick defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
}

impl DeviceClass {
    /// One-time capability read from the host environment.
    #[must_use]
    pub fn classify(viewport_width: f64, user_agent: Option<&str>) -> Self {
        if viewport_width < MOBILE_BREAKPOINT_PX {
            return Self::Mobile;
        }
        let handheld = user_agent.is_some_and(|agent| {
            let agent = agent.to_ascii_lowercase();
            MOBILE_AGENT_MARKERS
                .iter()
                .any(|marker| agent.contains(marker))
        });
        if handheld { Self::Mobile } else { Self::Desktop }
    }
}

/// How violated invariants are handled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvariantMode {
    /// Halt the backdrop and surface the violation.
    Enforce,
    /// Log the violation and keep rendering.
    Warn,
    /// Skip the checks entirely.
    Off,
}

impl Default for InvariantMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Enforce
        } else {
            Self::Warn
        }
    }
}

/// Where DLA walkers (re)appear.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpawnStrategy {
    /// Uniformly random cell anywhere on the torus.
    #[default]
    Uniform,
    /// Just outside the aggregate, per angular bucket.
    Ring,
    /// Inside a band that follows the frontier radius.
    Annulus,
}

/// Ring spawning tuned per angular bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RingSettings {
    pub angle_buckets: u32,
    pub min_spawn_radius: f32,
    pub spawn_buffer: f32,
    pub respawn_distance: f32,
    /// Total angular jitter in radians applied around a bucket's direction.
    pub angle_jitter: f32,
}

impl Default for RingSettings {
    fn default() -> Self {
        Self {
            angle_buckets: 360,
            min_spawn_radius: 30.0,
            spawn_buffer: 30.0,
            respawn_distance: 100.0,
            angle_jitter: 0.1,
        }
    }
}

/// Frontier-following annulus shared by the CPU reference and the GPU kernel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnnulusSettings {
    pub outer_min_px: f32,
    pub outer_frac: f32,
    pub inner_min_px: f32,
    pub inner_frac: f32,
    pub respawn_margin_min_px: f32,
    pub respawn_margin_frac: f32,
    /// Steps between frontier refreshes minus one; must be `2^n - 1`.
    pub refresh_mask: u32,
    pub torus_edge_pad_px: f32,
}

impl Default for AnnulusSettings {
    fn default() -> Self {
        Self {
            outer_min_px: 24.0,
            outer_frac: 0.08,
            inner_min_px: 8.0,
            inner_frac: 0.02,
            respawn_margin_min_px: 6.0,
            respawn_margin_frac: 0.02,
            refresh_mask: 31,
            torus_edge_pad_px: 2.0,
        }
    }
}

/// Step reduction applied after slow frames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdaptiveSettings {
    pub enabled: bool,
    pub target_frame_ms: f32,
    pub slowdown_factor: f32,
    pub min_steps: u32,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            target_frame_ms: 16.0,
            slowdown_factor: 0.8,
            min_steps: 100,
        }
    }
}

/// Cadence of the degenerate-state checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DegeneracySettings {
    pub check_interval_frames: u32,
    pub full_occupancy_frames: u32,
}

impl Default for DegeneracySettings {
    fn default() -> Self {
        Self {
            check_interval_frames: 60,
            full_occupancy_frames: 300,
        }
    }
}

/// Diffusion-limited aggregation knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DlaSettings {
    /// Probability that a step heads toward the grid centre.
    pub center_bias: f32,
    pub seed_radius: u32,
    pub bloom_radius: u32,
    /// Manhattan radius of the stick test; `1` is the 4-neighbourhood.
    pub stick_radius: u32,
    pub fade_chunks: u32,
    /// Intensity removed from an unoccupied cell each time its chunk is visited.
    pub fade_step: f32,
    pub warmup_frames: u32,
    pub warmup_multiplier: u32,
    /// Stop growing once the aggregate holds this many particles.
    pub max_aggregate: Option<u32>,
    pub spawn: SpawnStrategy,
    pub ring: RingSettings,
    pub annulus: AnnulusSettings,
    pub adaptive: AdaptiveSettings,
    pub degeneracy: DegeneracySettings,
}

impl Default for DlaSettings {
    fn default() -> Self {
        Self {
            center_bias: 0.0,
            seed_radius: 2,
            bloom_radius: 1,
            stick_radius: 1,
            fade_chunks: 4,
            fade_step: 1.0 / 255.0,
            warmup_frames: 30,
            warmup_multiplier: 12,
            max_aggregate: None,
            spawn: SpawnStrategy::Uniform,
            ring: RingSettings::default(),
            annulus: AnnulusSettings::default(),
            adaptive: AdaptiveSettings::default(),
            degeneracy: DegeneracySettings::default(),
        }
    }
}

/// Initial placement of slime agents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SlimeSpawn {
    Uniform,
    #[default]
    Center,
}

/// Physarum knobs in fixed-point units: milliradians, millipixels, and
/// thousandths of full intensity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SlimeSettings {
    pub sensor_angle_mrad: u32,
    pub sensor_distance: u32,
    pub turn_angle_mrad: u32,
    pub move_speed_mpx: u32,
    pub deposit_milli: u32,
    pub decay_milli: u32,
    /// Blend factor between a cell and its 3x3 mean.
    pub diffuse: f32,
    pub spawn_mode: SlimeSpawn,
    pub spawn_radius_frac: f32,
}

impl SlimeSettings {
    fn desktop() -> Self {
        Self {
            sensor_angle_mrad: 785,
            sensor_distance: 20,
            turn_angle_mrad: 600,
            move_speed_mpx: 100,
            deposit_milli: 120,
            decay_milli: 20,
            diffuse: 0.25,
            spawn_mode: SlimeSpawn::Center,
            spawn_radius_frac: 0.03,
        }
    }

    fn mobile() -> Self {
        Self {
            sensor_distance: 15,
            deposit_milli: 150,
            decay_milli: 15,
            ..Self::desktop()
        }
    }

    /// Converts the fixed-point values into the float units the kernels use.
    #[must_use]
    pub fn params(&self) -> SlimeParams {
        SlimeParams {
            sensor_angle: self.sensor_angle_mrad as f32 / 1000.0,
            sensor_distance: self.sensor_distance as f32,
            turn_angle: self.turn_angle_mrad as f32 / 1000.0,
            move_speed: self.move_speed_mpx as f32 / 1000.0,
            deposit: self.deposit_milli as f32 / 1000.0,
            decay: self.decay_milli as f32 / 1000.0,
            diffuse: self.diffuse,
        }
    }
}

impl Default for SlimeSettings {
    fn default() -> Self {
        Self::desktop()
    }
}

/// Float view of [`SlimeSettings`], rebuilt every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlimeParams {
    pub sensor_angle: f32,
    pub sensor_distance: f32,
    pub turn_angle: f32,
    pub move_speed: f32,
    pub deposit: f32,
    pub decay: f32,
    pub diffuse: f32,
}

/// Full configuration for one backdrop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub algorithm: Algorithm,
    /// Layer opacity in `[0, 1]`.
    pub opacity: f32,
    /// Upper bound applied to the device pixel ratio when sizing the grid.
    pub device_pixel_ratio_cap: f32,
    /// Grid dimensions are rounded up to a multiple of this.
    pub grid_align: u32,
    /// DLA walkers or slime agents.
    pub walkers: u32,
    pub steps_per_frame: u32,
    /// Threads per GPU workgroup for walker and agent dispatches.
    pub workgroup_size: u32,
    pub rng_seed: Option<u64>,
    pub invariants: InvariantMode,
    pub dla: DlaSettings,
    pub slime: SlimeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_device(DeviceClass::Desktop)
    }
}

impl Settings {
    /// Defaults tuned for the given device class.
    #[must_use]
    pub fn for_device(class: DeviceClass) -> Self {
        let mobile = class == DeviceClass::Mobile;
        Self {
            algorithm: Algorithm::Dla,
            opacity: 1.0,
            device_pixel_ratio_cap: if mobile { 0.35 } else { 0.5 },
            grid_align: 32,
            walkers: if mobile { 100 } else { 200 },
            steps_per_frame: if mobile { 2 } else { 4 },
            workgroup_size: 64,
            rng_seed: None,
            invariants: InvariantMode::default(),
            dla: DlaSettings::default(),
            slime: if mobile {
                SlimeSettings::mobile()
            } else {
                SlimeSettings::desktop()
            },
        }
    }

    /// Clamp and store a new opacity.
    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = if opacity.is_nan() {
            0.0
        } else {
            opacity.clamp(0.0, 1.0)
        };
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_align == 0 {
            return Err(ConfigError::Invalid("grid_align must be non-zero"));
        }
        if self.walkers == 0 {
            return Err(ConfigError::Invalid("walkers must be non-zero"));
        }
        if self.workgroup_size == 0 {
            return Err(ConfigError::Invalid("workgroup_size must be non-zero"));
        }
        if self.device_pixel_ratio_cap.is_nan() || self.device_pixel_ratio_cap <= 0.0 {
            return Err(ConfigError::Invalid(
                "device_pixel_ratio_cap must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(ConfigError::Invalid("opacity must be within [0, 1]"));
        }
        self.validate_dla()?;
        self.validate_slime()
    }

    fn validate_dla(&self) -> Result<(), ConfigError> {
        let dla = &self.dla;
        if !(0.0..=1.0).contains(&dla.center_bias) {
            return Err(ConfigError::Invalid("dla.center_bias must be within [0, 1]"));
        }
        if dla.stick_radius == 0 {
            return Err(ConfigError::Invalid("dla.stick_radius must be at least 1"));
        }
        if dla.fade_chunks == 0 {
            return Err(ConfigError::Invalid("dla.fade_chunks must be non-zero"));
        }
        if !(0.0..=1.0).contains(&dla.fade_step) {
            return Err(ConfigError::Invalid("dla.fade_step must be within [0, 1]"));
        }
        if dla.warmup_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "dla.warmup_multiplier must be non-zero",
            ));
        }
        if dla.ring.angle_buckets == 0 {
            return Err(ConfigError::Invalid(
                "dla.ring.angle_buckets must be non-zero",
            ));
        }
        let factor = dla.adaptive.slowdown_factor;
        if factor.is_nan() || factor <= 0.0 || factor > 1.0 {
            return Err(ConfigError::Invalid(
                "dla.adaptive.slowdown_factor must be within (0, 1]",
            ));
        }
        let mask = dla.annulus.refresh_mask;
        if mask.wrapping_add(1) & mask != 0 {
            return Err(ConfigError::Invalid(
                "dla.annulus.refresh_mask must be one less than a power of two",
            ));
        }
        if dla.degeneracy.check_interval_frames == 0 {
            return Err(ConfigError::Invalid(
                "dla.degeneracy.check_interval_frames must be non-zero",
            ));
        }
        Ok(())
    }

    fn validate_slime(&self) -> Result<(), ConfigError> {
        let slime = &self.slime;
        if !(0.0..=1.0).contains(&slime.diffuse) {
            return Err(ConfigError::Invalid("slime.diffuse must be within [0, 1]"));
        }
        if slime.decay_milli >= 1000 {
            return Err(ConfigError::Invalid("slime.decay_milli must be below 1000"));
        }
        if !(0.0..=0.5).contains(&slime.spawn_radius_frac) {
            return Err(ConfigError::Invalid(
                "slime.spawn_radius_frac must be within [0, 0.5]",
            ));
        }
        Ok(())
    }

    /// Workload actually run on a tier; the canvas tier carries half the load.
    #[must_use]
    pub fn scaled_for(&self, tier: Tier) -> Self {
        let mut scaled = self.clone();
        if tier == Tier::Canvas2d {
            scaled.walkers = (self.walkers / 2).max(1);
            scaled.steps_per_frame = (self.steps_per_frame / 2).max(1);
        }
        scaled
    }

    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        SmallRng::seed_from_u64(self.rng_seed.unwrap_or(DEFAULT_RNG_SEED))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mobile_defaults_are_lighter() {
        let desktop = Settings::for_device(DeviceClass::Desktop);
        let mobile = Settings::for_device(DeviceClass::Mobile);
        assert_eq!(desktop.walkers, 200);
        assert_eq!(mobile.walkers, 100);
        assert_eq!(desktop.steps_per_frame, 4);
        assert_eq!(mobile.steps_per_frame, 2);
        assert!(mobile.device_pixel_ratio_cap < desktop.device_pixel_ratio_cap);
        assert_eq!(mobile.slime.sensor_distance, 15);
        assert_eq!(mobile.slime.deposit_milli, 150);
        assert_eq!(mobile.slime.decay_milli, 15);
        assert_eq!(mobile.slime.sensor_angle_mrad, desktop.slime.sensor_angle_mrad);
        desktop.validate().expect("desktop defaults");
        mobile.validate().expect("mobile defaults");
    }

    #[test]
    fn classify_uses_width_then_agent() {
        assert_eq!(DeviceClass::classify(500.0, None), DeviceClass::Mobile);
        assert_eq!(DeviceClass::classify(1280.0, None), DeviceClass::Desktop);
        let ios = "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X)";
        assert_eq!(DeviceClass::classify(1280.0, Some(ios)), DeviceClass::Mobile);
        let linux = "Mozilla/5.0 (X11; Linux x86_64) Firefox/130.0";
        assert_eq!(
            DeviceClass::classify(1280.0, Some(linux)),
            DeviceClass::Desktop
        );
    }

    #[test]
    fn opacity_is_clamped() {
        let mut settings = Settings::default();
        settings.set_opacity(1.7);
        assert_eq!(settings.opacity, 1.0);
        settings.set_opacity(-0.2);
        assert_eq!(settings.opacity, 0.0);
        settings.set_opacity(f32::NAN);
        assert_eq!(settings.opacity, 0.0);
        settings.set_opacity(0.4);
        assert!((settings.opacity - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn slime_params_convert_fixed_point() {
        let params = SlimeSettings::default().params();
        assert!((params.sensor_angle - 0.785).abs() < 1e-6);
        assert!((params.turn_angle - 0.6).abs() < 1e-6);
        assert!((params.move_speed - 0.1).abs() < 1e-6);
        assert!((params.deposit - 0.12).abs() < 1e-6);
        assert!((params.decay - 0.02).abs() < 1e-6);
        assert_eq!(params.sensor_distance, 20.0);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad_align = Settings {
            grid_align: 0,
            ..Settings::default()
        };
        assert!(bad_align.validate().is_err());

        let mut bad_mask = Settings::default();
        bad_mask.dla.annulus.refresh_mask = 30;
        assert!(bad_mask.validate().is_err());

        let mut bad_decay = Settings::default();
        bad_decay.slime.decay_milli = 1000;
        assert!(bad_decay.validate().is_err());

        let mut bad_bias = Settings::default();
        bad_bias.dla.center_bias = 1.5;
        assert!(bad_bias.validate().is_err());
    }

    #[test]
    fn canvas_tier_halves_workload() {
        let settings = Settings::default();
        let canvas = settings.scaled_for(Tier::Canvas2d);
        assert_eq!(canvas.walkers, 100);
        assert_eq!(canvas.steps_per_frame, 2);
        let gpu = settings.scaled_for(Tier::GpuCompute);
        assert_eq!(gpu.walkers, settings.walkers);

        let tiny = Settings {
            walkers: 1,
            steps_per_frame: 1,
            ..Settings::default()
        };
        let scaled = tiny.scaled_for(Tier::Canvas2d);
        assert_eq!(scaled.walkers, 1);
        assert_eq!(scaled.steps_per_frame, 1);
    }

    #[test]
    fn algorithm_parses_aliases() {
        assert_eq!("DLA".parse::<Algorithm>(), Ok(Algorithm::Dla));
        assert_eq!("physarum".parse::<Algorithm>(), Ok(Algorithm::Slime));
        assert!("voronoi".parse::<Algorithm>().is_err());
    }
}
