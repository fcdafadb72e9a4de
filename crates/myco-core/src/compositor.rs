//! Maps simulation intensity to theme-coloured pixels.
//!
//! The compositor is the only place that knows about colour. Engines hand it
//! a [`Field`] (CPU tiers) or read its [`CompositeUniform`] (GPU tier); both
//! paths use the same alpha mapping so tiers look alike.

use serde::{Deserialize, Serialize};

use crate::error::InvariantViolation;
use crate::field::Field;
use crate::grid::GridSpec;
use crate::settings::Settings;

/// How intensity becomes alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlphaMapping {
    /// Any nonzero intensity is fully opaque.
    Step,
    /// Alpha equals intensity.
    Linear,
}

impl AlphaMapping {
    #[must_use]
    pub fn alpha(self, intensity: f32) -> f32 {
        match self {
            Self::Step => {
                if intensity > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Linear => intensity.clamp(0.0, 1.0),
        }
    }

    /// Flag value read by the composite fragment shader.
    #[must_use]
    pub const fn shader_flag(self) -> u32 {
        match self {
            Self::Step => 0,
            Self::Linear => 1,
        }
    }
}

/// Straight (non-premultiplied) RGBA in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThemeColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Default for ThemeColor {
    fn default() -> Self {
        Self::WHITE
    }
}

impl ThemeColor {
    pub const WHITE: Self = Self {
        r: 1.0,
        g: 1.0,
        b: 1.0,
        a: 1.0,
    };

    #[must_use]
    pub const fn rgb8(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
            a: 1.0,
        }
    }

    /// Parses a CSS colour token: `#rgb`, `#rrggbb`, `rgb(...)` or `rgba(...)`.
    ///
    /// An empty token means the theme variable is missing, which is an
    /// invariant violation. Any other unrecognised token falls back to white.
    pub fn parse(token: &str) -> Result<Self, InvariantViolation> {
        let token = token.trim();
        if token.is_empty() {
            return Err(InvariantViolation::MissingThemeColor);
        }
        Ok(parse_hex(token)
            .or_else(|| parse_rgb_function(token))
            .unwrap_or(Self::WHITE))
    }

    /// The colour as straight RGBA bytes.
    #[must_use]
    pub fn to_rgba8(self) -> [u8; 4] {
        [
            unit_to_byte(self.r),
            unit_to_byte(self.g),
            unit_to_byte(self.b),
            unit_to_byte(self.a),
        ]
    }
}

fn unit_to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn parse_hex(token: &str) -> Option<ThemeColor> {
    let hex = token.strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..=i], 16).ok();
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => Some(ThemeColor::rgb8(
            nibble(0)? * 17,
            nibble(1)? * 17,
            nibble(2)? * 17,
        )),
        6 => Some(ThemeColor::rgb8(byte(0)?, byte(2)?, byte(4)?)),
        _ => None,
    }
}

fn parse_rgb_function(token: &str) -> Option<ThemeColor> {
    let lower = token.to_ascii_lowercase();
    let inner = lower
        .strip_prefix("rgba(")
        .or_else(|| lower.strip_prefix("rgb("))?
        .strip_suffix(')')?;
    let parts: Vec<f32> = inner
        .split([',', '/', ' '])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<f32>().ok())
        .collect::<Option<_>>()?;
    let [r, g, b, rest @ ..] = parts.as_slice() else {
        return None;
    };
    let a = rest.first().copied().unwrap_or(1.0);
    Some(ThemeColor {
        r: (r / 255.0).clamp(0.0, 1.0),
        g: (g / 255.0).clamp(0.0, 1.0),
        b: (b / 255.0).clamp(0.0, 1.0),
        a: a.clamp(0.0, 1.0),
    })
}

/// RGBA8 raster matching the grid, ready for a 2D canvas `ImageData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    #[must_use]
    pub fn new(grid: GridSpec) -> Self {
        Self {
            width: grid.width(),
            height: grid.height(),
            data: vec![0; grid.cells() * 4],
        }
    }

    /// Wraps tightly packed RGBA8 rows read back from a device.
    pub fn from_rgba8(grid: GridSpec, data: Vec<u8>) -> Result<Self, InvariantViolation> {
        if data.len() != grid.cells() * 4 {
            return Err(InvariantViolation::BufferSizeMismatch {
                width: grid.width(),
                height: grid.height(),
                expected: grid.cells(),
                actual: data.len() / 4,
            });
        }
        Ok(Self {
            width: grid.width(),
            height: grid.height(),
            data,
        })
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
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + x as usize) * 4;
        self.data.get(i..i + 4)?.try_into().ok()
    }

    /// Pixels with nonzero alpha.
    #[must_use]
    pub fn visible_count(&self) -> usize {
        self.data.chunks_exact(4).filter(|px| px[3] > 0).count()
    }
}

/// Uniform block consumed by the GPU composite pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeUniform {
    /// Premultiplied theme colour with opacity folded in.
    pub color: [f32; 4],
    pub mapping: u32,
}

/// Theme colour, opacity and alpha mapping for one backdrop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compositor {
    color: ThemeColor,
    opacity: f32,
    mapping: AlphaMapping,
}

impl Compositor {
    #[must_use]
    pub fn new(color: ThemeColor, opacity: f32, mapping: AlphaMapping) -> Self {
        let mut compositor = Self {
            color,
            opacity: 1.0,
            mapping,
        };
        compositor.set_opacity(opacity);
        compositor
    }

    #[must_use]
    pub fn for_settings(settings: &Settings, color: ThemeColor) -> Self {
        Self::new(color, settings.opacity, settings.algorithm.alpha_mapping())
    }

    #[must_use]
    pub const fn color(&self) -> ThemeColor {
        self.color
    }

    #[must_use]
    pub const fn opacity(&self) -> f32 {
        self.opacity
    }

    #[must_use]
    pub const fn mapping(&self) -> AlphaMapping {
        self.mapping
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = if opacity.is_nan() {
            0.0
        } else {
            opacity.clamp(0.0, 1.0)
        };
    }

    pub fn set_mapping(&mut self, mapping: AlphaMapping) {
        self.mapping = mapping;
    }

    /// Final alpha for a cell intensity.
    #[must_use]
    pub fn alpha(&self, intensity: f32) -> f32 {
        self.mapping.alpha(intensity) * self.opacity * self.color.a
    }

    /// Writes straight RGBA for every cell; zero-alpha cells are fully
    /// transparent black.
    pub fn paint(&self, field: &Field, pixels: &mut PixelBuffer) -> Result<(), InvariantViolation> {
        field.check_len()?;
        if pixels.data.len() != field.cells().len() * 4 {
            let grid = field.grid();
            return Err(InvariantViolation::BufferSizeMismatch {
                width: grid.width(),
                height: grid.height(),
                expected: grid.cells(),
                actual: pixels.data.len() / 4,
            });
        }
        let [r, g, b, _] = self.color.to_rgba8();
        for (px, &intensity) in pixels.data.chunks_exact_mut(4).zip(field.cells()) {
            let alpha = unit_to_byte(self.alpha(intensity));
            if alpha == 0 {
                px.copy_from_slice(&[0, 0, 0, 0]);
            } else {
                px.copy_from_slice(&[r, g, b, alpha]);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn uniform(&self) -> CompositeUniform {
        let a = self.color.a * self.opacity;
        CompositeUniform {
            color: [self.color.r * a, self.color.g * a, self.color.b * a, a],
            mapping: self.mapping.shader_flag(),
        }
    }
}

/// Presentation rules for the background layer element.
///
/// The layer fills the viewport behind page content, is hidden from assistive
/// technology and never receives pointer events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerStyle;

impl LayerStyle {
    pub const DECLARATIONS: [(&'static str, &'static str); 9] = [
        ("position", "fixed"),
        ("inset", "0"),
        ("width", "100vw"),
        ("height", "100vh"),
        ("z-index", "0"),
        ("pointer-events", "none"),
        ("user-select", "none"),
        ("image-rendering", "pixelated"),
        ("background", "transparent"),
    ];

    pub const ARIA_HIDDEN: (&'static str, &'static str) = ("aria-hidden", "true");

    /// Inline style string for hosts that set `style` wholesale.
    #[must_use]
    pub fn css() -> String {
        Self::DECLARATIONS
            .iter()
            .map(|(k, v)| format!("{k}:{v};"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_tokens() {
        assert_eq!(
            ThemeColor::parse("#454545").expect("hex"),
            ThemeColor::rgb8(0x45, 0x45, 0x45)
        );
        assert_eq!(
            ThemeColor::parse("  #fff ").expect("short hex"),
            ThemeColor::WHITE
        );
        let rgba = ThemeColor::parse("rgba(255, 0, 51, 0.5)").expect("rgba");
        assert_eq!(rgba.r, 1.0);
        assert_eq!(rgba.g, 0.0);
        assert!((rgba.b - 0.2).abs() < 1e-6);
        assert!((rgba.a - 0.5).abs() < 1e-6);
        let spaced = ThemeColor::parse("rgb(10 20 30)").expect("space separated");
        assert_eq!(spaced.to_rgba8(), [10, 20, 30, 255]);
    }

    #[test]
    fn unknown_tokens_fall_back_to_white_and_empty_is_fatal() {
        assert_eq!(ThemeColor::parse("hsl(1, 2%, 3%)"), Ok(ThemeColor::WHITE));
        assert_eq!(ThemeColor::parse("#12"), Ok(ThemeColor::WHITE));
        assert_eq!(
            ThemeColor::parse("   "),
            Err(InvariantViolation::MissingThemeColor)
        );
    }

    #[test]
    fn step_and_linear_mapping() {
        assert_eq!(AlphaMapping::Step.alpha(0.0), 0.0);
        assert_eq!(AlphaMapping::Step.alpha(0.004), 1.0);
        assert_eq!(AlphaMapping::Linear.alpha(0.25), 0.25);
        assert_eq!(AlphaMapping::Linear.alpha(3.0), 1.0);
    }

    #[test]
    fn paint_applies_color_and_opacity() {
        let grid = GridSpec::new(2, 1).expect("grid");
        let mut field = Field::new(grid);
        field.put(0, 0, 0.5);
        let mut pixels = PixelBuffer::new(grid);

        let step = Compositor::new(ThemeColor::rgb8(69, 69, 69), 0.5, AlphaMapping::Step);
        step.paint(&field, &mut pixels).expect("paint");
        assert_eq!(pixels.pixel(0, 0), Some([69, 69, 69, 128]));
        assert_eq!(pixels.pixel(1, 0), Some([0, 0, 0, 0]));

        let linear = Compositor::new(ThemeColor::WHITE, 1.0, AlphaMapping::Linear);
        linear.paint(&field, &mut pixels).expect("paint");
        assert_eq!(pixels.pixel(0, 0), Some([255, 255, 255, 128]));
        assert_eq!(pixels.visible_count(), 1);
    }

    #[test]
    fn paint_rejects_mismatched_raster() {
        let field = Field::new(GridSpec::new(4, 4).expect("grid"));
        let mut pixels = PixelBuffer::new(GridSpec::new(2, 2).expect("grid"));
        let compositor = Compositor::new(ThemeColor::WHITE, 1.0, AlphaMapping::Step);
        assert!(compositor.paint(&field, &mut pixels).is_err());
    }

    #[test]
    fn uniform_is_premultiplied() {
        let compositor = Compositor::new(
            ThemeColor {
                r: 1.0,
                g: 0.5,
                b: 0.0,
                a: 1.0,
            },
            0.5,
            AlphaMapping::Linear,
        );
        let u = compositor.uniform();
        assert_eq!(u.color, [0.5, 0.25, 0.0, 0.5]);
        assert_eq!(u.mapping, 1);
    }

    #[test]
    fn layer_never_takes_input() {
        let css = LayerStyle::css();
        assert!(css.contains("pointer-events:none;"));
        assert!(css.contains("position:fixed;"));
        assert!(css.contains("z-index:0;"));
    }
}
