//! Color model: HSV/RGB values, gamma encoding and PWM duty quantization.
//!
//! Pure value-level conversions. Hue is in degrees and wraps modulo 360;
//! saturation, value and RGB components live in `[0, 1]` and are clamped on
//! construction, so every function here is total.

use std::fmt;

use palette::{FromColor, RgbHue};
use serde::{Deserialize, Serialize};

/// Highest duty code of the 12-bit PWM counter.
pub const MAX_DUTY: u16 = 4095;

/// Gamma exponent used for stripes that don't specify their own.
pub const DEFAULT_GAMMA: f64 = 2.8;

type PaletteHsv = palette::Hsv<palette::encoding::Srgb, f64>;
type PaletteRgb = palette::Srgb<f64>;

fn unit(x: f64) -> f64 {
    if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.0 }
}

fn wrap_hue(h: f64) -> f64 {
    if !h.is_finite() {
        return 0.0;
    }
    let h = h.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if h >= 360.0 { 0.0 } else { h }
}

// ── HSV ──

/// Logical stripe color. `h` in degrees `[0, 360)`, `s` and `v` in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hsv {
    pub h: f64,
    pub s: f64,
    pub v: f64,
}

impl Hsv {
    /// Normalizing constructor: wraps hue, clamps saturation and value.
    pub fn new(h: f64, s: f64, v: f64) -> Self {
        Hsv {
            h: wrap_hue(h),
            s: unit(s),
            v: unit(v),
        }
    }

    /// Re-apply the normalization, e.g. after deserializing client input.
    pub fn normalized(self) -> Self {
        Hsv::new(self.h, self.s, self.v)
    }

    pub fn black() -> Self {
        Hsv::new(0.0, 0.0, 0.0)
    }

    pub fn to_rgb(self) -> Rgb {
        let n = self.normalized();
        let hsv = PaletteHsv::new(RgbHue::from_degrees(n.h), n.s, n.v);
        let rgb = PaletteRgb::from_color(hsv);
        Rgb::new(rgb.red, rgb.green, rgb.blue)
    }
}

impl Default for Hsv {
    fn default() -> Self {
        Hsv::black()
    }
}

// ── RGB ──

/// Linear-in-duty RGB triple, components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    /// Clamping constructor. Out-of-range components are clamped, not rejected.
    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Rgb {
            r: unit(r),
            g: unit(g),
            b: unit(b),
        }
    }

    pub fn to_hsv(self) -> Hsv {
        let rgb = PaletteRgb::new(unit(self.r), unit(self.g), unit(self.b));
        let hsv = PaletteHsv::from_color(rgb);
        Hsv::new(hsv.hue.into_positive_degrees(), hsv.saturation, hsv.value)
    }

    /// Components in R, G, B order.
    pub fn components(self) -> [f64; 3] {
        [self.r, self.g, self.b]
    }
}

impl fmt::Display for Rgb {
    /// `#RRGGBB`, 8 bits per component.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let byte = |x: f64| (unit(x) * 255.0).round() as u8;
        write!(f, "#{:02X}{:02X}{:02X}", byte(self.r), byte(self.g), byte(self.b))
    }
}

// ── Gamma / duty ──

/// Logical value → duty code: `round(v^gamma * 4095)`.
///
/// `v` is clamped to `[0, 1]`. A non-positive or non-finite gamma falls back
/// to linear.
pub fn encode(value: f64, gamma: f64) -> u16 {
    let gamma = if gamma.is_finite() && gamma > 0.0 { gamma } else { 1.0 };
    let code = (unit(value).powf(gamma) * f64::from(MAX_DUTY)).round();
    code.clamp(0.0, f64::from(MAX_DUTY)) as u16
}

/// Duty code → logical value: `(code / 4095)^(1 / gamma)`.
pub fn decode(code: u16, gamma: f64) -> f64 {
    let gamma = if gamma.is_finite() && gamma > 0.0 { gamma } else { 1.0 };
    let duty = f64::from(code.min(MAX_DUTY)) / f64::from(MAX_DUTY);
    duty.powf(1.0 / gamma)
}
