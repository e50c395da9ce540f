use crate::color::Hsv;

use super::Effect;

/// Ticks per full trip around the hue circle.
pub const FADE_STEPS: u32 = 20_000;

/// Full saturation, full value, hue advancing `360 / FADE_STEPS` degrees
/// per tick.
#[derive(Debug, Clone, Default)]
pub struct FadeEffect {
    step: u32,
}

impl FadeEffect {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position in the cycle of the next color.
    pub fn step(&self) -> u32 {
        self.step
    }
}

impl Effect for FadeEffect {
    fn advance(&mut self) -> Hsv {
        let hue = 360.0 * f64::from(self.step) / f64::from(FADE_STEPS);
        self.step = (self.step + 1) % FADE_STEPS;
        Hsv::new(hue, 1.0, 1.0)
    }
}
