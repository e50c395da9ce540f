//! Register map and timing constants for the PCA9685 16-channel PWM driver.
//!
//! Every channel owns four consecutive registers starting at `LED0_ON_L`:
//! `ON_L, ON_H, OFF_L, OFF_H`. The 12-bit ON/OFF counts are written as
//! little-endian SMBus words, which relies on MODE1 auto-increment.

use std::time::Duration;

// ── Mode and configuration registers ──

pub const MODE1: u8 = 0x00;
pub const PRESCALE: u8 = 0xFE;

/// MODE1 bit: restart enabled.
pub const MODE1_RESTART: u8 = 0x80;
/// MODE1 bit: register auto-increment (needed for word writes).
pub const MODE1_AI: u8 = 0x20;
/// MODE1 bit: low power mode, oscillator off. PRESCALE is only writable while set.
pub const MODE1_SLEEP: u8 = 0x10;
/// MODE1 bit: respond to the LED All Call address.
pub const MODE1_ALLCALL: u8 = 0x01;

/// MODE1 value for normal operation.
pub const MODE1_NORMAL: u8 = MODE1_AI | MODE1_ALLCALL;

// ── Channel registers ──

pub const LED0_ON_L: u8 = 0x06;
pub const LED0_OFF_L: u8 = 0x08;

/// Register stride between consecutive channels.
pub const CHANNEL_STRIDE: u8 = 4;

pub const ALL_LED_ON_L: u8 = 0xFA;
pub const ALL_LED_OFF_L: u8 = 0xFC;

/// OFF_H bit 4: channel fully off. Not part of the duty code.
pub const FULL_OFF_MASK: u16 = 0x1000;
/// Mask selecting the 12-bit count from an ON/OFF register pair.
pub const COUNT_MASK: u16 = 0x0FFF;

/// Highest number of channels a single chip provides.
pub const MAX_CHANNELS: u8 = 16;

// ── Frequency ──

/// Internal oscillator frequency.
pub const OSC_CLOCK_HZ: f64 = 25_000_000.0;

/// Lowest PWM frequency reachable with prescale 255.
pub const MIN_FREQUENCY: u16 = 24;

/// Highest PWM frequency reachable with prescale 3. Also the power-on default.
pub const MAX_FREQUENCY: u16 = 1526;

/// Oscillator settle time after leaving sleep mode.
pub const SETTLE_DELAY: Duration = Duration::from_millis(15);

/// Highest valid 7-bit bus address.
pub const MAX_ADDRESS: u8 = 0x7F;

/// OFF_L register of `channel`.
pub fn off_register(channel: u8) -> u8 {
    LED0_OFF_L + CHANNEL_STRIDE * channel
}

/// ON_L register of `channel`.
pub fn on_register(channel: u8) -> u8 {
    LED0_ON_L + CHANNEL_STRIDE * channel
}

/// Prescale value for `hz`: `round(osc / (4096 * hz)) - 1`.
///
/// Callers validate the range first; the result is clamped to the chip's
/// accepted prescale range `3..=255` regardless.
pub fn prescale_for(hz: u16) -> u8 {
    let raw = (OSC_CLOCK_HZ / (4096.0 * f64::from(hz))).round() - 1.0;
    raw.clamp(3.0, 255.0) as u8
}
