//! PWM controller: one PCA9685 chip on one I2C bus.
//!
//! A [`Controller`] owns its bus handle exclusively. All register traffic for
//! the chip goes through the methods here; channel indices are validated
//! before any bus access.

use std::thread;

use crate::bus::{DeviceError, I2cBus};
use crate::color;
use crate::error::{LeddError, Result};
use crate::registers::*;
use crate::store::ControllerRecord;
use crate::stripe::StripeId;

pub type ControllerId = u64;

/// Static description of a controller, as requested by a client or loaded
/// from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Bus index, `1` → `/dev/i2c-1`.
    pub bus_index: u8,
    /// 7-bit slave address.
    pub address: u8,
    /// Number of usable channels, `1..=16`.
    pub channels: u8,
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.address > MAX_ADDRESS {
            return Err(LeddError::Range(format!(
                "address 0x{:02X} (valid 0x00..=0x{MAX_ADDRESS:02X})",
                self.address
            )));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(LeddError::Range(format!(
                "channel count {} (valid 1..={MAX_CHANNELS})",
                self.channels
            )));
        }
        Ok(())
    }
}

/// Reject frequencies the prescaler cannot produce.
pub fn check_frequency(hz: u32) -> Result<u16> {
    let range = u32::from(MIN_FREQUENCY)..=u32::from(MAX_FREQUENCY);
    if !range.contains(&hz) {
        return Err(LeddError::Range(format!(
            "frequency {hz} Hz (valid {MIN_FREQUENCY}..={MAX_FREQUENCY})"
        )));
    }
    // In range, so it fits.
    Ok(hz as u16)
}

pub struct Controller {
    id: ControllerId,
    config: ControllerConfig,
    pwm_freq: u16,
    /// Last MODE1 value written (or read at restore).
    mode: u8,
    bus: Box<dyn I2cBus>,
    stripes: Vec<StripeId>,
}

impl Controller {
    /// Bring up a newly added chip: normal mode, then `frequency` written to
    /// the prescaler. The id is assigned later by the store.
    pub fn create(config: ControllerConfig, bus: Box<dyn I2cBus>, frequency: u32) -> Result<Self> {
        config.validate()?;
        let hz = check_frequency(frequency)?;
        let mut ctrl = Controller {
            id: 0,
            config,
            pwm_freq: hz,
            mode: MODE1_NORMAL,
            bus,
            stripes: Vec::new(),
        };
        ctrl.write_mode(MODE1_NORMAL)?;
        ctrl.set_frequency(u32::from(hz))?;
        log::info!(
            "controller on i2c-{} 0x{:02X}: {} channels at {hz} Hz",
            config.bus_index,
            config.address,
            config.channels
        );
        Ok(ctrl)
    }

    /// Rebuild from a persisted record. Writes nothing; the chip is assumed
    /// to still hold the configuration it was left with.
    pub fn restore(record: &ControllerRecord, mut bus: Box<dyn I2cBus>) -> Result<Self> {
        let config = ControllerConfig {
            bus_index: record.i2c_dev,
            address: record.address,
            channels: record.channels,
        };
        config.validate()?;
        let hz = check_frequency(u32::from(record.pwm_freq))?;
        let id = record
            .id
            .ok_or_else(|| LeddError::Store("controller record without id".into()))?;

        let mode = match bus.read_byte(config.address, MODE1) {
            Ok(m) => m,
            Err(e) => {
                log::debug!("controller {id}: MODE1 read failed ({e}), assuming normal mode");
                MODE1_NORMAL
            }
        };

        Ok(Controller {
            id,
            config,
            pwm_freq: hz,
            mode,
            bus,
            stripes: Vec::new(),
        })
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: ControllerId) {
        self.id = id;
    }

    pub fn bus_index(&self) -> u8 {
        self.config.bus_index
    }

    pub fn address(&self) -> u8 {
        self.config.address
    }

    pub fn channels(&self) -> u8 {
        self.config.channels
    }

    pub fn frequency(&self) -> u16 {
        self.pwm_freq
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    /// Owned stripe ids in creation order.
    pub fn stripes(&self) -> &[StripeId] {
        &self.stripes
    }

    pub(crate) fn attach_stripe(&mut self, sid: StripeId) {
        if !self.stripes.contains(&sid) {
            self.stripes.push(sid);
        }
    }

    pub fn record(&self) -> ControllerRecord {
        ControllerRecord {
            id: (self.id != 0).then_some(self.id),
            i2c_dev: self.config.bus_index,
            address: self.config.address,
            channels: self.config.channels,
            pwm_freq: self.pwm_freq,
        }
    }

    fn check_channel(&self, index: u8) -> Result<()> {
        if index >= self.config.channels {
            return Err(LeddError::Range(format!(
                "channel {index} (controller {} has {} channels)",
                self.id, self.config.channels
            )));
        }
        Ok(())
    }

    fn channel_fault(&self, index: u8, e: DeviceError) -> LeddError {
        LeddError::Device(e.context(&format!("controller {} channel {index}", self.id)))
    }

    // ── Channel access ──

    /// Write `value` to one channel: OFF count = `encode(value, gamma)`,
    /// then ON count = 0.
    pub fn set_channel(&mut self, index: u8, value: f64, gamma: f64) -> Result<()> {
        self.check_channel(index)?;
        let code = color::encode(value, gamma);
        let addr = self.config.address;
        self.bus
            .write_word(addr, off_register(index), code)
            .map_err(|e| self.channel_fault(index, e))?;
        self.bus
            .write_word(addr, on_register(index), 0)
            .map_err(|e| self.channel_fault(index, e))?;
        log::trace!("controller {} channel {index} <- {code}", self.id);
        Ok(())
    }

    /// Read back one channel as a linear duty fraction.
    ///
    /// A busy bus reads as 0.0; the caller only uses this to seed caches.
    pub fn get_channel(&mut self, index: u8) -> Result<f64> {
        self.check_channel(index)?;
        let word = match self.bus.read_word(self.config.address, off_register(index)) {
            Ok(w) => w,
            Err(e) if e.is_busy() => {
                log::debug!("controller {} channel {index}: {e}, reading as 0", self.id);
                return Ok(0.0);
            }
            Err(e) => return Err(self.channel_fault(index, e)),
        };
        if word & FULL_OFF_MASK != 0 {
            return Ok(0.0);
        }
        Ok(color::decode(word & COUNT_MASK, 1.0))
    }

    /// Broadcast `value` to every channel through the ALL_LED registers.
    /// No gamma is applied.
    pub fn set_all_channels(&mut self, value: f64) -> Result<()> {
        let code = color::encode(value, 1.0);
        let addr = self.config.address;
        let id = self.id;
        let ctx = |e: DeviceError| LeddError::Device(e.context(&format!("controller {id} all channels")));
        self.bus.write_word(addr, ALL_LED_OFF_L, code).map_err(ctx)?;
        self.bus.write_word(addr, ALL_LED_ON_L, 0).map_err(ctx)?;
        Ok(())
    }

    // ── Mode / frequency ──

    fn write_mode(&mut self, mode: u8) -> Result<()> {
        let id = self.id;
        self.bus
            .write_byte(self.config.address, MODE1, mode)
            .map_err(|e| LeddError::Device(e.context(&format!("controller {id} MODE1"))))?;
        self.mode = mode;
        Ok(())
    }

    fn sleep_mode(&self) -> u8 {
        (self.mode & !MODE1_RESTART) | MODE1_SLEEP
    }

    fn normal_mode(&self) -> u8 {
        (self.mode & !(MODE1_SLEEP | MODE1_RESTART)) | MODE1_AI
    }

    /// Leave sleep mode and block for the oscillator settle time.
    fn wake(&mut self) -> Result<()> {
        self.write_mode(self.normal_mode())?;
        thread::sleep(SETTLE_DELAY);
        Ok(())
    }

    /// Reprogram the PWM frequency. Blocks for at least [`SETTLE_DELAY`].
    pub fn set_frequency(&mut self, hz: u32) -> Result<()> {
        let hz = check_frequency(hz)?;
        let prescale = prescale_for(hz);
        self.write_mode(self.sleep_mode())?;
        let id = self.id;
        self.bus
            .write_byte(self.config.address, PRESCALE, prescale)
            .map_err(|e| LeddError::Device(e.context(&format!("controller {id} PRESCALE"))))?;
        self.wake()?;
        self.pwm_freq = hz;
        log::debug!("controller {id}: {hz} Hz (prescale {prescale})");
        Ok(())
    }

    /// Cycle MODE1 through sleep and back to normal.
    pub fn reset(&mut self) -> Result<()> {
        self.write_mode(self.sleep_mode())?;
        thread::sleep(SETTLE_DELAY);
        self.wake()
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        log::debug!(
            "closing controller {} (i2c-{} 0x{:02X})",
            self.id,
            self.config.bus_index,
            self.config.address
        );
    }
}
