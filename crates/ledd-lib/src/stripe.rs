//! LED stripe: three channels of one controller driven as an RGB unit.

use crate::color::{Hsv, Rgb};
use crate::controller::{Controller, ControllerId};
use crate::error::{LeddError, Result};
use crate::store::StripeRecord;

pub type StripeId = u64;

/// Red, green and blue channel indices on the owning controller.
pub type ChannelMap = [u8; 3];

/// Per-channel gamma exponents, R/G/B order.
pub type GammaMap = [f64; 3];

#[derive(Debug, Clone)]
pub struct Stripe {
    id: StripeId,
    controller_id: ControllerId,
    name: String,
    rgb: bool,
    channels: ChannelMap,
    gamma: GammaMap,
    color: Hsv,
}

fn validate(controller: &Controller, channels: &ChannelMap, gamma: &GammaMap) -> Result<()> {
    for (i, ch) in channels.iter().enumerate() {
        if *ch >= controller.channels() {
            return Err(LeddError::Range(format!(
                "channel {ch} (controller {} has {} channels)",
                controller.id(),
                controller.channels()
            )));
        }
        if channels[..i].contains(ch) {
            return Err(LeddError::Validation(format!(
                "Channel {ch} mapped more than once"
            )));
        }
    }
    if let Some(g) = gamma.iter().find(|g| !(g.is_finite() && **g > 0.0)) {
        return Err(LeddError::Validation(format!("Invalid gamma {g}")));
    }
    Ok(())
}

impl Stripe {
    /// Define a new stripe on `controller` and seed its color from hardware.
    ///
    /// The id is assigned later by the store.
    pub fn create(
        controller: &mut Controller,
        name: impl Into<String>,
        rgb: bool,
        channels: ChannelMap,
        gamma: GammaMap,
    ) -> Result<Self> {
        validate(controller, &channels, &gamma)?;
        let mut stripe = Stripe {
            id: 0,
            controller_id: controller.id(),
            name: name.into(),
            rgb,
            channels,
            gamma,
            color: Hsv::black(),
        };
        stripe.seed(controller);
        Ok(stripe)
    }

    /// Rebuild from a persisted record, seeding the color from hardware.
    pub fn restore(record: &StripeRecord, controller: &mut Controller) -> Result<Self> {
        validate(controller, &record.channels, &record.gamma)?;
        let id = record
            .id
            .ok_or_else(|| LeddError::Store("stripe record without id".into()))?;
        let mut stripe = Stripe {
            id,
            controller_id: controller.id(),
            name: record.name.clone(),
            rgb: record.rgb,
            channels: record.channels,
            gamma: record.gamma,
            color: Hsv::black(),
        };
        stripe.seed(controller);
        Ok(stripe)
    }

    fn seed(&mut self, controller: &mut Controller) {
        if let Err(e) = self.bootstrap_color(controller) {
            log::warn!("stripe '{}': read-back failed, starting black: {e}", self.name);
        }
    }

    pub fn id(&self) -> StripeId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: StripeId) {
        self.id = id;
    }

    pub fn controller_id(&self) -> ControllerId {
        self.controller_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_rgb(&self) -> bool {
        self.rgb
    }

    pub fn channels(&self) -> ChannelMap {
        self.channels
    }

    pub fn gamma(&self) -> GammaMap {
        self.gamma
    }

    /// Last color set. Never touches hardware.
    pub fn color(&self) -> Hsv {
        self.color
    }

    /// Cache `color` and write it out, one channel at a time.
    ///
    /// Every channel is attempted; the first fault is returned and the cache
    /// keeps the new color.
    pub fn set_color(&mut self, controller: &mut Controller, color: Hsv) -> Result<()> {
        self.color = color.normalized();
        let rgb = self.color.to_rgb();
        let mut first_err = None;
        for ((ch, gamma), value) in self.channels.iter().zip(self.gamma).zip(rgb.components()) {
            if let Err(e) = controller.set_channel(*ch, value, gamma) {
                first_err.get_or_insert(e);
            }
        }
        log::debug!("stripe {} '{}' <- {rgb}", self.id, self.name);
        first_err.map_or(Ok(()), Err)
    }

    /// Replace the cached color with what the hardware currently shows.
    pub fn bootstrap_color(&mut self, controller: &mut Controller) -> Result<()> {
        let mut logical = [0.0; 3];
        for (slot, (ch, gamma)) in logical.iter_mut().zip(self.channels.iter().zip(self.gamma)) {
            let duty = controller.get_channel(*ch)?;
            *slot = duty.powf(1.0 / gamma);
        }
        let rgb = Rgb::new(logical[0], logical[1], logical[2]);
        self.color = rgb.to_hsv();
        log::debug!("stripe '{}' read back {rgb}", self.name);
        Ok(())
    }

    pub fn record(&self) -> StripeRecord {
        StripeRecord {
            id: (self.id != 0).then_some(self.id),
            controller_id: self.controller_id,
            name: self.name.clone(),
            rgb: self.rgb,
            channels: self.channels,
            gamma: self.gamma,
        }
    }
}

/// Gamma triple with every channel at `gamma`.
pub fn uniform_gamma(gamma: f64) -> GammaMap {
    [gamma; 3]
}
