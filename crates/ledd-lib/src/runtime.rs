//! Runtime context: everything the control loop mutates.
//!
//! The [`Runtime`] owns the controller/stripe arenas, the running effect
//! stacks, the store and the bus provider. It is moved into the control loop
//! thread and never shared, so none of it needs locking.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::bus::BusProvider;
use crate::color::{DEFAULT_GAMMA, Hsv};
use crate::controller::{Controller, ControllerConfig, ControllerId};
use crate::effect::{Effect, EffectId, EffectStack};
use crate::error::{LeddError, Result};
use crate::registers::MAX_FREQUENCY;
use crate::registry::Registry;
use crate::store::Store;
use crate::stripe::{ChannelMap, GammaMap, Stripe, StripeId, uniform_gamma};

/// Tunables taken from the configuration file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeSettings {
    pub tick_interval: Duration,
    pub default_gamma: f64,
    pub initial_frequency: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        RuntimeSettings {
            tick_interval: Duration::from_millis(100),
            default_gamma: DEFAULT_GAMMA,
            initial_frequency: u32::from(MAX_FREQUENCY),
        }
    }
}

/// Result of [`Runtime::restore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub controllers: usize,
    pub stripes: usize,
    pub skipped: usize,
}

pub struct Runtime {
    registry: Registry,
    effects: BTreeMap<EffectId, EffectStack>,
    next_effect_id: EffectId,
    store: Box<dyn Store>,
    buses: Box<dyn BusProvider>,
    settings: RuntimeSettings,
}

impl Runtime {
    pub fn new(store: Box<dyn Store>, buses: Box<dyn BusProvider>, settings: RuntimeSettings) -> Self {
        Runtime {
            registry: Registry::new(),
            effects: BTreeMap::new(),
            next_effect_id: 1,
            store,
            buses,
            settings,
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Rebuild controllers and stripes from the store.
    ///
    /// A controller whose bus can't be opened (or whose record is invalid)
    /// is skipped together with its stripes. Store read failures abort.
    pub fn restore(&mut self) -> Result<RestoreSummary> {
        let mut summary = RestoreSummary::default();
        for record in self.store.load_all_controllers()? {
            let bus = match self.buses.open(record.i2c_dev) {
                Ok(bus) => bus,
                Err(e) => {
                    log::warn!("skipping controller {:?}: {e}", record.id);
                    summary.skipped += 1;
                    continue;
                }
            };
            let mut ctrl = match Controller::restore(&record, bus) {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("skipping controller {:?}: {e}", record.id);
                    summary.skipped += 1;
                    continue;
                }
            };
            let mut stripes = Vec::new();
            for srec in self.store.load_stripes_for(ctrl.id())? {
                match Stripe::restore(&srec, &mut ctrl) {
                    Ok(s) => stripes.push(s),
                    Err(e) => log::warn!("skipping stripe {:?} '{}': {e}", srec.id, srec.name),
                }
            }
            self.registry.insert_controller(ctrl);
            summary.controllers += 1;
            for s in stripes {
                self.registry.insert_stripe(s)?;
                summary.stripes += 1;
            }
        }
        log::info!(
            "restored {} controllers, {} stripes ({} skipped)",
            summary.controllers,
            summary.stripes,
            summary.skipped
        );
        Ok(summary)
    }

    // ── Controllers / stripes ──

    /// Open the bus, initialize the chip and persist the definition.
    pub fn add_controller(&mut self, config: ControllerConfig) -> Result<ControllerId> {
        config.validate()?;
        let bus = self.buses.open(config.bus_index)?;
        let mut ctrl = Controller::create(config, bus, self.settings.initial_frequency)?;
        let id = self.store.save_controller(&ctrl.record())?;
        ctrl.set_id(id);
        self.registry.insert_controller(ctrl);
        log::info!(
            "added controller {id} (i2c-{} 0x{:02X})",
            config.bus_index,
            config.address
        );
        Ok(id)
    }

    /// Define a stripe on controller `cid`. `gamma` defaults to the
    /// configured gamma on every channel.
    pub fn add_stripe(
        &mut self,
        cid: ControllerId,
        name: &str,
        rgb: bool,
        channels: ChannelMap,
        gamma: Option<GammaMap>,
    ) -> Result<StripeId> {
        let gamma = gamma.unwrap_or_else(|| uniform_gamma(self.settings.default_gamma));
        let ctrl = self.registry.controller_mut(cid)?;
        let mut stripe = Stripe::create(ctrl, name, rgb, channels, gamma)?;
        let sid = self.store.save_stripe(&stripe.record())?;
        stripe.set_id(sid);
        self.registry.insert_stripe(stripe)?;
        log::info!("added stripe {sid} '{name}' on controller {cid} channels {channels:?}");
        Ok(sid)
    }

    pub fn set_color(&mut self, sid: StripeId, color: Hsv) -> Result<()> {
        self.registry.set_stripe_color(sid, color)
    }

    pub fn color(&self, sid: StripeId) -> Result<Hsv> {
        Ok(self.registry.stripe(sid)?.color())
    }

    /// Single channel write at the default gamma, bypassing stripes.
    pub fn test_channel(&mut self, cid: ControllerId, channel: u8, value: f64) -> Result<()> {
        let gamma = self.settings.default_gamma;
        self.registry.controller_mut(cid)?.set_channel(channel, value, gamma)
    }

    /// Broadcast `value` to every channel of `cid`. Stripe caches are left
    /// alone.
    pub fn set_all(&mut self, cid: ControllerId, value: f64) -> Result<()> {
        self.registry.controller_mut(cid)?.set_all_channels(value)
    }

    // ── Effects ──

    /// Bind `effect` to `sids` and start it with the first tick due at `now`.
    pub fn start_effect(
        &mut self,
        label: &str,
        effect: Box<dyn Effect>,
        sids: Vec<StripeId>,
        now: Instant,
    ) -> Result<EffectId> {
        if sids.is_empty() {
            return Err(LeddError::Validation("No stripes given".into()));
        }
        if let Some(sid) = sids.iter().find(|sid| !self.registry.contains_stripe(**sid)) {
            log::debug!("start_effect: unknown stripe {sid}");
            return Err(LeddError::NotFound("Stripe".into()));
        }
        let id = self.next_effect_id;
        self.next_effect_id += 1;
        let mut stack = EffectStack::new(id, label, effect, sids, self.settings.tick_interval);
        stack.start(now);
        self.effects.insert(id, stack);
        Ok(id)
    }

    /// Stop and discard a stack.
    pub fn stop_effect(&mut self, id: EffectId) -> Result<()> {
        let mut stack = self
            .effects
            .remove(&id)
            .ok_or_else(|| LeddError::NotFound("Effect".into()))?;
        stack.stop();
        Ok(())
    }

    pub fn effects(&self) -> impl Iterator<Item = &EffectStack> {
        self.effects.values()
    }

    /// Earliest pending tick of any running stack.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.effects.values().filter_map(EffectStack::deadline).min()
    }

    /// Tick every stack whose deadline has passed. Returns how many ticked.
    pub fn run_due_ticks(&mut self, now: Instant) -> usize {
        let mut ticked = 0;
        for stack in self.effects.values_mut() {
            if stack.tick(now, &mut self.registry).is_some() {
                ticked += 1;
            }
        }
        ticked
    }

    /// Stop every effect and release all controllers.
    pub fn shutdown(&mut self) {
        for stack in self.effects.values_mut() {
            stack.stop();
        }
        self.effects.clear();
        let controllers = self.registry.controller_count();
        self.registry.close();
        log::info!("runtime shut down, closed {controllers} controllers");
    }
}
