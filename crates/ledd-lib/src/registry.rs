//! Id-indexed arenas of controllers and stripes.

use std::collections::BTreeMap;

use crate::color::Hsv;
use crate::controller::{Controller, ControllerId};
use crate::error::{LeddError, Result};
use crate::stripe::{Stripe, StripeId};

#[derive(Default)]
pub struct Registry {
    controllers: BTreeMap<ControllerId, Controller>,
    stripes: BTreeMap<StripeId, Stripe>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_controller(&mut self, controller: Controller) {
        self.controllers.insert(controller.id(), controller);
    }

    /// Add `stripe` and link it into its controller's stripe list.
    pub fn insert_stripe(&mut self, stripe: Stripe) -> Result<()> {
        let ctrl = self
            .controllers
            .get_mut(&stripe.controller_id())
            .ok_or_else(|| LeddError::NotFound("Controller".into()))?;
        ctrl.attach_stripe(stripe.id());
        self.stripes.insert(stripe.id(), stripe);
        Ok(())
    }

    pub fn controller(&self, id: ControllerId) -> Result<&Controller> {
        self.controllers
            .get(&id)
            .ok_or_else(|| LeddError::NotFound("Controller".into()))
    }

    pub fn controller_mut(&mut self, id: ControllerId) -> Result<&mut Controller> {
        self.controllers
            .get_mut(&id)
            .ok_or_else(|| LeddError::NotFound("Controller".into()))
    }

    pub fn stripe(&self, id: StripeId) -> Result<&Stripe> {
        self.stripes
            .get(&id)
            .ok_or_else(|| LeddError::NotFound("Stripe".into()))
    }

    pub fn contains_stripe(&self, id: StripeId) -> bool {
        self.stripes.contains_key(&id)
    }

    /// Controllers in id order.
    pub fn controllers(&self) -> impl Iterator<Item = &Controller> {
        self.controllers.values()
    }

    /// Stripes of `controller`, in the controller's creation order.
    pub fn stripes_of<'a>(&'a self, controller: &'a Controller) -> impl Iterator<Item = &'a Stripe> {
        controller
            .stripes()
            .iter()
            .filter_map(|sid| self.stripes.get(sid))
    }

    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Set a stripe's color through its owning controller.
    pub fn set_stripe_color(&mut self, sid: StripeId, color: Hsv) -> Result<()> {
        let stripe = self
            .stripes
            .get_mut(&sid)
            .ok_or_else(|| LeddError::NotFound("Stripe".into()))?;
        let ctrl = self
            .controllers
            .get_mut(&stripe.controller_id())
            .ok_or_else(|| LeddError::NotFound("Controller".into()))?;
        stripe.set_color(ctrl, color)
    }

    /// Drop every controller, releasing the bus handles.
    pub fn close(&mut self) {
        self.stripes.clear();
        self.controllers.clear();
    }
}
