//! Effect stack: one effect bound to a set of stripes, ticking on a fixed
//! interval.
//!
//! The stack only tracks deadlines. The control loop decides when to call
//! [`EffectStack::tick`], so a tick never runs concurrently with another
//! tick or with a client command.

use std::time::{Duration, Instant};

use crate::color::Hsv;
use crate::registry::Registry;
use crate::stripe::StripeId;

use super::Effect;

pub type EffectId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    Idle,
    Running,
    /// Terminal.
    Stopped,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub color: Hsv,
    pub written: usize,
    pub failed: usize,
}

pub struct EffectStack {
    id: EffectId,
    label: String,
    effect: Box<dyn Effect>,
    stripes: Vec<StripeId>,
    interval: Duration,
    state: StackState,
    deadline: Option<Instant>,
    ticks: u64,
}

impl EffectStack {
    pub fn new(
        id: EffectId,
        label: impl Into<String>,
        effect: Box<dyn Effect>,
        stripes: Vec<StripeId>,
        interval: Duration,
    ) -> Self {
        EffectStack {
            id,
            label: label.into(),
            effect,
            stripes,
            interval,
            state: StackState::Idle,
            deadline: None,
            ticks: 0,
        }
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    /// Effect id the stack was started with (e.g. `"fade"`).
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stripes(&self) -> &[StripeId] {
        &self.stripes
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> StackState {
        self.state
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Next time the stack wants to tick. `Some` exactly while running.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Idle → Running with the first tick due immediately. No-op otherwise.
    pub fn start(&mut self, now: Instant) {
        if self.state == StackState::Idle {
            self.state = StackState::Running;
            self.deadline = Some(now);
            log::info!(
                "effect {} ({}) started on stripes {:?}",
                self.id,
                self.label,
                self.stripes
            );
        }
    }

    /// → Stopped. Pending deadline dropped, later ticks do nothing.
    pub fn stop(&mut self) {
        if self.state != StackState::Stopped {
            self.state = StackState::Stopped;
            self.deadline = None;
            log::info!("effect {} ({}) stopped after {} ticks", self.id, self.label, self.ticks);
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.state == StackState::Running && self.deadline.is_some_and(|d| d <= now)
    }

    /// Advance the effect once and push the color to every bound stripe.
    ///
    /// Returns `None` if the stack isn't running or the deadline hasn't
    /// passed. A stripe that fails is logged and skipped.
    pub fn tick(&mut self, now: Instant, registry: &mut Registry) -> Option<TickReport> {
        if !self.is_due(now) {
            return None;
        }
        let color = self.effect.advance();
        let mut report = TickReport {
            color,
            written: 0,
            failed: 0,
        };
        for &sid in &self.stripes {
            match registry.set_stripe_color(sid, color) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    report.failed += 1;
                    log::warn!("effect {}: stripe {sid}: {e}", self.id);
                }
            }
        }
        self.ticks += 1;
        self.deadline = Some(now + self.interval);
        Some(report)
    }
}
