//! Effects: endless color sequences, and the stacks that play them onto
//! stripes.

mod fade;
pub mod stack;

pub use fade::{FADE_STEPS, FadeEffect};
pub use stack::{EffectId, EffectStack, StackState, TickReport};

use serde::Serialize;

use crate::color::Hsv;

/// A color generator. Each call yields the next color of an unbounded
/// sequence; a fresh instance starts from its initial phase.
pub trait Effect: Send {
    fn advance(&mut self) -> Hsv;
}

/// Effects clients can start by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Fade,
}

/// Listing entry for an [`EffectKind`].
#[derive(Debug, Clone, Serialize)]
pub struct EffectInfo {
    pub eid: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

impl EffectKind {
    pub const ALL: &'static [EffectKind] = &[EffectKind::Fade];

    /// Wire id, as sent in `start_effect`'s `eid`.
    pub fn id(self) -> &'static str {
        match self {
            EffectKind::Fade => "fade",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EffectKind::Fade => "Fade",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            EffectKind::Fade => "Cycles the hue once around the color wheel every 20000 ticks",
        }
    }

    /// Case-insensitive lookup by wire id.
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.id().eq_ignore_ascii_case(id.trim()))
    }

    /// Lookup by position in [`EffectKind::ALL`].
    pub fn from_index(index: u64) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i))
            .copied()
    }

    /// A fresh instance, starting from the beginning of its sequence.
    pub fn build(self) -> Box<dyn Effect> {
        match self {
            EffectKind::Fade => Box::new(FadeEffect::new()),
        }
    }

    pub fn info(self) -> EffectInfo {
        EffectInfo {
            eid: self.id(),
            name: self.name(),
            description: self.description(),
        }
    }
}
