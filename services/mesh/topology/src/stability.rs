//! Bounded counter of how settled the topology is.

use serde::{Deserialize, Serialize};

/// Upper bound of the counter
pub const MAX_STABILITY: u32 = 1000;

/// Largest increase from one quiet sync
pub const STABILITY_STEP: u32 = 25;

/// Grows on every sync that changes nothing, halves when a link drops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stability(u32);

impl Stability {
    /// Current value in `0..=MAX_STABILITY`
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Record a sync that changed nothing
    pub fn bump(&mut self) -> u32 {
        self.0 += STABILITY_STEP.min(MAX_STABILITY - self.0);
        self.0
    }

    /// Record a lost link
    pub fn halve(&mut self) -> u32 {
        self.0 /= 2;
        self.0
    }
}
