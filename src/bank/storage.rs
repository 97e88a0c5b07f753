//! Bounded product store. Single-threaded by construction: the owning node
//! is the only caller, so rejection without mutation is all the safety the
//! invariant needs.

use crate::SimError;

pub const DEFAULT_STORAGE_MAX: u32 = 20;

/// `0 <= available <= max` at all times. A rejected call leaves `available`
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Storage {
    available: u32,
    max: u32,
}

impl Storage {
    pub fn new(max: u32) -> Self {
        Self { available: 0, max }
    }

    pub fn available(&self) -> u32 {
        self.available
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Accepts the whole batch or none of it.
    pub fn add_to(&mut self, amount: u32) -> Result<u32, SimError> {
        let landed = self.available.saturating_add(amount);
        if landed > self.max {
            return Err(SimError::CapacityExceeded {
                requested: amount,
                available: self.available,
                max: self.max,
            });
        }
        self.available = landed;
        Ok(self.available)
    }

    /// Withdraws the whole batch or none of it.
    pub fn take_from(&mut self, amount: u32) -> Result<u32, SimError> {
        if amount > self.available {
            return Err(SimError::InsufficientStock {
                requested: amount,
                available: self.available,
            });
        }
        self.available -= amount;
        Ok(self.available)
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new(DEFAULT_STORAGE_MAX)
    }
}
