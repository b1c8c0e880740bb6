//! Batch energy accounting.

use crate::DispatchError;
use std::cell::Cell;

/// Finite work budget shared by every script run in one batch.
///
/// Exhaustion is sticky: once [`consume`](Self::consume) has failed, every
/// later call fails too, so a script that catches the first error cannot
/// keep running.
///
/// # Example
///
/// ```
/// use tagbot_runtime::EnergyMeter;
///
/// let meter = EnergyMeter::new(2);
/// assert!(meter.consume(1).is_ok());
/// assert!(meter.consume(1).is_ok());
/// assert!(meter.consume(1).is_err());
/// assert!(meter.is_exhausted());
/// ```
#[derive(Debug)]
pub struct EnergyMeter {
    budget: u64,
    remaining: Cell<u64>,
    exhausted: Cell<bool>,
}

impl EnergyMeter {
    /// Creates a meter holding `budget` units.
    #[must_use]
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            remaining: Cell::new(budget),
            exhausted: Cell::new(false),
        }
    }

    /// Takes `units` from the meter.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::OutOfEnergy`] when fewer than `units`
    /// remain, or when the meter is already exhausted.
    pub fn consume(&self, units: u64) -> Result<(), DispatchError> {
        if self.exhausted.get() {
            return Err(DispatchError::OutOfEnergy);
        }
        match self.remaining.get().checked_sub(units) {
            Some(left) => {
                self.remaining.set(left);
                Ok(())
            }
            None => {
                self.remaining.set(0);
                self.exhausted.set(true);
                Err(DispatchError::OutOfEnergy)
            }
        }
    }

    /// Units left.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.remaining.get()
    }

    /// Units consumed so far.
    #[must_use]
    pub fn used(&self) -> u64 {
        self.budget - self.remaining.get()
    }

    /// `true` once a consume call has failed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_until_empty() {
        let meter = EnergyMeter::new(3);
        meter.consume(2).unwrap();
        assert_eq!(meter.remaining(), 1);
        assert_eq!(meter.used(), 2);
        assert!(!meter.is_exhausted());

        // Exactly draining the meter is fine; the next unit is not.
        meter.consume(1).unwrap();
        assert!(!meter.is_exhausted());
        assert_eq!(meter.consume(1), Err(DispatchError::OutOfEnergy));
        assert!(meter.is_exhausted());
    }

    #[test]
    fn exhaustion_is_sticky() {
        let meter = EnergyMeter::new(1);
        assert!(meter.consume(5).is_err());
        assert!(meter.consume(0).is_err());
        assert_eq!(meter.remaining(), 0);
    }
}
