//! Coarse timeout budgets driven by the periodic tick interrupt.
//!
//! Two countdown counters are shared between the foreground code and the
//! tick handler. The foreground loads a budget before a wait and watches it
//! run down; the handler decrements whatever is non-zero on every tick.
//! One tick is nominally 10ms, but nothing here is wall-clock precise.
//!
//! Only plain atomic loads and stores are used, so this works on cores
//! without compare-and-swap. A decrement racing with a foreground store can
//! be lost, which at worst stretches a timeout by one tick.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Selects one of the two countdown counters.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Budget {
    /// Used for card initialisation and for the data token wait
    A,
    /// Used for the readiness handshake
    B,
}

/// The shared tick state.
///
/// Put one of these in a `static` so the interrupt handler can reach it.
#[derive(Debug)]
pub struct Timers {
    budget_a: AtomicU8,
    budget_b: AtomicU8,
    ticks: AtomicU32,
}

impl Timers {
    /// Create a new set of counters, all at zero.
    pub const fn new() -> Timers {
        Timers {
            budget_a: AtomicU8::new(0),
            budget_b: AtomicU8::new(0),
            ticks: AtomicU32::new(0),
        }
    }

    fn counter(&self, budget: Budget) -> &AtomicU8 {
        match budget {
            Budget::A => &self.budget_a,
            Budget::B => &self.budget_b,
        }
    }

    /// Called from the tick interrupt. Must stay this small.
    pub fn tick(&self) {
        for counter in [&self.budget_a, &self.budget_b] {
            let n = counter.load(Ordering::Relaxed);
            if n != 0 {
                counter.store(n - 1, Ordering::Relaxed);
            }
        }
        let t = self.ticks.load(Ordering::Relaxed);
        self.ticks.store(t.wrapping_add(1), Ordering::Relaxed);
    }

    /// Load a budget with a number of ticks.
    pub fn set(&self, budget: Budget, ticks: u8) {
        self.counter(budget).store(ticks, Ordering::Relaxed);
    }

    /// How many ticks are left in a budget.
    pub fn remaining(&self, budget: Budget) -> u8 {
        self.counter(budget).load(Ordering::Relaxed)
    }

    /// Has the budget run out?
    pub fn expired(&self, budget: Budget) -> bool {
        self.remaining(budget) == 0
    }

    /// Spend one unit of a budget from the foreground.
    ///
    /// Returns `true` if there was something left to spend. Loops that call
    /// this on every attempt are bounded even when no tick interrupt fires.
    pub fn take(&self, budget: Budget) -> bool {
        let counter = self.counter(budget);
        let n = counter.load(Ordering::Relaxed);
        if n == 0 {
            false
        } else {
            counter.store(n - 1, Ordering::Relaxed);
            true
        }
    }

    /// Ticks seen since start-up. Wraps.
    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Default for Timers {
    fn default() -> Self {
        Timers::new()
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
