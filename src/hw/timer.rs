//! The two-channel timer, and the periodic tick that drives [`Timers`].

use super::Reg;
use crate::irq::InterruptHandler;
use crate::timer::Timers;

/// Control bit: the channel has hit its compare value
pub const TIMER_TRIG: u32 = 0x01;
/// Control bit: raise an interrupt when the channel triggers
pub const TIMER_IRQEN: u32 = 0x02;
/// Control bit: reload the counter after triggering
pub const TIMER_AR: u32 = 0x04;
/// Control bit: the channel is counting
pub const TIMER_EN: u32 = 0x08;

/// The interrupt line timer channel 0 raises.
pub const TIMER_IRQ: usize = 1;

/// The timer register block.
#[repr(C)]
#[derive(Debug)]
pub struct TimerRegisters {
    /// Channel 0 control
    pub tcr0: Reg,
    /// Channel 0 compare value
    pub compare0: Reg,
    /// Channel 0 counter
    pub counter0: Reg,
    /// Channel 1 control
    pub tcr1: Reg,
    /// Channel 1 compare value
    pub compare1: Reg,
    /// Channel 1 counter
    pub counter1: Reg,
}

/// How fast the CPU runs and how often to tick.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TickConfig {
    /// CPU clock in Hz, which is what the counters count
    pub cpu_hz: u32,
    /// Tick rate in Hz
    pub tick_hz: u32,
}

impl Default for TickConfig {
    fn default() -> Self {
        TickConfig {
            cpu_hz: 25_000_000,
            tick_hz: 100,
        }
    }
}

impl TickConfig {
    /// Counter cycles per tick.
    pub fn compare_value(&self) -> u32 {
        self.cpu_hz / self.tick_hz.max(1)
    }
}

/// Driver for the timer block.
pub struct SocTimer<'r> {
    regs: &'r TimerRegisters,
}

impl<'r> SocTimer<'r> {
    /// Wrap a timer register block.
    pub fn new(regs: &'r TimerRegisters) -> SocTimer<'r> {
        SocTimer { regs }
    }

    /// Start channel 0 as an auto-reloading periodic interrupt.
    pub fn start_tick(&self, config: &TickConfig) {
        self.regs.compare0.write(config.compare_value());
        self.regs.counter0.write(0);
        self.rearm_tick();
    }

    /// Acknowledge a channel 0 trigger and keep the channel running.
    pub fn rearm_tick(&self) {
        self.regs.tcr0.write(TIMER_EN | TIMER_AR | TIMER_IRQEN);
    }

    /// Stop the periodic interrupt.
    pub fn stop_tick(&self) {
        self.regs.tcr0.write(0);
    }

    /// A handler to register on [`TIMER_IRQ`], ticking `timers`.
    pub fn tick_handler<'a>(&'a self, timers: &'a Timers) -> TickHandler<'a, 'r> {
        TickHandler {
            timer: self,
            timers,
        }
    }
}

/// The periodic interrupt handler.
///
/// Counts down the card driver's tick budgets then re-arms the channel.
pub struct TickHandler<'a, 'r> {
    timer: &'a SocTimer<'r>,
    timers: &'a Timers,
}

impl InterruptHandler for TickHandler<'_, '_> {
    fn handle(&self) {
        self.timers.tick();
        self.timer.rearm_tick();
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
