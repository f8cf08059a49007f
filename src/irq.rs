//! Interrupt dispatch.
//!
//! The interrupt controller hands the low-level entry code a bitmask of
//! pending lines. The entry code passes that mask to
//! [`InterruptTable::dispatch`], which calls the handler registered on each
//! pending line, lowest line first. Lines nobody registered on go to a no-op
//! handler.

/// Something that can service an interrupt line.
pub trait InterruptHandler {
    /// Service the interrupt. Runs in interrupt context, so keep it short.
    fn handle(&self);
}

/// The handler every line starts with.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoopHandler;

impl InterruptHandler for NoopHandler {
    fn handle(&self) {}
}

static NOOP: NoopHandler = NoopHandler;

/// The number of interrupt lines on the SoC.
pub const IRQ_LINES: usize = 32;

/// Errors from managing the table.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The table has no slot for this line
    NoSuchLine(usize),
}

/// A table of interrupt handlers, one per line.
pub struct InterruptTable<'h, const N: usize = IRQ_LINES> {
    slots: [&'h dyn InterruptHandler; N],
}

impl<'h, const N: usize> InterruptTable<'h, N> {
    /// A table with every line going to the no-op handler.
    pub fn new() -> InterruptTable<'h, N> {
        let noop: &'h dyn InterruptHandler = &NOOP;
        InterruptTable { slots: [noop; N] }
    }

    /// Install `handler` on line `irq`, replacing whatever was there.
    pub fn register(&mut self, irq: usize, handler: &'h dyn InterruptHandler) -> Result<(), Error> {
        let slot = self.slots.get_mut(irq).ok_or(Error::NoSuchLine(irq))?;
        *slot = handler;
        Ok(())
    }

    /// Put line `irq` back to the no-op handler.
    pub fn unregister(&mut self, irq: usize) -> Result<(), Error> {
        self.register(irq, &NOOP)
    }

    /// Call the handler for every line set in `pending`.
    ///
    /// Bits beyond the size of the table are ignored.
    pub fn dispatch(&self, pending: u32) {
        for (line, handler) in self.slots.iter().enumerate().take(32) {
            if pending & (1 << line) != 0 {
                handler.handle();
            }
        }
    }
}

impl<const N: usize> Default for InterruptTable<'_, N> {
    fn default() -> Self {
        InterruptTable::new()
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
