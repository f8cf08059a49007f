//! Register-level drivers for the SoC peripherals.
//!
//! Each peripheral is a `#[repr(C)]` block of 32-bit registers at a fixed
//! base address. The drivers borrow a register block rather than owning a
//! global pointer, so tests can hand them an ordinary value in RAM instead.
//!
//! The drivers implement the usual ecosystem traits (`embedded_io` for the
//! UART, `embedded_hal` for SPI and the chip select), which is all the rest
//! of the crate knows about them.

mod spi;
mod timer;
mod uart;

pub use self::spi::{ChipSelect, Spi, SpiRegisters, SPI_BUSY};
pub use self::timer::{
    SocTimer, TickConfig, TickHandler, TimerRegisters, TIMER_AR, TIMER_EN, TIMER_IRQ, TIMER_IRQEN,
    TIMER_TRIG,
};
pub use self::uart::{Uart, UartRegisters, UART_BUSY, UART_DR};

use core::cell::UnsafeCell;

/// Base address of the UART
pub const UART_BASE: usize = 0xF000_0000;
/// Base address of the timer block
pub const TIMER_BASE: usize = 0xF001_0000;
/// Base address of the SPI master
pub const SPI_BASE: usize = 0xF003_0000;

/// A single memory-mapped 32-bit register.
///
/// Every access is volatile.
#[repr(transparent)]
pub struct Reg(UnsafeCell<u32>);

impl Reg {
    /// A register holding `value`. Only useful for register blocks that live
    /// in ordinary memory, such as in tests.
    pub const fn new(value: u32) -> Reg {
        Reg(UnsafeCell::new(value))
    }

    /// Read the register.
    #[inline]
    pub fn read(&self) -> u32 {
        // Safety: the cell is valid for reads for as long as `self` is
        unsafe { core::ptr::read_volatile(self.0.get()) }
    }

    /// Write the register.
    #[inline]
    pub fn write(&self, value: u32) {
        // Safety: as above, and registers are only touched from one thread
        unsafe { core::ptr::write_volatile(self.0.get(), value) }
    }
}

impl core::fmt::Debug for Reg {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Reg({:#010x})", self.read())
    }
}

/// All the peripherals the boot monitor uses.
pub struct Peripherals {
    /// The serial port the monitor talks on
    pub uart: Uart<'static>,
    /// The tick timer
    pub timer: SocTimer<'static>,
    /// The SPI master the card sits on
    pub spi: Spi<'static>,
    /// The card's chip select, part of the SPI block
    pub cs: ChipSelect<'static>,
}

impl Peripherals {
    /// Get handles to the SoC peripherals at their fixed addresses.
    ///
    /// # Safety
    ///
    /// Only call this on the SoC itself, and only once: the handles assume
    /// nobody else is driving the same registers.
    pub unsafe fn steal() -> Peripherals {
        let uart = &*(UART_BASE as *const UartRegisters);
        let timer = &*(TIMER_BASE as *const TimerRegisters);
        let spi = &*(SPI_BASE as *const SpiRegisters);
        Peripherals {
            uart: Uart::new(uart),
            timer: SocTimer::new(timer),
            spi: Spi::new(spi),
            cs: ChipSelect::new(spi),
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
