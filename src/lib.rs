//! # soc-bootmon
//!
//! > A first-stage boot monitor for a small soft-core SoC, written in
//! > Embedded Rust
//!
//! This crate contains the two halves of the boot ROM:
//!
//! * an MMC/SD card driver speaking the SD protocol over a plain SPI bus,
//!   exposed as a FatFs-style block device (`status`, `read`, `write`,
//!   `ioctl`);
//! * a serial debug monitor which uploads and downloads raw memory, jumps to
//!   arbitrary addresses and runs a RAM test.
//!
//! It is `#![no_std]` and does not use `alloc`. Every piece of hardware is
//! injected, so the whole stack runs against simulated peripherals on a host.
//!
//! ## Using the crate
//!
//! ```rust,no_run
//! use soc_bootmon::{
//!     hw::{Peripherals, TickConfig},
//!     monitor::{Monitor, MonitorConfig},
//!     timer::Timers,
//!     PhysicalMemory,
//! };
//!
//! static TIMERS: Timers = Timers::new();
//!
//! fn boot_rom() -> ! {
//!     // Safety: called once, at reset, before anything else owns the SoC.
//!     let p = unsafe { Peripherals::steal() };
//!     p.timer.start_tick(&TickConfig::default());
//!     // Safety: the monitor is allowed to touch any address the operator asks for.
//!     let memory = unsafe { PhysicalMemory::new() };
//!     let mut monitor = Monitor::new(p.uart, memory, MonitorConfig::default());
//!     monitor.run()
//! }
//! ```
//!
//! ## Features
//!
//! * `log`: Enabled by default. Generates log messages using the `log` crate.
//! * `defmt-log`: By turning off the default features and enabling the
//!   `defmt-log` feature you can configure this crate to log messages over defmt
//!   instead.
//! * `fat`: Provides a boot image source reading files from a FAT volume on
//!   the SD card, using the `embedded-sdmmc` crate.
//!
//! You cannot enable both the `log` feature and the `defmt-log` feature.

#![cfg_attr(not(test), no_std)]

#[cfg(test)]
#[macro_use]
extern crate hex_literal;

#[macro_use]
mod structure;

pub mod blockdevice;
pub mod boot;
#[cfg(feature = "fat")]
pub mod fat;
pub mod hw;
pub mod irq;
pub mod memory;
pub mod monitor;
pub mod sdcard;
pub mod timer;

pub use crate::blockdevice::{Block, BlockDevice, DiskStatus, IoctlCode, ResultCode, BLOCK_LEN};
pub use crate::memory::{Memory, MemoryWindow, PhysicalMemory};
pub use crate::sdcard::{Error, SdCard, Timeouts};

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::debug! but does nothing at all
macro_rules! debug {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::trace! but does nothing at all
macro_rules! trace {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::warn! but does nothing at all
macro_rules! warn {
    ($($arg:tt)+) => {};
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
