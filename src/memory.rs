//! Access to target memory on behalf of the monitor and the image loader.
//!
//! Everything that pokes an address the operator typed in goes through the
//! [`Memory`] trait. [`PhysicalMemory`] is the real thing, and is the only
//! place in the crate that dereferences arbitrary addresses. Tests supply a
//! RAM-backed implementation instead.
//!
//! [`MemoryWindow`] optionally restricts the addresses that may be touched.

use crate::warn;

/// Byte and word access to target memory, plus the ability to run code in
/// it.
pub trait Memory {
    /// Read one byte.
    fn read_u8(&mut self, address: u32) -> u8;
    /// Write one byte.
    fn write_u8(&mut self, address: u32, value: u8);
    /// Read one 32-bit word. `address` should be word aligned.
    fn read_u32(&mut self, address: u32) -> u32;
    /// Write one 32-bit word. `address` should be word aligned.
    fn write_u32(&mut self, address: u32, value: u32);
    /// Transfer control to the code at `address`. Does not come back.
    fn execute(&mut self, address: u32) -> !;
}

/// The SoC's physical address space.
#[derive(Debug)]
pub struct PhysicalMemory {
    _private: (),
}

impl PhysicalMemory {
    /// Get a handle on physical memory.
    ///
    /// # Safety
    ///
    /// Every method of the returned value reads, writes or jumps to whatever
    /// address it is given. Only construct one on the SoC, and only where
    /// that is what the operator wants.
    pub unsafe fn new() -> PhysicalMemory {
        PhysicalMemory { _private: () }
    }
}

impl Memory for PhysicalMemory {
    fn read_u8(&mut self, address: u32) -> u8 {
        // Safety: see `PhysicalMemory::new`
        unsafe { core::ptr::read_volatile(address as usize as *const u8) }
    }

    fn write_u8(&mut self, address: u32, value: u8) {
        // Safety: see `PhysicalMemory::new`
        unsafe { core::ptr::write_volatile(address as usize as *mut u8, value) }
    }

    fn read_u32(&mut self, address: u32) -> u32 {
        // Safety: see `PhysicalMemory::new`
        unsafe { core::ptr::read_volatile(address as usize as *const u32) }
    }

    fn write_u32(&mut self, address: u32, value: u32) {
        // Safety: see `PhysicalMemory::new`
        unsafe { core::ptr::write_volatile(address as usize as *mut u32, value) }
    }

    fn execute(&mut self, address: u32) -> ! {
        // Safety: see `PhysicalMemory::new`. The image at `address` is
        // expected to be a function that never returns.
        let entry: extern "C" fn() -> ! =
            unsafe { core::mem::transmute::<usize, extern "C" fn() -> !>(address as usize) };
        entry()
    }
}

/// Errors from accessing memory through a [`MemoryWindow`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The access falls (at least partly) outside the window
    OutOfWindow(u32),
}

/// A view of some [`Memory`], optionally limited to one address range.
#[derive(Debug)]
pub struct MemoryWindow<M> {
    memory: M,
    bounds: Option<(u32, u32)>,
}

impl<M> MemoryWindow<M>
where
    M: Memory,
{
    /// A window onto the whole address space.
    pub fn new(memory: M) -> MemoryWindow<M> {
        MemoryWindow {
            memory,
            bounds: None,
        }
    }

    /// A window onto `len` bytes starting at `start`.
    pub fn bounded(memory: M, start: u32, len: u32) -> MemoryWindow<M> {
        MemoryWindow {
            memory,
            bounds: Some((start, len)),
        }
    }

    /// The `(start, len)` of the window, or `None` if it is unbounded.
    pub fn bounds(&self) -> Option<(u32, u32)> {
        self.bounds
    }

    /// Does the window cover all of `size` bytes at `address`?
    pub fn contains(&self, address: u32, size: u32) -> bool {
        match self.bounds {
            None => true,
            Some((start, len)) => {
                let end = u64::from(start) + u64::from(len);
                address >= start && u64::from(address) + u64::from(size) <= end
            }
        }
    }

    fn check(&self, address: u32, size: u32) -> Result<(), Error> {
        if self.contains(address, size) {
            Ok(())
        } else {
            warn!("Access to {:08x} is outside the window", address);
            Err(Error::OutOfWindow(address))
        }
    }

    /// Read one byte.
    pub fn read_u8(&mut self, address: u32) -> Result<u8, Error> {
        self.check(address, 1)?;
        Ok(self.memory.read_u8(address))
    }

    /// Write one byte.
    pub fn write_u8(&mut self, address: u32, value: u8) -> Result<(), Error> {
        self.check(address, 1)?;
        self.memory.write_u8(address, value);
        Ok(())
    }

    /// Read one word.
    pub fn read_u32(&mut self, address: u32) -> Result<u32, Error> {
        self.check(address, 4)?;
        Ok(self.memory.read_u32(address))
    }

    /// Write one word.
    pub fn write_u32(&mut self, address: u32, value: u32) -> Result<(), Error> {
        self.check(address, 4)?;
        self.memory.write_u32(address, value);
        Ok(())
    }

    /// Jump to `address`. The window does not restrict jumps.
    pub fn execute(&mut self, address: u32) -> ! {
        self.memory.execute(address)
    }

    /// The memory behind the window.
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// The memory behind the window, mutably.
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// Give back the memory behind the window.
    pub fn into_inner(self) -> M {
        self.memory
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
