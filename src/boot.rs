//! Staging a boot image from storage into RAM.
//!
//! The image comes from an [`ImageSource`], which hides the filesystem. The
//! `fat` feature provides one that reads a file from a FAT volume on the SD
//! card. [`load`] copies the image into memory one block at a time; what to
//! do next (jump to it or stay in the monitor) is up to the caller, see
//! [`Monitor::boot_or_run`](crate::monitor::Monitor::boot_or_run).

use crate::blockdevice::BLOCK_LEN;
use crate::memory::{self, Memory, MemoryWindow};
use crate::{debug, trace};

/// Somewhere a boot image can be read from.
pub trait ImageSource {
    /// The underlying storage error
    type Error: core::fmt::Debug;

    /// Open the named image and return its length in bytes.
    fn open(&mut self, name: &str) -> Result<u32, BootError<Self::Error>>;

    /// Read the next bytes of the open image. Returns 0 at the end.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, BootError<Self::Error>>;

    /// Release the open image.
    fn close(&mut self) {}
}

/// Why a boot image could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootError<E> {
    /// There is no image by that name
    NotFound,
    /// There is no card, or it didn't initialise
    NoCard,
    /// The card has no filesystem we understand
    NoFilesystem,
    /// Some other storage error
    Source(E),
    /// The image would land outside the memory window
    OutOfWindow(u32),
    /// The image ended before its stated length
    Truncated {
        /// The stated length
        expected: u32,
        /// How much we actually got
        got: u32,
    },
}

impl<E> From<memory::Error> for BootError<E> {
    fn from(e: memory::Error) -> BootError<E> {
        match e {
            memory::Error::OutOfWindow(address) => BootError::OutOfWindow(address),
        }
    }
}

/// Options for the boot path.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootConfig {
    /// The name of the image to load
    pub image_name: &'static str,
    /// Where the image goes in memory
    pub load_address: u32,
    /// Jump to `load_address` once the image is loaded. Off by default: the
    /// monitor comes up with the image staged in memory, ready for `g`.
    pub jump_after_load: bool,
}

impl Default for BootConfig {
    fn default() -> Self {
        BootConfig {
            image_name: "test.txt",
            load_address: 0x4010_0000,
            jump_after_load: false,
        }
    }
}

/// A successfully loaded image.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootImage {
    /// Where it was loaded
    pub address: u32,
    /// How long it is
    pub len: u32,
}

/// Copy the configured image from `source` into memory.
///
/// Nothing is written if the window can't hold the whole image.
pub fn load<I, M>(
    source: &mut I,
    window: &mut MemoryWindow<M>,
    config: &BootConfig,
) -> Result<BootImage, BootError<I::Error>>
where
    I: ImageSource,
    M: Memory,
{
    let len = source.open(config.image_name)?;
    debug!("Image is {} bytes", len);
    let result = copy(source, window, config.load_address, len);
    source.close();
    result?;
    Ok(BootImage {
        address: config.load_address,
        len,
    })
}

fn copy<I, M>(
    source: &mut I,
    window: &mut MemoryWindow<M>,
    address: u32,
    len: u32,
) -> Result<(), BootError<I::Error>>
where
    I: ImageSource,
    M: Memory,
{
    if !window.contains(address, len) {
        return Err(BootError::OutOfWindow(address));
    }
    let mut buffer = [0u8; BLOCK_LEN];
    let mut offset = 0u32;
    while offset < len {
        let wanted = BLOCK_LEN.min((len - offset) as usize);
        let got = source.read(&mut buffer[..wanted])?;
        if got == 0 {
            return Err(BootError::Truncated {
                expected: len,
                got: offset,
            });
        }
        for (i, &b) in buffer[..got].iter().enumerate() {
            window.write_u8(address.wrapping_add(offset + i as u32), b)?;
        }
        offset += got as u32;
        trace!("Loaded {} of {} bytes", offset, len);
    }
    Ok(())
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
