//! Traits and types for working with Block Devices.
//!
//! This is the interface a filesystem library consumes: a status word, sector
//! reads and writes, and a handful of control requests. It mirrors the
//! classic FatFs `diskio` layer, so result codes and ioctl numbers keep their
//! FatFs values.

/// A standard 512 byte block (also known as a sector).
///
/// Almost all MMC/SD cards have 512 byte blocks, and the driver programs the
/// card for exactly this length during initialisation.
pub type Block = [u8; BLOCK_LEN];

/// All our blocks are a fixed length of 512 bytes.
pub const BLOCK_LEN: usize = 512;

/// Sometimes we want `LEN` as a `u32` and the casts don't look nice.
pub const BLOCK_LEN_U32: u32 = 512;

bitflags::bitflags! {
    /// The persistent condition of a disk.
    ///
    /// Starts out as [`DiskStatus::NOINIT`]. Only a successful
    /// initialisation clears it, and a shutdown sets it again.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DiskStatus: u8 {
        /// The drive has not been initialised
        const NOINIT = 0x01;
        /// No medium in the drive
        const NODISK = 0x02;
        /// The medium is write protected
        const PROTECT = 0x04;
    }
}

/// The outcome of a disk operation, as reported to a filesystem.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    /// Successful
    Ok = 0,
    /// A hard error occurred during the operation
    Error = 1,
    /// The medium is write protected
    WriteProtected = 2,
    /// The drive has not been initialised
    NotReady = 3,
    /// Invalid parameter
    ParamError = 4,
}

impl<E> From<Result<(), E>> for ResultCode
where
    E: Into<ResultCode>,
{
    fn from(result: Result<(), E>) -> ResultCode {
        match result {
            Ok(()) => ResultCode::Ok,
            Err(e) => e.into(),
        }
    }
}

/// Control requests understood by [`BlockDevice::ioctl`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum IoctlCode {
    /// Number of sectors on the disk, as a native-endian `u32` (4 bytes)
    GetSectorCount = 1,
    /// The raw Card Specific Data register (16 bytes)
    GetCsd = 10,
    /// The raw Card Identification register (16 bytes)
    GetCid = 11,
    /// The raw Operation Conditions Register (4 bytes)
    GetOcr = 12,
}

impl IoctlCode {
    /// How many bytes the caller's buffer must hold for this request.
    pub const fn buffer_len(self) -> usize {
        match self {
            IoctlCode::GetSectorCount | IoctlCode::GetOcr => 4,
            IoctlCode::GetCsd | IoctlCode::GetCid => 16,
        }
    }
}

impl TryFrom<u8> for IoctlCode {
    type Error = u8;

    fn try_from(code: u8) -> Result<IoctlCode, u8> {
        match code {
            1 => Ok(IoctlCode::GetSectorCount),
            10 => Ok(IoctlCode::GetCsd),
            11 => Ok(IoctlCode::GetCid),
            12 => Ok(IoctlCode::GetOcr),
            other => Err(other),
        }
    }
}

/// A device which can read and write 512-byte sectors.
///
/// All the APIs take `&self`, so a filesystem can share the device with
/// whoever else needs it on the same thread.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug + Into<ResultCode>;

    /// Bring the device up, returning the resulting status.
    fn initialize(&self) -> DiskStatus;

    /// The current status flags.
    fn status(&self) -> DiskStatus;

    /// Read `count` sectors, starting at `sector`, into `buffer`.
    fn read(&self, buffer: &mut [u8], sector: u32, count: u8) -> Result<(), Self::Error>;

    /// Write `count` sectors from `buffer`, starting at `sector`.
    fn write(&self, buffer: &[u8], sector: u32, count: u8) -> Result<(), Self::Error>;

    /// Read consecutive sectors into separate blocks, starting at `sector`.
    ///
    /// The default reads one sector at a time. Devices that can stream
    /// several sectors in one request override it.
    fn read_blocks<'b, I>(&self, blocks: I, sector: u32) -> Result<(), Self::Error>
    where
        I: ExactSizeIterator<Item = &'b mut Block>,
    {
        for (i, block) in blocks.enumerate() {
            self.read(block, sector.wrapping_add(i as u32), 1)?;
        }
        Ok(())
    }

    /// Write consecutive sectors from separate blocks, starting at `sector`.
    ///
    /// The default writes one sector at a time.
    fn write_blocks<'b, I>(&self, blocks: I, sector: u32) -> Result<(), Self::Error>
    where
        I: ExactSizeIterator<Item = &'b Block>,
    {
        for (i, block) in blocks.enumerate() {
            self.write(block, sector.wrapping_add(i as u32), 1)?;
        }
        Ok(())
    }

    /// Perform a control request. `code` is a raw FatFs control code; unknown
    /// codes are rejected as a parameter error.
    fn ioctl(&self, code: u8, buffer: &mut [u8]) -> Result<(), Self::Error>;
}

/// Convert a sector index into the byte address a standard-capacity card
/// expects, or `None` if it doesn't fit in the 32-bit argument.
pub fn sector_into_bytes(sector: u32) -> Option<u32> {
    sector.checked_mul(BLOCK_LEN_U32)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ioctl_codes() {
        assert_eq!(IoctlCode::try_from(1), Ok(IoctlCode::GetSectorCount));
        assert_eq!(IoctlCode::try_from(12), Ok(IoctlCode::GetOcr));
        assert_eq!(IoctlCode::try_from(2), Err(2));
        assert_eq!(IoctlCode::GetCid.buffer_len(), 16);
    }

    #[test]
    fn sector_addressing() {
        assert_eq!(sector_into_bytes(0), Some(0));
        assert_eq!(sector_into_bytes(3), Some(1536));
        assert_eq!(sector_into_bytes(0x0080_0000), None);
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
