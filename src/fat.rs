//! Boot images from a FAT volume, using the `embedded-sdmmc` crate.
//!
//! [`CardBlocks`] presents any of our block devices to `embedded-sdmmc`, and
//! [`FatImageSource`] opens a file in the root directory of the first volume
//! on it.

use crate::blockdevice::{BlockDevice, DiskStatus, IoctlCode};
use crate::boot::{BootError, ImageSource};
use crate::debug;
use embedded_sdmmc::{
    Block, BlockCount, BlockIdx, Mode, RawDirectory, RawFile, RawVolume, TimeSource, Timestamp,
    VolumeIdx, VolumeManager,
};

/// Adapts one of our block devices to `embedded_sdmmc::BlockDevice`.
pub struct CardBlocks<D>(pub D);

impl<D> embedded_sdmmc::BlockDevice for CardBlocks<D>
where
    D: BlockDevice,
{
    type Error = D::Error;

    fn read(&self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        self.0
            .read_blocks(blocks.iter_mut().map(|b| &mut b.contents), start_block_idx.0)
    }

    fn write(&self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        self.0
            .write_blocks(blocks.iter().map(|b| &b.contents), start_block_idx.0)
    }

    fn num_blocks(&self) -> Result<BlockCount, Self::Error> {
        let mut buffer = [0u8; 4];
        self.0
            .ioctl(IoctlCode::GetSectorCount as u8, &mut buffer)?;
        Ok(BlockCount(u32::from_ne_bytes(buffer)))
    }
}

/// There is no clock on the board. Files are only read, so the timestamp
/// never ends up on disk.
#[derive(Debug, Default, Copy, Clone)]
pub struct FixedTime;

impl TimeSource for FixedTime {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 0,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// Reads boot images from the root directory of the first FAT volume.
pub struct FatImageSource<D>
where
    D: BlockDevice,
{
    volume_mgr: VolumeManager<CardBlocks<D>, FixedTime>,
    status: DiskStatus,
    open: Option<(RawVolume, RawDirectory, RawFile)>,
}

impl<D> FatImageSource<D>
where
    D: BlockDevice,
{
    /// Initialise `device` and read images from it.
    pub fn new(device: D) -> FatImageSource<D> {
        let status = device.initialize();
        debug!("Card status {:02x}", status.bits());
        FatImageSource {
            volume_mgr: VolumeManager::new(CardBlocks(device), FixedTime),
            status,
            open: None,
        }
    }

    /// The card's status after initialisation.
    pub fn status(&self) -> DiskStatus {
        self.status
    }

    fn open_in_root(
        &mut self,
        name: &str,
    ) -> Result<(RawVolume, RawDirectory, RawFile), embedded_sdmmc::Error<D::Error>> {
        let volume = self.volume_mgr.open_raw_volume(VolumeIdx(0))?;
        let dir = match self.volume_mgr.open_root_dir(volume) {
            Ok(dir) => dir,
            Err(e) => {
                let _ = self.volume_mgr.close_volume(volume);
                return Err(e);
            }
        };
        match self.volume_mgr.open_file_in_dir(dir, name, Mode::ReadOnly) {
            Ok(file) => Ok((volume, dir, file)),
            Err(e) => {
                let _ = self.volume_mgr.close_dir(dir);
                let _ = self.volume_mgr.close_volume(volume);
                Err(e)
            }
        }
    }
}

fn boot_error<E>(e: embedded_sdmmc::Error<E>) -> BootError<embedded_sdmmc::Error<E>>
where
    E: core::fmt::Debug,
{
    match e {
        embedded_sdmmc::Error::NotFound => BootError::NotFound,
        embedded_sdmmc::Error::FormatError(_) | embedded_sdmmc::Error::NoSuchVolume => {
            BootError::NoFilesystem
        }
        e => BootError::Source(e),
    }
}

impl<D> ImageSource for FatImageSource<D>
where
    D: BlockDevice,
{
    type Error = embedded_sdmmc::Error<D::Error>;

    fn open(&mut self, name: &str) -> Result<u32, BootError<Self::Error>> {
        self.close();
        if self.status.intersects(DiskStatus::NOINIT | DiskStatus::NODISK) {
            return Err(BootError::NoCard);
        }
        let (volume, dir, file) = self.open_in_root(name).map_err(boot_error)?;
        self.open = Some((volume, dir, file));
        let len = self.volume_mgr.file_length(file).map_err(boot_error)?;
        debug!("Opened {} ({} bytes)", name, len);
        Ok(len)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, BootError<Self::Error>> {
        let (_, _, file) = self.open.ok_or(BootError::NotFound)?;
        match self.volume_mgr.read(file, buffer) {
            Ok(n) => Ok(n),
            Err(embedded_sdmmc::Error::EndOfFile) => Ok(0),
            Err(e) => Err(boot_error(e)),
        }
    }

    fn close(&mut self) {
        if let Some((volume, dir, file)) = self.open.take() {
            let _ = self.volume_mgr.close_file(file);
            let _ = self.volume_mgr.close_dir(dir);
            let _ = self.volume_mgr.close_volume(volume);
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
