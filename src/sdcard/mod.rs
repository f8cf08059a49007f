//! The MMC/SD Protocol
//!
//! Implements the MMC/SD protocol on some generic SPI interface.
//!
//! Only byte-addressed (standard capacity) cards are supported, and the card
//! is always programmed for 512 byte blocks.

pub mod proto;
mod spi;

use crate::blockdevice::{Block, BlockDevice, DiskStatus, IoctlCode, ResultCode};
use crate::timer::Timers;
use crate::{debug, warn};
use core::cell::RefCell;
use proto::{OCR_LEN, REGISTER_LEN};
use spi::SdCardInner;

// =============================================================================
// Types and Implementations
// =============================================================================

/// Represents an SD Card on an SPI bus.
///
/// Built from an SPI peripheral and a Chip Select pin. We need Chip Select to
/// be separate so we can clock out some bytes without Chip Select asserted
/// (which puts the card into SPI mode).
///
/// All the APIs take `&self` - mutability is handled using an inner `RefCell`.
pub struct SdCard<'t, SPI, CS>
where
    SPI: embedded_hal::spi::SpiBus<u8>,
    CS: embedded_hal::digital::OutputPin,
{
    inner: RefCell<SdCardInner<'t, SPI, CS>>,
}

impl<'t, SPI, CS> SdCard<'t, SPI, CS>
where
    SPI: embedded_hal::spi::SpiBus<u8>,
    CS: embedded_hal::digital::OutputPin,
{
    /// Create a new SD/MMC Card driver using a raw SPI interface.
    ///
    /// Uses the default timeouts. `timers` must be ticked by the periodic
    /// interrupt, or the initialisation and data token waits never end.
    pub fn new(spi: SPI, cs: CS, timers: &'t Timers) -> SdCard<'t, SPI, CS> {
        Self::new_with_options(spi, cs, timers, Timeouts::default())
    }

    /// Construct a new SD/MMC Card driver, using a raw SPI interface and the
    /// given timeouts.
    pub fn new_with_options(
        spi: SPI,
        cs: CS,
        timers: &'t Timers,
        timeouts: Timeouts,
    ) -> SdCard<'t, SPI, CS> {
        SdCard {
            inner: RefCell::new(SdCardInner::new(spi, cs, timers, timeouts)),
        }
    }

    /// Get a temporary borrow on the underlying SPI bus. Useful if you
    /// need to re-clock the SPI.
    pub fn spi<T, F>(&self, func: F) -> T
    where
        F: FnOnce(&mut SPI) -> T,
    {
        let mut inner = self.inner.borrow_mut();
        inner.spi(func)
    }

    /// Run the initialisation sequence and return the new status.
    pub fn initialize(&self) -> DiskStatus {
        self.inner.borrow_mut().initialize()
    }

    /// Mark the card as requiring a reset.
    pub fn shutdown(&self) -> DiskStatus {
        self.inner.borrow_mut().shutdown()
    }

    /// The current status flags.
    pub fn status(&self) -> DiskStatus {
        self.inner.borrow().status()
    }

    /// How far the last initialisation got.
    pub fn state(&self) -> CardState {
        self.inner.borrow().state()
    }

    /// The state the last initialisation was in when it gave up, if it did.
    pub fn failed_in(&self) -> Option<CardState> {
        self.inner.borrow().failed_in()
    }

    /// Feed in the state of the card socket's insert and write-protect
    /// switches, if the board has them.
    pub fn set_socket(&self, inserted: bool, write_protected: bool) {
        self.inner
            .borrow_mut()
            .set_socket(inserted, write_protected)
    }

    /// Send a single raw command and return the card's R1 response.
    ///
    /// 0xFF means the card didn't answer (or answered with every error bit
    /// set; there is no telling them apart).
    pub fn command(&self, command: u8, arg: u32) -> Result<u8, Error> {
        self.inner.borrow_mut().command(command, arg)
    }

    /// Number of 512 byte sectors on the card.
    pub fn num_blocks(&self) -> Result<u32, Error> {
        let mut buffer = [0u8; 4];
        self.inner
            .borrow_mut()
            .ioctl(IoctlCode::GetSectorCount, &mut buffer)?;
        Ok(u32::from_ne_bytes(buffer))
    }

    /// Read the Card Specific Data register.
    pub fn read_csd(&self) -> Result<[u8; REGISTER_LEN], Error> {
        let mut buffer = [0u8; REGISTER_LEN];
        self.inner
            .borrow_mut()
            .ioctl(IoctlCode::GetCsd, &mut buffer)?;
        Ok(buffer)
    }

    /// Read the Card Identification register.
    pub fn read_cid(&self) -> Result<[u8; REGISTER_LEN], Error> {
        let mut buffer = [0u8; REGISTER_LEN];
        self.inner
            .borrow_mut()
            .ioctl(IoctlCode::GetCid, &mut buffer)?;
        Ok(buffer)
    }

    /// Read the Operation Conditions Register.
    pub fn read_ocr(&self) -> Result<[u8; OCR_LEN], Error> {
        let mut buffer = [0u8; OCR_LEN];
        self.inner
            .borrow_mut()
            .ioctl(IoctlCode::GetOcr, &mut buffer)?;
        Ok(buffer)
    }
}

impl<SPI, CS> BlockDevice for SdCard<'_, SPI, CS>
where
    SPI: embedded_hal::spi::SpiBus<u8>,
    CS: embedded_hal::digital::OutputPin,
{
    type Error = Error;

    fn initialize(&self) -> DiskStatus {
        SdCard::initialize(self)
    }

    fn status(&self) -> DiskStatus {
        SdCard::status(self)
    }

    /// Read one or more blocks, starting at the given sector.
    fn read(&self, buffer: &mut [u8], sector: u32, count: u8) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        debug!("Read {} blocks @ {}", count, sector);
        inner.read(buffer, sector, count)
    }

    /// Write one or more blocks, starting at the given sector.
    fn write(&self, buffer: &[u8], sector: u32, count: u8) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        debug!("Writing {} blocks @ {}", count, sector);
        inner.write(buffer, sector, count)
    }

    /// Read blocks with a single multi-block request.
    fn read_blocks<'b, I>(&self, blocks: I, sector: u32) -> Result<(), Self::Error>
    where
        I: ExactSizeIterator<Item = &'b mut Block>,
    {
        let mut inner = self.inner.borrow_mut();
        debug!("Read {} blocks @ {}", blocks.len(), sector);
        inner.read_blocks(blocks.map(|b| b as &mut [u8]), sector)
    }

    /// Write blocks with a single multi-block request.
    fn write_blocks<'b, I>(&self, blocks: I, sector: u32) -> Result<(), Self::Error>
    where
        I: ExactSizeIterator<Item = &'b Block>,
    {
        let mut inner = self.inner.borrow_mut();
        debug!("Writing {} blocks @ {}", blocks.len(), sector);
        inner.write_blocks(blocks.map(|b| b as &[u8]), sector)
    }

    fn ioctl(&self, code: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        let code = IoctlCode::try_from(code).map_err(|_code| {
            warn!("unknown ioctl {}", _code);
            Error::ParamError
        })?;
        self.inner.borrow_mut().ioctl(code, buffer)
    }
}

/// Tick budgets for the card-level waits. One tick is nominally 10ms.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// How long the card may hold DO low before a command or data block
    pub ready: u8,
    /// How long to keep retrying the legacy SEND_OP_COND
    pub legacy_init: u8,
    /// How long to keep retrying APP_CMD + APP_SEND_OP_COND
    pub app_init: u8,
    /// How long to wait for the start of a data block
    pub data_token: u8,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            ready: 50,
            legacy_init: 50,
            app_init: 100,
            data_token: 10,
        }
    }
}

/// Where the initialisation state machine got to.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardState {
    /// Nothing has happened yet, or a new attempt has just started
    Uninit,
    /// The card answered GO_IDLE_STATE
    Idle,
    /// Waiting for the card to accept SEND_OP_COND
    LegacyInit,
    /// Waiting for the card to accept APP_SEND_OP_COND
    AppInit,
    /// The card is initialised and uses 512 byte blocks
    BlockLenSet,
    /// Usable
    Ready,
    /// The last attempt gave up
    Failed,
}

/// The possible errors this crate can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// We got an error from the SPI peripheral
    Transport,
    /// Couldn't set a GPIO pin
    GpioError,
    /// The disk hasn't been initialised
    NotReady,
    /// A zero count, a short buffer, an unknown control code or a sector
    /// beyond byte addressing
    ParamError,
    /// The medium is write protected
    WriteProtected,
    /// The card didn't enter the idle state
    CardNotFound,
    /// Neither initialisation command made the card ready in time
    TimeoutInit,
    /// The card rejected (or ignored) a command
    CommandFailed {
        /// The command index
        command: u8,
        /// The R1 response, 0xFF if there wasn't one
        response: u8,
    },
    /// We failed to read a CSD/CID/OCR register
    RegisterReadError,
    /// We didn't get a data token when reading data from the card
    TimeoutReadBuffer,
    /// We didn't get a response when waiting for the card to not be busy
    TimeoutWaitNotBusy,
    /// The card sent the wrong data token
    ReadError,
    /// The card didn't accept a data block
    WriteError,
}

impl Error {
    /// The FatFs result code for this error.
    pub fn code(&self) -> ResultCode {
        match self {
            Error::NotReady => ResultCode::NotReady,
            Error::ParamError => ResultCode::ParamError,
            Error::WriteProtected => ResultCode::WriteProtected,
            _ => ResultCode::Error,
        }
    }
}

impl From<Error> for ResultCode {
    fn from(e: Error) -> ResultCode {
        e.code()
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
