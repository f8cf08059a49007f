//! The MMC/SD protocol over a bare SPI bus and a chip-select pin.
//!
//! This is currently optimised for readability and debugability, not
//! performance.
//!
//! The SPI bus itself never times out: if the shift register never reports
//! idle, a transfer blocks forever. Only the card-level waits below (the
//! readiness handshake, response polling, the data token wait and the
//! initialisation loops) are bounded, by attempt counts and by the tick
//! budgets in [`Timers`].

use super::{proto::*, CardState, Error, Timeouts};
use crate::blockdevice::{sector_into_bytes, DiskStatus, IoctlCode, BLOCK_LEN, BLOCK_LEN_U32};
use crate::timer::{Budget, Timers};
use crate::{debug, trace, warn};
use byteorder::{BigEndian, ByteOrder};

/// Inner details for the SD Card driver.
///
/// All the APIs required `&mut self`.
pub struct SdCardInner<'t, SPI, CS>
where
    SPI: embedded_hal::spi::SpiBus<u8>,
    CS: embedded_hal::digital::OutputPin,
{
    spi: SPI,
    cs: CS,
    timers: &'t Timers,
    status: DiskStatus,
    state: CardState,
    failed_in: Option<CardState>,
    timeouts: Timeouts,
}

impl<'t, SPI, CS> SdCardInner<'t, SPI, CS>
where
    SPI: embedded_hal::spi::SpiBus<u8>,
    CS: embedded_hal::digital::OutputPin,
{
    /// Construct a new driver. The card starts out uninitialised.
    pub fn new(spi: SPI, cs: CS, timers: &'t Timers, timeouts: Timeouts) -> Self {
        SdCardInner {
            spi,
            cs,
            timers,
            status: DiskStatus::NOINIT,
            state: CardState::Uninit,
            failed_in: None,
            timeouts,
        }
    }

    /// Get a temporary borrow on the underlying SPI bus.
    pub fn spi<T, F>(&mut self, func: F) -> T
    where
        F: FnOnce(&mut SPI) -> T,
    {
        func(&mut self.spi)
    }

    /// The current status flags.
    pub fn status(&self) -> DiskStatus {
        self.status
    }

    /// How far the last initialisation got.
    pub fn state(&self) -> CardState {
        self.state
    }

    /// The state the last initialisation was in when it gave up.
    pub fn failed_in(&self) -> Option<CardState> {
        self.failed_in
    }

    /// Force the disk back to uninitialised. Leaves the other flags alone.
    pub fn shutdown(&mut self) -> DiskStatus {
        self.status.insert(DiskStatus::NOINIT);
        self.status
    }

    /// Record what the card socket switches say.
    ///
    /// An empty socket also forces the disk back to uninitialised.
    pub fn set_socket(&mut self, inserted: bool, write_protected: bool) {
        self.status.set(DiskStatus::PROTECT, write_protected);
        if inserted {
            self.status.remove(DiskStatus::NODISK);
        } else {
            self.status.insert(DiskStatus::NODISK | DiskStatus::NOINIT);
        }
    }

    /// Initializes the card into a known state (or at least tries to).
    ///
    /// Returns the resulting status. NOINIT is clear only if the card made it
    /// all the way to [`CardState::Ready`].
    pub fn initialize(&mut self) -> DiskStatus {
        debug!("initialising card with {:?}", self.timeouts);
        self.state = CardState::Uninit;
        self.failed_in = None;
        let result = self.acquire();
        // Idle (release DO), whatever happened
        let result = result.and(self.cs_high()).and(self.receive().map(|_| ()));
        match result {
            Ok(()) => {
                self.state = CardState::Ready;
                self.status.remove(DiskStatus::NOINIT);
                debug!("card ready");
            }
            Err(_e) => {
                warn!("card init failed in {:?}: {:?}", self.state, _e);
                self.failed_in = Some(self.state);
                self.state = CardState::Failed;
                self.shutdown();
            }
        }
        self.status
    }

    fn acquire(&mut self) -> Result<(), Error> {
        self.cs_high()?;
        self.status = DiskStatus::empty();
        trace!("Reset card..");
        // Supply at least 74 clock cycles without CS asserted.
        for _ in 0..10 {
            self.receive()?;
        }
        self.cs_low()?;
        let response = self.send_command(CMD0, 0)?;
        if response != R1_IDLE_STATE {
            warn!("GO_IDLE_STATE got {:x}", response);
            return Err(Error::CardNotFound);
        }
        self.state = CardState::Idle;

        // MMC cards take the legacy command, SD cards want the
        // application-specific one. Try them in that order.
        self.timers.set(Budget::A, self.timeouts.legacy_init);
        let mut ready = false;
        while self.timers.take(Budget::A) {
            self.state = CardState::LegacyInit;
            if self.send_command(CMD1, 0)? == R1_READY_STATE {
                ready = true;
                break;
            }
        }

        if !ready {
            debug!("no answer to SEND_OP_COND, trying APP_SEND_OP_COND");
            self.timers.set(Budget::A, self.timeouts.app_init);
            while !self.timers.expired(Budget::A) {
                self.state = CardState::AppInit;
                if self.send_command(CMD55, 0)? & !R1_IDLE_STATE != 0 {
                    continue;
                }
                if self.send_command(ACMD41, 0)? == R1_READY_STATE {
                    ready = true;
                    break;
                }
            }
        }
        if !ready {
            return Err(Error::TimeoutInit);
        }

        let response = self.send_command(CMD16, BLOCK_LEN_U32)?;
        if response != R1_READY_STATE {
            return Err(Error::CommandFailed {
                command: CMD16,
                response,
            });
        }
        self.state = CardState::BlockLenSet;
        Ok(())
    }

    /// Read one or more blocks, starting at the given sector.
    pub fn read(&mut self, buffer: &mut [u8], sector: u32, count: u8) -> Result<(), Error> {
        self.check_init()?;
        let len = Self::check_request(buffer.len(), count)?;
        self.read_blocks(buffer[..len].chunks_exact_mut(BLOCK_LEN), sector)
    }

    /// Read consecutive blocks into separate buffers, starting at the given
    /// sector. Every buffer is filled completely.
    ///
    /// More than one buffer makes this a multi-block read, which is always
    /// ended with STOP_TRANSMISSION.
    pub fn read_blocks<'b, I>(&mut self, blocks: I, sector: u32) -> Result<(), Error>
    where
        I: ExactSizeIterator<Item = &'b mut [u8]>,
    {
        self.check_init()?;
        let count = blocks.len();
        if count == 0 {
            return Err(Error::ParamError);
        }
        let address = sector_into_bytes(sector).ok_or(Error::ParamError)?;
        let multiple = count > 1;

        self.with_chip_select(|s| {
            s.expect_ready(if multiple { CMD18 } else { CMD17 }, address)?;
            let mut result = Ok(());
            for block in blocks {
                result = s.receive_block(block);
                if result.is_err() {
                    break;
                }
            }
            if multiple {
                // Stop the read, even if it went wrong
                s.send_command(CMD12, 0)?;
            }
            result
        })
    }

    /// Write one or more blocks, starting at the given sector.
    pub fn write(&mut self, buffer: &[u8], sector: u32, count: u8) -> Result<(), Error> {
        self.check_init()?;
        self.check_writable()?;
        let len = Self::check_request(buffer.len(), count)?;
        self.write_blocks(buffer[..len].chunks_exact(BLOCK_LEN), sector)
    }

    /// Write consecutive blocks from separate buffers, starting at the given
    /// sector.
    ///
    /// More than one buffer makes this a multi-block write, which is always
    /// ended with the stop token.
    pub fn write_blocks<'b, I>(&mut self, blocks: I, sector: u32) -> Result<(), Error>
    where
        I: ExactSizeIterator<Item = &'b [u8]>,
    {
        self.check_init()?;
        self.check_writable()?;
        let count = blocks.len();
        if count == 0 {
            return Err(Error::ParamError);
        }
        let address = sector_into_bytes(sector).ok_or(Error::ParamError)?;
        let (command, token) = if count > 1 {
            (CMD25, DataToken::StartMultiple)
        } else {
            (CMD24, DataToken::StartSingle)
        };

        self.with_chip_select(|s| {
            s.expect_ready(command, address)?;
            let mut result = Ok(());
            for block in blocks {
                result = s.transmit_block(block, token);
                if result.is_err() {
                    break;
                }
            }
            if token == DataToken::StartMultiple {
                // Stop the write, even if it went wrong
                let stop = s.transmit_block(&[], DataToken::StopMultiple);
                result = result.and(stop);
            }
            result
        })
    }

    /// Perform a control request.
    pub fn ioctl(&mut self, code: IoctlCode, buffer: &mut [u8]) -> Result<(), Error> {
        self.check_init()?;
        if buffer.len() < code.buffer_len() {
            return Err(Error::ParamError);
        }
        self.with_chip_select(|s| match code {
            IoctlCode::GetSectorCount => {
                let mut csd = [0u8; REGISTER_LEN];
                s.read_register(CMD9, &mut csd)?;
                let sectors = Csd::from_bytes(csd)
                    .card_capacity_blocks()
                    .ok_or_else(|| {
                        warn!("CSD capacity does not fit in 32 bits");
                        Error::RegisterReadError
                    })?;
                debug!("card has {} sectors", sectors);
                buffer[..4].copy_from_slice(&sectors.to_ne_bytes());
                Ok(())
            }
            IoctlCode::GetCsd => s.read_register(CMD9, &mut buffer[..REGISTER_LEN]),
            IoctlCode::GetCid => s.read_register(CMD10, &mut buffer[..REGISTER_LEN]),
            IoctlCode::GetOcr => {
                s.expect_ready(CMD58, 0)
                    .map_err(|_| Error::RegisterReadError)?;
                // An R3 response: the register follows the R1 directly, with
                // no data token.
                for b in buffer[..OCR_LEN].iter_mut() {
                    *b = s.receive()?;
                }
                Ok(())
            }
        })
    }

    /// Send a command inside its own chip select window.
    pub fn command(&mut self, command: u8, arg: u32) -> Result<u8, Error> {
        self.with_chip_select(|s| s.send_command(command, arg))
    }

    fn check_init(&self) -> Result<(), Error> {
        if self.status.contains(DiskStatus::NOINIT) {
            Err(Error::NotReady)
        } else {
            Ok(())
        }
    }

    fn check_writable(&self) -> Result<(), Error> {
        if self.status.contains(DiskStatus::PROTECT) {
            Err(Error::WriteProtected)
        } else {
            Ok(())
        }
    }

    /// Check a read/write request and return how many bytes of the buffer it
    /// covers.
    fn check_request(buffer_len: usize, count: u8) -> Result<usize, Error> {
        if count == 0 {
            return Err(Error::ParamError);
        }
        let len = usize::from(count) * BLOCK_LEN;
        if buffer_len < len {
            return Err(Error::ParamError);
        }
        Ok(len)
    }

    /// Read a 16 byte register which the card sends as a data block.
    fn read_register(&mut self, command: u8, buffer: &mut [u8]) -> Result<(), Error> {
        self.expect_ready(command, 0)
            .map_err(|_| Error::RegisterReadError)?;
        self.receive_block(buffer)
    }

    /// Send a command which must be answered with an all-clear R1.
    fn expect_ready(&mut self, command: u8, arg: u32) -> Result<(), Error> {
        let response = self.send_command(command, arg)?;
        if response == R1_READY_STATE {
            Ok(())
        } else {
            warn!("CMD{} rejected: {:x}", command, response);
            Err(Error::CommandFailed { command, response })
        }
    }

    /// Receive a data block from the card. Fills the whole of `buffer`.
    ///
    /// The two CRC bytes after the data are clocked in and thrown away.
    fn receive_block(&mut self, buffer: &mut [u8]) -> Result<(), Error> {
        self.timers.set(Budget::A, self.timeouts.data_token);
        let token = loop {
            let t = self.receive()?;
            if t != BUS_IDLE || self.timers.expired(Budget::A) {
                break t;
            }
        };
        if token == BUS_IDLE {
            warn!("timed out waiting for data token");
            return Err(Error::TimeoutReadBuffer);
        }
        if token != DataToken::StartSingle.byte() {
            warn!("bad data token {:x}", token);
            return Err(Error::ReadError);
        }

        buffer.fill(0xFF);
        self.transfer_bytes(buffer)?;

        // Discard CRC
        let mut crc_bytes = [0xFF; 2];
        self.transfer_bytes(&mut crc_bytes)?;
        Ok(())
    }

    /// Send a data block (or, for the stop token, just the token) to the
    /// card.
    fn transmit_block(&mut self, buffer: &[u8], token: DataToken) -> Result<(), Error> {
        if self.wait_ready()? != BUS_IDLE {
            return Err(Error::TimeoutWaitNotBusy);
        }
        self.transmit(token.byte())?;
        if token == DataToken::StopMultiple {
            return Ok(());
        }
        self.write_bytes(buffer)?;
        // Dummy CRC
        self.write_bytes(&[0xFF, 0xFF])?;
        let status = self.receive()?;
        if (status & DATA_RES_MASK) != DATA_RES_ACCEPTED {
            warn!("block not accepted: {:x}", status);
            Err(Error::WriteError)
        } else {
            Ok(())
        }
    }

    /// Perform a command.
    ///
    /// Returns the R1 response, or [`NO_RESPONSE`] if the card was busy or
    /// never answered.
    fn send_command(&mut self, command: u8, arg: u32) -> Result<u8, Error> {
        if self.wait_ready()? != BUS_IDLE {
            warn!("card busy before CMD{}", command);
            return Ok(NO_RESPONSE);
        }

        let mut frame = [CMD_MARKER | command, 0, 0, 0, 0, CMD_TRAILER];
        BigEndian::write_u32(&mut frame[1..5], arg);
        self.write_bytes(&frame)?;

        // skip stuff byte for stop read
        if command == CMD12 {
            self.receive()?;
        }

        for _ in 0..RESPONSE_ATTEMPTS {
            let result = self.receive()?;
            if (result & R1_START_BIT) == 0 {
                trace!("CMD{} -> {:x}", command, result);
                return Ok(result);
            }
        }
        trace!("CMD{} -> no response", command);
        Ok(NO_RESPONSE)
    }

    /// Spin until the card returns 0xFF, or the ready budget runs out.
    ///
    /// Returns the last byte seen, so anything other than 0xFF means the card
    /// is still busy.
    fn wait_ready(&mut self) -> Result<u8, Error> {
        self.timers.set(Budget::B, self.timeouts.ready);
        self.receive()?;
        loop {
            let s = self.receive()?;
            if s == BUS_IDLE || !self.timers.take(Budget::B) {
                return Ok(s);
            }
        }
    }

    /// Perform a function with the chip select low. Always releases the chip
    /// select, then clocks one more byte so the card lets go of DO.
    fn with_chip_select<F, T>(&mut self, func: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Self) -> Result<T, Error>,
    {
        self.cs_low()?;
        let result = func(self);
        self.cs_high()?;
        self.receive()?;
        result
    }

    fn cs_high(&mut self) -> Result<(), Error> {
        self.cs.set_high().map_err(|_| Error::GpioError)
    }

    fn cs_low(&mut self) -> Result<(), Error> {
        self.cs.set_low().map_err(|_| Error::GpioError)
    }

    /// Receive a byte from the SPI bus by clocking out an 0xFF byte.
    fn receive(&mut self) -> Result<u8, Error> {
        self.transfer_byte(0xFF)
    }

    /// Send a byte over the SPI bus and ignore what comes back.
    fn transmit(&mut self, out: u8) -> Result<(), Error> {
        let _ = self.transfer_byte(out)?;
        Ok(())
    }

    /// Send one byte and receive one byte over the SPI bus.
    fn transfer_byte(&mut self, out: u8) -> Result<u8, Error> {
        let mut read_buf = [0u8; 1];
        self.spi
            .transfer(&mut read_buf, &[out])
            .map_err(|_| Error::Transport)?;
        Ok(read_buf[0])
    }

    /// Send multiple bytes and ignore what comes back over the SPI bus.
    fn write_bytes(&mut self, out: &[u8]) -> Result<(), Error> {
        self.spi.write(out).map_err(|_e| Error::Transport)?;
        Ok(())
    }

    /// Send multiple bytes and replace them with what comes back over the SPI bus.
    fn transfer_bytes(&mut self, in_out: &mut [u8]) -> Result<(), Error> {
        self.spi
            .transfer_in_place(in_out)
            .map_err(|_e| Error::Transport)?;
        Ok(())
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
