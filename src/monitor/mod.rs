//! The serial debug monitor.
//!
//! The monitor reads single-byte commands from a serial port and acts on
//! target memory:
//!
//! * `u` uploads bytes to memory
//! * `d` downloads bytes from memory
//! * `g` jumps to an address
//! * `r` jumps to the reset vector
//! * `s` jumps to the firmware entry point
//! * `m` runs a RAM test
//!
//! Anything else gets the banner (binary protocol) or just the next prompt
//! (hex protocol). Command fields are either raw big-endian words or ASCII
//! hex, depending on the [`Protocol`].
//!
//! The monitor never gives up on a session: a command that touches memory
//! outside the window still consumes its whole payload, so the host stays in
//! step, and is then answered with an error line.

pub mod hex;
pub mod memtest;

use crate::boot::{self, BootConfig, BootError, BootImage, ImageSource};
use crate::memory::{self, Memory, MemoryWindow};
use crate::{debug, trace, warn};
use byteorder::{BigEndian, ByteOrder};
use embedded_io::{Read, Write};
use hex::Checksum;

/// How command fields are encoded on the wire.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    /// Raw bytes; addresses and sizes are big-endian 32-bit words
    Binary,
    /// ASCII hex fields with a running checksum echoed after uploads
    HexChecksummed,
}

/// Options for the monitor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// How command fields are encoded
    pub protocol: Protocol,
    /// Where the `s` command jumps to
    pub firmware_entry: u32,
    /// First address the RAM test covers
    pub memtest_start: u32,
    /// How many bytes the RAM test covers
    pub memtest_len: u32,
    /// Sent when the monitor starts, and for unknown commands under the
    /// binary protocol
    pub banner: &'static str,
    /// Announce every jump on the serial port before taking it
    pub jump_marker: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            protocol: Protocol::Binary,
            firmware_entry: 0x4000_06A8,
            memtest_start: 0x4000_0000,
            memtest_len: 1024 * (512 - 16),
            banner: "**soc-lm32/bootloader** > \r\n",
            jump_marker: true,
        }
    }
}

impl MonitorConfig {
    /// The defaults, but talking the hex protocol.
    pub fn hex() -> MonitorConfig {
        MonitorConfig {
            protocol: Protocol::HexChecksummed,
            banner: "\r\n** SD TEST **\n",
            ..Default::default()
        }
    }
}

/// A monitor command.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
    /// `u`
    Upload,
    /// `d`
    Download,
    /// `g`
    Jump,
    /// `r`
    Reset,
    /// `s`
    Start,
    /// `m`
    Memtest,
}

impl Command {
    /// Decode a command byte.
    pub fn from_byte(byte: u8) -> Option<Command> {
        match byte {
            b'u' => Some(Command::Upload),
            b'd' => Some(Command::Download),
            b'g' => Some(Command::Jump),
            b'r' => Some(Command::Reset),
            b's' => Some(Command::Start),
            b'm' => Some(Command::Memtest),
            _ => None,
        }
    }
}

/// What the caller should do after a command.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
    /// Read the next command
    Continue,
    /// Transfer control to this address
    Jump(u32),
}

/// Errors the monitor can hit. All of them come from the serial port.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error<E> {
    /// The serial port returned an error
    Serial(E),
    /// The serial port has no more data, and never will
    Disconnected,
}

/// The debug monitor.
pub struct Monitor<S, M> {
    serial: S,
    memory: MemoryWindow<M>,
    config: MonitorConfig,
}

impl<S, M> Monitor<S, M>
where
    S: Read + Write,
    M: Memory,
{
    /// A monitor with access to all of `memory`.
    pub fn new(serial: S, memory: M, config: MonitorConfig) -> Monitor<S, M> {
        Monitor::with_window(serial, MemoryWindow::new(memory), config)
    }

    /// A monitor restricted to a window of memory.
    pub fn with_window(serial: S, memory: MemoryWindow<M>, config: MonitorConfig) -> Monitor<S, M> {
        Monitor {
            serial,
            memory,
            config,
        }
    }

    /// The monitor's options.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// The serial port.
    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    /// The memory window.
    pub fn memory_mut(&mut self) -> &mut MemoryWindow<M> {
        &mut self.memory
    }

    /// Take the monitor apart.
    pub fn into_parts(self) -> (S, MemoryWindow<M>) {
        (self.serial, self.memory)
    }

    /// Send the banner.
    pub fn greet(&mut self) -> Result<(), Error<S::Error>> {
        put(&mut self.serial, self.config.banner.as_bytes())
    }

    /// Read and carry out one command.
    ///
    /// Under the hex protocol the `>` prompt is sent first.
    pub fn step(&mut self) -> Result<Step, Error<S::Error>> {
        if self.config.protocol == Protocol::HexChecksummed {
            put(&mut self.serial, b">")?;
        }
        let byte = self.read_byte()?;
        match Command::from_byte(byte) {
            Some(command) => self.execute(command),
            None => {
                trace!("Ignoring byte {:02x}", byte);
                if self.config.protocol == Protocol::Binary {
                    self.greet()?;
                }
                Ok(Step::Continue)
            }
        }
    }

    /// Carry out a command, reading its fields from the serial port.
    pub fn execute(&mut self, command: Command) -> Result<Step, Error<S::Error>> {
        debug!("Command {:?}", command);
        match command {
            Command::Upload => {
                self.upload()?;
                Ok(Step::Continue)
            }
            Command::Download => {
                self.download()?;
                Ok(Step::Continue)
            }
            Command::Memtest => {
                self.memtest()?;
                Ok(Step::Continue)
            }
            Command::Jump => {
                let address = self.read_word(&mut Checksum::new())?;
                self.jump_to(address)
            }
            Command::Reset => self.jump_to(0),
            Command::Start => self.jump_to(self.config.firmware_entry),
        }
    }

    /// Greet the host, then serve commands until one of them jumps away.
    pub fn run(&mut self) -> ! {
        if self.greet().is_err() {
            warn!("Serial error sending banner");
        }
        loop {
            match self.step() {
                Ok(Step::Continue) => {}
                Ok(Step::Jump(address)) => self.memory.execute(address),
                Err(_) => {
                    warn!("Serial error, waiting for next command");
                }
            }
        }
    }

    /// Try to load a boot image, then either jump to it or fall back to the
    /// monitor.
    ///
    /// The outcome of the load is reported on the serial port either way.
    pub fn boot_or_run<I>(&mut self, source: &mut I, config: &BootConfig) -> !
    where
        I: ImageSource,
    {
        let result = boot::load(source, &mut self.memory, config);
        if self.report_boot(config, &result).is_err() {
            warn!("Serial error reporting boot");
        }
        match result {
            Ok(image) if config.jump_after_load => self.memory.execute(image.address),
            _ => self.run(),
        }
    }

    fn report_boot<E>(
        &mut self,
        config: &BootConfig,
        result: &Result<BootImage, BootError<E>>,
    ) -> Result<(), Error<S::Error>> {
        let serial = &mut self.serial;
        match result {
            Ok(image) => {
                put(serial, b"found file size: 0x")?;
                put_hex(serial, image.len, 8)?;
                put(serial, b" at 0x")?;
                put_hex(serial, image.address, 8)?;
                put(serial, b"\r\n")
            }
            Err(BootError::NotFound) => {
                put(serial, config.image_name.as_bytes())?;
                put(serial, b": not found.\r\n")
            }
            Err(BootError::NoCard) => put(serial, b"no card found.\r\n"),
            Err(BootError::NoFilesystem) => put(serial, b"no FAT-FS\r\n"),
            Err(BootError::OutOfWindow(address)) => {
                put(serial, b"image does not fit: 0x")?;
                put_hex(serial, *address, 8)?;
                put(serial, b"\r\n")
            }
            Err(BootError::Truncated { got, .. }) => {
                put(serial, b"image truncated at 0x")?;
                put_hex(serial, *got, 8)?;
                put(serial, b"\r\n")
            }
            Err(BootError::Source(_)) => put(serial, b"read error\r\n"),
        }
    }

    fn jump_to(&mut self, address: u32) -> Result<Step, Error<S::Error>> {
        debug!("Jump to {:08x}", address);
        if self.config.jump_marker {
            put(&mut self.serial, b"\r\nJUMP ")?;
            put_hex(&mut self.serial, address, 8)?;
            put(&mut self.serial, b"\r\n")?;
            self.serial.flush().map_err(Error::Serial)?;
        }
        Ok(Step::Jump(address))
    }

    fn upload(&mut self) -> Result<(), Error<S::Error>> {
        let (start, size, mut checksum) = match self.config.protocol {
            Protocol::Binary => {
                let start = self.read_word(&mut Checksum::new())?;
                let size = self.read_word(&mut Checksum::new())?;
                (start, size, None)
            }
            Protocol::HexChecksummed => {
                let mut checksum = Checksum::new();
                // The record count covers the address and checksum bytes too
                let count = self.read_hex(2, &mut checksum)?;
                let start = self.read_hex(8, &mut checksum)?;
                (start, count.saturating_sub(5), Some(checksum))
            }
        };
        debug!("Upload {} bytes to {:08x}", size, start);

        let mut rejected = None;
        for i in 0..size {
            let byte = match checksum.as_mut() {
                Some(checksum) => self.read_hex(2, checksum)? as u8,
                None => self.read_byte()?,
            };
            let address = start.wrapping_add(i);
            if let Err(memory::Error::OutOfWindow(address)) = self.memory.write_u8(address, byte) {
                rejected.get_or_insert(address);
            }
        }

        if let Some(checksum) = checksum {
            put_hex(&mut self.serial, u32::from(checksum.complement()), 2)?;
        }
        match rejected {
            Some(address) => self.report_window_error(address),
            None => Ok(()),
        }
    }

    fn download(&mut self) -> Result<(), Error<S::Error>> {
        let start = self.read_word(&mut Checksum::new())?;
        let size = self.read_word(&mut Checksum::new())?;
        debug!("Download {} bytes from {:08x}", size, start);

        let mut rejected = None;
        for i in 0..size {
            let address = start.wrapping_add(i);
            let byte = match self.memory.read_u8(address) {
                Ok(byte) => byte,
                Err(memory::Error::OutOfWindow(address)) => {
                    rejected.get_or_insert(address);
                    0
                }
            };
            match self.config.protocol {
                Protocol::Binary => put(&mut self.serial, &[byte])?,
                Protocol::HexChecksummed => put_hex(&mut self.serial, u32::from(byte), 2)?,
            }
        }
        match rejected {
            Some(address) => self.report_window_error(address),
            None => Ok(()),
        }
    }

    fn memtest(&mut self) -> Result<(), Error<S::Error>> {
        put(&mut self.serial, b"\r\nMEMTEST...")?;
        let serial = &mut self.serial;
        let _report = memtest::run(
            &mut self.memory,
            self.config.memtest_start,
            self.config.memtest_len,
            |address| {
                put(serial, b"\r\nMEMTEST ERROR: ")?;
                put_hex(serial, address, 8)
            },
        )?;
        debug!(
            "Memtest: {} of {} words failed",
            _report.failures, _report.words
        );
        put(&mut self.serial, b"...OK\n\r")
    }

    fn report_window_error(&mut self, address: u32) -> Result<(), Error<S::Error>> {
        warn!("Command touched {:08x}, outside the window", address);
        put(&mut self.serial, b"\r\nERROR: outside window: ")?;
        put_hex(&mut self.serial, address, 8)?;
        put(&mut self.serial, b"\r\n")
    }

    /// An address or size field, in whatever encoding the protocol uses.
    fn read_word(&mut self, checksum: &mut Checksum) -> Result<u32, Error<S::Error>> {
        match self.config.protocol {
            Protocol::Binary => {
                let mut buffer = [0u8; 4];
                self.read_exact(&mut buffer)?;
                Ok(BigEndian::read_u32(&buffer))
            }
            Protocol::HexChecksummed => self.read_hex(8, checksum),
        }
    }

    fn read_hex(&mut self, nibbles: usize, checksum: &mut Checksum) -> Result<u32, Error<S::Error>> {
        let mut buffer = [0u8; 8];
        let digits = &mut buffer[..nibbles.min(8)];
        self.read_exact(digits)?;
        Ok(hex::decode(digits, checksum))
    }

    fn read_exact(&mut self, buffer: &mut [u8]) -> Result<(), Error<S::Error>> {
        for b in buffer.iter_mut() {
            *b = self.read_byte()?;
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, Error<S::Error>> {
        let mut buffer = [0u8; 1];
        match self.serial.read(&mut buffer).map_err(Error::Serial)? {
            0 => Err(Error::Disconnected),
            _ => Ok(buffer[0]),
        }
    }
}

fn put<W: Write>(serial: &mut W, bytes: &[u8]) -> Result<(), Error<W::Error>> {
    serial.write_all(bytes).map_err(Error::Serial)
}

fn put_hex<W: Write>(serial: &mut W, value: u32, nibbles: usize) -> Result<(), Error<W::Error>> {
    let mut buffer = [0u8; 8];
    let digits = &mut buffer[..nibbles.min(8)];
    hex::encode(value, digits);
    put(serial, digits)
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
