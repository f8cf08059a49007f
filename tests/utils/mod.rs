//! Useful library code for tests

#![allow(dead_code)]

use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::rc::Rc;

use soc_bootmon::boot::{BootError, ImageSource};
use soc_bootmon::timer::Timers;
use soc_bootmon::Memory;

/// A 1 GB standard-capacity card: 1,984,000 sectors.
pub const CSD_V1: [u8; 16] = hex_literal::hex!("00 26 00 32 5F 59 83 C8 AD DB CF FF D2 40 40 A5");

/// Some plausible card identification.
pub const CID: [u8; 16] = hex_literal::hex!("03 53 44 53 55 30 31 47 80 12 34 56 78 00 C5 2B");

/// Powered up, 3.2-3.4V.
pub const OCR: [u8; 4] = hex_literal::hex!("80 30 00 00");

/// The data response for an accepted block
const DATA_ACCEPTED: u8 = 0xE5;
/// The data response for a block with a CRC error
const DATA_REJECTED: u8 = 0xEB;

/// Set up logging once per test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// How the card reacts to initialisation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Personality {
    /// Never drives DO at all
    Silent,
    /// An MMC card, ready after this many SEND_OP_CONDs
    Mmc { polls: u32 },
    /// An SD card, which rejects SEND_OP_COND and is ready after this many
    /// APP_SEND_OP_CONDs
    Sd { polls: u32 },
    /// Answers GO_IDLE_STATE, then stays idle forever
    NeverReady,
}

#[derive(Debug)]
enum Phase {
    /// Collecting a command frame
    Command,
    /// Waiting for the start token of a block to write
    WriteToken { sector: u32, multiple: bool },
    /// Collecting a block to write, plus its two CRC bytes
    WriteData {
        sector: u32,
        multiple: bool,
        data: Vec<u8>,
    },
}

/// The state of a simulated MMC/SD card in SPI mode.
#[derive(Debug)]
pub struct CardModel<'t> {
    pub personality: Personality,
    pub timers: &'t Timers,
    /// Tick the timers every this many bytes, to stand in for the interrupt
    pub tick_every: u32,
    pub selected: bool,
    pub csd: [u8; 16],
    pub cid: [u8; 16],
    pub ocr: [u8; 4],
    pub blocks: HashMap<u32, [u8; 512]>,
    /// Every command frame the card saw, in order
    pub frames: Vec<[u8; 6]>,
    /// Bytes clocked while the chip select was asserted
    pub selected_transfers: usize,
    /// Respond to data blocks with a CRC error
    pub reject_writes: bool,
    /// How many busy bytes follow an accepted block
    pub busy_after_write: usize,
    /// How many multiple block writes were ended with the stop token
    pub stop_tokens: usize,
    /// Serve this many data blocks normally, then answer every later block
    /// read with `bad_token` instead
    pub bad_token_after: Option<usize>,
    /// What a failing block read sends in place of its start token. 0xFF
    /// means nothing at all: the bus just stays idle.
    pub bad_token: u8,
    /// Hold DO low after accepting a write command, so the card never looks
    /// ready for the data block
    pub hold_busy: bool,
    /// Every byte clocked, selected or not
    pub transfers: u32,
    blocks_sent: usize,
    op_cond_polls: u32,
    ready: bool,
    phase: Phase,
    frame: Vec<u8>,
    out: VecDeque<u8>,
    reading: Option<u32>,
}

impl<'t> CardModel<'t> {
    fn exchange(&mut self, mosi: u8) -> u8 {
        self.transfers += 1;
        if self.tick_every != 0 && self.transfers % self.tick_every == 0 {
            self.timers.tick();
        }
        if !self.selected || self.personality == Personality::Silent {
            return 0xFF;
        }
        self.selected_transfers += 1;

        match std::mem::replace(&mut self.phase, Phase::Command) {
            Phase::Command => {}
            Phase::WriteToken { sector, multiple } if self.hold_busy && mosi == 0xFF => {
                self.phase = Phase::WriteToken { sector, multiple };
                return self.out.pop_front().unwrap_or(0x00);
            }
            Phase::WriteToken { sector, multiple } => {
                match mosi {
                    0xFE if !multiple => {
                        self.phase = Phase::WriteData {
                            sector,
                            multiple,
                            data: Vec::new(),
                        }
                    }
                    0xFC if multiple => {
                        self.phase = Phase::WriteData {
                            sector,
                            multiple,
                            data: Vec::new(),
                        }
                    }
                    0xFD if multiple => {
                        self.stop_tokens += 1;
                        self.out.extend([0xFF, 0x00, 0x00].iter());
                    }
                    0xFF => self.phase = Phase::WriteToken { sector, multiple },
                    _ => return self.command_byte(mosi),
                }
                return self.out.pop_front().unwrap_or(0xFF);
            }
            Phase::WriteData {
                sector,
                multiple,
                mut data,
            } => {
                data.push(mosi);
                if data.len() < 514 {
                    self.phase = Phase::WriteData {
                        sector,
                        multiple,
                        data,
                    };
                } else {
                    if self.reject_writes {
                        self.out.push_back(DATA_REJECTED);
                    } else {
                        let mut block = [0u8; 512];
                        block.copy_from_slice(&data[..512]);
                        self.blocks.insert(sector, block);
                        self.out.push_back(DATA_ACCEPTED);
                        self.out
                            .extend(std::iter::repeat(0x00).take(self.busy_after_write));
                    }
                    if multiple {
                        self.phase = Phase::WriteToken {
                            sector: sector + 1,
                            multiple,
                        };
                    }
                }
                return 0xFF;
            }
        }

        if mosi != 0xFF || !self.frame.is_empty() {
            return self.command_byte(mosi);
        }
        if self.out.is_empty() {
            if let Some(sector) = self.reading {
                self.queue_block(sector);
                self.reading = Some(sector + 1);
            }
        }
        self.out.pop_front().unwrap_or(0xFF)
    }

    fn command_byte(&mut self, mosi: u8) -> u8 {
        if self.frame.is_empty() {
            // A new command makes the card drop whatever it was sending
            self.out.clear();
            self.reading = None;
        }
        self.frame.push(mosi);
        if self.frame.len() == 6 {
            let mut frame = [0u8; 6];
            frame.copy_from_slice(&self.frame);
            self.frame.clear();
            self.frames.push(frame);
            self.command(frame);
        }
        0xFF
    }

    fn command(&mut self, frame: [u8; 6]) {
        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let idle = if self.ready { 0x00 } else { 0x01 };
        match index {
            0 => {
                self.ready = false;
                self.op_cond_polls = 0;
                self.respond(0x01);
            }
            1 => match self.personality {
                Personality::Mmc { polls } => {
                    self.op_cond_polls += 1;
                    if self.op_cond_polls >= polls {
                        self.ready = true;
                        self.respond(0x00);
                    } else {
                        self.respond(0x01);
                    }
                }
                // Illegal command, in idle state
                _ => self.respond(0x05),
            },
            55 => self.respond(idle),
            41 => match self.personality {
                Personality::Sd { polls } => {
                    self.op_cond_polls += 1;
                    if self.op_cond_polls >= polls {
                        self.ready = true;
                        self.respond(0x00);
                    } else {
                        self.respond(0x01);
                    }
                }
                _ => self.respond(0x01),
            },
            16 => {
                if arg == 512 {
                    self.respond(idle)
                } else {
                    self.respond(0x40)
                }
            }
            9 => {
                self.respond(0x00);
                let csd = self.csd;
                self.queue_data(&csd);
            }
            10 => {
                self.respond(0x00);
                let cid = self.cid;
                self.queue_data(&cid);
            }
            58 => {
                self.respond(0x00);
                let ocr = self.ocr;
                self.out.extend(ocr.iter());
            }
            12 => {
                // Stuff byte, then R1
                self.out.push_back(0x00);
                self.respond(0x00);
            }
            17 | 18 | 24 | 25 if arg % 512 != 0 => self.respond(0x20),
            17 => {
                self.respond(0x00);
                self.queue_block(arg / 512);
            }
            18 => {
                self.respond(0x00);
                self.reading = Some(arg / 512);
            }
            24 | 25 => {
                self.respond(0x00);
                self.phase = Phase::WriteToken {
                    sector: arg / 512,
                    multiple: index == 25,
                };
            }
            _ => self.respond(0x04),
        }
    }

    fn respond(&mut self, r1: u8) {
        // One byte of NCR before the response
        self.out.push_back(0xFF);
        self.out.push_back(r1);
    }

    fn queue_data(&mut self, data: &[u8]) {
        // Access time: the bus idles for a while before the token
        self.out.extend([0xFF, 0xFF].iter());
        self.out.push_back(0xFE);
        self.out.extend(data.iter());
        self.out.extend([0x12, 0x34].iter());
    }

    fn queue_block(&mut self, sector: u32) {
        if self.bad_token_after.map_or(false, |n| self.blocks_sent >= n) {
            if self.bad_token != 0xFF {
                self.out.extend([0xFF, 0xFF, self.bad_token].iter());
            }
            return;
        }
        self.blocks_sent += 1;
        let block = self.blocks.get(&sector).copied().unwrap_or([0u8; 512]);
        self.queue_data(&block);
    }
}

/// A simulated card. Hand [`SimCard::bus`] to the driver and keep this to
/// look inside.
#[derive(Clone)]
pub struct SimCard<'t> {
    model: Rc<RefCell<CardModel<'t>>>,
}

impl<'t> SimCard<'t> {
    pub fn new(personality: Personality, timers: &'t Timers) -> SimCard<'t> {
        SimCard {
            model: Rc::new(RefCell::new(CardModel {
                personality,
                timers,
                tick_every: 16,
                selected: false,
                csd: CSD_V1,
                cid: CID,
                ocr: OCR,
                blocks: HashMap::new(),
                frames: Vec::new(),
                selected_transfers: 0,
                reject_writes: false,
                busy_after_write: 2,
                stop_tokens: 0,
                bad_token_after: None,
                bad_token: 0xFF,
                hold_busy: false,
                transfers: 0,
                blocks_sent: 0,
                op_cond_polls: 0,
                ready: false,
                phase: Phase::Command,
                frame: Vec::new(),
                out: VecDeque::new(),
                reading: None,
            })),
        }
    }

    /// An MMC card that is ready on the third SEND_OP_COND.
    pub fn mmc(timers: &'t Timers) -> SimCard<'t> {
        SimCard::new(Personality::Mmc { polls: 3 }, timers)
    }

    /// An SD card that is ready on the second APP_SEND_OP_COND.
    pub fn sd(timers: &'t Timers) -> SimCard<'t> {
        SimCard::new(Personality::Sd { polls: 2 }, timers)
    }

    /// The SPI bus and chip select to give the driver.
    pub fn bus(&self) -> (SimSpi<'t>, SimCs<'t>) {
        (
            SimSpi {
                model: self.model.clone(),
            },
            SimCs {
                model: self.model.clone(),
            },
        )
    }

    pub fn model(&self) -> RefMut<'_, CardModel<'t>> {
        self.model.borrow_mut()
    }

    /// The command indices the card has seen, in order.
    pub fn commands(&self) -> Vec<u8> {
        self.model
            .borrow()
            .frames
            .iter()
            .map(|f| f[0] & 0x3F)
            .collect()
    }

    pub fn block(&self, sector: u32) -> Option<[u8; 512]> {
        self.model.borrow().blocks.get(&sector).copied()
    }

    pub fn set_block(&self, sector: u32, block: [u8; 512]) {
        self.model.borrow_mut().blocks.insert(sector, block);
    }
}

/// The card's end of the SPI bus.
pub struct SimSpi<'t> {
    model: Rc<RefCell<CardModel<'t>>>,
}

impl embedded_hal::spi::ErrorType for SimSpi<'_> {
    type Error = Infallible;
}

impl embedded_hal::spi::SpiBus<u8> for SimSpi<'_> {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        let mut model = self.model.borrow_mut();
        for w in words.iter_mut() {
            *w = model.exchange(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        let mut model = self.model.borrow_mut();
        for &w in words {
            model.exchange(w);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
        let mut model = self.model.borrow_mut();
        for i in 0..read.len().max(write.len()) {
            let b = model.exchange(write.get(i).copied().unwrap_or(0xFF));
            if let Some(r) = read.get_mut(i) {
                *r = b;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        let mut model = self.model.borrow_mut();
        for w in words.iter_mut() {
            *w = model.exchange(*w);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

/// The card's chip select input.
pub struct SimCs<'t> {
    model: Rc<RefCell<CardModel<'t>>>,
}

impl embedded_hal::digital::ErrorType for SimCs<'_> {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for SimCs<'_> {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.model.borrow_mut().selected = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut model = self.model.borrow_mut();
        model.selected = false;
        model.frame.clear();
        Ok(())
    }
}

/// A serial port fed from a script, recording everything written to it.
///
/// Reads return 0 once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedSerial {
    pub input: VecDeque<u8>,
    pub output: Vec<u8>,
}

impl ScriptedSerial {
    pub fn new(input: &[u8]) -> ScriptedSerial {
        ScriptedSerial {
            input: input.iter().copied().collect(),
            output: Vec::new(),
        }
    }

    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl embedded_io::ErrorType for ScriptedSerial {
    type Error = Infallible;
}

impl embedded_io::Read for ScriptedSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
        match (buf.first_mut(), self.input.pop_front()) {
            (Some(b), Some(c)) => {
                *b = c;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

impl embedded_io::Write for ScriptedSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

/// The panic payload [`Ram::execute`] raises.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Jumped(pub u32);

/// RAM at `base`. Words are big-endian, as on the target.
#[derive(Debug, Clone)]
pub struct Ram {
    pub base: u32,
    pub bytes: Vec<u8>,
}

impl Ram {
    pub fn new(base: u32, len: usize) -> Ram {
        Ram {
            base,
            bytes: vec![0; len],
        }
    }

    fn index(&self, address: u32) -> usize {
        address
            .checked_sub(self.base)
            .map(|i| i as usize)
            .filter(|&i| i < self.bytes.len())
            .unwrap_or_else(|| panic!("{:08x} is not RAM", address))
    }

    pub fn slice(&self, address: u32, len: usize) -> &[u8] {
        let i = self.index(address);
        &self.bytes[i..i + len]
    }
}

impl Memory for Ram {
    fn read_u8(&mut self, address: u32) -> u8 {
        self.bytes[self.index(address)]
    }

    fn write_u8(&mut self, address: u32, value: u8) {
        let i = self.index(address);
        self.bytes[i] = value;
    }

    fn read_u32(&mut self, address: u32) -> u32 {
        let i = self.index(address);
        u32::from_be_bytes(self.bytes[i..i + 4].try_into().unwrap())
    }

    fn write_u32(&mut self, address: u32, value: u32) {
        let i = self.index(address);
        self.bytes[i..i + 4].copy_from_slice(&value.to_be_bytes());
    }

    fn execute(&mut self, address: u32) -> ! {
        std::panic::panic_any(Jumped(address))
    }
}

/// Run `f`, which should end in a jump, and return where it jumped to.
pub fn catch_jump<F: FnOnce()>(f: F) -> u32 {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
    std::panic::set_hook(previous);
    match result {
        Ok(()) => panic!("no jump"),
        Err(payload) => match payload.downcast::<Jumped>() {
            Ok(jumped) => jumped.0,
            Err(_) => panic!("panicked without jumping"),
        },
    }
}

/// Boot images held in memory.
#[derive(Debug, Default)]
pub struct Images {
    pub files: HashMap<&'static str, Vec<u8>>,
    /// Fail every open with this
    pub fail_open: Option<BootError<&'static str>>,
    open: Option<(Vec<u8>, usize)>,
    pub closed: usize,
}

impl Images {
    pub fn with(name: &'static str, data: Vec<u8>) -> Images {
        let mut images = Images::default();
        images.files.insert(name, data);
        images
    }
}

impl ImageSource for Images {
    type Error = &'static str;

    fn open(&mut self, name: &str) -> Result<u32, BootError<&'static str>> {
        if let Some(e) = self.fail_open.clone() {
            return Err(e);
        }
        let data = self.files.get(name).cloned().ok_or(BootError::NotFound)?;
        let len = data.len() as u32;
        self.open = Some((data, 0));
        Ok(len)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, BootError<&'static str>> {
        let (data, pos) = self.open.as_mut().ok_or(BootError::Source("not open"))?;
        let n = buffer.len().min(data.len() - *pos);
        buffer[..n].copy_from_slice(&data[*pos..*pos + n]);
        *pos += n;
        Ok(n)
    }

    fn close(&mut self) {
        self.open = None;
        self.closed += 1;
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
