//! Constants from the MMC/SD specifications, as used in SPI mode.

//==============================================================================

// Command framing

/// Every command byte on the wire has this bit set (start bit 0, transmission
/// bit 1).
pub const CMD_MARKER: u8 = 0x40;

/// The trailer sent after every command's argument.
///
/// This is the valid CRC7 for GO_IDLE_STATE only. Cards in SPI mode ignore
/// the CRC of every other command unless CRC checking has been switched on,
/// which this driver never does, so the same byte goes out every time.
pub const CMD_TRAILER: u8 = 0x95;

/// Response polls after a command frame before giving up.
pub const RESPONSE_ATTEMPTS: u8 = 10;

/// The value a command returns when the card did not answer.
///
/// Also a legal-looking R1 with every error bit set, so callers cannot tell
/// the two apart.
pub const NO_RESPONSE: u8 = 0xFF;

//==============================================================================

// MMC/SD Card Commands

/// GO_IDLE_STATE - init card in spi mode if CS low
pub const CMD0: u8 = 0x00;
/// SEND_OP_COND - legacy (MMC) initialisation
pub const CMD1: u8 = 0x01;
/// SEND_CSD - read the Card Specific Data (CSD register)
pub const CMD9: u8 = 0x09;
/// SEND_CID - read the Card Identification (CID register)
pub const CMD10: u8 = 0x0A;
/// STOP_TRANSMISSION - end multiple block read sequence
pub const CMD12: u8 = 0x0C;
/// SET_BLOCKLEN - set the block length for reads and writes
pub const CMD16: u8 = 0x10;
/// READ_SINGLE_BLOCK - read a single data block from the card
pub const CMD17: u8 = 0x11;
/// READ_MULTIPLE_BLOCK - read a multiple data blocks from the card
pub const CMD18: u8 = 0x12;
/// WRITE_BLOCK - write a single data block to the card
pub const CMD24: u8 = 0x18;
/// WRITE_MULTIPLE_BLOCK - write blocks of data until a STOP_TRANSMISSION
pub const CMD25: u8 = 0x19;
/// SD_SEND_OP_COND - Sends host capacity support information and activates
/// the card's initialization process
pub const ACMD41: u8 = 0x29;
/// APP_CMD - escape for application specific command
pub const CMD55: u8 = 0x37;
/// READ_OCR - read the OCR register of a card
pub const CMD58: u8 = 0x3A;

//==============================================================================

/// status for card in the ready state
pub const R1_READY_STATE: u8 = 0x00;

/// status for card in the idle state
pub const R1_IDLE_STATE: u8 = 0x01;

/// a response with this bit set is not a response (the line is still idle)
pub const R1_START_BIT: u8 = 0x80;

/// bus is released (card not busy)
pub const BUS_IDLE: u8 = 0xFF;

/// start data token for read or write single block
pub const DATA_START_BLOCK: u8 = 0xFE;

/// stop token for write multiple blocks
pub const STOP_TRAN_TOKEN: u8 = 0xFD;

/// start data token for write multiple blocks
pub const WRITE_MULTIPLE_TOKEN: u8 = 0xFC;

/// mask for data response tokens after a write block operation
pub const DATA_RES_MASK: u8 = 0x1F;

/// write data accepted token
pub const DATA_RES_ACCEPTED: u8 = 0x05;

/// Length of the CSD and CID registers
pub const REGISTER_LEN: usize = 16;

/// Length of the OCR register
pub const OCR_LEN: usize = 4;

/// A data token, sent or received ahead of a block of data.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum DataToken {
    /// Starts a single block read or write, and each block of a multi-block read
    StartSingle = DATA_START_BLOCK,
    /// Starts each block of a multi-block write
    StartMultiple = WRITE_MULTIPLE_TOKEN,
    /// Ends a multi-block write. No data follows.
    StopMultiple = STOP_TRAN_TOKEN,
}

impl DataToken {
    /// The byte on the wire
    pub const fn byte(self) -> u8 {
        self as u8
    }
}

/// Card Specific Data, version 1 (MMC and standard capacity SD)
#[derive(Default)]
pub struct CsdV1 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; REGISTER_LEN],
}

/// Card Specific Data, version 2 (high capacity SD)
#[derive(Default)]
pub struct CsdV2 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; REGISTER_LEN],
}

/// Card Specific Data
pub enum Csd {
    /// A version 1 CSD
    V1(CsdV1),
    /// A version 2 CSD
    V2(CsdV2),
}

impl Csd {
    /// Pick the right layout for a raw register, based on its structure
    /// version field.
    pub fn from_bytes(data: [u8; REGISTER_LEN]) -> Csd {
        match data[0] >> 6 {
            1 => Csd::V2(CsdV2 { data }),
            _ => Csd::V1(CsdV1 { data }),
        }
    }

    /// Returns the card capacity in 512-byte sectors, or `None` if the
    /// register describes more sectors than fit in a `u32`.
    pub fn card_capacity_blocks(&self) -> Option<u32> {
        match self {
            Csd::V1(contents) => Some(contents.card_capacity_blocks()),
            Csd::V2(contents) => contents.card_capacity_blocks(),
        }
    }
}

impl CsdV1 {
    /// Create a new, empty, CSD
    pub fn new() -> CsdV1 {
        CsdV1::default()
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(device_size, u32, [(6, 0, 2), (7, 0, 8), (8, 6, 2)]);
    define_field!(device_size_multiplier, u8, [(9, 0, 2), (10, 7, 1)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);
    define_field!(permanent_write_protection, bool, 14, 5);
    define_field!(temporary_write_protection, bool, 14, 4);

    /// Returns the card capacity in 512-byte sectors.
    ///
    /// Assumes the card was programmed for 512-byte blocks, so the native
    /// read block length is not part of the sum.
    pub fn card_capacity_blocks(&self) -> u32 {
        (self.device_size() + 1) << (self.device_size_multiplier() + 2)
    }
}

impl CsdV2 {
    /// Create a new, empty, CSD
    pub fn new() -> CsdV2 {
        CsdV2::default()
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(device_size, u32, [(7, 0, 6), (8, 0, 8), (9, 0, 8)]);

    /// Returns the card capacity in 512-byte sectors.
    ///
    /// C_SIZE is 22 bits wide, so the largest values overflow a `u32` sector
    /// count and give `None`.
    pub fn card_capacity_blocks(&self) -> Option<u32> {
        (self.device_size() + 1).checked_mul(1024)
    }
}

/// Perform the 7-bit CRC used on the SD card command frames.
///
/// The driver never sends a computed CRC; this is here to check
/// [`CMD_TRAILER`] against.
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for mut d in data.iter().cloned() {
        for _bit in 0..8 {
            crc <<= 1;
            if ((d & 0x80) ^ (crc & 0x80)) != 0 {
                crc ^= 0x09;
            }
            d <<= 1;
        }
    }
    (crc << 1) | 1
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
