//! The byte-wide SPI master and its chip select line.

use super::Reg;
use core::convert::Infallible;

/// Status bit: a byte is still being shifted
pub const SPI_BUSY: u32 = 0x01;

/// The SPI register block.
#[repr(C)]
#[derive(Debug)]
pub struct SpiRegisters {
    /// Writing starts a transfer; reading returns the byte shifted in
    pub data: Reg,
    /// Status register
    pub status: Reg,
    /// Chip select output, 0 selects the card
    pub cs: Reg,
}

/// A blocking driver for the SPI master.
///
/// Each byte is written to the shift register and then the busy flag is
/// polled until it clears. There is no timeout: a stuck shift register hangs
/// the caller for good.
pub struct Spi<'r> {
    regs: &'r SpiRegisters,
}

impl<'r> Spi<'r> {
    /// Wrap an SPI register block.
    pub fn new(regs: &'r SpiRegisters) -> Spi<'r> {
        Spi { regs }
    }

    /// Shift one byte out and one byte in.
    pub fn exchange(&mut self, out: u8) -> u8 {
        self.regs.data.write(u32::from(out));
        while self.regs.status.read() & SPI_BUSY != 0 {}
        self.regs.data.read() as u8
    }
}

impl embedded_hal::spi::ErrorType for Spi<'_> {
    type Error = Infallible;
}

impl embedded_hal::spi::SpiBus<u8> for Spi<'_> {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        for w in words.iter_mut() {
            *w = self.exchange(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        for &w in words {
            self.exchange(w);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let len = read.len().max(write.len());
        for i in 0..len {
            let b = self.exchange(write.get(i).copied().unwrap_or(0xFF));
            if let Some(r) = read.get_mut(i) {
                *r = b;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        for w in words.iter_mut() {
            *w = self.exchange(*w);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        while self.regs.status.read() & SPI_BUSY != 0 {}
        Ok(())
    }
}

/// The chip select output of the SPI block, as a GPIO pin.
pub struct ChipSelect<'r> {
    regs: &'r SpiRegisters,
}

impl<'r> ChipSelect<'r> {
    /// Wrap the chip select register of an SPI block.
    pub fn new(regs: &'r SpiRegisters) -> ChipSelect<'r> {
        ChipSelect { regs }
    }
}

impl embedded_hal::digital::ErrorType for ChipSelect<'_> {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for ChipSelect<'_> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.regs.cs.write(0);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.regs.cs.write(1);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use embedded_hal::{digital::OutputPin, spi::SpiBus};

    fn idle_block() -> SpiRegisters {
        SpiRegisters {
            data: Reg::new(0),
            status: Reg::new(0),
            cs: Reg::new(1),
        }
    }

    #[test]
    fn data_register_in_ram_loops_back() {
        let regs = idle_block();
        let mut spi = Spi::new(&regs);
        let mut buf = [0x12, 0x34];
        spi.transfer_in_place(&mut buf).unwrap();
        assert_eq!(buf, [0x12, 0x34]);
        let mut read = [0u8; 1];
        spi.transfer(&mut read, &[0x5A]).unwrap();
        assert_eq!(read, [0x5A]);
    }

    #[test]
    fn chip_select_is_active_low() {
        let regs = idle_block();
        let mut cs = ChipSelect::new(&regs);
        cs.set_low().unwrap();
        assert_eq!(regs.cs.read(), 0);
        cs.set_high().unwrap();
        assert_eq!(regs.cs.read(), 1);
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
