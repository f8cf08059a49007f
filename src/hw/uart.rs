//! The polled UART.

use super::Reg;
use core::convert::Infallible;

/// Status bit: a received byte is waiting in `rxtx`
pub const UART_DR: u32 = 0x01;
/// Status bit: the transmitter is still sending the last byte
pub const UART_BUSY: u32 = 0x10;

/// The UART register block.
#[repr(C)]
#[derive(Debug)]
pub struct UartRegisters {
    /// Status register
    pub ucr: Reg,
    /// Receive (on read) and transmit (on write) data
    pub rxtx: Reg,
}

/// A blocking driver for the UART.
///
/// Reads wait for a byte to arrive and writes wait for the transmitter to be
/// free. Neither ever times out.
pub struct Uart<'r> {
    regs: &'r UartRegisters,
}

impl<'r> Uart<'r> {
    /// Wrap a UART register block.
    pub fn new(regs: &'r UartRegisters) -> Uart<'r> {
        Uart { regs }
    }

    /// Wait for a byte and return it.
    pub fn getc(&mut self) -> u8 {
        while self.regs.ucr.read() & UART_DR == 0 {}
        self.regs.rxtx.read() as u8
    }

    /// Wait for the transmitter and send a byte.
    pub fn putc(&mut self, byte: u8) {
        while self.regs.ucr.read() & UART_BUSY != 0 {}
        self.regs.rxtx.write(u32::from(byte));
    }
}

impl embedded_io::ErrorType for Uart<'_> {
    type Error = Infallible;
}

impl embedded_io::Read for Uart<'_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match buf.first_mut() {
            Some(b) => {
                *b = self.getc();
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

impl embedded_io::Write for Uart<'_> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        for &b in buf {
            self.putc(b);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        while self.regs.ucr.read() & UART_BUSY != 0 {}
        Ok(())
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
