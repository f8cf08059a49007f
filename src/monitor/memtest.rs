//! The address-in-address RAM test.
//!
//! Every word in the range is first written with its own address, then the
//! whole range is read back. Aliased or stuck address lines show up as words
//! holding somebody else's address.

use crate::memory::{Memory, MemoryWindow};

/// How many failing addresses a [`Report`] keeps.
pub const KEPT_FAILURES: usize = 8;

/// The result of a RAM test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Words tested
    pub words: u32,
    /// Words that did not read back as written
    pub failures: u32,
    /// The first few failing addresses
    pub first_failures: heapless::Vec<u32, KEPT_FAILURES>,
}

impl Report {
    /// Did every word read back correctly?
    pub fn passed(&self) -> bool {
        self.failures == 0
    }
}

/// Test `len` bytes of memory from `start`, which should be word aligned.
///
/// `on_failure` is called with every failing address as it is found. Words
/// the window won't let us touch count as failures.
pub fn run<M, F, E>(
    window: &mut MemoryWindow<M>,
    start: u32,
    len: u32,
    mut on_failure: F,
) -> Result<Report, E>
where
    M: Memory,
    F: FnMut(u32) -> Result<(), E>,
{
    let words = len / 4;
    for i in 0..words {
        let address = start.wrapping_add(i * 4);
        // Unwritable words are caught on the read-back pass
        let _ = window.write_u32(address, address);
    }

    let mut report = Report {
        words,
        failures: 0,
        first_failures: heapless::Vec::new(),
    };
    for i in 0..words {
        let address = start.wrapping_add(i * 4);
        if window.read_u32(address) != Ok(address) {
            report.failures += 1;
            // Full once KEPT_FAILURES have been recorded
            let _ = report.first_failures.push(address);
            on_failure(address)?;
        }
    }
    Ok(report)
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
