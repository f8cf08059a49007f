//! FAT boot source tests

#![cfg(feature = "fat")]

mod utils;

use embedded_sdmmc::BlockDevice as _;
use soc_bootmon::boot::{BootError, ImageSource as _};
use soc_bootmon::fat::{CardBlocks, FatImageSource};
use soc_bootmon::timer::Timers;
use soc_bootmon::SdCard;
use utils::{Personality, SimCard};

#[test]
fn card_blocks_adapter() {
    utils::init_logging();
    let timers = Timers::new();
    let card = SimCard::mmc(&timers);
    let mut block = [0u8; 512];
    block[0] = 0xEB;
    block[511] = 0xAA;
    card.set_block(5, block);
    let (spi, cs) = card.bus();
    let sdcard = SdCard::new(spi, cs, &timers);
    sdcard.initialize();
    let blocks = CardBlocks(sdcard);

    let mut buffer = [embedded_sdmmc::Block::new(), embedded_sdmmc::Block::new()];
    blocks
        .read(&mut buffer, embedded_sdmmc::BlockIdx(5))
        .expect("read blocks");
    assert_eq!(buffer[0].contents, block);
    assert_eq!(buffer[1].contents, [0u8; 512]);
    // Both blocks in one multi-block read
    assert_eq!(card.commands().last(), Some(&12));
    assert_eq!(card.commands().iter().filter(|&&c| c == 18).count(), 1);
    assert!(!card.commands().contains(&17));

    blocks
        .write(&buffer[..1], embedded_sdmmc::BlockIdx(9))
        .expect("write block");
    assert_eq!(card.block(9), Some(block));
    assert_eq!(card.commands().last(), Some(&24));

    blocks
        .write(&buffer, embedded_sdmmc::BlockIdx(12))
        .expect("write blocks");
    assert_eq!(card.commands().last(), Some(&25));
    assert_eq!(card.model().stop_tokens, 1);
    assert_eq!(card.block(13), Some([0u8; 512]));

    assert_eq!(
        blocks.num_blocks().expect("num blocks"),
        embedded_sdmmc::BlockCount(1_984_000)
    );
}

#[test]
fn blank_card_has_no_filesystem() {
    let timers = Timers::new();
    let card = SimCard::mmc(&timers);
    let (spi, cs) = card.bus();
    let mut source = FatImageSource::new(SdCard::new(spi, cs, &timers));
    assert!(source.status().is_empty());
    assert!(matches!(
        source.open("test.txt"),
        Err(BootError::NoFilesystem)
    ));
}

#[test]
fn missing_card() {
    let timers = Timers::new();
    let card = SimCard::new(Personality::Silent, &timers);
    let (spi, cs) = card.bus();
    let sdcard = SdCard::new(spi, cs, &timers);
    let mut source = FatImageSource::new(sdcard);
    assert!(matches!(source.open("test.txt"), Err(BootError::NoCard)));
    assert!(card.commands().is_empty());
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
