// SD card over SPI with FAT volume manager
// No RTC on board; timestamps are fixed to 2025-01-01.

use core::cell::Cell;

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiDevice;
use embedded_sdmmc::{RawVolume, SdCard, TimeSource, Timestamp, VolumeManager};
use log::info;

#[derive(Default, Clone, Copy)]
pub struct DummyTimeSource;

impl TimeSource for DummyTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 55,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

// card init must run at 400 kHz or below
pub const SD_INIT_FREQ_HZ: u32 = 400_000;
// bus speed once the card is up
pub const SD_NORMAL_FREQ_HZ: u32 = 20_000_000;

pub struct SdStorage<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    pub volume_mgr: VolumeManager<SdCard<SPI, D>, DummyTimeSource>,
    // volume 0 stays open once mounted so several files can be open at once
    pub(crate) volume: Cell<Option<RawVolume>>,
}

impl<SPI, D> SdStorage<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    pub fn new(spi: SPI, delay: D) -> Self {
        let sdcard = SdCard::new(spi, delay);

        // probing triggers the SD init sequence (CMD0, CMD8, ACMD41)
        match sdcard.num_bytes() {
            Ok(bytes) => info!("sd: {} bytes ({} MB)", bytes, bytes / 1024 / 1024),
            Err(e) => info!("sd: probe failed: {:?}", e),
        }

        let volume_mgr = VolumeManager::new(sdcard, DummyTimeSource);
        Self {
            volume_mgr,
            volume: Cell::new(None),
        }
    }
}
