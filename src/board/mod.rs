//! Board support for the ESP32-C3 media handheld.
//!
//! Maps the physical hardware to named subsystems: a 160x128 ST7735 LCD
//! and a microSD slot sharing SPI2, plus the LCD backlight. Nothing else
//! in the firmware needs to know GPIO numbers or bus wiring.

pub mod pins;
pub mod raw_gpio;

use core::cell::RefCell;

use embedded_hal_bus::spi::RefCellDevice;
use esp_hal::{
    Blocking,
    delay::Delay,
    gpio::{Level, Output, OutputConfig},
    peripherals::Peripherals,
    spi,
    time::Rate,
};
use log::info;
use static_cell::StaticCell;

use crate::drivers::sdcard::{SD_INIT_FREQ_HZ, SD_NORMAL_FREQ_HZ, SdStorage};
use crate::drivers::st7735::{SPI_FREQ_MHZ, St7735};
use raw_gpio::RawOutputPin;

// Type Aliases
pub type SpiBus = spi::master::Spi<'static, Blocking>;
pub type LcdSpi = RefCellDevice<'static, SpiBus, Output<'static>, Delay>;
pub type SdSpi = RefCellDevice<'static, SpiBus, RawOutputPin, Delay>;
pub type Lcd = St7735<LcdSpi, Output<'static>, Output<'static>>;
pub type Sd = SdStorage<SdSpi, Delay>;

static SPI_BUS: StaticCell<RefCell<SpiBus>> = StaticCell::new();

/// Complete board hardware. The LCD is initialised and lit.
pub struct Board {
    pub lcd: Lcd,
    pub sd: Sd,
    pub backlight: Output<'static>,
}

impl Board {
    pub fn init(p: Peripherals) -> Result<Self, &'static str> {
        // LCD pins first so its chip select is high before the bus talks
        let lcd_cs = Output::new(p.GPIO21, Level::High, OutputConfig::default());
        let dc = Output::new(p.GPIO4, Level::High, OutputConfig::default());
        let rst = Output::new(p.GPIO5, Level::High, OutputConfig::default());
        let backlight = Output::new(p.GPIO6, Level::Low, OutputConfig::default());
        // SAFETY: GPIO12 is free in DIO flash mode and used for nothing else
        let sd_cs = unsafe { RawOutputPin::new(pins::SD_CS) };

        // SD cards must be initialised at 400 kHz or below
        let slow = spi::master::Config::default().with_frequency(Rate::from_hz(SD_INIT_FREQ_HZ));
        let bus = spi::master::Spi::new(p.SPI2, slow)
            .map_err(|_| "spi2 config rejected")?
            .with_sck(p.GPIO8)
            .with_mosi(p.GPIO10)
            .with_miso(p.GPIO7);
        let bus: &'static RefCell<SpiBus> = SPI_BUS.init(RefCell::new(bus));

        let sd_dev = RefCellDevice::new(bus, sd_cs, Delay::new()).map_err(|_| "sd cs")?;
        let sd = SdStorage::new(sd_dev, Delay::new());

        // both devices share one clock; run it at what both can take
        let fast_hz = SD_NORMAL_FREQ_HZ.min(SPI_FREQ_MHZ * 1_000_000);
        let fast = spi::master::Config::default().with_frequency(Rate::from_hz(fast_hz));
        bus.borrow_mut()
            .apply_config(&fast)
            .map_err(|_| "spi2 fast config rejected")?;
        info!("board: spi2 at {} kHz", fast_hz / 1000);

        let lcd_dev = RefCellDevice::new(bus, lcd_cs, Delay::new()).map_err(|_| "lcd cs")?;
        let mut lcd = St7735::new(lcd_dev, dc, rst);
        lcd.init(&mut Delay::new());

        let mut board = Board { lcd, sd, backlight };
        board.backlight.set_high();
        Ok(board)
    }
}
