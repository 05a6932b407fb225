//! GPIO |     Function    |      Notes
//! -----+-----------------+----------------------------------
//!  4   | LCD DC          | Data/Command select
//!  5   | LCD RST         | Reset (active low)
//!  6   | LCD BL          | Backlight enable (active high)
//!  7   | SPI2 MISO       | SD card data out (LCD is write-only)
//!  8   | SPI2 SCK        | Shared SPI clock
//! 10   | SPI2 MOSI       | Shared SPI data out
//! 12   | SD CS           | Freed by DIO flash mode, driven raw
//! 21   | LCD CS          | LCD chip select

// ----- ST7735 LCD -----
pub const LCD_CS: u8 = 21;
pub const LCD_DC: u8 = 4;
pub const LCD_RST: u8 = 5;
pub const LCD_BACKLIGHT: u8 = 6;

// ----- SD Card -----
pub const SD_CS: u8 = 12;

// ----- SPI Bus (shared: LCD + SD) -----
pub const SPI_SCK: u8 = 8;
pub const SPI_MOSI: u8 = 10;
pub const SPI_MISO: u8 = 7;
