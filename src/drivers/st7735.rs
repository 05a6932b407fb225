//! ST7735S TFT LCD driver (160x128, RGB565 over SPI)
//!
//! Runs the panel in landscape. The controller has its own frame memory,
//! so there is no framebuffer here: callers select a window and stream
//! pixels into it. SPI writes block, which makes every transfer complete
//! by the time `transmit` returns.

use core::convert::Infallible;

use embedded_graphics_core::{
    draw_target::DrawTarget,
    geometry::{Dimensions, OriginDimensions, Point, Size},
    pixelcolor::raw::{RawData, RawU16},
    pixelcolor::Rgb565,
    primitives::Rectangle,
    Pixel,
};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use log::info;

use super::display::DisplaySink;

// Display dimensions (landscape)
pub const WIDTH: u16 = 160;
pub const HEIGHT: u16 = 128;

// SPI frequency
pub const SPI_FREQ_MHZ: u32 = 26;

mod cmd {
    pub const SW_RESET: u8 = 0x01;
    pub const SLEEP_OUT: u8 = 0x11;
    pub const NORMAL_ON: u8 = 0x13;
    pub const INVERT_OFF: u8 = 0x20;
    pub const DISPLAY_ON: u8 = 0x29;
    pub const COL_ADDR_SET: u8 = 0x2A;
    pub const ROW_ADDR_SET: u8 = 0x2B;
    pub const RAM_WRITE: u8 = 0x2C;
    pub const MEM_ACCESS_CTL: u8 = 0x36;
    pub const COLOR_MODE: u8 = 0x3A;
    pub const FRAME_CTL_NORMAL: u8 = 0xB1;
    pub const FRAME_CTL_IDLE: u8 = 0xB2;
    pub const FRAME_CTL_PARTIAL: u8 = 0xB3;
    pub const INVERSION_CTL: u8 = 0xB4;
    pub const POWER_CTL_1: u8 = 0xC0;
    pub const POWER_CTL_2: u8 = 0xC1;
    pub const POWER_CTL_3: u8 = 0xC2;
    pub const POWER_CTL_4: u8 = 0xC3;
    pub const POWER_CTL_5: u8 = 0xC4;
    pub const VCOM_CTL: u8 = 0xC5;
    pub const GAMMA_POS: u8 = 0xE0;
    pub const GAMMA_NEG: u8 = 0xE1;
}

// MADCTL: row/column exchange + column mirror = landscape, RGB order
const MADCTL_LANDSCAPE: u8 = 0x60;

// (command, parameters, settle time in ms)
const INIT_SEQUENCE: &[(u8, &[u8], u32)] = &[
    (cmd::SW_RESET, &[], 150),
    (cmd::SLEEP_OUT, &[], 120),
    (cmd::FRAME_CTL_NORMAL, &[0x01, 0x2C, 0x2D], 0),
    (cmd::FRAME_CTL_IDLE, &[0x01, 0x2C, 0x2D], 0),
    (cmd::FRAME_CTL_PARTIAL, &[0x01, 0x2C, 0x2D, 0x01, 0x2C, 0x2D], 0),
    (cmd::INVERSION_CTL, &[0x07], 0),
    (cmd::POWER_CTL_1, &[0xA2, 0x02, 0x84], 0),
    (cmd::POWER_CTL_2, &[0xC5], 0),
    (cmd::POWER_CTL_3, &[0x0A, 0x00], 0),
    (cmd::POWER_CTL_4, &[0x8A, 0x2A], 0),
    (cmd::POWER_CTL_5, &[0x8A, 0xEE], 0),
    (cmd::VCOM_CTL, &[0x0E], 0),
    (cmd::INVERT_OFF, &[], 0),
    (cmd::MEM_ACCESS_CTL, &[MADCTL_LANDSCAPE], 0),
    // 16 bits per pixel
    (cmd::COLOR_MODE, &[0x05], 0),
    (
        cmd::GAMMA_POS,
        &[
            0x02, 0x1C, 0x07, 0x12, 0x37, 0x32, 0x29, 0x2D, 0x29, 0x25, 0x2B, 0x39, 0x00, 0x01,
            0x03, 0x10,
        ],
        0,
    ),
    (
        cmd::GAMMA_NEG,
        &[
            0x03, 0x1D, 0x07, 0x06, 0x2E, 0x2C, 0x29, 0x2D, 0x2E, 0x2E, 0x37, 0x3F, 0x00, 0x00,
            0x02, 0x10,
        ],
        0,
    ),
    (cmd::NORMAL_ON, &[], 10),
    (cmd::DISPLAY_ON, &[], 100),
];

pub struct St7735<SPI, DC, RST> {
    spi: SPI,
    dc: DC,
    rst: RST,
}

impl<SPI, DC, RST> St7735<SPI, DC, RST>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin,
{
    pub fn new(spi: SPI, dc: DC, rst: RST) -> Self {
        Self {
            spi,
            dc,
            rst,
        }
    }

    pub fn reset(&mut self, delay: &mut impl DelayNs) {
        let _ = self.rst.set_high();
        delay.delay_ms(5);
        let _ = self.rst.set_low();
        delay.delay_ms(5);
        let _ = self.rst.set_high();
        delay.delay_ms(120);
    }

    pub fn init(&mut self, delay: &mut impl DelayNs) {
        self.reset(delay);
        for &(command, params, settle_ms) in INIT_SEQUENCE {
            self.send_command(command);
            if !params.is_empty() {
                self.send_data(params);
            }
            if settle_ms > 0 {
                delay.delay_ms(settle_ms);
            }
        }
        info!("lcd: st7735 ready ({}x{})", WIDTH, HEIGHT);
    }

    // flood a window with one colour, 32 pixels per SPI write
    fn fill_window(&mut self, x0: u16, y0: u16, x1: u16, y1: u16, color: Rgb565) {
        let be = RawU16::from(color).into_inner().to_be_bytes();
        let mut chunk = [0u8; 64];
        for px in chunk.chunks_exact_mut(2) {
            px.copy_from_slice(&be);
        }

        let mut remaining = (x1 - x0 + 1) as usize * (y1 - y0 + 1) as usize * 2;
        self.set_window(x0, y0, x1, y1);
        while remaining > 0 {
            let n = remaining.min(chunk.len());
            self.send_data(&chunk[..n]);
            remaining -= n;
        }
    }

    fn send_command(&mut self, cmd: u8) {
        let _ = self.dc.set_low();
        let _ = self.spi.write(&[cmd]);
        let _ = self.dc.set_high();
    }

    fn send_data(&mut self, data: &[u8]) {
        let _ = self.dc.set_high();
        let _ = self.spi.write(data);
    }
}

impl<SPI, DC, RST> DisplaySink for St7735<SPI, DC, RST>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin,
{
    fn set_window(&mut self, x0: u16, y0: u16, x1: u16, y1: u16) {
        let [xs_hi, xs_lo] = x0.to_be_bytes();
        let [xe_hi, xe_lo] = x1.to_be_bytes();
        let [ys_hi, ys_lo] = y0.to_be_bytes();
        let [ye_hi, ye_lo] = y1.to_be_bytes();

        self.send_command(cmd::COL_ADDR_SET);
        self.send_data(&[xs_hi, xs_lo, xe_hi, xe_lo]);
        self.send_command(cmd::ROW_ADDR_SET);
        self.send_data(&[ys_hi, ys_lo, ye_hi, ye_lo]);
        self.send_command(cmd::RAM_WRITE);
    }

    // blocking SPI: the nonblocking hint changes nothing on this bus
    fn transmit(&mut self, bytes: &[u8], _nonblocking: bool) {
        self.send_data(bytes);
    }

    fn is_idle(&self) -> bool {
        true
    }
}

impl<SPI, DC, RST> OriginDimensions for St7735<SPI, DC, RST> {
    fn size(&self) -> Size {
        Size::new(WIDTH as u32, HEIGHT as u32)
    }
}

impl<SPI, DC, RST> DrawTarget for St7735<SPI, DC, RST>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin,
{
    type Color = Rgb565;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(Point { x, y }, color) in pixels {
            if x < 0 || y < 0 || x >= WIDTH as i32 || y >= HEIGHT as i32 {
                continue;
            }
            let (x, y) = (x as u16, y as u16);
            self.set_window(x, y, x, y);
            self.send_data(&RawU16::from(color).into_inner().to_be_bytes());
        }
        Ok(())
    }

    fn fill_solid(&mut self, area: &Rectangle, color: Self::Color) -> Result<(), Self::Error> {
        let area = area.intersection(&self.bounding_box());
        if let Some(bottom_right) = area.bottom_right() {
            self.fill_window(
                area.top_left.x as u16,
                area.top_left.y as u16,
                bottom_right.x as u16,
                bottom_right.y as u16,
                color,
            );
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.fill_window(0, 0, WIDTH - 1, HEIGHT - 1, color);
        Ok(())
    }
}
