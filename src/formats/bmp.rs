// Windows bitmap header parsing and pixel conversion
//
// Uncompressed 16 (555, or 565 via bitfields), 24 and 32 bpp. Rows are
// padded to 4 bytes and stored bottom-up unless the height is negative.

use crate::drivers::storage::StorageFile;
use crate::formats::binary::{BitmapInfoHeader, le_u16, le_u32};
use crate::media::MediaError;

const FILE_HEADER_LEN: usize = 14;
// file header + BITMAPINFOHEADER + three bitfield masks
const HEADER_READ_LEN: usize = FILE_HEADER_LEN + 40 + 12;

const BI_RGB: u32 = 0;
const BI_BITFIELDS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BmpPixel {
    Rgb555,
    Rgb565,
    Bgr888,
    Bgra8888,
}

impl BmpPixel {
    pub fn bytes(self) -> usize {
        match self {
            BmpPixel::Rgb555 | BmpPixel::Rgb565 => 2,
            BmpPixel::Bgr888 => 3,
            BmpPixel::Bgra8888 => 4,
        }
    }

    #[inline]
    pub fn to_565(self, src: &[u8]) -> u16 {
        match self {
            BmpPixel::Rgb555 => {
                let v = le_u16(src, 0);
                let r = (v >> 10) & 0x1F;
                let g = (v >> 5) & 0x1F;
                let b = v & 0x1F;
                (r << 11) | (((g << 1) | (g >> 4)) << 5) | b
            }
            BmpPixel::Rgb565 => le_u16(src, 0),
            BmpPixel::Bgr888 | BmpPixel::Bgra8888 => bgr_to_565(src),
        }
    }
}

#[inline]
pub fn rgb888_to_565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

/// Pack a BGR triplet (BMP and raw AVI order) as RGB565.
#[inline]
pub fn bgr_to_565(bgr: &[u8]) -> u16 {
    rgb888_to_565(bgr[2], bgr[1], bgr[0])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BmpHeader {
    pub data_offset: u32,
    pub width: u16,
    pub height: u16,
    pub top_down: bool,
    pub pixel: BmpPixel,
    pub row_stride: u32,
}

impl BmpHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, MediaError> {
        if buf.len() < FILE_HEADER_LEN + BitmapInfoHeader::LEN || !buf.starts_with(b"BM") {
            return Err(MediaError::InvalidFormat);
        }
        let data_offset = le_u32(buf, 10);
        let bih = BitmapInfoHeader::parse(&buf[FILE_HEADER_LEN..]).ok_or(MediaError::InvalidFormat)?;

        let height = bih.height.unsigned_abs();
        if bih.width <= 0 || height == 0 || bih.width > u16::MAX as i32 || height > u16::MAX as u32 {
            return Err(MediaError::InvalidFormat);
        }

        let masks = (buf.len() >= HEADER_READ_LEN).then(|| {
            let m = FILE_HEADER_LEN + 40;
            (le_u32(buf, m), le_u32(buf, m + 4), le_u32(buf, m + 8))
        });

        let pixel = match (bih.bit_count, bih.compression) {
            (16, BI_RGB) => BmpPixel::Rgb555,
            (16, BI_BITFIELDS) => match masks {
                Some((0xF800, 0x07E0, 0x001F)) => BmpPixel::Rgb565,
                Some((0x7C00, 0x03E0, 0x001F)) => BmpPixel::Rgb555,
                _ => return Err(MediaError::UnsupportedFormat),
            },
            (24, BI_RGB) => BmpPixel::Bgr888,
            (32, BI_RGB | BI_BITFIELDS) => BmpPixel::Bgra8888,
            _ => return Err(MediaError::UnsupportedFormat),
        };

        let width = bih.width as u32;
        let row_stride = (width * bih.bit_count as u32).div_ceil(32) * 4;
        // every row must be addressable with a u32 file offset
        if data_offset as u64 + height as u64 * row_stride as u64 > u32::MAX as u64 {
            return Err(MediaError::InvalidFormat);
        }
        Ok(Self {
            data_offset,
            width: width as u16,
            height: height as u16,
            top_down: bih.height < 0,
            pixel,
            row_stride,
        })
    }

    pub fn read<F: StorageFile + ?Sized>(file: &mut F) -> Result<Self, MediaError> {
        let mut buf = [0u8; HEADER_READ_LEN];
        file.seek(0)?;
        let mut got = 0;
        while got < buf.len() {
            let n = file.read(&mut buf[got..])?;
            if n == 0 {
                break;
            }
            got += n;
        }
        Self::parse(&buf[..got])
    }

    /// File offset of image row `row` (0 = top of the picture), or
    /// `None` past the last row.
    pub fn row_offset(&self, row: u16) -> Option<u32> {
        if row >= self.height {
            return None;
        }
        let file_row = if self.top_down {
            row
        } else {
            self.height - 1 - row
        };
        (file_row as u32)
            .checked_mul(self.row_stride)?
            .checked_add(self.data_offset)
    }
}
