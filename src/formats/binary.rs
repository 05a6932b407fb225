// Little-endian field readers and RIFF chunk headers.
//
// Shared by the AVI and BMP parsers. Struct parsers take a raw payload,
// reject it if it is shorter than the fields they need, then pull each
// field from its fixed offset.

use core::fmt;

use crate::drivers::storage::{StorageError, StorageFile};

#[inline]
pub fn le_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

#[inline]
pub fn le_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[inline]
pub fn le_i32(buf: &[u8], off: usize) -> i32 {
    le_u32(buf, off) as i32
}

/// Seek to `offset` and fill `buf` completely.
pub fn read_exact_at<F: StorageFile + ?Sized>(
    file: &mut F,
    offset: u32,
    buf: &mut [u8],
) -> Result<(), StorageError> {
    file.seek(offset)?;
    file.read_exact(buf)
}

/// Four-character code tagging a RIFF chunk or list.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const RIFF: Self = Self(*b"RIFF");
    pub const AVI: Self = Self(*b"AVI ");
    pub const LIST: Self = Self(*b"LIST");
    pub const HDRL: Self = Self(*b"hdrl");
    pub const AVIH: Self = Self(*b"avih");
    pub const STRL: Self = Self(*b"strl");
    pub const STRH: Self = Self(*b"strh");
    pub const STRF: Self = Self(*b"strf");
    pub const MOVI: Self = Self(*b"movi");
    pub const IDX1: Self = Self(*b"idx1");
    pub const VIDS: Self = Self(*b"vids");

    pub fn from_slice(b: &[u8]) -> Self {
        Self([b[0], b[1], b[2], b[3]])
    }

    /// Frame data chunk: `##dc` (compressed) or `##db` (uncompressed).
    pub fn is_frame(&self) -> bool {
        matches!(&self.0[2..4], b"dc" | b"db")
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            fmt::Write::write_char(f, c)?;
        }
        Ok(())
    }
}

/// `{tag, size}` prefix of every RIFF chunk; the payload follows, padded
/// to an even length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id: FourCc,
    pub size: u32,
}

impl ChunkHeader {
    pub const LEN: u32 = 8;

    pub fn parse(buf: &[u8; 8]) -> Self {
        Self {
            id: FourCc::from_slice(&buf[0..4]),
            size: le_u32(buf, 4),
        }
    }

    pub fn read_at<F: StorageFile + ?Sized>(file: &mut F, offset: u32) -> Result<Self, StorageError> {
        let mut buf = [0u8; 8];
        read_exact_at(file, offset, &mut buf)?;
        Ok(Self::parse(&buf))
    }

    #[inline]
    pub fn padded_size(&self) -> u32 {
        self.size.saturating_add(self.size & 1)
    }

    /// Offset of the chunk after this one, for a header at `offset`.
    #[inline]
    pub fn next_offset(&self, offset: u32) -> u32 {
        offset
            .saturating_add(Self::LEN)
            .saturating_add(self.padded_size())
    }
}

/// `avih` main AVI header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MainHeader {
    pub us_per_frame: u32,
    pub total_frames: u32,
    pub width: u32,
    pub height: u32,
}

impl MainHeader {
    pub const LEN: usize = 40;

    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        Some(Self {
            us_per_frame: le_u32(buf, 0),
            total_frames: le_u32(buf, 16),
            width: le_u32(buf, 32),
            height: le_i32(buf, 36).unsigned_abs(),
        })
    }
}

/// Leading fields of an `strh` stream header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    pub fcc_type: FourCc,
    pub fcc_handler: FourCc,
}

impl StreamHeader {
    pub const LEN: usize = 8;

    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        Some(Self {
            fcc_type: FourCc::from_slice(&buf[0..4]),
            fcc_handler: FourCc::from_slice(&buf[4..8]),
        })
    }
}

/// BITMAPINFOHEADER, as found in an AVI `strf` chunk and after the
/// 14-byte BMP file header. A negative height means top-down rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BitmapInfoHeader {
    pub size: u32,
    pub width: i32,
    pub height: i32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: u32,
}

impl BitmapInfoHeader {
    pub const LEN: usize = 20;

    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        Some(Self {
            size: le_u32(buf, 0),
            width: le_i32(buf, 4),
            height: le_i32(buf, 8),
            planes: le_u16(buf, 12),
            bit_count: le_u16(buf, 14),
            compression: le_u32(buf, 16),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_padding() {
        let odd = ChunkHeader::parse(&[b'0', b'0', b'd', b'c', 3, 0, 0, 0]);
        assert!(odd.id.is_frame());
        assert_eq!(odd.padded_size(), 4);
        assert_eq!(odd.next_offset(100), 112);

        let even = ChunkHeader::parse(&[b'J', b'U', b'N', b'K', 4, 0, 0, 0]);
        assert!(!even.id.is_frame());
        assert_eq!(even.next_offset(0), 12);
    }

    #[test]
    fn main_header_takes_absolute_height() {
        let mut buf = [0u8; 56];
        buf[0..4].copy_from_slice(&33_333u32.to_le_bytes());
        buf[16..20].copy_from_slice(&90u32.to_le_bytes());
        buf[32..36].copy_from_slice(&160u32.to_le_bytes());
        buf[36..40].copy_from_slice(&(-120i32).to_le_bytes());
        let h = MainHeader::parse(&buf).unwrap();
        assert_eq!(h.us_per_frame, 33_333);
        assert_eq!(h.total_frames, 90);
        assert_eq!((h.width, h.height), (160, 120));
        assert!(MainHeader::parse(&buf[..39]).is_none());
    }

    #[test]
    fn bitmap_info_fields() {
        let mut buf = [0u8; 40];
        buf[0..4].copy_from_slice(&40u32.to_le_bytes());
        buf[4..8].copy_from_slice(&64i32.to_le_bytes());
        buf[8..12].copy_from_slice(&(-48i32).to_le_bytes());
        buf[14..16].copy_from_slice(&24u16.to_le_bytes());
        let h = BitmapInfoHeader::parse(&buf).unwrap();
        assert_eq!((h.width, h.height, h.bit_count), (64, -48, 24));
        assert_eq!(h.compression, 0);
    }
}
