// Still images streamed straight from storage to the display
//
// Bitmaps and raw 565 dumps go through the row pipeline one source row
// at a time; JPEGs go through the codec adapter block by block. Nothing
// frame-sized is ever allocated.
//
// display_streaming() is the combined entry point. Its last four
// arguments mean different things per format:
//
//   bitmap   (a, b, c, d) = source rectangle (x, y, w, h); 0 for w or h
//            means "to the right/bottom edge"
//   jpeg     c = decode scale (0..=3, larger values mean 0); a, b, d unused
//   raw 565  all unused
//
// show_bitmap(), show_jpeg() and show_raw() are the same operations
// with typed arguments.

use alloc::string::String;
use alloc::vec::Vec;

use log::{info, warn};

use crate::drivers::display::DisplaySink;
use crate::drivers::storage::{Storage, StorageFile};
use crate::formats::avi::{CodecKind, byte_order_hint};
use crate::formats::bmp::BmpHeader;
use crate::formats::detect::{MediaFormat, check_signature, detect};
use crate::media::MediaError;
use crate::media::codec::{BlockDecoder, FramePull, MAX_SCALE, ScaleMode, decode_jpeg};
use crate::media::pipeline::{Scratch, Window, stream_rows};

/// Source rectangle of a bitmap; zero width or height runs to the edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Region {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

impl Region {
    /// The whole image.
    pub const FULL: Region = Region { x: 0, y: 0, w: 0, h: 0 };

    // clip-free resolution against the image size
    fn resolve(self, width: u16, height: u16) -> Result<Region, MediaError> {
        if self.x >= width || self.y >= height {
            return Err(MediaError::InvalidParameter);
        }
        let w = if self.w == 0 { width - self.x } else { self.w };
        let h = if self.h == 0 { height - self.y } else { self.h };
        if self.x as u32 + w as u32 > width as u32 || self.y as u32 + h as u32 > height as u32 {
            return Err(MediaError::InvalidParameter);
        }
        Ok(Region { x: self.x, y: self.y, w, h })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StillImageInfo {
    pub path: String,
    pub width: u16,
    pub height: u16,
    pub format: MediaFormat,
    pub file_size: u32,
    /// First pixel byte (bitmaps); 0 for other formats.
    pub data_offset: u32,
}

impl StillImageInfo {
    /// Read the geometry of `path` without drawing it. Raw 565 files have
    /// no header; their size is guessed to fit within `bounds`.
    pub fn probe<S, J>(
        storage: &S,
        decoder: &mut J,
        path: &str,
        bounds: (u16, u16),
    ) -> Result<Self, MediaError>
    where
        S: Storage,
        J: BlockDecoder + ?Sized,
    {
        let format = detect(path)?;
        let mut file = storage.open(path)?;
        let file_size = file.size();

        let (width, height, data_offset) = match format {
            MediaFormat::Bitmap => {
                let hdr = BmpHeader::read(&mut file)?;
                (hdr.width, hdr.height, hdr.data_offset)
            }
            MediaFormat::Jpeg => {
                check_jpeg(&mut file)?;
                let mut src = FramePull::new(&mut file, file_size);
                let dims = decoder.prepare(&mut src);
                if let Some(e) = src.error() {
                    return Err(e.into());
                }
                let (w, h) = dims?;
                (w, h, 0)
            }
            MediaFormat::Raw565 => {
                let (w, h) = raw_dims(file_size, bounds).ok_or(MediaError::InvalidFormat)?;
                (w, h, 0)
            }
            MediaFormat::Avi => return Err(MediaError::UnsupportedFormat),
        };

        Ok(Self {
            path: String::from(path),
            width,
            height,
            format,
            file_size,
            data_offset,
        })
    }
}

/// Widest `w` no larger than `bounds.0` that splits a raw file of
/// `len` bytes into whole rows, with no more than `bounds.1` of them.
pub fn raw_dims(len: u32, bounds: (u16, u16)) -> Option<(u16, u16)> {
    if len == 0 || len % 2 != 0 {
        return None;
    }
    let pixels = len / 2;
    (1..=bounds.0 as u32)
        .rev()
        .find(|&w| pixels % w == 0 && pixels / w <= bounds.1 as u32)
        .map(|w| (w as u16, (pixels / w) as u16))
}

/// Draw a region of a bitmap with its top-left corner at `(x, y)`.
/// Returns the drawn size.
pub fn show_bitmap<S, D>(
    storage: &S,
    display: &mut D,
    path: &str,
    x: u16,
    y: u16,
    region: Region,
) -> Result<(u16, u16), MediaError>
where
    S: Storage,
    D: DisplaySink + ?Sized,
{
    let mut file = storage.open(path)?;
    let hdr = BmpHeader::read(&mut file)?;
    let src = region.resolve(hdr.width, hdr.height)?;
    let window = Window { x, y, w: src.w, h: src.h };
    if !window.fits(display.surface()) {
        warn!("image: {}x{} at ({}, {}) is off screen", src.w, src.h, x, y);
        return Err(MediaError::InvalidParameter);
    }

    let px_bytes = hdr.pixel.bytes();
    let mut row_in = Vec::new();
    row_in
        .try_reserve_exact(src.w as usize * px_bytes)
        .map_err(|_| MediaError::MemoryAllocationFailed)?;
    row_in.resize(src.w as usize * px_bytes, 0);

    let mut scratch = Scratch::new();
    stream_rows(display, window, src.w as usize * 2, &mut scratch, |row, buf| {
        let at = hdr
            .row_offset(src.y + row)
            .and_then(|off| off.checked_add(src.x as u32 * px_bytes as u32))
            .ok_or(MediaError::InvalidFormat)?;
        file.seek(at)?;
        file.read_exact(&mut row_in)?;
        for (dst, px) in buf.chunks_exact_mut(2).zip(row_in.chunks_exact(px_bytes)) {
            dst.copy_from_slice(&hdr.pixel.to_565(px).to_be_bytes());
        }
        Ok(())
    })?;

    info!("image: {} {}x{} at ({}, {})", path, src.w, src.h, x, y);
    Ok((src.w, src.h))
}

/// Decode a JPEG at 1/2^`scale` with its top-left corner at `(x, y)`.
/// The scaled image must fit on the surface. Returns the drawn size.
pub fn show_jpeg<S, D, J>(
    storage: &S,
    display: &mut D,
    decoder: &mut J,
    path: &str,
    x: u16,
    y: u16,
    scale: u8,
) -> Result<(u16, u16), MediaError>
where
    S: Storage,
    D: DisplaySink + ?Sized,
    J: BlockDecoder + ?Sized,
{
    if scale > MAX_SCALE {
        return Err(MediaError::InvalidParameter);
    }
    let mut file = storage.open(path)?;
    check_jpeg(&mut file)?;
    let size = file.size();

    let mut scratch = Scratch::new();
    let drawn = decode_jpeg(
        &mut file,
        0,
        size,
        decoder,
        display,
        &mut scratch,
        (x, y),
        ScaleMode::Fixed(scale),
    )?;
    info!("image: {} {}x{} at ({}, {}) scale 1/{}", path, drawn.0, drawn.1, x, y, 1 << scale);
    Ok(drawn)
}

/// Draw a headerless RGB565 dump. The size is inferred from the file
/// length and the space right of and below `(x, y)`. Data is taken as
/// little-endian unless the name carries a `565be` hint.
pub fn show_raw<S, D>(
    storage: &S,
    display: &mut D,
    path: &str,
    x: u16,
    y: u16,
) -> Result<(u16, u16), MediaError>
where
    S: Storage,
    D: DisplaySink + ?Sized,
{
    let (sw, sh) = display.surface();
    if x >= sw || y >= sh {
        return Err(MediaError::InvalidParameter);
    }
    let mut file = storage.open(path)?;
    let Some((w, h)) = raw_dims(file.size(), (sw - x, sh - y)) else {
        warn!("image: {}: {} bytes is no raw 565 frame that fits", path, file.size());
        return Err(MediaError::InvalidFormat);
    };
    let swap = byte_order_hint(path) != Some(CodecKind::Raw565Big);

    file.seek(0)?;
    let mut scratch = Scratch::new();
    stream_rows(display, Window { x, y, w, h }, w as usize * 2, &mut scratch, |_, buf| {
        file.read_exact(buf)?;
        if swap {
            for px in buf.chunks_exact_mut(2) {
                px.swap(0, 1);
            }
        }
        Ok(())
    })?;

    info!("image: {} raw {}x{} at ({}, {})", path, w, h, x, y);
    Ok((w, h))
}

/// Draw any supported still image; see the module notes for what
/// `a`..`d` mean per format.
#[allow(clippy::too_many_arguments)]
pub fn display_streaming<S, D, J>(
    storage: &S,
    display: &mut D,
    decoder: &mut J,
    path: &str,
    x: u16,
    y: u16,
    a: u16,
    b: u16,
    c: u16,
    d: u16,
) -> Result<(), MediaError>
where
    S: Storage,
    D: DisplaySink + ?Sized,
    J: BlockDecoder + ?Sized,
{
    match detect(path)? {
        MediaFormat::Bitmap => {
            show_bitmap(storage, display, path, x, y, Region { x: a, y: b, w: c, h: d })?;
        }
        MediaFormat::Jpeg => {
            let scale = if c > MAX_SCALE as u16 { 0 } else { c as u8 };
            show_jpeg(storage, display, decoder, path, x, y, scale)?;
        }
        MediaFormat::Raw565 => {
            show_raw(storage, display, path, x, y)?;
        }
        MediaFormat::Avi => return Err(MediaError::UnsupportedFormat),
    }
    Ok(())
}

fn check_jpeg<F: StorageFile + ?Sized>(file: &mut F) -> Result<(), MediaError> {
    let mut soi = [0u8; 2];
    file.seek(0)?;
    file.read_exact(&mut soi).map_err(|_| MediaError::InvalidFormat)?;
    check_signature(MediaFormat::Jpeg, &soi)?;
    file.seek(0)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeDecoder, FakeDisplay, MemStorage, bmp_file};

    fn colour(x: u16, y: u16) -> (u8, u8, u8) {
        ((x * 40) as u8, (y * 40) as u8, 0x80)
    }

    fn wire(x: u16, y: u16) -> [u8; 2] {
        let (r, g, b) = colour(x, y);
        crate::formats::bmp::rgb888_to_565(r, g, b).to_be_bytes()
    }

    #[test]
    fn bitmap_region_maps_source_rows() {
        let mut sd = MemStorage::new();
        sd.insert("PIC.BMP", &bmp_file(6, 5, 24, colour));
        let mut lcd = FakeDisplay::new(160, 128).with_latency(2);

        let drawn = show_bitmap(&sd, &mut lcd, "PIC.BMP", 10, 20, Region { x: 2, y: 1, w: 3, h: 2 }).unwrap();
        assert_eq!(drawn, (3, 2));
        assert_eq!(lcd.windows, vec![(10, 20, 12, 21)]);
        assert_eq!(lcd.transfers.len(), 2);
        // second screen row is source row 2, columns 2..5
        let want: Vec<u8> = (2..5).flat_map(|x| wire(x, 2)).collect();
        assert_eq!(lcd.transfers[1], want);
        assert_eq!(lcd.overlaps, 0);
    }

    #[test]
    fn zero_size_region_runs_to_the_edge() {
        let mut sd = MemStorage::new();
        sd.insert("TD.BMP", &bmp_file(4, -3, 32, colour));
        let mut lcd = FakeDisplay::new(160, 128);
        let drawn = show_bitmap(&sd, &mut lcd, "TD.BMP", 0, 0, Region { x: 1, y: 1, w: 0, h: 0 }).unwrap();
        assert_eq!(drawn, (3, 2));
        let want: Vec<u8> = (1..4).flat_map(|x| wire(x, 1)).collect();
        assert_eq!(lcd.transfers[0], want);
    }

    #[test]
    fn bitmap_bounds_are_checked() {
        let mut sd = MemStorage::new();
        sd.insert("PIC.BMP", &bmp_file(6, 5, 16, colour));
        let mut lcd = FakeDisplay::new(160, 128);
        let off_image = Region { x: 4, y: 0, w: 3, h: 1 };
        assert_eq!(show_bitmap(&sd, &mut lcd, "PIC.BMP", 0, 0, off_image), Err(MediaError::InvalidParameter));
        assert_eq!(
            show_bitmap(&sd, &mut lcd, "PIC.BMP", 0, 0, Region { x: 6, ..Region::FULL }),
            Err(MediaError::InvalidParameter)
        );
        assert_eq!(show_bitmap(&sd, &mut lcd, "PIC.BMP", 155, 0, Region::FULL), Err(MediaError::InvalidParameter));
        assert!(lcd.transfers.is_empty());
        assert_eq!(show_bitmap(&sd, &mut lcd, "PIC.BMP", 154, 123, Region::FULL), Ok((6, 5)));
    }

    #[test]
    fn oversized_bitmap_header_is_rejected() {
        let mut bmp = bmp_file(4, 4, 32, colour);
        bmp[18..22].copy_from_slice(&60_000i32.to_le_bytes());
        bmp[22..26].copy_from_slice(&60_000i32.to_le_bytes());
        let mut sd = MemStorage::new();
        sd.insert("HUGE.BMP", &bmp);
        let mut lcd = FakeDisplay::new(160, 128);
        let corner = Region { x: 0, y: 0, w: 4, h: 4 };
        assert_eq!(show_bitmap(&sd, &mut lcd, "HUGE.BMP", 0, 0, corner), Err(MediaError::InvalidFormat));
        assert!(lcd.transfers.is_empty());
    }

    #[test]
    fn jpeg_scale_and_fit() {
        let mut sd = MemStorage::new();
        sd.insert("PHOTO.JPG", &[0xFF, 0xD8, 0x12, 0x34]);
        let mut lcd = FakeDisplay::new(160, 128);
        let mut dec = FakeDecoder::new(320, 256);

        assert_eq!(
            show_jpeg(&sd, &mut lcd, &mut dec, "PHOTO.JPG", 0, 0, 0),
            Err(MediaError::InvalidParameter)
        );
        assert_eq!(show_jpeg(&sd, &mut lcd, &mut dec, "PHOTO.JPG", 0, 0, 1), Ok((160, 128)));
        assert_eq!(lcd.pixel_count(), 160 * 128);
        assert_eq!(&lcd.transfers[0][..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn jpeg_signature_is_checked() {
        let mut sd = MemStorage::new();
        sd.insert("FAKE.JPG", b"BM....");
        let mut lcd = FakeDisplay::new(160, 128);
        let mut dec = FakeDecoder::new(8, 8);
        assert_eq!(
            show_jpeg(&sd, &mut lcd, &mut dec, "FAKE.JPG", 0, 0, 0),
            Err(MediaError::InvalidFormat)
        );
        assert!(dec.log().borrow().is_empty());
    }

    #[test]
    fn raw_dimensions_prefer_the_widest_fit() {
        assert_eq!(raw_dims(160 * 128 * 2, (160, 128)), Some((160, 128)));
        assert_eq!(raw_dims(100 * 2, (160, 128)), Some((100, 1)));
        assert_eq!(raw_dims(64 * 64 * 2, (160, 128)), Some((128, 32)));
        assert_eq!(raw_dims(7, (160, 128)), None);
        // a prime pixel count wider than the screen has no layout
        assert_eq!(raw_dims(163 * 2, (160, 128)), None);
    }

    #[test]
    fn raw_files_default_to_little_endian() {
        let mut sd = MemStorage::new();
        sd.insert("SPLASH.565", &[0x1F, 0xF8, 0x00, 0x07]);
        sd.insert("SPLASH565BE.RAW", &[0xF8, 0x1F, 0x07, 0x00]);
        let mut lcd = FakeDisplay::new(2, 2);
        assert_eq!(show_raw(&sd, &mut lcd, "SPLASH.565", 0, 0), Ok((2, 1)));
        assert_eq!(show_raw(&sd, &mut lcd, "SPLASH565BE.RAW", 0, 1), Ok((2, 1)));
        assert_eq!(lcd.transfers[0], vec![0xF8, 0x1F, 0x07, 0x00]);
        assert_eq!(lcd.transfers[1], vec![0xF8, 0x1F, 0x07, 0x00]);
        assert_eq!(show_raw(&sd, &mut lcd, "SPLASH.565", 2, 0), Err(MediaError::InvalidParameter));
    }

    #[test]
    fn combined_entry_point_maps_arguments() {
        let mut sd = MemStorage::new();
        sd.insert("PIC.BMP", &bmp_file(6, 5, 24, colour));
        sd.insert("PHOTO.JPG", &[0xFF, 0xD8, 0, 0]);
        sd.insert("CLIP.AVI", b"RIFF");
        let mut lcd = FakeDisplay::new(160, 128);
        let mut dec = FakeDecoder::new(64, 64);

        display_streaming(&sd, &mut lcd, &mut dec, "PIC.BMP", 0, 0, 1, 1, 2, 2).unwrap();
        assert_eq!(lcd.windows, vec![(0, 0, 1, 1)]);

        // scale 9 is out of range and means full size
        display_streaming(&sd, &mut lcd, &mut dec, "PHOTO.JPG", 0, 0, 7, 7, 9, 7).unwrap();
        assert_eq!(dec.last_scale(), Some(0));
        display_streaming(&sd, &mut lcd, &mut dec, "PHOTO.JPG", 0, 0, 0, 0, 2, 0).unwrap();
        assert_eq!(dec.last_scale(), Some(2));

        assert_eq!(
            display_streaming(&sd, &mut lcd, &mut dec, "CLIP.AVI", 0, 0, 0, 0, 0, 0),
            Err(MediaError::UnsupportedFormat)
        );
        assert_eq!(
            display_streaming(&sd, &mut lcd, &mut dec, "LOGO.PNG", 0, 0, 0, 0, 0, 0),
            Err(MediaError::UnsupportedFormat)
        );
    }

    #[test]
    fn probe_reports_geometry() {
        let mut sd = MemStorage::new();
        sd.insert("PIC.BMP", &bmp_file(6, 5, 24, colour));
        sd.insert("PHOTO.JPG", &[0xFF, 0xD8, 0, 0]);
        sd.insert("DUMP.RAW", &[0u8; 40 * 30 * 2]);
        let mut dec = FakeDecoder::new(640, 480);

        let bmp = StillImageInfo::probe(&sd, &mut dec, "PIC.BMP", (160, 128)).unwrap();
        assert_eq!((bmp.width, bmp.height, bmp.data_offset), (6, 5, 54));
        let jpg = StillImageInfo::probe(&sd, &mut dec, "PHOTO.JPG", (160, 128)).unwrap();
        assert_eq!((jpg.width, jpg.height, jpg.format), (640, 480, MediaFormat::Jpeg));
        let raw = StillImageInfo::probe(&sd, &mut dec, "DUMP.RAW", (40, 30)).unwrap();
        assert_eq!((raw.width, raw.height), (40, 30));
        assert_eq!(raw.file_size, 2400);
    }
}
