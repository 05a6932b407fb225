// Host-side fakes for the media tests: an in-memory SD card, a recording
// display, a manual clock, a scripted block decoder and byte builders
// for AVI and BMP files.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use embedded_graphics_core::geometry::{OriginDimensions, Size};

use crate::drivers::display::DisplaySink;
use crate::drivers::storage::{Storage, StorageError, StorageFile};
use crate::kernel::Clock;
use crate::media::MediaError;
use crate::media::codec::{BlockDecoder, BlockSink, ByteSource, Rect, scaled_size};

// storage

pub struct MemEntry {
    name: String,
    data: Vec<u8>,
    // any read touching this offset or beyond fails
    fail_at: Option<u32>,
    fail_all: Cell<bool>,
}

#[derive(Default)]
pub struct MemStorage {
    entries: Vec<MemEntry>,
}

fn key(path: &str) -> String {
    path.trim_start_matches('/').to_ascii_uppercase()
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, data: &[u8]) {
        self.insert_entry(name, data, None);
    }

    pub fn insert_failing(&mut self, name: &str, data: &[u8], fail_at: u32) {
        self.insert_entry(name, data, Some(fail_at));
    }

    /// Make every later read of `name` fail (or succeed again).
    pub fn fail_reads(&self, name: &str, fail: bool) {
        if let Some(e) = self.entries.iter().find(|e| e.name == key(name)) {
            e.fail_all.set(fail);
        }
    }

    fn insert_entry(&mut self, name: &str, data: &[u8], fail_at: Option<u32>) {
        let name = key(name);
        self.entries.retain(|e| e.name != name);
        self.entries.push(MemEntry {
            name,
            data: data.to_vec(),
            fail_at,
            fail_all: Cell::new(false),
        });
    }
}

pub struct MemFile<'a> {
    entry: &'a MemEntry,
    pos: u32,
}

impl Storage for MemStorage {
    type File<'a> = MemFile<'a>;

    fn open<'a>(&'a self, path: &str) -> Result<MemFile<'a>, StorageError> {
        let name = key(path);
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|entry| MemFile { entry, pos: 0 })
            .ok_or(StorageError::NotFound)
    }
}

impl StorageFile for MemFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        if self.entry.fail_all.get() {
            return Err(StorageError::ReadFailed);
        }
        let len = self.entry.data.len() as u32;
        let n = buf.len().min(len.saturating_sub(self.pos) as usize);
        if n == 0 {
            return Ok(0);
        }
        if let Some(at) = self.entry.fail_at
            && self.pos + n as u32 > at
        {
            return Err(StorageError::ReadFailed);
        }
        let start = self.pos as usize;
        buf[..n].copy_from_slice(&self.entry.data[start..start + n]);
        self.pos += n as u32;
        Ok(n)
    }

    fn seek(&mut self, offset: u32) -> Result<(), StorageError> {
        if offset as usize > self.entry.data.len() {
            return Err(StorageError::SeekFailed);
        }
        self.pos = offset;
        Ok(())
    }

    fn tell(&self) -> u32 {
        self.pos
    }

    fn size(&self) -> u32 {
        self.entry.data.len() as u32
    }
}

// display

/// Records windows and transfers. A nonblocking transfer stays busy for
/// `latency` is_idle() queries; starting another transfer or changing
/// the window while busy counts as an overlap.
pub struct FakeDisplay {
    width: u16,
    height: u16,
    latency: u32,
    busy: Cell<u32>,
    pub windows: Vec<(u16, u16, u16, u16)>,
    pub transfers: Vec<Vec<u8>>,
    pub overlaps: u32,
}

impl FakeDisplay {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            latency: 1,
            busy: Cell::new(0),
            windows: Vec::new(),
            transfers: Vec::new(),
            overlaps: 0,
        }
    }

    pub fn with_latency(mut self, polls: u32) -> Self {
        self.latency = polls;
        self
    }

    pub fn pixel_count(&self) -> usize {
        self.transfers.iter().map(|t| t.len() / 2).sum()
    }
}

impl OriginDimensions for FakeDisplay {
    fn size(&self) -> Size {
        Size::new(self.width as u32, self.height as u32)
    }
}

impl DisplaySink for FakeDisplay {
    fn set_window(&mut self, x0: u16, y0: u16, x1: u16, y1: u16) {
        if self.busy.get() > 0 {
            self.overlaps += 1;
        }
        self.windows.push((x0, y0, x1, y1));
    }

    fn transmit(&mut self, bytes: &[u8], nonblocking: bool) {
        if self.busy.get() > 0 {
            self.overlaps += 1;
        }
        self.transfers.push(bytes.to_vec());
        self.busy.set(if nonblocking { self.latency } else { 0 });
    }

    fn is_idle(&self) -> bool {
        let busy = self.busy.get();
        if busy > 0 {
            self.busy.set(busy - 1);
        }
        busy == 0
    }
}

// clock

/// Manual clock; every relax() call lets one millisecond pass.
#[derive(Default)]
pub struct FakeClock {
    now: Cell<u32>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: u32) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u32 {
        self.now.get()
    }

    fn relax(&self) {
        self.advance(1);
    }
}

// decoder

/// Stands in for the JPEG decoder. prepare() swallows the whole input
/// and logs it; decompress() paints 8x8 tiles in a colour taken from the
/// first two input bytes.
pub struct FakeDecoder {
    width: u16,
    height: u16,
    fail: bool,
    colour: u16,
    scale: Option<u8>,
    log: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl FakeDecoder {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            fail: false,
            colour: 0,
            scale: None,
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Prepares fine, fails in decompress().
    pub fn failing(width: u16, height: u16) -> Self {
        Self {
            fail: true,
            ..Self::new(width, height)
        }
    }

    /// Input bytes seen by each prepare() call.
    pub fn log(&self) -> Rc<RefCell<Vec<Vec<u8>>>> {
        self.log.clone()
    }

    pub fn last_scale(&self) -> Option<u8> {
        self.scale
    }
}

impl BlockDecoder for FakeDecoder {
    fn prepare(&mut self, src: &mut dyn ByteSource) -> Result<(u16, u16), MediaError> {
        let mut seen = Vec::new();
        let mut buf = [0u8; 8];
        loop {
            let n = src.pull(&mut buf);
            if n == 0 {
                break;
            }
            seen.extend_from_slice(&buf[..n]);
        }
        self.colour = match seen.as_slice() {
            [a, b, ..] => u16::from_be_bytes([*a, *b]),
            _ => 0,
        };
        self.log.borrow_mut().push(seen);
        Ok((self.width, self.height))
    }

    fn decompress(
        &mut self,
        _src: &mut dyn ByteSource,
        sink: &mut dyn BlockSink,
        scale: u8,
    ) -> Result<(), MediaError> {
        self.scale = Some(scale);
        if self.fail {
            return Err(MediaError::DecodeFailed);
        }
        let (w, h) = scaled_size(self.width, self.height, scale);
        for top in (0..h).step_by(8) {
            for left in (0..w).step_by(8) {
                let rect = Rect {
                    left,
                    top,
                    right: (left + 8).min(w) - 1,
                    bottom: (top + 8).min(h) - 1,
                };
                let px = vec![self.colour; rect.width() as usize * rect.height() as usize];
                if !sink.push(&rect, &px) {
                    return Err(MediaError::DecodeFailed);
                }
            }
        }
        Ok(())
    }
}

// byte builders

/// 565 test card with smooth gradients in every channel.
pub fn gradient_565(w: u16, h: u16, to_bytes: fn(u16) -> [u8; 2]) -> Vec<u8> {
    let mut out = Vec::with_capacity(w as usize * h as usize * 2);
    for y in 0..h {
        for x in 0..w {
            let r = (x + y) % 32;
            let g = (2 * x + y) % 64;
            let b = (2 * y + x) % 32;
            out.extend_from_slice(&to_bytes((r << 11) | (g << 5) | b));
        }
    }
    out
}

fn chunk(out: &mut Vec<u8>, tag: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(tag);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    if data.len() % 2 == 1 {
        out.push(0);
    }
}

fn list(out: &mut Vec<u8>, kind: &[u8; 4], body: &[u8]) {
    let mut payload = kind.to_vec();
    payload.extend_from_slice(body);
    chunk(out, b"LIST", &payload);
}

enum Movi {
    Frame(Vec<u8>),
    Other([u8; 4], Vec<u8>),
}

/// Builds a one-stream AVI file.
pub struct AviBuilder {
    width: u16,
    height: u16,
    avih_dims: Option<(u16, u16)>,
    fps: u32,
    declared: Option<u32>,
    handler: [u8; 4],
    bit_count: u16,
    hdrl: bool,
    movi: Vec<Movi>,
}

impl AviBuilder {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            avih_dims: None,
            fps: 30,
            declared: None,
            handler: [0; 4],
            bit_count: 16,
            hdrl: true,
            movi: Vec::new(),
        }
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn declared(mut self, frames: u32) -> Self {
        self.declared = Some(frames);
        self
    }

    pub fn handler(mut self, fourcc: [u8; 4]) -> Self {
        self.handler = fourcc;
        self
    }

    pub fn bit_count(mut self, bits: u16) -> Self {
        self.bit_count = bits;
        self
    }

    pub fn avih_dims(mut self, width: u16, height: u16) -> Self {
        self.avih_dims = Some((width, height));
        self
    }

    pub fn without_hdrl(mut self) -> Self {
        self.hdrl = false;
        self
    }

    pub fn frame(mut self, data: &[u8]) -> Self {
        self.movi.push(Movi::Frame(data.to_vec()));
        self
    }

    pub fn junk(mut self, tag: &[u8; 4], data: &[u8]) -> Self {
        self.movi.push(Movi::Other(*tag, data.to_vec()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let frame_tag: &[u8; 4] = if self.handler.eq_ignore_ascii_case(b"mjpg") {
            b"00dc"
        } else {
            b"00db"
        };
        let frames = self
            .movi
            .iter()
            .filter(|m| matches!(m, Movi::Frame(_)))
            .count() as u32;

        let (aw, ah) = self.avih_dims.unwrap_or((self.width, self.height));
        let mut avih = vec![0u8; 56];
        let us = if self.fps == 0 { 0 } else { 1_000_000 / self.fps };
        avih[0..4].copy_from_slice(&us.to_le_bytes());
        avih[16..20].copy_from_slice(&self.declared.unwrap_or(frames).to_le_bytes());
        avih[24..28].copy_from_slice(&1u32.to_le_bytes());
        avih[32..36].copy_from_slice(&(aw as u32).to_le_bytes());
        avih[36..40].copy_from_slice(&(ah as u32).to_le_bytes());

        let mut strh = vec![0u8; 56];
        strh[0..4].copy_from_slice(b"vids");
        strh[4..8].copy_from_slice(&self.handler);

        let mut strf = vec![0u8; 40];
        strf[0..4].copy_from_slice(&40u32.to_le_bytes());
        strf[4..8].copy_from_slice(&(self.width as i32).to_le_bytes());
        strf[8..12].copy_from_slice(&(self.height as i32).to_le_bytes());
        strf[12..14].copy_from_slice(&1u16.to_le_bytes());
        strf[14..16].copy_from_slice(&self.bit_count.to_le_bytes());

        let mut strl = Vec::new();
        chunk(&mut strl, b"strh", &strh);
        chunk(&mut strl, b"strf", &strf);
        let mut hdrl = Vec::new();
        chunk(&mut hdrl, b"avih", &avih);
        list(&mut hdrl, b"strl", &strl);

        let mut movi = Vec::new();
        let mut idx1 = Vec::new();
        for m in &self.movi {
            let (tag, data) = match m {
                Movi::Frame(d) => (frame_tag, d),
                Movi::Other(t, d) => (t, d),
            };
            idx1.extend_from_slice(tag);
            idx1.extend_from_slice(&0x10u32.to_le_bytes());
            idx1.extend_from_slice(&(movi.len() as u32 + 4).to_le_bytes());
            idx1.extend_from_slice(&(data.len() as u32).to_le_bytes());
            chunk(&mut movi, tag, data);
        }

        let mut body = b"AVI ".to_vec();
        if self.hdrl {
            list(&mut body, b"hdrl", &hdrl);
        }
        list(&mut body, b"movi", &movi);
        chunk(&mut body, b"idx1", &idx1);

        let mut out = Vec::new();
        chunk(&mut out, b"RIFF", &body);
        out
    }
}

/// Uncompressed BMP with a 54-byte header. Positive `height` stores rows
/// bottom-up. 16 bpp is written as 555.
pub fn bmp_file(width: u16, height: i32, bpp: u16, pixel: impl Fn(u16, u16) -> (u8, u8, u8)) -> Vec<u8> {
    let rows = height.unsigned_abs() as u16;
    let stride = (width as usize * bpp as usize).div_ceil(32) * 4;
    let mut data = vec![0u8; stride * rows as usize];
    for y in 0..rows {
        let file_row = (if height > 0 { rows - 1 - y } else { y }) as usize;
        let line = &mut data[file_row * stride..(file_row + 1) * stride];
        for x in 0..width {
            let (r, g, b) = pixel(x, y);
            let at = x as usize * bpp as usize / 8;
            match bpp {
                16 => {
                    let v = ((r as u16 >> 3) << 10) | ((g as u16 >> 3) << 5) | (b as u16 >> 3);
                    line[at..at + 2].copy_from_slice(&v.to_le_bytes());
                }
                24 => line[at..at + 3].copy_from_slice(&[b, g, r]),
                _ => line[at..at + 4].copy_from_slice(&[b, g, r, 0xFF]),
            }
        }
    }

    let mut out = Vec::with_capacity(54 + data.len());
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&(54 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&54u32.to_le_bytes());
    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&(width as i32).to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&bpp.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0; 16]);
    out.extend_from_slice(&data);
    out
}
