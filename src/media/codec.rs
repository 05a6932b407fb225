// Codec adapter: storage bytes in, display blocks out
//
// A block decoder pulls compressed bytes through a ByteSource and pushes
// decoded RGB565 blocks into a BlockSink. FramePull bounds the source to
// one frame's byte range; DisplayPush forwards blocks to the pipeline.
// Neither reports errors through the decoder: they latch them, and
// decode_jpeg() surfaces the latched error instead of a generic decode
// failure.

use log::warn;
use smol_jpeg::JpegDecoder;

pub use smol_jpeg::Rect;

use crate::drivers::display::DisplaySink;
use crate::drivers::storage::{StorageError, StorageFile};
use crate::media::MediaError;
use crate::media::pipeline::{self, Scratch};

pub const MAX_SCALE: u8 = 3;

pub trait ByteSource {
    /// Copy up to `buf.len()` bytes into `buf`; 0 means end of input.
    fn pull(&mut self, buf: &mut [u8]) -> usize;
}

pub trait BlockSink {
    /// Accept one block; `false` aborts decoding.
    fn push(&mut self, rect: &Rect, pixels: &[u16]) -> bool;
}

/// Two-phase block image decoder.
pub trait BlockDecoder {
    /// Read headers and return `(width, height)` of the full-size image.
    fn prepare(&mut self, src: &mut dyn ByteSource) -> Result<(u16, u16), MediaError>;

    /// Decode at 1/2^`scale` size, pushing blocks as they complete.
    fn decompress(
        &mut self,
        src: &mut dyn ByteSource,
        sink: &mut dyn BlockSink,
        scale: u8,
    ) -> Result<(), MediaError>;
}

impl BlockDecoder for JpegDecoder {
    fn prepare(&mut self, src: &mut dyn ByteSource) -> Result<(u16, u16), MediaError> {
        let mut pull = |buf: &mut [u8]| src.pull(buf);
        JpegDecoder::prepare(self, &mut pull).map_err(|e| {
            warn!("{}", e);
            MediaError::DecodeFailed
        })
    }

    fn decompress(
        &mut self,
        src: &mut dyn ByteSource,
        sink: &mut dyn BlockSink,
        scale: u8,
    ) -> Result<(), MediaError> {
        let mut pull = |buf: &mut [u8]| src.pull(buf);
        let mut push = |rect: &Rect, px: &[u16]| sink.push(rect, px);
        JpegDecoder::decompress(self, &mut pull, &mut push, scale).map_err(|e| {
            warn!("{}", e);
            MediaError::DecodeFailed
        })
    }
}

/// Pull source over `[position, end)` of a file.
pub struct FramePull<'f, F: StorageFile + ?Sized> {
    file: &'f mut F,
    end: u32,
    error: Option<StorageError>,
}

impl<'f, F: StorageFile + ?Sized> FramePull<'f, F> {
    pub fn new(file: &'f mut F, end: u32) -> Self {
        Self {
            file,
            end,
            error: None,
        }
    }

    pub fn error(&self) -> Option<StorageError> {
        self.error
    }
}

impl<F: StorageFile + ?Sized> ByteSource for FramePull<'_, F> {
    fn pull(&mut self, buf: &mut [u8]) -> usize {
        if self.error.is_some() {
            return 0;
        }
        let pos = self.file.tell();
        if pos >= self.end {
            return 0;
        }
        let n = buf.len().min((self.end - pos) as usize);
        match self.file.read(&mut buf[..n]) {
            Ok(got) => got,
            Err(e) => {
                self.error = Some(e);
                0
            }
        }
    }
}

/// Block sink that places blocks at `origin` on the display.
pub struct DisplayPush<'a, D: DisplaySink + ?Sized> {
    display: &'a mut D,
    scratch: &'a mut Scratch,
    origin: (u16, u16),
    error: Option<MediaError>,
}

impl<'a, D: DisplaySink + ?Sized> DisplayPush<'a, D> {
    pub fn new(display: &'a mut D, scratch: &'a mut Scratch, origin: (u16, u16)) -> Self {
        Self {
            display,
            scratch,
            origin,
            error: None,
        }
    }

    /// Wait for the last block and report any latched error.
    pub fn finish(self) -> Result<(), MediaError> {
        self.display.await_transfer_complete();
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<D: DisplaySink + ?Sized> BlockSink for DisplayPush<'_, D> {
    fn push(&mut self, rect: &Rect, pixels: &[u16]) -> bool {
        let x = self.origin.0.saturating_add(rect.left);
        let y = self.origin.1.saturating_add(rect.top);
        match pipeline::push_block(
            self.display,
            self.scratch,
            x,
            y,
            rect.width(),
            rect.height(),
            pixels,
        ) {
            Ok(()) => true,
            Err(e) => {
                self.error = Some(e);
                false
            }
        }
    }
}

/// Smallest scale (0..=3) at which a `w` x `h` image fits the surface.
pub fn pick_scale(w: u16, h: u16, surface: (u16, u16)) -> u8 {
    let mut s = 0;
    while s < MAX_SCALE {
        let (ow, oh) = scaled_size(w, h, s);
        if ow <= surface.0 && oh <= surface.1 {
            break;
        }
        s += 1;
    }
    s
}

/// Output size of a `w` x `h` image decoded at `scale`.
pub fn scaled_size(w: u16, h: u16, scale: u8) -> (u16, u16) {
    let f = 1u32 << scale;
    (
        (w as u32).div_ceil(f) as u16,
        (h as u32).div_ceil(f) as u16,
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleMode {
    /// Shrink until the image fits the surface (video frames).
    Fit,
    /// Caller-chosen scale; the result must fit from the origin.
    Fixed(u8),
}

/// Decode the JPEG stored in `[start, end)` of `file` onto the display.
/// Returns the decoded (scaled) size.
#[allow(clippy::too_many_arguments)]
pub fn decode_jpeg<F, D, J>(
    file: &mut F,
    start: u32,
    end: u32,
    decoder: &mut J,
    display: &mut D,
    scratch: &mut Scratch,
    origin: (u16, u16),
    mode: ScaleMode,
) -> Result<(u16, u16), MediaError>
where
    F: StorageFile + ?Sized,
    D: DisplaySink + ?Sized,
    J: BlockDecoder + ?Sized,
{
    file.seek(start)?;
    let mut src = FramePull::new(file, end);

    let prepared = decoder.prepare(&mut src);
    if let Some(e) = src.error() {
        return Err(e.into());
    }
    let (w, h) = prepared?;

    let surface = display.surface();
    let scale = match mode {
        ScaleMode::Fit => pick_scale(w, h, surface),
        ScaleMode::Fixed(s) => {
            let s = s.min(MAX_SCALE);
            let (ow, oh) = scaled_size(w, h, s);
            if origin.0 as u32 + ow as u32 > surface.0 as u32
                || origin.1 as u32 + oh as u32 > surface.1 as u32
            {
                return Err(MediaError::InvalidParameter);
            }
            s
        }
    };

    let mut sink = DisplayPush::new(display, scratch, origin);
    let decoded = decoder.decompress(&mut src, &mut sink, scale);
    let pushed = sink.finish();

    if let Some(e) = src.error() {
        return Err(e.into());
    }
    pushed?;
    decoded?;
    Ok(scaled_size(w, h, scale))
}
