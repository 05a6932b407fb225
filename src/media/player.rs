// Video playback session: open, pace, skip, decode, present
//
// A session owns the open clip, a byte cursor into `movi` and the
// pacing baseline. Each poll() works out which frame slot wall-clock
// time has reached, steps over chunk headers of frames that are already
// late, and decodes exactly one frame at the cursor.
//
// No frame offset table is kept, so seeking is forward-only: seek()
// moves the frame counter and the timing baseline but rewinds the cursor
// to the first chunk. The frame decoded after a seek is therefore the
// first frame of the clip. This is a known gap.
//
// Timing is kept in microseconds per frame to avoid millisecond drift;
// the clock itself is a wrapping u32 millisecond counter.

use alloc::boxed::Box;
use alloc::vec::Vec;

use log::{debug, info, warn};

use crate::drivers::display::DisplaySink;
use crate::drivers::storage::{Storage, StorageFile};
use crate::formats::avi::{CodecKind, MediaInfo, next_frame_chunk};
use crate::formats::bmp::bgr_to_565;
use crate::formats::detect::{MediaFormat, detect};
use crate::kernel::Clock;
use crate::media::MediaError;
use crate::media::codec::{BlockDecoder, ScaleMode, decode_jpeg, pick_scale, scaled_size};
use crate::media::endian::detect_byte_swap;
use crate::media::pipeline::{Scratch, Window, stream_rows};

// big enough for a 16x16 MCU; grows on demand
const BLOCK_SCRATCH_LEN: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Ended,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlayMode {
    /// play() runs the clip to the end, sleeping between frames.
    #[default]
    Blocking,
    /// play() returns at once; the caller keeps calling poll().
    Polling,
}

/// Outcome of one successful poll().
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// A frame was decoded and sent to the display.
    Rendered,
    /// The current frame's slot has not arrived yet.
    Pending,
    /// Not playing (idle or paused); nothing to do.
    Inactive,
}

/// Byte order of raw RGB565 frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ByteOrder {
    /// Use the file name hint, else sample the clip.
    #[default]
    Auto,
    Little,
    Big,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Frame rate used when the clip declares none.
    pub fallback_fps: u32,
    pub byte_order: ByteOrder,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            fallback_fps: crate::formats::avi::DEFAULT_FPS,
            byte_order: ByteOrder::Auto,
        }
    }
}

/// Called after every rendered frame with the new frame counter.
pub type FrameCallback = Box<dyn FnMut(u32)>;

pub struct PlaybackSession<F: StorageFile, C: Clock, J: BlockDecoder> {
    file: F,
    info: MediaInfo,
    state: PlaybackState,
    mode: PlayMode,
    origin: (u16, u16),
    current_frame: u32,
    start_ms: u32,
    frame_duration_us: u32,
    cursor: u32,
    rendered: u32,
    skipped: u32,
    decoder: J,
    scratch: Scratch,
    // 24-bit source rows before conversion
    row_in: Vec<u8>,
    byte_swap: bool,
    callback: Option<FrameCallback>,
    clock: C,
}

impl<F: StorageFile, C: Clock, J: BlockDecoder> PlaybackSession<F, C, J> {
    pub fn open<'s, S>(storage: &'s S, path: &str, clock: C, decoder: J) -> Result<Self, MediaError>
    where
        S: Storage<File<'s> = F>,
    {
        Self::open_with(storage, path, clock, decoder, SessionOptions::default())
    }

    pub fn open_with<'s, S>(
        storage: &'s S,
        path: &str,
        clock: C,
        decoder: J,
        options: SessionOptions,
    ) -> Result<Self, MediaError>
    where
        S: Storage<File<'s> = F>,
    {
        if detect(path)? != MediaFormat::Avi {
            return Err(MediaError::UnsupportedFormat);
        }
        let file = storage.open(path)?;
        Self::from_file(file, path, clock, decoder, options)
    }

    /// Build a session over an already open clip.
    pub fn from_file(
        mut file: F,
        path: &str,
        clock: C,
        decoder: J,
        options: SessionOptions,
    ) -> Result<Self, MediaError> {
        let info = MediaInfo::read(&mut file, path, options.fallback_fps)?;

        let byte_swap = match (info.codec, options.byte_order) {
            (CodecKind::Mjpeg | CodecKind::Raw888, _) => false,
            (_, ByteOrder::Little) => true,
            (_, ByteOrder::Big) => false,
            (_, ByteOrder::Auto) => detect_byte_swap(&mut file, &info)?,
        };

        let mut scratch = Scratch::new();
        let mut row_in = Vec::new();
        match info.codec {
            CodecKind::Mjpeg => scratch.ensure(BLOCK_SCRATCH_LEN)?,
            CodecKind::Raw888 => {
                scratch.ensure(info.width as usize * 2)?;
                let len = info.width as usize * 3;
                row_in
                    .try_reserve_exact(len)
                    .map_err(|_| MediaError::MemoryAllocationFailed)?;
                row_in.resize(len, 0);
            }
            _ => scratch.ensure(info.width as usize * 2)?,
        }

        let cursor = info.first_chunk();
        let frame_duration_us = 1_000_000 / info.fps.max(1);
        debug!(
            "video: session open, {} us/frame, byte swap {}",
            frame_duration_us, byte_swap
        );

        Ok(Self {
            file,
            info,
            state: PlaybackState::Idle,
            mode: PlayMode::Blocking,
            origin: (0, 0),
            current_frame: 0,
            start_ms: 0,
            frame_duration_us,
            cursor,
            rendered: 0,
            skipped: 0,
            decoder,
            scratch,
            row_in,
            byte_swap,
            callback: None,
            clock,
        })
    }

    /// Start playback with the top-left corner at `(x, y)`.
    ///
    /// In `Blocking` mode this returns once the clip has ended.
    pub fn play<D: DisplaySink + ?Sized>(
        &mut self,
        display: &mut D,
        x: u16,
        y: u16,
        mode: PlayMode,
    ) -> Result<(), MediaError> {
        let surface = display.surface();
        let (w, h) = self.output_size(surface);
        if x as u32 + w as u32 > surface.0 as u32 || y as u32 + h as u32 > surface.1 as u32 {
            warn!(
                "video: {}x{} at ({}, {}) does not fit {}x{}",
                w, h, x, y, surface.0, surface.1
            );
            return Err(MediaError::InvalidParameter);
        }

        self.origin = (x, y);
        self.mode = mode;
        self.state = PlaybackState::Playing;
        self.start_ms = self.clock.now_ms();
        self.cursor = self.info.first_chunk();
        self.current_frame = 0;
        self.rendered = 0;
        self.skipped = 0;
        info!("video: play {} at ({}, {}) {:?}", self.info.path, x, y, mode);

        if mode == PlayMode::Polling {
            return Ok(());
        }
        loop {
            match self.poll(display) {
                Ok(Tick::Inactive) => return Ok(()),
                Ok(_) => {}
                Err(MediaError::EndOfStream) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Install `callback` and play to the end.
    pub fn play_with_callback<D: DisplaySink + ?Sized>(
        &mut self,
        display: &mut D,
        x: u16,
        y: u16,
        callback: FrameCallback,
    ) -> Result<(), MediaError> {
        self.callback = Some(callback);
        self.play(display, x, y, PlayMode::Blocking)
    }

    /// Advance playback by at most one decoded frame.
    ///
    /// `Err(EndOfStream)` once the clip is over; any other error ends
    /// the session.
    pub fn poll<D: DisplaySink + ?Sized>(&mut self, display: &mut D) -> Result<Tick, MediaError> {
        match self.state {
            PlaybackState::Ended => return Err(MediaError::EndOfStream),
            PlaybackState::Idle | PlaybackState::Paused => return Ok(Tick::Inactive),
            PlaybackState::Playing => {}
        }

        let dur = self.frame_duration_us as u64;
        let elapsed_us = self.elapsed_us();
        let expected = elapsed_us / dur;
        let total = self.info.total_frames;

        if expected >= total as u64 {
            self.end();
            return Err(MediaError::EndOfStream);
        }
        if self.mode == PlayMode::Polling && self.current_frame as u64 * dur > elapsed_us {
            return Ok(Tick::Pending);
        }

        if let Err(e) = self.step(display, expected as u32) {
            if e != MediaError::EndOfStream {
                warn!("video: frame {} failed: {}", self.current_frame, e);
            }
            self.end();
            return Err(e);
        }

        let frame = self.current_frame;
        if let Some(cb) = self.callback.as_mut() {
            cb(frame);
        }

        if self.current_frame >= total {
            self.end();
            return Err(MediaError::EndOfStream);
        }

        if self.mode == PlayMode::Blocking {
            let due_ms = (self.current_frame as u64 * dur / 1000) as u32;
            while self.clock.now_ms().wrapping_sub(self.start_ms) < due_ms {
                self.clock.relax();
            }
        }
        Ok(Tick::Rendered)
    }

    // skip late frames, then decode the one at the cursor
    fn step<D: DisplaySink + ?Sized>(&mut self, display: &mut D, expected: u32) -> Result<(), MediaError> {
        if expected > self.current_frame {
            let late = expected - self.current_frame;
            for _ in 0..late {
                match next_frame_chunk(&mut self.file, self.cursor, self.info.movi_end)? {
                    Some((at, ch)) => self.cursor = ch.next_offset(at),
                    None => return Err(MediaError::EndOfStream),
                }
            }
            self.skipped += late;
            self.current_frame = expected;
            debug!("video: skipped {} late frames", late);
        }

        let Some((at, ch)) = next_frame_chunk(&mut self.file, self.cursor, self.info.movi_end)?
        else {
            return Err(MediaError::EndOfStream);
        };
        let data = at + 8;
        let end = data.saturating_add(ch.size);

        if self.info.codec == CodecKind::Mjpeg {
            decode_jpeg(
                &mut self.file,
                data,
                end,
                &mut self.decoder,
                display,
                &mut self.scratch,
                self.origin,
                ScaleMode::Fit,
            )?;
        } else {
            self.render_raw(display, data, ch.size)?;
        }

        self.cursor = ch.next_offset(at);
        self.rendered += 1;
        self.current_frame += 1;
        Ok(())
    }

    fn render_raw<D: DisplaySink + ?Sized>(
        &mut self,
        display: &mut D,
        data: u32,
        size: u32,
    ) -> Result<(), MediaError> {
        if (size as usize) < self.info.raw_frame_len() {
            warn!(
                "video: raw frame of {} bytes, need {}",
                size,
                self.info.raw_frame_len()
            );
            return Err(MediaError::InvalidFormat);
        }
        self.file.seek(data)?;

        let width = self.info.width as usize;
        let window = Window {
            x: self.origin.0,
            y: self.origin.1,
            w: self.info.width,
            h: self.info.height,
        };
        let file = &mut self.file;
        let row_in = &mut self.row_in;
        let swap = self.byte_swap;
        let codec = self.info.codec;

        stream_rows(display, window, width * 2, &mut self.scratch, |_, buf| {
            if codec == CodecKind::Raw888 {
                let src = &mut row_in[..width * 3];
                file.read_exact(src)?;
                for (dst, bgr) in buf.chunks_exact_mut(2).zip(src.chunks_exact(3)) {
                    dst.copy_from_slice(&bgr_to_565(bgr).to_be_bytes());
                }
            } else {
                file.read_exact(buf)?;
                if swap {
                    for px in buf.chunks_exact_mut(2) {
                        px.swap(0, 1);
                    }
                }
            }
            Ok(())
        })
    }

    /// Size of one frame on screen.
    fn output_size(&self, surface: (u16, u16)) -> (u16, u16) {
        let (w, h) = (self.info.width, self.info.height);
        if self.info.codec == CodecKind::Mjpeg {
            scaled_size(w, h, pick_scale(w, h, surface))
        } else {
            (w, h)
        }
    }

    fn end(&mut self) {
        if self.state != PlaybackState::Ended {
            info!(
                "video: {} ended, {} rendered, {} skipped",
                self.info.path, self.rendered, self.skipped
            );
        }
        self.state = PlaybackState::Ended;
    }

    fn elapsed_us(&self) -> u64 {
        self.clock.now_ms().wrapping_sub(self.start_ms) as u64 * 1000
    }

    // make elapsed time agree with the current frame
    fn rebaseline(&mut self) {
        let offset_ms = self.current_frame as u64 * self.frame_duration_us as u64 / 1000;
        self.start_ms = self.clock.now_ms().wrapping_sub(offset_ms as u32);
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
            debug!("video: paused at frame {}", self.current_frame);
        }
    }

    pub fn resume(&mut self) {
        if self.state == PlaybackState::Paused {
            self.rebaseline();
            self.state = PlaybackState::Playing;
            debug!("video: resumed at frame {}", self.current_frame);
        }
    }

    pub fn stop(&mut self) {
        self.state = PlaybackState::Idle;
        self.current_frame = 0;
        self.cursor = self.info.first_chunk();
    }

    /// Re-baseline pacing on the current frame, e.g. after a long stall
    /// the caller does not want caught up by skipping.
    pub fn reset_time(&mut self) {
        self.rebaseline();
    }

    /// Jump the frame counter to `frame` (clamped). The byte cursor only
    /// rewinds to the first chunk; see the module notes.
    pub fn seek(&mut self, frame: u32) {
        let frame = frame.min(self.info.total_frames.saturating_sub(1));
        self.current_frame = frame;
        self.rebaseline();
        self.cursor = self.info.first_chunk();
        debug!("video: seek to frame {}, cursor rewound", frame);
    }

    pub fn seek_time(&mut self, ms: u32) {
        let frame = ms as u64 * 1000 / self.frame_duration_us as u64;
        self.seek(frame.min(u32::MAX as u64) as u32);
    }

    pub fn set_callback(&mut self, callback: Option<FrameCallback>) {
        self.callback = callback;
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    pub fn frames_rendered(&self) -> u32 {
        self.rendered
    }

    pub fn frames_skipped(&self) -> u32 {
        self.skipped
    }

    pub fn frame_duration_us(&self) -> u32 {
        self.frame_duration_us
    }

    /// Media time of the current frame.
    pub fn elapsed_ms(&self) -> u32 {
        (self.current_frame as u64 * self.frame_duration_us as u64 / 1000) as u32
    }

    /// Rendered frames per second of wall-clock time since play().
    pub fn average_fps(&self) -> u32 {
        let ms = self.clock.now_ms().wrapping_sub(self.start_ms);
        if ms == 0 {
            return 0;
        }
        (self.rendered as u64 * 1000 / ms as u64) as u32
    }

    /// Playing and the current frame's slot has arrived.
    pub fn needs_render(&self) -> bool {
        self.state == PlaybackState::Playing
            && self.current_frame as u64 * self.frame_duration_us as u64 <= self.elapsed_us()
    }

    /// Whether raw 565 frames are byte-swapped on the way out.
    pub fn byte_swap(&self) -> bool {
        self.byte_swap
    }

    pub fn set_byte_swap(&mut self, swap: bool) {
        self.byte_swap = swap;
    }
}

impl<F: StorageFile, C: Clock, J: BlockDecoder> Drop for PlaybackSession<F, C, J> {
    fn drop(&mut self) {
        debug!("video: close {}", self.info.path);
    }
}

/// Slot holding at most one open session.
pub struct Player<F: StorageFile, C: Clock, J: BlockDecoder> {
    session: Option<PlaybackSession<F, C, J>>,
}

impl<F: StorageFile, C: Clock, J: BlockDecoder> Default for Player<F, C, J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: StorageFile, C: Clock, J: BlockDecoder> Player<F, C, J> {
    pub const fn new() -> Self {
        Self { session: None }
    }

    /// Open `path`, closing any previous session first. On failure the
    /// player is left empty.
    pub fn open<'s, S>(
        &mut self,
        storage: &'s S,
        path: &str,
        clock: C,
        decoder: J,
        options: SessionOptions,
    ) -> Result<(), MediaError>
    where
        S: Storage<File<'s> = F>,
    {
        self.session = None;
        self.session = Some(PlaybackSession::open_with(storage, path, clock, decoder, options)?);
        Ok(())
    }

    pub fn close(&mut self) {
        self.session = None;
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Result<&PlaybackSession<F, C, J>, MediaError> {
        self.session.as_ref().ok_or(MediaError::NotOpen)
    }

    pub fn session_mut(&mut self) -> Result<&mut PlaybackSession<F, C, J>, MediaError> {
        self.session.as_mut().ok_or(MediaError::NotOpen)
    }

    pub fn play<D: DisplaySink + ?Sized>(
        &mut self,
        display: &mut D,
        x: u16,
        y: u16,
        mode: PlayMode,
    ) -> Result<(), MediaError> {
        self.session_mut()?.play(display, x, y, mode)
    }

    pub fn poll<D: DisplaySink + ?Sized>(&mut self, display: &mut D) -> Result<Tick, MediaError> {
        self.session_mut()?.poll(display)
    }

    pub fn state(&self) -> PlaybackState {
        self.session
            .as_ref()
            .map_or(PlaybackState::Idle, PlaybackSession::state)
    }
}
