// AVI (RIFF) container parser
//
// Walks the chunk tree once for stream geometry, frame rate and codec,
// remembers where the `movi` list starts, then counts frame chunks in a
// second linear pass. No per-frame offsets are kept: playback re-derives
// them by stepping chunk headers from the start of `movi`.
//
// Layout:
//   RIFF <size> 'AVI '
//     LIST <size> 'hdrl'
//       'avih' <size> MainAVIHeader
//       LIST <size> 'strl'
//         'strh' <size> AVIStreamHeader
//         'strf' <size> BITMAPINFOHEADER
//     LIST <size> 'movi'
//       '00dc' <size> <frame> ...
//     'idx1' <size> <index entries>

use alloc::string::String;

use log::{info, warn};

use crate::drivers::storage::{Storage, StorageError, StorageFile};
use crate::formats::binary::{
    BitmapInfoHeader, ChunkHeader, FourCc, MainHeader, StreamHeader, le_u32, read_exact_at,
};
use crate::media::MediaError;

/// Frame rate used when the header declares none.
pub const DEFAULT_FPS: u32 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecKind {
    /// One baseline JPEG per frame chunk.
    Mjpeg,
    /// RGB565, byte order unknown until sampled.
    Raw565,
    /// RGB565 stored low byte first.
    Raw565Little,
    /// RGB565 stored high byte first (display wire order).
    Raw565Big,
    /// 24-bit BGR triplets.
    Raw888,
}

impl CodecKind {
    pub fn is_raw(self) -> bool {
        self != CodecKind::Mjpeg
    }

    /// Bytes per pixel of the stored frame; `None` for compressed frames.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            CodecKind::Mjpeg => None,
            CodecKind::Raw565 | CodecKind::Raw565Little | CodecKind::Raw565Big => Some(2),
            CodecKind::Raw888 => Some(3),
        }
    }
}

/// Everything needed to play a clip, read once at open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaInfo {
    pub path: String,
    pub width: u16,
    pub height: u16,
    pub fps: u32,
    /// Frame chunks actually present in `movi`.
    pub total_frames: u32,
    /// Frame count claimed by `avih`; often wrong, kept for diagnostics.
    pub declared_frames: u32,
    pub duration_ms: u32,
    pub codec: CodecKind,
    pub file_size: u32,
    /// Offset of the `movi` list-type fourCC; frame chunks start 4 bytes later.
    pub movi_offset: u32,
    /// End of the `movi` payload, clamped to the file size.
    pub movi_end: u32,
    /// An `idx1` chunk follows `movi`. Not used for playback.
    pub has_index: bool,
}

impl MediaInfo {
    /// Open `path`, parse it and close it again.
    pub fn parse<S: Storage>(storage: &S, path: &str) -> Result<Self, MediaError> {
        let mut file = storage.open(path)?;
        Self::read(&mut file, path, DEFAULT_FPS)
    }

    /// Parse an already open file. `fallback_fps` replaces a zero frame rate.
    pub fn read<F: StorageFile + ?Sized>(
        file: &mut F,
        path: &str,
        fallback_fps: u32,
    ) -> Result<Self, MediaError> {
        let file_size = file.size();
        let mut riff = [0u8; 12];
        read_exact_at(file, 0, &mut riff).map_err(truncated)?;
        if FourCc::from_slice(&riff[0..4]) != FourCc::RIFF
            || FourCc::from_slice(&riff[8..12]) != FourCc::AVI
        {
            return Err(MediaError::InvalidFormat);
        }

        // trust the file length over a RIFF size that runs past it
        let riff_end = 8u32.saturating_add(le_u32(&riff, 4)).min(file_size);

        let mut walk = HeaderWalk::default();
        let mut off = 12u32;
        while off.saturating_add(ChunkHeader::LEN) <= riff_end {
            let ch = ChunkHeader::read_at(file, off).map_err(truncated)?;
            match ch.id {
                FourCc::LIST => {
                    let list_end = off
                        .saturating_add(ChunkHeader::LEN)
                        .saturating_add(ch.size)
                        .min(riff_end);
                    match list_type(file, off)? {
                        FourCc::HDRL => walk.hdrl(file, off + 12, list_end)?,
                        FourCc::MOVI => {
                            if walk.movi.is_none() {
                                walk.movi = Some((off + 8, list_end));
                            }
                        }
                        _ => {}
                    }
                }
                FourCc::IDX1 => walk.has_index = true,
                _ => {}
            }
            off = ch.next_offset(off);
        }

        let Some(main) = walk.main else {
            warn!("avi: {}: no hdrl/avih", path);
            return Err(MediaError::InvalidFormat);
        };
        let Some((movi_offset, movi_end)) = walk.movi else {
            warn!("avi: {}: no movi list", path);
            return Err(MediaError::InvalidFormat);
        };
        // a zero-sized movi list still holds whatever follows it
        let movi_end = if movi_end <= movi_offset + 4 {
            file_size
        } else {
            movi_end
        };

        let (width, height) = walk.dims.unwrap_or((main.width, main.height));
        if width == 0 || height == 0 || width > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(MediaError::InvalidFormat);
        }

        let fps = match main.us_per_frame {
            0 => 0,
            us => 1_000_000 / us,
        };
        let fps = if fps == 0 {
            let fallback = fallback_fps.max(1);
            warn!("avi: {}: no frame rate, assuming {} fps", path, fallback);
            fallback
        } else {
            fps
        };

        let mut codec = walk.codec.unwrap_or(CodecKind::Raw565);
        if codec.is_raw() {
            codec = match walk.bit_count {
                Some(24) => CodecKind::Raw888,
                _ => CodecKind::Raw565,
            };
            if codec == CodecKind::Raw565 {
                codec = byte_order_hint(path).unwrap_or(CodecKind::Raw565);
            }
        }

        let total_frames = count_frames(file, movi_offset + 4, movi_end)?;
        if total_frames == 0 {
            warn!("avi: {}: no frame chunks", path);
            return Err(MediaError::InvalidFormat);
        }
        if total_frames != main.total_frames {
            info!(
                "avi: {}: header says {} frames, found {}",
                path, main.total_frames, total_frames
            );
        }

        let info = Self {
            path: String::from(path),
            width: width as u16,
            height: height as u16,
            fps,
            total_frames,
            declared_frames: main.total_frames,
            duration_ms: (total_frames as u64 * 1000 / fps as u64) as u32,
            codec,
            file_size,
            movi_offset,
            movi_end,
            has_index: walk.has_index,
        };
        info!(
            "avi: {} {}x{} {:?} {}fps {} frames ({} ms)",
            path, info.width, info.height, info.codec, info.fps, info.total_frames, info.duration_ms
        );
        Ok(info)
    }

    /// Offset of the first chunk inside `movi`.
    #[inline]
    pub fn first_chunk(&self) -> u32 {
        self.movi_offset + 4
    }

    /// Bytes in one decoded raw frame; 0 for compressed codecs.
    pub fn raw_frame_len(&self) -> usize {
        self.codec
            .bytes_per_pixel()
            .map_or(0, |bpp| self.width as usize * self.height as usize * bpp)
    }
}

#[derive(Default)]
struct HeaderWalk {
    main: Option<MainHeader>,
    video_found: bool,
    codec: Option<CodecKind>,
    dims: Option<(u32, u32)>,
    bit_count: Option<u16>,
    movi: Option<(u32, u32)>,
    has_index: bool,
}

impl HeaderWalk {
    fn hdrl<F: StorageFile + ?Sized>(&mut self, file: &mut F, start: u32, end: u32) -> Result<(), MediaError> {
        let mut off = start;
        while off.saturating_add(ChunkHeader::LEN) <= end {
            let ch = ChunkHeader::read_at(file, off).map_err(truncated)?;
            match ch.id {
                FourCc::AVIH => {
                    let mut buf = [0u8; MainHeader::LEN];
                    if (ch.size as usize) < MainHeader::LEN {
                        return Err(MediaError::InvalidFormat);
                    }
                    read_exact_at(file, off + 8, &mut buf).map_err(truncated)?;
                    self.main = MainHeader::parse(&buf);
                }
                FourCc::LIST => {
                    if list_type(file, off)? == FourCc::STRL {
                        let list_end = off
                            .saturating_add(ChunkHeader::LEN)
                            .saturating_add(ch.size)
                            .min(end);
                        self.strl(file, off + 12, list_end)?;
                    }
                }
                _ => {}
            }
            off = ch.next_offset(off);
        }
        Ok(())
    }

    // only the first `vids` stream is used; later streams are ignored
    fn strl<F: StorageFile + ?Sized>(&mut self, file: &mut F, start: u32, end: u32) -> Result<(), MediaError> {
        let mut this_is_video = false;
        let mut off = start;
        while off.saturating_add(ChunkHeader::LEN) <= end {
            let ch = ChunkHeader::read_at(file, off).map_err(truncated)?;
            match ch.id {
                FourCc::STRH if (ch.size as usize) >= StreamHeader::LEN => {
                    let mut buf = [0u8; StreamHeader::LEN];
                    read_exact_at(file, off + 8, &mut buf).map_err(truncated)?;
                    if let Some(sh) = StreamHeader::parse(&buf)
                        && sh.fcc_type == FourCc::VIDS
                        && !self.video_found
                    {
                        this_is_video = true;
                        self.video_found = true;
                        self.codec = Some(codec_for_handler(sh.fcc_handler));
                    }
                }
                FourCc::STRF if this_is_video && (ch.size as usize) >= BitmapInfoHeader::LEN => {
                    let mut buf = [0u8; BitmapInfoHeader::LEN];
                    read_exact_at(file, off + 8, &mut buf).map_err(truncated)?;
                    if let Some(bih) = BitmapInfoHeader::parse(&buf) {
                        self.dims = Some((bih.width.unsigned_abs(), bih.height.unsigned_abs()));
                        self.bit_count = Some(bih.bit_count);
                    }
                }
                _ => {}
            }
            off = ch.next_offset(off);
        }
        Ok(())
    }
}

fn codec_for_handler(handler: FourCc) -> CodecKind {
    match &handler.0 {
        b"MJPG" | b"mjpg" => CodecKind::Mjpeg,
        _ => CodecKind::Raw565,
    }
}

/// `565le` / `565be` anywhere in the file name fixes the raw byte order.
pub fn byte_order_hint(path: &str) -> Option<CodecKind> {
    let name = path.as_bytes();
    name.windows(5).find_map(|w| {
        if &w[..3] != b"565" {
            return None;
        }
        if w[3..].eq_ignore_ascii_case(b"le") {
            Some(CodecKind::Raw565Little)
        } else if w[3..].eq_ignore_ascii_case(b"be") {
            Some(CodecKind::Raw565Big)
        } else {
            None
        }
    })
}

fn list_type<F: StorageFile + ?Sized>(file: &mut F, list_off: u32) -> Result<FourCc, MediaError> {
    let mut t = [0u8; 4];
    read_exact_at(file, list_off + 8, &mut t).map_err(truncated)?;
    Ok(FourCc(t))
}

fn count_frames<F: StorageFile + ?Sized>(file: &mut F, start: u32, end: u32) -> Result<u32, MediaError> {
    let mut count = 0u32;
    let mut off = start;
    while let Some((at, ch)) = next_frame_chunk(file, off, end)? {
        count += 1;
        off = ch.next_offset(at);
    }
    Ok(count)
}

/// Step chunk headers from `cursor` until a frame chunk with a non-empty
/// payload is found before `end`. Returns its header offset and header.
pub fn next_frame_chunk<F: StorageFile + ?Sized>(
    file: &mut F,
    cursor: u32,
    end: u32,
) -> Result<Option<(u32, ChunkHeader)>, MediaError> {
    let mut off = cursor;
    while off.saturating_add(ChunkHeader::LEN) <= end {
        let ch = match ChunkHeader::read_at(file, off) {
            Ok(ch) => ch,
            // a chunk header cut off by the end of file ends the stream
            Err(StorageError::UnexpectedEof) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if ch.id.is_frame() && ch.size > 0 {
            return Ok(Some((off, ch)));
        }
        let next = ch.next_offset(off);
        if next <= off {
            return Ok(None);
        }
        off = next;
    }
    Ok(None)
}

// short reads inside headers mean a damaged file, not an I/O fault
fn truncated(e: StorageError) -> MediaError {
    match e {
        StorageError::UnexpectedEof => MediaError::InvalidFormat,
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{AviBuilder, MemStorage};

    fn parse(bytes: Vec<u8>, name: &str) -> Result<MediaInfo, MediaError> {
        let mut sd = MemStorage::new();
        sd.insert(name, &bytes);
        MediaInfo::parse(&sd, name)
    }

    #[test]
    fn counted_frames_replace_declared() {
        let mut avi = AviBuilder::new(160, 120).fps(30).declared(100);
        for i in 0..90u8 {
            avi = avi.frame(&[i; 4]);
        }
        let info = parse(avi.build(), "CLIP.AVI").unwrap();
        assert_eq!(info.total_frames, 90);
        assert_eq!(info.declared_frames, 100);
        assert_eq!(info.fps, 30);
        assert_eq!(info.duration_ms, 3000);
        assert_eq!((info.width, info.height), (160, 120));
        assert!(info.has_index);
    }

    #[test]
    fn zero_frame_rate_falls_back() {
        let avi = AviBuilder::new(16, 16).fps(0).frame(&[0; 512]);
        let info = parse(avi.build(), "A.AVI").unwrap();
        assert_eq!(info.fps, DEFAULT_FPS);
    }

    #[test]
    fn codec_selection() {
        let mjpg = AviBuilder::new(16, 16).handler(*b"MJPG").bit_count(24).frame(&[1; 8]);
        assert_eq!(parse(mjpg.build(), "A.AVI").unwrap().codec, CodecKind::Mjpeg);

        let lower = AviBuilder::new(16, 16).handler(*b"mjpg").frame(&[1; 8]);
        assert_eq!(parse(lower.build(), "A.AVI").unwrap().codec, CodecKind::Mjpeg);

        let raw16 = AviBuilder::new(16, 16).handler(*b"RM2 ").bit_count(16).frame(&[1; 512]);
        assert_eq!(parse(raw16.build(), "A.AVI").unwrap().codec, CodecKind::Raw565);

        let raw24 = AviBuilder::new(16, 16).handler([0; 4]).bit_count(24).frame(&[1; 768]);
        assert_eq!(parse(raw24.build(), "A.AVI").unwrap().codec, CodecKind::Raw888);

        let hinted = AviBuilder::new(16, 16).handler([0; 4]).frame(&[1; 512]);
        assert_eq!(
            parse(hinted.build(), "CLIP_565BE.AVI").unwrap().codec,
            CodecKind::Raw565Big
        );
    }

    #[test]
    fn strf_dimensions_win() {
        let avi = AviBuilder::new(64, 48).avih_dims(320, 240).frame(&[1; 8]);
        let info = parse(avi.build(), "A.AVI").unwrap();
        assert_eq!((info.width, info.height), (64, 48));
    }

    #[test]
    fn non_frame_chunks_are_not_counted() {
        let avi = AviBuilder::new(16, 16)
            .frame(&[1; 8])
            .junk(b"01wb", &[0; 7])
            .frame(&[2; 8])
            .junk(b"00dc", &[]);
        let info = parse(avi.build(), "A.AVI").unwrap();
        assert_eq!(info.total_frames, 2);
    }

    #[test]
    fn empty_movi_is_invalid() {
        let avi = AviBuilder::new(16, 16);
        assert_eq!(parse(avi.build(), "A.AVI"), Err(MediaError::InvalidFormat));
    }

    #[test]
    fn rejects_non_avi() {
        let mut bytes = AviBuilder::new(16, 16).frame(&[1; 8]).build();
        bytes[8..12].copy_from_slice(b"WAVE");
        assert_eq!(parse(bytes, "A.AVI"), Err(MediaError::InvalidFormat));
        assert_eq!(parse(b"RIFF".to_vec(), "B.AVI"), Err(MediaError::InvalidFormat));
    }

    #[test]
    fn missing_hdrl_is_invalid() {
        let bytes = AviBuilder::new(16, 16).frame(&[1; 8]).without_hdrl().build();
        assert_eq!(parse(bytes, "A.AVI"), Err(MediaError::InvalidFormat));
    }

    #[test]
    fn byte_order_hints() {
        assert_eq!(byte_order_hint("clip565le.avi"), Some(CodecKind::Raw565Little));
        assert_eq!(byte_order_hint("CLIP565BE.AVI"), Some(CodecKind::Raw565Big));
        assert_eq!(byte_order_hint("CLIP565.AVI"), None);
    }

    #[test]
    fn missing_file() {
        let sd = MemStorage::new();
        assert_eq!(MediaInfo::parse(&sd, "NONE.AVI"), Err(MediaError::FileNotFound));
    }
}
