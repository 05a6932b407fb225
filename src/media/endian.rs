// Byte order detection for raw RGB565 AVI frames
//
// Best-effort classifier run once at open. Raw 565 exports disagree on
// byte order and the container does not record it. A `565le`/`565be`
// file name hint is already folded into the codec kind by the parser;
// otherwise pixel bytes are sampled and read both ways. Real images are
// locally smooth, so the interpretation whose neighbouring pixels differ
// less per channel wins. Ties and unreadable clips default to swapping
// (little-endian data, the common export).

use log::{debug, info};

use crate::drivers::storage::StorageFile;
use crate::formats::avi::{CodecKind, MediaInfo, next_frame_chunk};
use crate::formats::binary::read_exact_at;
use crate::media::MediaError;

const MAX_FRAMES_SAMPLED: u32 = 100;
const SAMPLE_LEN: usize = 32;
// a sample of mostly 0x00/0xFF bytes (black, white) says nothing
const MIN_INFORMATIVE_BYTES: usize = 8;

/// `true` when raw frames must be byte-swapped to reach display order.
pub fn detect_byte_swap<F: StorageFile + ?Sized>(
    file: &mut F,
    info: &MediaInfo,
) -> Result<bool, MediaError> {
    match info.codec {
        CodecKind::Mjpeg | CodecKind::Raw888 | CodecKind::Raw565Big => return Ok(false),
        CodecKind::Raw565Little => return Ok(true),
        CodecKind::Raw565 => {}
    }

    let mut le_score = 0u64;
    let mut be_score = 0u64;
    let mut samples = 0u32;
    let mut frames = 0u32;
    let mut cursor = info.first_chunk();
    let mut buf = [0u8; SAMPLE_LEN];

    while frames < MAX_FRAMES_SAMPLED {
        let Some((at, ch)) = next_frame_chunk(file, cursor, info.movi_end)? else {
            break;
        };
        for pos in sample_positions(at + 8, ch.size) {
            read_exact_at(file, pos, &mut buf)?;
            let informative = buf.iter().filter(|&&b| b != 0x00 && b != 0xFF).count();
            if informative < MIN_INFORMATIVE_BYTES {
                continue;
            }
            le_score += roughness(&buf, u16::from_le_bytes);
            be_score += roughness(&buf, u16::from_be_bytes);
            samples += 1;
        }
        frames += 1;
        cursor = ch.next_offset(at);
    }

    if samples == 0 {
        debug!("video: no usable pixel samples, assuming little-endian");
        return Ok(true);
    }
    let swap = le_score <= be_score;
    info!(
        "video: raw565 looks {}-endian (le={} be={} over {} samples)",
        if swap { "little" } else { "big" },
        le_score,
        be_score,
        samples
    );
    Ok(swap)
}

// sum of per-channel differences between neighbouring pixels
fn roughness(bytes: &[u8], read: fn([u8; 2]) -> u16) -> u64 {
    let mut prev: Option<(i32, i32, i32)> = None;
    let mut total = 0u64;
    for px in bytes.chunks_exact(2) {
        let v = read([px[0], px[1]]);
        let c = ((v >> 11) as i32, ((v >> 5) & 0x3F) as i32, (v & 0x1F) as i32);
        if let Some(p) = prev {
            total += (p.0.abs_diff(c.0) + p.1.abs_diff(c.1) + p.2.abs_diff(c.2)) as u64;
        }
        prev = Some(c);
    }
    total
}

// File offsets of the samples taken from a chunk payload of `size`
// bytes at `data`: its start and quarter points, pixel-aligned. Samples
// that would run past the payload or past u32 offsets are dropped.
fn sample_positions(data: u32, size: u32) -> impl Iterator<Item = u32> {
    [0, size / 4, size / 2, size / 4 * 3]
        .into_iter()
        .map(|off| off & !1)
        .filter(move |&off| off as usize + SAMPLE_LEN <= size as usize)
        .filter_map(move |off| {
            let pos = data.checked_add(off)?;
            pos.checked_add(SAMPLE_LEN as u32).map(|_| pos)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::storage::Storage;
    use crate::testutil::{AviBuilder, MemStorage, gradient_565};

    fn detect(frame: Vec<u8>, name: &str) -> bool {
        let bytes = AviBuilder::new(16, 16).frame(&frame).frame(&frame).build();
        let mut sd = MemStorage::new();
        sd.insert(name, &bytes);
        let mut file = sd.open(name).unwrap();
        let info = MediaInfo::read(&mut file, name, 30).unwrap();
        detect_byte_swap(&mut file, &info).unwrap()
    }

    #[test]
    fn little_endian_frames_need_swap() {
        let frame = gradient_565(16, 16, u16::to_le_bytes);
        assert!(detect(frame, "CLIP.AVI"));
    }

    #[test]
    fn big_endian_frames_pass_through() {
        let frame = gradient_565(16, 16, u16::to_be_bytes);
        assert!(!detect(frame, "CLIP.AVI"));
    }

    #[test]
    fn flat_frames_default_to_swap() {
        assert!(detect(vec![0u8; 512], "BLACK.AVI"));
    }

    #[test]
    fn name_hint_beats_sampling() {
        let frame = gradient_565(16, 16, u16::to_le_bytes);
        assert!(!detect(frame, "CLIP565BE.AVI"));
    }

    #[test]
    fn sample_offsets_stay_in_u32_range() {
        let near_end = u32::MAX - 100;
        let positions: Vec<u32> = sample_positions(near_end, u32::MAX - 8).collect();
        assert_eq!(positions, vec![near_end]);

        let positions: Vec<u32> = sample_positions(200, 256).collect();
        assert_eq!(positions, vec![200, 264, 328, 392]);
        // payloads shorter than one sample give nothing
        assert_eq!(sample_positions(200, 16).count(), 0);
    }
}
