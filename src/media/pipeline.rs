// Double-buffered pixel streaming into a DisplaySink
//
// Two scratch buffers take turns: while one is on the wire the other is
// filled from storage and converted. A new transfer never starts before
// await_transfer_complete() on the previous one, so at most one buffer
// is in flight.
//
// Rows (raw frames, bitmaps): one window per call, one transfer per row.
// Blocks (JPEG MCUs): one window and one transfer per block.

use alloc::vec::Vec;

use crate::drivers::display::DisplaySink;
use crate::media::MediaError;

pub struct Scratch {
    front: Vec<u8>,
    back: Vec<u8>,
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}

impl Scratch {
    pub const fn new() -> Self {
        Self {
            front: Vec::new(),
            back: Vec::new(),
        }
    }

    /// Grow both buffers to at least `len` bytes.
    pub fn ensure(&mut self, len: usize) -> Result<(), MediaError> {
        for buf in [&mut self.front, &mut self.back] {
            if buf.len() < len {
                buf.try_reserve(len - buf.len())
                    .map_err(|_| MediaError::MemoryAllocationFailed)?;
                buf.resize(len, 0);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.front.len().min(self.back.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn swap(&mut self) {
        core::mem::swap(&mut self.front, &mut self.back);
    }
}

/// Destination rectangle on the display surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

impl Window {
    pub fn fits(&self, surface: (u16, u16)) -> bool {
        self.w > 0
            && self.h > 0
            && self.x as u32 + self.w as u32 <= surface.0 as u32
            && self.y as u32 + self.h as u32 <= surface.1 as u32
    }

    fn select<D: DisplaySink + ?Sized>(&self, display: &mut D) {
        display.set_window(self.x, self.y, self.x + self.w - 1, self.y + self.h - 1);
    }
}

/// Stream `window.h` rows of `row_bytes` wire-order bytes each.
///
/// `fill(row, buf)` produces row `row` into `buf`; it runs for row N+1
/// while row N is being transmitted. A fill error waits out the
/// in-flight row, then propagates.
pub fn stream_rows<D, F>(
    display: &mut D,
    window: Window,
    row_bytes: usize,
    scratch: &mut Scratch,
    mut fill: F,
) -> Result<(), MediaError>
where
    D: DisplaySink + ?Sized,
    F: FnMut(u16, &mut [u8]) -> Result<(), MediaError>,
{
    if window.h == 0 || row_bytes == 0 {
        return Ok(());
    }
    scratch.ensure(row_bytes)?;

    fill(0, &mut scratch.front[..row_bytes])?;
    window.select(display);

    for row in 0..window.h {
        display.transmit(&scratch.front[..row_bytes], true);
        let next = if row + 1 < window.h {
            fill(row + 1, &mut scratch.back[..row_bytes])
        } else {
            Ok(())
        };
        display.await_transfer_complete();
        next?;
        scratch.swap();
    }
    Ok(())
}

/// Send one decoded block of native RGB565 pixels (`w` x `h`, row-major)
/// with its top-left corner at `(x, y)`. Parts past the surface edge are
/// cropped. Returns with the transfer possibly still running.
pub fn push_block<D>(
    display: &mut D,
    scratch: &mut Scratch,
    x: u16,
    y: u16,
    w: u16,
    h: u16,
    pixels: &[u16],
) -> Result<(), MediaError>
where
    D: DisplaySink + ?Sized,
{
    let (sw, sh) = display.surface();
    if x >= sw || y >= sh || w == 0 || h == 0 {
        return Ok(());
    }
    let vis_w = w.min(sw - x) as usize;
    let vis_h = h.min(sh - y) as usize;
    let len = vis_w * vis_h * 2;

    // the idle buffer may still be the one on the wire from two blocks ago
    display.await_transfer_complete();
    scratch.ensure(len)?;

    let out = &mut scratch.back[..len];
    for (r, dst_row) in out.chunks_exact_mut(vis_w * 2).enumerate() {
        let src_row = &pixels[r * w as usize..r * w as usize + vis_w];
        for (dst, px) in dst_row.chunks_exact_mut(2).zip(src_row) {
            dst.copy_from_slice(&px.to_be_bytes());
        }
    }
    scratch.swap();

    Window {
        x,
        y,
        w: vis_w as u16,
        h: vis_h as u16,
    }
    .select(display);
    display.transmit(&scratch.front[..len], true);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeDisplay;

    #[test]
    fn rows_share_one_window_and_never_overlap() {
        let mut lcd = FakeDisplay::new(160, 128).with_latency(3);
        let mut scratch = Scratch::new();
        let window = Window { x: 10, y: 20, w: 4, h: 3 };
        stream_rows(&mut lcd, window, 8, &mut scratch, |row, buf| {
            buf.fill(row as u8 + 1);
            Ok(())
        })
        .unwrap();

        assert_eq!(lcd.windows, vec![(10, 20, 13, 22)]);
        assert_eq!(lcd.transfers.len(), 3);
        assert_eq!(lcd.transfers[2], vec![3u8; 8]);
        assert_eq!(lcd.overlaps, 0);
        assert!(lcd.is_idle());
    }

    #[test]
    fn fill_error_waits_for_in_flight_row() {
        let mut lcd = FakeDisplay::new(160, 128).with_latency(5);
        let mut scratch = Scratch::new();
        let window = Window { x: 0, y: 0, w: 2, h: 4 };
        let res = stream_rows(&mut lcd, window, 4, &mut scratch, |row, _| {
            if row == 2 { Err(MediaError::FileReadFailed) } else { Ok(()) }
        });
        assert_eq!(res, Err(MediaError::FileReadFailed));
        assert_eq!(lcd.transfers.len(), 2);
        assert!(lcd.is_idle());
    }

    #[test]
    fn blocks_are_big_endian_and_cropped() {
        let mut lcd = FakeDisplay::new(10, 10);
        let mut scratch = Scratch::new();
        let px: Vec<u16> = (0..16).map(|i| 0x0100 + i).collect();
        push_block(&mut lcd, &mut scratch, 8, 0, 4, 4, &px).unwrap();
        lcd.await_transfer_complete();

        assert_eq!(lcd.windows, vec![(8, 0, 9, 3)]);
        // columns 0 and 1 of each of the 4 rows
        assert_eq!(&lcd.transfers[0][..4], &[0x01, 0x00, 0x01, 0x01]);
        assert_eq!(&lcd.transfers[0][4..8], &[0x01, 0x04, 0x01, 0x05]);
        assert_eq!(lcd.transfers[0].len(), 16);

        // fully off-surface blocks are dropped
        push_block(&mut lcd, &mut scratch, 12, 0, 4, 4, &px).unwrap();
        assert_eq!(lcd.transfers.len(), 1);
    }

    #[test]
    fn scratch_grows_fallibly() {
        let mut s = Scratch::new();
        assert!(s.is_empty());
        s.ensure(32).unwrap();
        s.ensure(16).unwrap();
        assert_eq!(s.len(), 32);
    }
}
