//! Pixel sink used by the media pipeline.
//!
//! Media code never draws pixel by pixel: it selects an addressing window
//! and streams RGB565 bytes into it, already in wire order (big-endian).
//! A sink may run transfers in the background; [`DisplaySink::is_idle`]
//! reports completion and [`DisplaySink::await_transfer_complete`] is the
//! single place that spins on it.

use embedded_graphics_core::geometry::OriginDimensions;

pub trait DisplaySink: OriginDimensions {
    /// Select the inclusive window `(x0, y0)..=(x1, y1)` for the pixel
    /// data that follows.
    fn set_window(&mut self, x0: u16, y0: u16, x1: u16, y1: u16);

    /// Send pixel bytes into the current window.
    ///
    /// With `nonblocking` set the sink may return before the bytes are on
    /// the wire; the caller keeps `bytes` untouched until `is_idle`.
    fn transmit(&mut self, bytes: &[u8], nonblocking: bool);

    fn is_idle(&self) -> bool;

    /// Spin until the outstanding transfer, if any, has finished.
    fn await_transfer_complete(&mut self) {
        while !self.is_idle() {
            core::hint::spin_loop();
        }
    }

    /// Surface size as `(width, height)`.
    fn surface(&self) -> (u16, u16) {
        let size = self.size();
        (size.width as u16, size.height as u16)
    }
}
