// reel-os: media player firmware for an ESP32-C3 handheld (SD card + ST7735 LCD)
//
// The media core (formats/, media/) is target-independent and talks to
// hardware only through the Storage, DisplaySink and Clock traits, so it
// builds and tests on the host. board/ and the firmware binary are gated
// behind the `esp32c3` feature.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[cfg(feature = "esp32c3")]
pub mod board;
pub mod drivers;
pub mod formats;
pub mod kernel;
pub mod media;
pub mod settings;

#[cfg(test)]
pub(crate) mod testutil;
