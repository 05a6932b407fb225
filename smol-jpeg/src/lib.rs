// smol-jpeg: minimal no_std baseline JPEG decoder.
// jpeg: marker parser, Huffman/IDCT core, MCU blocks pushed as RGB565
//
// Input is pulled through a caller closure, output is pushed one MCU
// at a time, so no frame-sized buffer is ever allocated.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod jpeg;

pub use jpeg::{JpegDecoder, Rect};
