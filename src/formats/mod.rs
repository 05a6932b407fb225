// Media file formats: AVI container, BMP images, extension/signature detection

pub mod avi;
pub mod binary;
pub mod bmp;
pub mod detect;

pub use avi::{CodecKind, MediaInfo};
pub use detect::{MediaFormat, detect, is_supported_image, is_supported_video, probe};
