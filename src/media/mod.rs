// Media playback: video sessions, still images and the shared pixel path
//
// pipeline   double-buffered row/block transfers into a DisplaySink
// codec      block decoder adapter (bounded pull, display push, scaling)
// endian     raw 565 byte order detection
// player     AVI playback sessions and pacing
// image      bitmap / JPEG / raw 565 stills

pub mod codec;
pub mod endian;
pub mod error;
pub mod image;
pub mod pipeline;
pub mod player;

pub use codec::{BlockDecoder, BlockSink, ByteSource, Rect, ScaleMode};
pub use error::MediaError;
pub use image::{Region, StillImageInfo, display_streaming, show_bitmap, show_jpeg, show_raw};
pub use pipeline::Scratch;
pub use player::{
    ByteOrder, FrameCallback, PlayMode, PlaybackSession, PlaybackState, Player, SessionOptions, Tick,
};
