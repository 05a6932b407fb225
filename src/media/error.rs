// Error type shared by video playback and still-image display

use core::fmt;

use crate::drivers::storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaError {
    FileNotFound,
    FileOpenFailed,
    FileReadFailed,
    InvalidFormat,
    UnsupportedFormat,
    MemoryAllocationFailed,
    InvalidParameter,
    DecodeFailed,
    NotOpen,
    // normal termination of a clip, not a failure
    EndOfStream,
    PlaybackError,
}

impl MediaError {
    pub const fn as_str(self) -> &'static str {
        match self {
            MediaError::FileNotFound => "file not found",
            MediaError::FileOpenFailed => "file open failed",
            MediaError::FileReadFailed => "file read failed",
            MediaError::InvalidFormat => "invalid format",
            MediaError::UnsupportedFormat => "unsupported format",
            MediaError::MemoryAllocationFailed => "memory allocation failed",
            MediaError::InvalidParameter => "invalid parameter",
            MediaError::DecodeFailed => "decode failed",
            MediaError::NotOpen => "not open",
            MediaError::EndOfStream => "end of stream",
            MediaError::PlaybackError => "playback error",
        }
    }

    #[inline]
    pub fn is_end_of_stream(self) -> bool {
        self == MediaError::EndOfStream
    }
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::error::Error for MediaError {}

impl From<StorageError> for MediaError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => MediaError::FileNotFound,
            StorageError::OpenFailed => MediaError::FileOpenFailed,
            StorageError::ReadFailed | StorageError::SeekFailed | StorageError::UnexpectedEof => {
                MediaError::FileReadFailed
            }
        }
    }
}
