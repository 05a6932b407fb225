// Media format detection by extension and file signature

use crate::drivers::storage::{Storage, StorageFile};
use crate::media::MediaError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaFormat {
    Raw565,
    Bitmap,
    Jpeg,
    Avi,
}

impl MediaFormat {
    pub fn is_video(self) -> bool {
        self == MediaFormat::Avi
    }
}

/// Classify `path` by its extension (case-insensitive).
///
/// `.png` is recognised but has no decoder, so it reports
/// `UnsupportedFormat` like any unknown extension. A path without an
/// extension is `InvalidFormat`.
pub fn detect(path: &str) -> Result<MediaFormat, MediaError> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let Some(dot) = name.rfind('.') else {
        return Err(MediaError::InvalidFormat);
    };
    let ext = name[dot + 1..].as_bytes();

    if ext.eq_ignore_ascii_case(b"avi") {
        Ok(MediaFormat::Avi)
    } else if ext.eq_ignore_ascii_case(b"bmp") {
        Ok(MediaFormat::Bitmap)
    } else if ext.eq_ignore_ascii_case(b"jpg") || ext.eq_ignore_ascii_case(b"jpeg") {
        Ok(MediaFormat::Jpeg)
    } else if ext.eq_ignore_ascii_case(b"raw") || ext.eq_ignore_ascii_case(b"565") {
        Ok(MediaFormat::Raw565)
    } else {
        Err(MediaError::UnsupportedFormat)
    }
}

/// Check the leading bytes of a file against the signature of `format`.
/// Raw pixel files carry no signature and always pass.
pub fn check_signature(format: MediaFormat, header: &[u8]) -> Result<(), MediaError> {
    let ok = match format {
        MediaFormat::Avi => header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"AVI ",
        MediaFormat::Bitmap => header.starts_with(b"BM"),
        MediaFormat::Jpeg => header.starts_with(&[0xFF, 0xD8]),
        MediaFormat::Raw565 => true,
    };
    if ok { Ok(()) } else { Err(MediaError::InvalidFormat) }
}

/// Detect by extension, then confirm with the first 12 bytes of the file.
pub fn probe<S: Storage>(storage: &S, path: &str) -> Result<MediaFormat, MediaError> {
    let format = detect(path)?;
    let mut file = storage.open(path)?;
    let mut header = [0u8; 12];
    let mut got = 0;
    while got < header.len() {
        let n = file.read(&mut header[got..])?;
        if n == 0 {
            break;
        }
        got += n;
    }
    check_signature(format, &header[..got])?;
    Ok(format)
}

pub fn is_supported_video(path: &str) -> bool {
    matches!(detect(path), Ok(MediaFormat::Avi))
}

pub fn is_supported_image(path: &str) -> bool {
    matches!(
        detect(path),
        Ok(MediaFormat::Bitmap | MediaFormat::Jpeg | MediaFormat::Raw565)
    )
}
