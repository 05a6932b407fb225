// File access for media playback.
//
// Media code opens files by path through `Storage` and reads them through
// `StorageFile`, so the same parsers run against the SD card on target
// and an in-memory card in tests. Files close when dropped.
//
// Paths are 8.3 names relative to the SD root; each '/' descends one
// directory level ("CLIPS/INTRO.AVI").

use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiDevice;
use embedded_sdmmc::{Mode, RawFile, RawVolume, VolumeIdx};

use crate::drivers::sdcard::SdStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    OpenFailed,
    ReadFailed,
    SeekFailed,
    UnexpectedEof,
}

impl StorageError {
    pub const fn as_str(self) -> &'static str {
        match self {
            StorageError::NotFound => "file not found",
            StorageError::OpenFailed => "open failed",
            StorageError::ReadFailed => "read failed",
            StorageError::SeekFailed => "seek failed",
            StorageError::UnexpectedEof => "unexpected end of file",
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::error::Error for StorageError {}

/// An open, seekable, read-only file.
pub trait StorageFile {
    /// Read up to `buf.len()` bytes at the current position. `Ok(0)` means
    /// end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Move the position to `offset` bytes from the start.
    fn seek(&mut self, offset: u32) -> Result<(), StorageError>;

    fn tell(&self) -> u32;

    fn size(&self) -> u32;

    /// Fill `buf` completely or fail with `UnexpectedEof`.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), StorageError> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read(&mut buf[total..])?;
            if n == 0 {
                return Err(StorageError::UnexpectedEof);
            }
            total += n;
        }
        Ok(())
    }
}

pub trait Storage {
    type File<'a>: StorageFile
    where
        Self: 'a;

    fn open<'a>(&'a self, path: &str) -> Result<Self::File<'a>, StorageError>;
}

// SD card backend

pub struct SdFile<'a, SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    sd: &'a SdStorage<SPI, D>,
    file: RawFile,
    pos: u32,
    len: u32,
}

fn map_open_err<E: fmt::Debug>(e: embedded_sdmmc::Error<E>) -> StorageError {
    match e {
        embedded_sdmmc::Error::NotFound => StorageError::NotFound,
        other => {
            log::debug!("sd: open error {:?}", other);
            StorageError::OpenFailed
        }
    }
}

impl<SPI, D> SdStorage<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    // mount volume 0 on first use
    fn raw_volume(&self) -> Result<RawVolume, StorageError> {
        if let Some(v) = self.volume.get() {
            return Ok(v);
        }
        let v = self
            .volume_mgr
            .open_raw_volume(VolumeIdx(0))
            .map_err(map_open_err)?;
        self.volume.set(Some(v));
        Ok(v)
    }

    fn open_raw(&self, path: &str) -> Result<RawFile, StorageError> {
        let volume = self.raw_volume()?;
        let mut dir = self
            .volume_mgr
            .open_root_dir(volume)
            .map_err(map_open_err)?;

        let mut parts = path.trim_start_matches('/').split('/').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let file = self
                    .volume_mgr
                    .open_file_in_dir(dir, part, Mode::ReadOnly)
                    .map_err(map_open_err);
                let _ = self.volume_mgr.close_dir(dir);
                return file;
            }
            let next = self.volume_mgr.open_dir(dir, part).map_err(map_open_err);
            let _ = self.volume_mgr.close_dir(dir);
            dir = next?;
        }

        let _ = self.volume_mgr.close_dir(dir);
        Err(StorageError::NotFound)
    }
}

impl<SPI, D> Storage for SdStorage<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    type File<'a>
        = SdFile<'a, SPI, D>
    where
        Self: 'a;

    fn open<'a>(&'a self, path: &str) -> Result<Self::File<'a>, StorageError> {
        let file = self.open_raw(path)?;
        let len = match self.volume_mgr.file_length(file) {
            Ok(len) => len,
            Err(_) => {
                let _ = self.volume_mgr.close_file(file);
                return Err(StorageError::OpenFailed);
            }
        };
        Ok(SdFile {
            sd: self,
            file,
            pos: 0,
            len,
        })
    }
}

impl<SPI, D> StorageFile for SdFile<'_, SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        if self.pos >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let n = self
            .sd
            .volume_mgr
            .read(self.file, buf)
            .map_err(|_| StorageError::ReadFailed)?;
        self.pos += n as u32;
        Ok(n)
    }

    fn seek(&mut self, offset: u32) -> Result<(), StorageError> {
        self.sd
            .volume_mgr
            .file_seek_from_start(self.file, offset)
            .map_err(|_| StorageError::SeekFailed)?;
        self.pos = offset;
        Ok(())
    }

    fn tell(&self) -> u32 {
        self.pos
    }

    fn size(&self) -> u32 {
        self.len
    }
}

impl<SPI, D> Drop for SdFile<'_, SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    fn drop(&mut self) {
        let _ = self.sd.volume_mgr.close_file(self.file);
    }
}
