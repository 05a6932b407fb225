// Player settings from MEDIA.TXT in the SD root.
// Text-based key=value format, one per line, '#' starts a comment.
//
//   autoplay=CLIPS/INTRO.AVI
//   play_mode=polling        # or blocking
//   byte_order=auto          # auto, le, be (raw 565 clips)
//   fallback_fps=30
//   origin_x=0
//   origin_y=0
//   center=1
//   repeat=0

use log::{info, warn};

use crate::drivers::storage::{Storage, StorageError, StorageFile};
use crate::media::{ByteOrder, PlayMode, SessionOptions};

pub const SETTINGS_FILE: &str = "MEDIA.TXT";
pub const PATH_CAP: usize = 64;
const MAX_FILE_LEN: usize = 512;

#[derive(Clone, Copy)]
pub struct MediaSettings {
    autoplay: [u8; PATH_CAP],
    autoplay_len: u8,
    pub play_mode: PlayMode,
    pub byte_order: ByteOrder,
    pub fallback_fps: u16,
    pub origin_x: u16,
    pub origin_y: u16,
    pub center: bool,
    pub repeat: bool,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self::defaults()
    }
}

impl MediaSettings {
    pub const fn defaults() -> Self {
        Self {
            autoplay: [0u8; PATH_CAP],
            autoplay_len: 0,
            play_mode: PlayMode::Polling,
            byte_order: ByteOrder::Auto,
            fallback_fps: 30,
            origin_x: 0,
            origin_y: 0,
            center: true,
            repeat: false,
        }
    }

    pub fn sanitize(&mut self) {
        self.fallback_fps = self.fallback_fps.clamp(1, 120);
    }

    /// File to show at boot, if any.
    pub fn autoplay(&self) -> Option<&str> {
        if self.autoplay_len == 0 {
            return None;
        }
        core::str::from_utf8(&self.autoplay[..self.autoplay_len as usize]).ok()
    }

    fn set_autoplay(&mut self, val: &[u8]) {
        let n = val.len().min(PATH_CAP);
        self.autoplay[..n].copy_from_slice(&val[..n]);
        self.autoplay_len = n as u8;
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            fallback_fps: self.fallback_fps as u32,
            byte_order: self.byte_order,
        }
    }

    /// Top-left corner for content of `size` on a `surface`.
    pub fn origin_for(&self, size: (u16, u16), surface: (u16, u16)) -> (u16, u16) {
        if self.center {
            (
                surface.0.saturating_sub(size.0) / 2,
                surface.1.saturating_sub(size.1) / 2,
            )
        } else {
            (self.origin_x, self.origin_y)
        }
    }

    /// Read MEDIA.TXT; a missing or unreadable file gives the defaults.
    pub fn load<S: Storage>(storage: &S) -> Self {
        let mut settings = Self::defaults();
        let mut buf = [0u8; MAX_FILE_LEN];
        match read_file(storage, &mut buf) {
            Ok(n) => {
                parse_media_txt(&buf[..n], &mut settings);
                settings.sanitize();
                info!("media: settings loaded ({} bytes)", n);
            }
            Err(StorageError::NotFound) => info!("media: no {}, using defaults", SETTINGS_FILE),
            Err(e) => warn!("media: {}: {}, using defaults", SETTINGS_FILE, e),
        }
        settings
    }
}

fn read_file<S: Storage>(storage: &S, buf: &mut [u8]) -> Result<usize, StorageError> {
    let mut file = storage.open(SETTINGS_FILE)?;
    let mut got = 0;
    while got < buf.len() {
        let n = file.read(&mut buf[got..])?;
        if n == 0 {
            break;
        }
        got += n;
    }
    Ok(got)
}

// text format parser

fn trim(s: &[u8]) -> &[u8] {
    let mut start = 0;
    let mut end = s.len();
    while start < end && matches!(s[start], b' ' | b'\t' | b'\r') {
        start += 1;
    }
    while end > start && matches!(s[end - 1], b' ' | b'\t' | b'\r') {
        end -= 1;
    }
    &s[start..end]
}

fn parse_u16(s: &[u8]) -> Option<u16> {
    if s.is_empty() {
        return None;
    }
    let mut val: u16 = 0;
    for &b in s {
        if !b.is_ascii_digit() {
            return None;
        }
        val = val.checked_mul(10)?.checked_add((b - b'0') as u16)?;
    }
    Some(val)
}

fn parse_flag(s: &[u8]) -> Option<bool> {
    match s {
        b"1" => Some(true),
        b"0" => Some(false),
        _ => None,
    }
}

fn apply_setting(key: &[u8], val: &[u8], s: &mut MediaSettings) {
    match key {
        b"autoplay" => s.set_autoplay(val),
        b"play_mode" => match val {
            b"blocking" => s.play_mode = PlayMode::Blocking,
            b"polling" => s.play_mode = PlayMode::Polling,
            _ => {}
        },
        b"byte_order" => match val {
            b"auto" => s.byte_order = ByteOrder::Auto,
            b"le" => s.byte_order = ByteOrder::Little,
            b"be" => s.byte_order = ByteOrder::Big,
            _ => {}
        },
        b"fallback_fps" => {
            if let Some(v) = parse_u16(val) {
                s.fallback_fps = v;
            }
        }
        b"origin_x" => {
            if let Some(v) = parse_u16(val) {
                s.origin_x = v;
            }
        }
        b"origin_y" => {
            if let Some(v) = parse_u16(val) {
                s.origin_y = v;
            }
        }
        b"center" => {
            if let Some(v) = parse_flag(val) {
                s.center = v;
            }
        }
        b"repeat" => {
            if let Some(v) = parse_flag(val) {
                s.repeat = v;
            }
        }
        _ => {} // unknown keys ignored
    }
}

fn parse_media_txt(data: &[u8], settings: &mut MediaSettings) {
    for line in data.split(|&b| b == b'\n') {
        // strip trailing comments
        let line = match line.iter().position(|&b| b == b'#') {
            Some(hash) => &line[..hash],
            None => line,
        };
        let line = trim(line);
        if line.is_empty() {
            continue;
        }
        if let Some(eq) = line.iter().position(|&b| b == b'=') {
            let key = trim(&line[..eq]);
            let val = trim(&line[eq + 1..]);
            apply_setting(key, val, settings);
        }
    }
}
