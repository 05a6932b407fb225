// reel-os entry point
//
// Boot sequence: logger -> heap -> 1 ms tick timer -> board -> MEDIA.TXT
// then show the configured autoplay file. Clips play in the mode from
// MEDIA.TXT; in polling mode the CPU sleeps in WFI between frame slots.
// Failures end up as a one-line status message at the bottom of the LCD.

#![no_std]
#![no_main]

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use embedded_graphics::text::Text;
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::time::Duration;
use esp_hal::timer::PeriodicTimer;
use esp_hal::timer::timg::TimerGroup;
use log::{info, warn};

use reel_os::board::{Board, Lcd, Sd};
use reel_os::drivers::display::DisplaySink;
use reel_os::drivers::st7735::{HEIGHT, WIDTH};
use reel_os::formats::{CodecKind, MediaFormat, is_supported_video};
use reel_os::kernel::clock::{self, SysClock, wait_for_interrupt};
use reel_os::media::codec::{pick_scale, scaled_size};
use reel_os::media::{
    MediaError, PlayMode, PlaybackSession, StillImageInfo, Tick, display_streaming,
};
use reel_os::settings::MediaSettings;
use smol_jpeg::JpegDecoder;

extern crate alloc;

use alloc::format;

esp_bootloader_esp_idf::esp_app_desc!();

const TICK_MS: u32 = 1;
const STATUS_H: u32 = 12;

static TIMER0: Mutex<RefCell<Option<PeriodicTimer<'static, esp_hal::Blocking>>>> =
    Mutex::new(RefCell::new(None));

#[esp_hal::handler(priority = esp_hal::interrupt::Priority::Priority1)]
fn timer0_handler() {
    critical_section::with(|cs| {
        if let Some(timer) = TIMER0.borrow_ref_mut(cs).as_mut() {
            timer.clear_interrupt();
        }
    });
    clock::tick(TICK_MS);
}

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger_from_env();
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    esp_alloc::heap_allocator!(size: 160 * 1024);

    info!("booting...");

    let timg0 = TimerGroup::new(unsafe { peripherals.TIMG0.clone_unchecked() });
    let mut timer0 = PeriodicTimer::new(timg0.timer0);
    critical_section::with(|cs| {
        timer0.set_interrupt_handler(timer0_handler);
        if timer0.start(Duration::from_millis(TICK_MS as u64)).is_err() {
            warn!("timer: start failed, playback will not advance");
        }
        timer0.listen();
        TIMER0.borrow_ref_mut(cs).replace(timer0);
    });
    info!("timer initialized.");

    let mut board = match Board::init(peripherals) {
        Ok(board) => board,
        Err(e) => {
            warn!("board: {}", e);
            halt();
        }
    };
    info!("hardware initialized.");

    let settings = MediaSettings::load(&board.sd);
    match settings.autoplay() {
        None => status(&mut board.lcd, "no autoplay= in MEDIA.TXT"),
        Some(path) => {
            if let Err(e) = run(&mut board.lcd, &board.sd, &settings, path) {
                warn!("media: {}: {}", path, e);
                status(&mut board.lcd, &format!("{}: {}", path, e));
            }
        }
    }
    halt();
}

fn run(lcd: &mut Lcd, sd: &Sd, settings: &MediaSettings, path: &str) -> Result<(), MediaError> {
    let decoder = JpegDecoder::new().map_err(|e| {
        warn!("{}", e);
        MediaError::MemoryAllocationFailed
    })?;
    let _ = lcd.clear(Rgb565::BLACK);

    if is_supported_video(path) {
        play_clip(lcd, sd, settings, path, decoder)
    } else {
        show_still(lcd, sd, settings, path, decoder)
    }
}

fn play_clip(
    lcd: &mut Lcd,
    sd: &Sd,
    settings: &MediaSettings,
    path: &str,
    decoder: JpegDecoder,
) -> Result<(), MediaError> {
    let mut session =
        PlaybackSession::open_with(sd, path, SysClock, decoder, settings.session_options())?;

    let surface = lcd.surface();
    let info = session.info();
    let (w, h) = (info.width, info.height);
    let size = if info.codec == CodecKind::Mjpeg {
        scaled_size(w, h, pick_scale(w, h, surface))
    } else {
        (w, h)
    };
    let (x, y) = settings.origin_for(size, surface);

    loop {
        session.play(lcd, x, y, settings.play_mode)?;
        if settings.play_mode == PlayMode::Polling {
            loop {
                match session.poll(lcd) {
                    Ok(Tick::Rendered) => {}
                    Ok(Tick::Pending) => wait_for_interrupt(),
                    Ok(Tick::Inactive) | Err(MediaError::EndOfStream) => break,
                    Err(e) => return Err(e),
                }
            }
        }
        info!(
            "media: {} done, {} rendered, {} skipped, {} fps",
            path,
            session.frames_rendered(),
            session.frames_skipped(),
            session.average_fps()
        );
        if !settings.repeat {
            return Ok(());
        }
        session.stop();
    }
}

fn show_still(
    lcd: &mut Lcd,
    sd: &Sd,
    settings: &MediaSettings,
    path: &str,
    mut decoder: JpegDecoder,
) -> Result<(), MediaError> {
    let surface = lcd.surface();
    let info = StillImageInfo::probe(sd, &mut decoder, path, surface)?;

    // (size on screen, last two arguments of display_streaming)
    let (size, c, d) = match info.format {
        MediaFormat::Jpeg => {
            let scale = pick_scale(info.width, info.height, surface);
            (scaled_size(info.width, info.height, scale), scale as u16, 0)
        }
        _ => {
            // oversized bitmaps are cropped to the top-left corner
            let size = (info.width.min(surface.0), info.height.min(surface.1));
            (size, size.0, size.1)
        }
    };
    let (x, y) = settings.origin_for(size, surface);
    display_streaming(sd, lcd, &mut decoder, path, x, y, 0, 0, c, d)
}

fn status(lcd: &mut Lcd, msg: &str) {
    let top = (HEIGHT as u32 - STATUS_H) as i32;
    let _ = Rectangle::new(Point::new(0, top), Size::new(WIDTH as u32, STATUS_H))
        .into_styled(PrimitiveStyle::with_fill(Rgb565::BLACK))
        .draw(lcd);
    let style = MonoTextStyle::new(&FONT_6X10, Rgb565::WHITE);
    let _ = Text::new(msg, Point::new(2, top + 9), style).draw(lcd);
}

fn halt() -> ! {
    loop {
        wait_for_interrupt();
    }
}
