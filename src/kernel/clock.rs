// Millisecond uptime clock fed from the periodic timer ISR
//
// The ISR calls tick() with its period; everything else reads
// uptime_ms(). Critical section guards riscv32imc (no atomic RMW).
// The counter wraps after ~49 days; callers subtract with wrapping_sub.

use core::cell::Cell;

use critical_section::Mutex;

static UPTIME_MS: Mutex<Cell<u32>> = Mutex::new(Cell::new(0));

#[inline]
pub fn tick(ms: u32) {
    critical_section::with(|cs| {
        let now = UPTIME_MS.borrow(cs);
        now.set(now.get().wrapping_add(ms));
    });
}

pub fn uptime_ms() -> u32 {
    critical_section::with(|cs| UPTIME_MS.borrow(cs).get())
}

#[inline]
pub fn wait_for_interrupt() {
    #[cfg(target_arch = "riscv32")]
    unsafe {
        core::arch::asm!("wfi", options(nomem, nostack));
    }

    #[cfg(not(target_arch = "riscv32"))]
    core::hint::spin_loop();
}

/// Time source for playback pacing.
pub trait Clock {
    fn now_ms(&self) -> u32;

    /// Called on every iteration of a pacing busy-wait.
    fn relax(&self) {}
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }

    fn relax(&self) {
        (**self).relax()
    }
}

/// The timer-driven uptime clock; sleeps until the next tick while waiting.
#[derive(Default, Clone, Copy)]
pub struct SysClock;

impl Clock for SysClock {
    fn now_ms(&self) -> u32 {
        uptime_ms()
    }

    fn relax(&self) {
        wait_for_interrupt();
    }
}
