//! Output-only GPIO for the SD chip select on GPIO12.
//!
//! The board boots its flash in DIO mode, which leaves GPIO12 (SPIHD)
//! free, but esp-hal 1.0 has no peripheral type for GPIO12..=17 on the
//! ESP32-C3. The pin is routed to the GPIO matrix and driven through the
//! set/clear registers directly.

mod reg {
    pub const OUT_W1TS: u32 = 0x6000_4008;
    pub const OUT_W1TC: u32 = 0x6000_400C;
    pub const ENABLE_W1TS: u32 = 0x6000_4024;
    // GPIO_FUNCn_OUT_SEL_CFG, one word per pin
    pub const FUNC_OUT_SEL: u32 = 0x6000_4554;
    // IO_MUX_GPIOn, one word per pin
    pub const IO_MUX: u32 = 0x6000_9000;

    // MCU_SEL value for the plain GPIO function
    pub const MUX_GPIO: u32 = 1;
    // output signal 128 = driven by GPIO_OUT
    pub const SIG_GPIO_OUT: u32 = 0x80;

    #[inline]
    pub unsafe fn write(addr: u32, val: u32) {
        unsafe { (addr as *mut u32).write_volatile(val) }
    }
}

pub struct RawOutputPin {
    pin: u8,
    mask: u32,
}

impl RawOutputPin {
    /// Route `pin` to GPIO_OUT as a push-pull output, driven high.
    ///
    /// # Safety
    /// The pin must not be wired to an active flash line and no other
    /// driver may touch it.
    pub unsafe fn new(pin: u8) -> Self {
        let mask = 1u32 << pin;
        unsafe {
            let mux = (reg::IO_MUX + pin as u32 * 4) as *mut u32;
            // keep drive strength and pulls, select the GPIO function
            let val = mux.read_volatile();
            mux.write_volatile((val & !0b111) | reg::MUX_GPIO);

            reg::write(reg::FUNC_OUT_SEL + pin as u32 * 4, reg::SIG_GPIO_OUT);
            reg::write(reg::ENABLE_W1TS, mask);
            // chip select idles deasserted
            reg::write(reg::OUT_W1TS, mask);
        }
        Self { pin, mask }
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }
}

impl embedded_hal::digital::ErrorType for RawOutputPin {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::OutputPin for RawOutputPin {
    #[inline]
    fn set_high(&mut self) -> Result<(), Self::Error> {
        unsafe { reg::write(reg::OUT_W1TS, self.mask) };
        Ok(())
    }

    #[inline]
    fn set_low(&mut self) -> Result<(), Self::Error> {
        unsafe { reg::write(reg::OUT_W1TC, self.mask) };
        Ok(())
    }
}
