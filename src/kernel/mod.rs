// Timekeeping and idle primitives
// Single core, no preemption. WFI idles the CPU between timer ticks.

pub mod clock;

pub use clock::{Clock, SysClock};
