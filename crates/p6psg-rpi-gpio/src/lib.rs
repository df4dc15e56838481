//! Raspberry Pi GPIO backend for the PC-6001 PSG driver.
//!
//! Drives a YM2149F or AY-3-8910 wired to the Pi's GPIO header:
//! - [`mmio`] - `/dev/mem` peripheral mapping with volatile access
//! - [`gpio`] - pin function select and single-store mask writes
//! - [`clock`] - GPCLK0 master clock (2.0000 or 1.9968 MHz)
//! - [`backend`] - the AY/YM bus protocol behind
//!   [`p6psg_core::backend::PsgBackend`]
//!
//! Requires root (or CAP_SYS_RAWIO) for the `/dev/mem` mappings.

pub mod backend;
pub mod clock;
pub mod gpio;
pub mod mmio;

pub use backend::{PinMap, RpiGpioBackend, RpiGpioConfig};
pub use clock::ClockRate;
