//! AY/YM bus protocol over Raspberry Pi GPIO.
//!
//! Wiring this backend assumes (BCM numbering; BC2 tied high, A8 high,
//! A9 low on the board):
//!
//! ```text
//! GPIO4      -> PSG clock  (GPCLK0, ALT0)
//! GPIO5..12  -> DA0..DA7   (LSB = GPIO5)
//! GPIO13     -> BDIR
//! GPIO16     -> BC1
//! GPIO17     -> RESET      (active high, open-collector driver)
//! ```
//!
//! Bus states with BC2 high:
//!
//! | BDIR | BC1 | function      |
//! |------|-----|---------------|
//! |  0   |  0  | inactive      |
//! |  0   |  1  | read (unused) |
//! |  1   |  0  | write data    |
//! |  1   |  1  | latch address |
//!
//! Every bus transition is one GPCLR0 store plus one GPSET0 store;
//! setup and pulse times (300 ns YM2149F, up to 500 ns AY-3-8910) come
//! from pairs of uncached dummy reads between the edges.

use std::io;
use std::thread;
use std::time::Duration;

use p6psg_core::backend::{BackendError, BackendState, PsgBackend, Result};
use p6psg_core::regs;

use crate::clock::{ClockGenerator, ClockRate, CM_LEN, CM_OFFSET};
use crate::gpio::{Gpio, PinFunction, GPIO_LEN, GPIO_OFFSET};
use crate::mmio::MmioRegion;

const BACKEND_ID: &str = "rpi-gpio";

/// Dummy-read pairs per bus edge, tuned for the AY-3-8910 worst case.
const NREAD_WAIT: u32 = 3;

/// Physical pin assignment (BCM numbering).
#[derive(Debug, Clone, Copy)]
pub struct PinMap {
    /// Master clock output; must be a GPCLK0-capable pin (GPIO4).
    pub clock: u8,
    /// Lowest data-bus pin; DA0..DA7 occupy eight contiguous pins.
    pub data0: u8,
    /// BDIR control line.
    pub bdir: u8,
    /// BC1 control line.
    pub bc1: u8,
    /// Active-high reset line.
    pub reset: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            clock: 4,
            data0: 5,
            bdir: 13,
            bc1: 16,
            reset: 17,
        }
    }
}

/// Backend configuration.
#[derive(Debug, Clone, Copy)]
pub struct RpiGpioConfig {
    /// Physical peripheral base: 0x3F000000 on BCM2836/7 (Pi 2/3),
    /// 0x20000000 on BCM2835 (Pi 1/Zero), 0xFE000000 on BCM2711 (Pi 4).
    pub peri_base: u64,
    /// Pin assignment.
    pub pins: PinMap,
    /// Master clock rate fed to the PSG.
    pub clock_rate: ClockRate,
}

impl Default for RpiGpioConfig {
    fn default() -> Self {
        Self {
            peri_base: 0x3F00_0000,
            pins: PinMap::default(),
            clock_rate: ClockRate::default(),
        }
    }
}

/// Precomputed GPSET/GPCLR masks for the pin map.
#[derive(Debug, Clone, Copy)]
struct Masks {
    data: u32,
    data_shift: u8,
    bdir: u32,
    bc1: u32,
    ctrl: u32,
    reset: u32,
}

impl Masks {
    fn new(pins: &PinMap) -> Self {
        let data = 0xFFu32 << pins.data0;
        let bdir = 1u32 << pins.bdir;
        let bc1 = 1u32 << pins.bc1;
        Self {
            data,
            data_shift: pins.data0,
            bdir,
            bc1,
            ctrl: bdir | bc1,
            reset: 1u32 << pins.reset,
        }
    }
}

/// Mapped hardware, held between init and fini.
struct Io {
    gpio: Gpio,
    clock: ClockGenerator,
    masks: Masks,
}

impl Io {
    /// Put a byte on DA0..DA7: clear-then-set, two stores total.
    fn bus_write8(&mut self, value: u8) {
        let set = (u32::from(value) << self.masks.data_shift) & self.masks.data;
        let clear = self.masks.data & !set;
        self.gpio.write_masks(set, clear);
    }

    /// BDIR=0 BC1=0.
    fn ctrl_inactive(&mut self) {
        self.gpio.write_masks(0, self.masks.ctrl);
    }

    /// BDIR=1 BC1=1 in a single set store (no intermediate state).
    fn ctrl_latch_address(&mut self) {
        self.gpio.write_masks(self.masks.ctrl, 0);
    }

    /// BDIR=1 BC1=0.
    fn ctrl_write_data(&mut self) {
        self.gpio.write_masks(self.masks.bdir, self.masks.bc1);
    }

    /// Latch a register address onto the chip.
    fn latch_address(&mut self, reg: u8) {
        self.bus_write8(reg & 0x0F);
        self.ctrl_latch_address();
        // Address setup: 300 ns (YM2149F) / 400 ns (AY-3-8910).
        self.gpio.settle(NREAD_WAIT);
        self.ctrl_inactive();
    }

    /// Clock a data byte into the latched register.
    fn write_data(&mut self, value: u8) {
        self.bus_write8(value);
        // Always pass through inactive so only BDIR has to rise.
        self.ctrl_inactive();
        self.ctrl_write_data();
        // Write pulse: 300 ns (YM2149F) / 500 ns (AY-3-8910).
        self.gpio.settle(NREAD_WAIT);
        self.ctrl_inactive();
    }

    fn write_reg_raw(&mut self, reg: u8, value: u8) {
        self.latch_address(reg);
        self.write_data(value);
    }

    /// Active-high reset pulse with settle time on both sides.
    fn reset_pulse(&mut self) {
        self.gpio.write_masks(0, self.masks.reset);
        thread::sleep(Duration::from_micros(10));
        self.gpio.write_masks(self.masks.reset, 0);
        thread::sleep(Duration::from_millis(1));
        self.gpio.write_masks(0, self.masks.reset);
        thread::sleep(Duration::from_millis(1));
    }
}

/// The Raspberry Pi GPIO backend.
pub struct RpiGpioBackend {
    config: RpiGpioConfig,
    state: BackendState,
    io: Option<Io>,
}

impl RpiGpioBackend {
    /// Create a backend with the default wiring and peripheral base.
    pub fn new() -> Self {
        Self::with_config(RpiGpioConfig::default())
    }

    /// Create a backend for a custom wiring/SoC.
    pub fn with_config(config: RpiGpioConfig) -> Self {
        Self {
            config,
            state: BackendState::Created,
            io: None,
        }
    }

    fn state_error(&self, op: &'static str) -> BackendError {
        BackendError::State {
            backend: BACKEND_ID,
            op,
            state: self.state,
        }
    }

    fn resource_error(what: &'static str, source: io::Error) -> BackendError {
        BackendError::Resource {
            backend: BACKEND_ID,
            what,
            source,
        }
    }

    fn validate_pins(pins: &PinMap) -> Result<()> {
        let highest = [
            u16::from(pins.clock),
            u16::from(pins.data0) + 7,
            u16::from(pins.bdir),
            u16::from(pins.bc1),
            u16::from(pins.reset),
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        if highest > 31 {
            // GPSET0/GPCLR0 only cover bank 0.
            return Err(Self::resource_error(
                "pin map",
                io::Error::new(io::ErrorKind::InvalidInput, "pins must be in GPIO bank 0"),
            ));
        }
        Ok(())
    }
}

impl Default for RpiGpioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PsgBackend for RpiGpioBackend {
    fn id(&self) -> &'static str {
        BACKEND_ID
    }

    fn state(&self) -> BackendState {
        self.state
    }

    fn init(&mut self) -> Result<()> {
        if self.state != BackendState::Created {
            return Err(self.state_error("init"));
        }
        Self::validate_pins(&self.config.pins)?;

        let gpio_region = MmioRegion::map(self.config.peri_base + GPIO_OFFSET, GPIO_LEN)
            .map_err(|e| Self::resource_error("map GPIO block", e))?;
        let cm_region = MmioRegion::map(self.config.peri_base + CM_OFFSET, CM_LEN)
            .map_err(|e| Self::resource_error("map clock manager", e))?;

        let mut io = Io {
            gpio: Gpio::new(gpio_region),
            clock: ClockGenerator::new(cm_region),
            masks: Masks::new(&self.config.pins),
        };

        let pins = self.config.pins;
        for pin in pins.data0..pins.data0 + 8 {
            io.gpio.set_function(pin, PinFunction::Output);
        }
        io.gpio.set_function(pins.bdir, PinFunction::Output);
        io.gpio.set_function(pins.bc1, PinFunction::Output);
        io.gpio.set_function(pins.reset, PinFunction::Output);
        io.gpio.set_function(pins.clock, PinFunction::Alt0);

        io.clock.start(self.config.clock_rate);

        // Safe defaults: bus inactive, data cleared, reset deasserted.
        io.ctrl_inactive();
        io.bus_write8(0x00);
        io.gpio.write_masks(0, io.masks.reset);

        log::debug!(
            "{BACKEND_ID}: mapped at {:#010x}, clock {} Hz",
            self.config.peri_base,
            self.config.clock_rate.hz()
        );
        self.io = Some(io);
        self.state = BackendState::Ready;
        Ok(())
    }

    fn fini(&mut self) {
        if self.state == BackendState::Enabled {
            self.disable();
        }
        if let Some(mut io) = self.io.take() {
            io.ctrl_inactive();
            io.gpio.write_masks(0, io.masks.reset);
            io.clock.stop();
            // Dropping `io` unmaps both regions.
        }
        self.state = BackendState::Finished;
    }

    fn enable(&mut self) -> Result<()> {
        match self.state {
            BackendState::Ready | BackendState::Disabled => {
                self.state = BackendState::Enabled;
                Ok(())
            }
            _ => Err(self.state_error("enable")),
        }
    }

    fn disable(&mut self) {
        if self.state != BackendState::Enabled {
            return;
        }
        if let Some(io) = self.io.as_mut() {
            // Mute before surrendering the bus: mixer all-off, volumes zero.
            io.write_reg_raw(regs::MIXER, 0x3F);
            io.write_reg_raw(regs::VOLUME_A, 0x00);
            io.write_reg_raw(regs::VOLUME_B, 0x00);
            io.write_reg_raw(regs::VOLUME_C, 0x00);
            io.ctrl_inactive();
        }
        self.state = BackendState::Disabled;
    }

    fn reset(&mut self) -> Result<()> {
        if self.state != BackendState::Enabled {
            return Err(self.state_error("reset"));
        }
        let Some(io) = self.io.as_mut() else {
            return Err(self.state_error("reset"));
        };
        io.ctrl_inactive();
        io.bus_write8(0x00);
        io.reset_pulse();
        Ok(())
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<()> {
        if self.state != BackendState::Enabled {
            return Err(self.state_error("write_reg"));
        }
        let Some(io) = self.io.as_mut() else {
            return Err(self.state_error("write_reg"));
        };
        io.write_reg_raw(reg, value);
        Ok(())
    }
}

impl Drop for RpiGpioBackend {
    fn drop(&mut self) {
        if !matches!(self.state, BackendState::Created | BackendState::Finished) {
            self.fini();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pin_map_is_contiguous_bank_zero() {
        let pins = PinMap::default();
        assert_eq!(pins.data0, 5);
        assert!(RpiGpioBackend::validate_pins(&pins).is_ok());
    }

    #[test]
    fn bank_one_pins_are_rejected() {
        let pins = PinMap {
            data0: 26, // DA7 would land on GPIO33
            ..PinMap::default()
        };
        assert!(RpiGpioBackend::validate_pins(&pins).is_err());
    }

    #[test]
    fn masks_cover_the_configured_pins() {
        let masks = Masks::new(&PinMap::default());
        assert_eq!(masks.data, 0xFF << 5);
        assert_eq!(masks.ctrl, (1 << 13) | (1 << 16));
        assert_eq!(masks.reset, 1 << 17);
    }

    #[test]
    fn operations_before_init_are_state_errors() {
        let mut be = RpiGpioBackend::new();
        assert!(be.enable().is_err());
        assert!(be.write_reg(0, 0).is_err());
        assert!(be.reset().is_err());
        assert_eq!(be.state(), BackendState::Created);
    }
}
