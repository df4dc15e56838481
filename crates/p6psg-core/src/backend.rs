//! Hardware backend abstraction.
//!
//! A backend owns whatever it takes to get register writes into a real
//! PSG: for the Raspberry Pi that is a `/dev/mem` GPIO mapping and the
//! BDIR/BC1 bus protocol; for hardware-less hosts the [`StubBackend`]
//! below just shadows the register file. Backends are selected at compile
//! time (or by plain construction in the player); there is no dynamic
//! plugin machinery.
//!
//! # Lifecycle
//!
//! ```text
//! created --init--> ready --enable--> enabled <--enable/disable--> disabled
//!                     |                  |
//!                     +------fini <------+  (fini also accepts ready/disabled)
//! ```
//!
//! `write_reg` and `reset` are legal only while enabled; `disable` must
//! leave the chip silent before surrendering the enabled state.

/// Lifecycle states a backend moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Constructed; no resources acquired.
    Created,
    /// `init` succeeded: process-local resources (mappings) are held.
    Ready,
    /// `enable` succeeded: the chip may be driven.
    Enabled,
    /// `disable` ran: resources held, chip silenced.
    Disabled,
    /// `fini` ran: all resources released. Terminal.
    Finished,
}

/// Errors reported by backend operations.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    /// Operation attempted in a lifecycle state that does not allow it.
    #[error("{backend}: `{op}` invalid in state {state:?}")]
    State {
        /// Backend identifier.
        backend: &'static str,
        /// Operation that was attempted.
        op: &'static str,
        /// State the backend was in.
        state: BackendState,
    },

    /// An OS resource (device node, mapping) could not be acquired.
    #[error("{backend}: {what}: {source}")]
    Resource {
        /// Backend identifier.
        backend: &'static str,
        /// What was being acquired.
        what: &'static str,
        /// Underlying OS error.
        source: std::io::Error,
    },
}

/// Result alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Interface every PSG backend implements.
pub trait PsgBackend {
    /// Short identifier used in diagnostics (`rpi-gpio`, `stub`, ...).
    fn id(&self) -> &'static str;

    /// Current lifecycle state.
    fn state(&self) -> BackendState;

    /// Acquire process-local resources. Legal once, from `Created`.
    fn init(&mut self) -> Result<()>;

    /// Release all resources. Legal from any state after `init`; the
    /// backend is unusable afterwards.
    fn fini(&mut self);

    /// Allow external side effects (driving the chip).
    fn enable(&mut self) -> Result<()>;

    /// Silence the chip and stop driving it. Idempotent.
    fn disable(&mut self);

    /// Pulse the chip's hardware reset line. Legal only while enabled.
    fn reset(&mut self) -> Result<()>;

    /// Write `value` to register `reg & 0x0F`. Legal only while enabled.
    fn write_reg(&mut self, reg: u8, value: u8) -> Result<()>;
}

/// Backend for hosts without a PSG wired up: keeps a register-file shadow
/// and traces writes through the `log` facade.
///
/// Follows the same lifecycle rules as the hardware backend so the player
/// and the tests exercise identical call sequences.
#[derive(Debug)]
pub struct StubBackend {
    state: BackendState,
    shadow: [u8; 16],
    writes: u64,
}

impl StubBackend {
    /// Create a stub in the `Created` state.
    pub fn new() -> Self {
        Self {
            state: BackendState::Created,
            shadow: [0; 16],
            writes: 0,
        }
    }

    /// Last value written to each register.
    pub fn shadow(&self) -> &[u8; 16] {
        &self.shadow
    }

    /// Total number of accepted register writes.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    fn state_error(&self, op: &'static str) -> BackendError {
        BackendError::State {
            backend: self.id(),
            op,
            state: self.state,
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PsgBackend for StubBackend {
    fn id(&self) -> &'static str {
        "stub"
    }

    fn state(&self) -> BackendState {
        self.state
    }

    fn init(&mut self) -> Result<()> {
        if self.state != BackendState::Created {
            return Err(self.state_error("init"));
        }
        log::debug!("stub backend init");
        self.state = BackendState::Ready;
        Ok(())
    }

    fn fini(&mut self) {
        if self.state == BackendState::Enabled {
            self.disable();
        }
        log::debug!("stub backend fini after {} writes", self.writes);
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
        if self.state == BackendState::Enabled {
            // Same silencing writes the hardware backend issues.
            self.shadow[crate::regs::MIXER as usize] = 0x3F;
            for reg in crate::regs::VOLUME_A..=crate::regs::VOLUME_C {
                self.shadow[reg as usize] = 0;
            }
            self.state = BackendState::Disabled;
        }
    }

    fn reset(&mut self) -> Result<()> {
        if self.state != BackendState::Enabled {
            return Err(self.state_error("reset"));
        }
        self.shadow = [0; 16];
        Ok(())
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<()> {
        if self.state != BackendState::Enabled {
            return Err(self.state_error("write_reg"));
        }
        let reg = reg & 0x0F;
        self.shadow[reg as usize] = value;
        self.writes += 1;
        log::trace!("stub write R{reg} = {value:#04x}");
        Ok(())
    }
}
