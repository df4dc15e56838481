//! PC-6001 PSG music driver core.
//!
//! This crate interprets the PC-6001 three-channel PSG music byte code
//! and turns it into AY-3-8910 / YM2149F register writes on a fixed 2 ms
//! tick. It is hardware-agnostic: register writes leave through a
//! [`RegisterSink`], committed notes through a [`NoteSink`], and physical
//! backends implement [`backend::PsgBackend`].
//!
//! Modules:
//! - [`format`] - music file loader (header validation, channel split)
//! - [`driver`] - the three-channel interpreter and driver core
//! - [`tone`] - tone period table and tempo math
//! - [`scheduler`] - drift-corrected 2 ms tick bookkeeping
//! - [`backend`] - hardware backend trait, lifecycle, software stub
//! - [`sink`] - output capabilities the driver is constructed with
//! - [`regs`] - PSG register numbers

pub mod backend;
pub mod driver;
pub mod format;
pub mod regs;
pub mod scheduler;
pub mod sink;
pub mod tone;

pub use backend::{BackendError, BackendState, PsgBackend, StubBackend};
pub use driver::PsgDriver;
pub use format::{FormatError, P6Song};
pub use scheduler::{TickScheduler, MAX_CATCHUP_TICKS, TICK_NS};
pub use sink::{NoteEvent, NoteSink, NullSink, RegisterSink};
