//! Driver core: three channel interpreters plus shared main state.
//!
//! The driver owns the channels, the tempo divider and the register
//! shadows the byte code read-modify-writes (noise period R6, mixer R7).
//! It is clocked by [`tick`](PsgDriver::tick) every 2 ms; every
//! `tempo_val` ticks it runs one music tick on channels A, B, C in that
//! order. All output goes through the injected sinks; the driver never
//! blocks and never allocates on the tick path.

mod channel;

use std::sync::Arc;

use channel::Channel;

use crate::regs;
use crate::sink::{NoteSink, RegisterSink};
use crate::tone::bpm_x10_from_t96;

/// Number of PSG channels.
pub const CHANNEL_COUNT: usize = 3;

/// Default tempo value: 10 ticks per 96th note (125 BPM).
pub const DEFAULT_TEMPO: u8 = 10;

/// Mixer power-on value: tones enabled, noise disabled, both I/O ports
/// set to output.
const REG7_DEFAULT: u8 = 0xF8;

/// Noise period power-on value from the original driver.
const REG6_DEFAULT: u8 = 0xC0;

/// Reserved fade-out state; carried but not applied.
#[derive(Debug, Default)]
#[allow(dead_code)]
struct FadeState {
    value: u8,
    step: i8,
    active: bool,
}

/// Shared driver state the channels read and modify.
#[derive(Debug)]
pub(crate) struct MainState {
    /// T96 tempo: 2 ms ticks per 96th note.
    pub(crate) tempo_val: u8,
    /// Countdown to the next music tick (1..=tempo_val).
    pub(crate) tempo_counter: u8,
    /// Display tempo, BPM x 10.
    pub(crate) bpm_x10: u16,
    /// Shadow of the last value written to R6.
    pub(crate) reg6_value: u8,
    /// Shadow of the last value written to R7.
    pub(crate) reg7_value: u8,
    /// Last value latched by the I command.
    pub(crate) i_command_value: u8,
    fade: FadeState,
}

impl MainState {
    pub(crate) fn new() -> Self {
        Self {
            tempo_val: DEFAULT_TEMPO,
            tempo_counter: DEFAULT_TEMPO,
            bpm_x10: bpm_x10_from_t96(DEFAULT_TEMPO),
            reg6_value: REG6_DEFAULT,
            reg7_value: REG7_DEFAULT,
            i_command_value: 0,
            fade: FadeState::default(),
        }
    }
}

/// The three-channel PSG music driver.
pub struct PsgDriver {
    main: MainState,
    channels: [Channel; CHANNEL_COUNT],
    reg_sink: Box<dyn RegisterSink>,
    note_sink: Box<dyn NoteSink>,
}

impl PsgDriver {
    /// Create a driver and issue the power-on register writes (mixer and
    /// noise period defaults).
    pub fn new(mut reg_sink: Box<dyn RegisterSink>, note_sink: Box<dyn NoteSink>) -> Self {
        let main = MainState::new();
        reg_sink.write_reg(regs::MIXER, main.reg7_value);
        reg_sink.write_reg(regs::NOISE_PERIOD, main.reg6_value);
        Self {
            main,
            channels: [Channel::new(0), Channel::new(1), Channel::new(2)],
            reg_sink,
            note_sink,
        }
    }

    /// Attach a byte-code stream to channel `index` and arm it.
    ///
    /// # Panics
    ///
    /// Panics if `index >= 3`.
    pub fn set_channel_data(&mut self, index: usize, data: Arc<[u8]>) {
        self.channels[index].set_data(data);
    }

    /// Mark every channel with data as active.
    pub fn start(&mut self) {
        for ch in &mut self.channels {
            ch.active = ch.has_data();
        }
    }

    /// Stop playback: deactivate all channels and mute their volumes.
    pub fn stop(&mut self) {
        for (index, ch) in self.channels.iter_mut().enumerate() {
            ch.active = false;
            self.reg_sink.write_reg(regs::volume(index as u8), 0);
        }
    }

    /// One 2 ms tick. Music ticks fire every `tempo_val` calls.
    pub fn tick(&mut self) {
        self.main.tempo_counter = self.main.tempo_counter.wrapping_sub(1);
        if self.main.tempo_counter == 0 {
            let Self {
                main,
                channels,
                reg_sink,
                note_sink,
            } = self;
            for ch in channels.iter_mut() {
                ch.tick(main, reg_sink.as_mut(), note_sink.as_mut());
            }
            main.tempo_counter = main.tempo_val;
        }
    }

    /// True while at least one channel is still playing.
    pub fn is_active(&self) -> bool {
        self.channels.iter().any(|ch| ch.active)
    }

    /// Current display tempo, BPM x 10.
    pub fn bpm_x10(&self) -> u16 {
        self.main.bpm_x10
    }

    /// Last value latched by the I command.
    pub fn i_command_value(&self) -> u8 {
        self.main.i_command_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default, Clone)]
    struct Recorder(Rc<RefCell<Vec<(u8, u8)>>>);

    impl RegisterSink for Recorder {
        fn write_reg(&mut self, reg: u8, value: u8) {
            self.0.borrow_mut().push((reg, value));
        }
    }

    #[test]
    fn init_writes_mixer_then_noise_defaults() {
        let rec = Recorder::default();
        let _drv = PsgDriver::new(Box::new(rec.clone()), Box::new(NullSink));
        assert_eq!(&*rec.0.borrow(), &[(7, 0xF8), (6, 0xC0)]);
    }

    #[test]
    fn music_tick_fires_every_tempo_val_ticks() {
        let rec = Recorder::default();
        let mut drv = PsgDriver::new(Box::new(rec.clone()), Box::new(NullSink));
        // One note, length 1, looping forever via J.
        drv.set_channel_data(0, Arc::from(&[0xFE, 0x21, 1, 0xFF][..]));
        drv.start();
        rec.0.borrow_mut().clear();

        // Nine 2ms ticks: no music tick yet (tempo_counter started at 10).
        for _ in 0..9 {
            drv.tick();
        }
        assert!(rec.0.borrow().is_empty());

        // The tenth fires the first music tick and commits the note.
        drv.tick();
        assert!(!rec.0.borrow().is_empty());
    }

    #[test]
    fn stop_mutes_all_three_channels() {
        let rec = Recorder::default();
        let mut drv = PsgDriver::new(Box::new(rec.clone()), Box::new(NullSink));
        rec.0.borrow_mut().clear();
        drv.stop();
        assert_eq!(&*rec.0.borrow(), &[(8, 0), (9, 0), (10, 0)]);
        assert!(!drv.is_active());
    }

    #[test]
    fn channels_without_data_stay_inactive_on_start() {
        let mut drv = PsgDriver::new(Box::new(NullSink), Box::new(NullSink));
        drv.set_channel_data(1, Arc::from(&[0xFF][..]));
        drv.start();
        assert!(drv.is_active());
        // Channel B ends immediately on its end mark at the first music tick.
        for _ in 0..10 {
            drv.tick();
        }
        assert!(!drv.is_active());
    }
}
