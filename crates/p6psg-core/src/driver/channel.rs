//! Per-channel byte-code interpreter.
//!
//! Each channel is a small virtual machine over its music stream: one
//! byte is either a note/rest (bit 7 clear) or a command (bit 7 set).
//! The VM keeps note timing, gate-off, the software envelope (EG), the
//! vibrato LFO, detune, a four-deep loop stack and the top-level jump
//! return point. One `tick` is one music tick (every `tempo_val` 2 ms
//! periods); decoding runs inside the tick that ends the previous note,
//! consuming command bytes until the next note or rest is committed.

use std::sync::Arc;

use bitflags::bitflags;

use super::MainState;
use crate::format::END_MARK;
use crate::regs;
use crate::sink::{NoteEvent, NoteSink, RegisterSink};
use crate::tone::{bpm_x10_from_t96, clamp_tone_12bit, tone_period};

bitflags! {
    /// Interpreter status flags (nesting depth is kept separately).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct ChannelFlags: u8 {
        /// Channel is currently in a rest (or gated off).
        const REST = 0x08;
        /// The previous note byte carried the tie bit.
        const TIE = 0x10;
        /// Current LFO direction: set = raise frequency (shrink period).
        const VIB_PM = 0x20;
        /// LFO engaged (M/M% parameter 4 nonzero).
        const VIB_ON = 0x40;
        /// Software envelope is in its second phase.
        const PSG_EG = 0x80;
    }
}

/// Maximum loop nesting the byte code may use.
pub(crate) const MAX_NEST: u8 = 4;

/// One loop level: remaining trips plus the defaults captured at `[`.
#[derive(Debug, Clone, Copy, Default)]
struct LoopFrame {
    remain: u8,
    l_default: u8,
    lplus_default: u8,
    octave: u8,
}

/// State machine for one PSG channel.
#[derive(Debug)]
pub(crate) struct Channel {
    index: u8,
    pub(crate) active: bool,

    data: Option<Arc<[u8]>>,
    offset: u16,

    wait_counter: u16,
    q_default: u8,
    q_counter: u8,
    l_default: u8,
    lplus_default: u8,

    pub(crate) volume: u8,
    pub(crate) octave: u8,
    flags: ChannelFlags,

    /// Sign-magnitude period correction (bit 7 set = lower frequency).
    detune: u8,

    frames: [LoopFrame; MAX_NEST as usize],
    nest: u8,
    j_return: Option<u16>,
    j_octave: u8,

    /// Base tone period of the sounding note, after detune.
    freq_value: u16,

    // LFO parameters (M command) and work state.
    vib_offset: i16,
    vib_wait_base: u8,
    vib_wait_work: u8,
    vib_count_base: u8,
    vib_count_work: u8,
    vib_amp_base: u8,
    vib_amp_work: u8,
    /// Sign-magnitude step; bit 7 also selects the initial direction.
    vib_delta_base: u8,

    // Software envelope parameters (S command) and work state.
    eg_width_base: i8,
    eg_width_work: i8,
    eg_count_base: u8,
    eg_count_work: u8,
    eg_delta_base: i8,
    eg2_width_base: i8,
    /// Phase-2 period; bit 7 selects the correction direction.
    eg2_count_base: u8,
    volume_adjust: i8,

    unknown_reported: bool,
}

impl Channel {
    pub(crate) fn new(index: u8) -> Self {
        Self {
            index,
            active: false,
            data: None,
            offset: 0,
            wait_counter: 0,
            q_default: 0,
            q_counter: 0,
            l_default: 24,
            lplus_default: 192,
            volume: 12,
            octave: 4,
            flags: ChannelFlags::empty(),
            detune: 0,
            frames: [LoopFrame::default(); MAX_NEST as usize],
            nest: 0,
            j_return: None,
            j_octave: 0,
            freq_value: 0,
            vib_offset: 0,
            vib_wait_base: 0,
            vib_wait_work: 0,
            vib_count_base: 0,
            vib_count_work: 0,
            vib_amp_base: 0,
            vib_amp_work: 0,
            vib_delta_base: 0,
            eg_width_base: 0,
            eg_width_work: 0,
            eg_count_base: 0,
            eg_count_work: 0,
            eg_delta_base: 0,
            eg2_width_base: 0,
            eg2_count_base: 0,
            volume_adjust: 0,
            unknown_reported: false,
        }
    }

    /// Attach a byte-code stream and arm the channel: the first tick
    /// decodes from offset 0.
    pub(crate) fn set_data(&mut self, data: Arc<[u8]>) {
        self.data = Some(data);
        self.offset = 0;
        self.wait_counter = 1;
        self.active = true;
    }

    pub(crate) fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Next stream byte. Reads past the region decode as end marks so a
    /// wild backward jump cannot index out of bounds.
    fn fetch(&mut self) -> u8 {
        let byte = self
            .data
            .as_ref()
            .and_then(|data| data.get(usize::from(self.offset)))
            .copied()
            .unwrap_or(END_MARK);
        self.offset = self.offset.wrapping_add(1);
        byte
    }

    fn write_tone(&self, regs: &mut dyn RegisterSink, tone: u16) {
        regs.write_reg(regs::tone_fine(self.index), (tone & 0xFF) as u8);
        regs.write_reg(regs::tone_coarse(self.index), ((tone >> 8) & 0x0F) as u8);
    }

    fn write_adjusted_volume(&self, regs: &mut dyn RegisterSink) {
        let vol = i16::from(self.volume) + i16::from(self.volume_adjust);
        regs.write_reg(regs::volume(self.index), vol.clamp(0, 15) as u8);
    }

    /// Reinitialize the LFO work state for a fresh note (or a fresh M
    /// command). The first amplitude half-cycle only swings 0..90
    /// degrees, hence the halved work counter.
    fn vibrato_note_init(&mut self) {
        self.vib_offset = 0;
        self.vib_wait_work = self.vib_wait_base;
        self.vib_count_work = self.vib_count_base.max(1);
        self.vib_amp_work = self.vib_amp_base >> 1;
        // Parameter 4 bit 7 picks the initial direction: set = '-'
        // (grow the period), clear = '+' (shrink the period).
        if self.vib_delta_base & 0x80 != 0 {
            self.flags.remove(ChannelFlags::VIB_PM);
        } else {
            self.flags.insert(ChannelFlags::VIB_PM);
        }
    }

    /// LFO processing while a note sounds.
    fn vibrato_tick(&mut self, regs: &mut dyn RegisterSink) {
        if !self.flags.contains(ChannelFlags::VIB_ON) {
            return;
        }

        // Onset delay.
        if self.vib_wait_work != 0 {
            self.vib_wait_work -= 1;
            return;
        }

        self.vib_count_work = self.vib_count_work.wrapping_sub(1);
        if self.vib_count_work != 0 {
            return;
        }
        self.vib_count_work = self.vib_count_base.max(1);

        let step = i16::from(self.vib_delta_base & 0x7F);
        if step != 0 {
            if self.flags.contains(ChannelFlags::VIB_PM) {
                // '+' direction: higher frequency, so shrink the period.
                self.vib_offset = self.vib_offset.wrapping_sub(step);
            } else {
                self.vib_offset = self.vib_offset.wrapping_add(step);
            }
        }

        let tone = clamp_tone_12bit(i32::from(self.freq_value) + i32::from(self.vib_offset));
        self.write_tone(regs, tone);

        // Amplitude bound: flip direction when the half-cycle expires.
        // Cycles after the first cover 180 degrees, so the reload is the
        // full (doubled) base value.
        if self.vib_amp_base != 0 {
            if self.vib_amp_work != 0 {
                self.vib_amp_work -= 1;
            }
            if self.vib_amp_work == 0 {
                self.vib_amp_work = self.vib_amp_base;
                self.flags.toggle(ChannelFlags::VIB_PM);
            }
        }
    }

    /// Software envelope processing while a note sounds.
    ///
    /// Phase 1 walks `eg_width_work` toward `eg_width_base` in steps of
    /// `eg_delta_base` every `eg_count_base` ticks. Reaching the target
    /// width switches to phase 2, which (when `eg2_width_base` is set)
    /// drifts the correction by one per `eg2_count_base & 0x7F` ticks,
    /// direction per bit 7.
    fn envelope_tick(&mut self, regs: &mut dyn RegisterSink) {
        if self.eg_width_base == 0 {
            return;
        }

        if !self.flags.contains(ChannelFlags::PSG_EG) {
            self.eg_count_work = self.eg_count_work.wrapping_sub(1);
            if self.eg_count_work != 0 {
                return;
            }
            if self.eg_width_work != self.eg_width_base {
                self.eg_count_work = self.eg_count_base;
                self.eg_width_work = self.eg_width_work.wrapping_add(self.eg_delta_base);
                self.volume_adjust = self.eg_width_work;
                self.write_adjusted_volume(regs);
            } else {
                self.flags.insert(ChannelFlags::PSG_EG);
                self.eg_width_work = 0;
                self.eg_count_work = self.eg2_count_base & 0x7F;
                if self.eg2_width_base != 0 {
                    self.volume_adjust = self.eg2_width_base.wrapping_add(self.eg_width_base);
                    self.write_adjusted_volume(regs);
                }
            }
        } else if self.eg2_width_base != 0 {
            self.eg_count_work = self.eg_count_work.wrapping_sub(1);
            if self.eg_count_work != 0 {
                return;
            }
            self.eg_count_work = self.eg2_count_base & 0x7F;
            if self.eg_width_work < 15 {
                self.eg_width_work += 1;
            }
            let delta = if self.eg2_count_base & 0x80 != 0 {
                -self.eg_width_work
            } else {
                self.eg_width_work
            };
            self.volume_adjust = delta
                .wrapping_add(self.eg_width_base)
                .wrapping_add(self.eg2_width_base);
            self.write_adjusted_volume(regs);
        }
    }

    /// Run one music tick for this channel.
    pub(crate) fn tick(
        &mut self,
        main: &mut MainState,
        regs: &mut dyn RegisterSink,
        notes: &mut dyn NoteSink,
    ) {
        if !self.active {
            return;
        }

        self.wait_counter = self.wait_counter.wrapping_sub(1);
        if self.wait_counter > 0 {
            // Note still sounding (or resting).
            if self.flags.contains(ChannelFlags::REST) {
                return;
            }

            if self.wait_counter == u16::from(self.q_counter) {
                // Gate time reached: silence and coast to the note end.
                regs.write_reg(regs::volume(self.index), 0);
                self.flags.insert(ChannelFlags::REST);
                return;
            }

            self.vibrato_tick(regs);
            self.envelope_tick(regs);
            return;
        }

        self.decode(main, regs, notes);
    }

    /// Decode stream bytes until a note or rest is committed (or the
    /// channel deactivates). Commands take effect immediately and
    /// decoding continues within the same tick.
    fn decode(
        &mut self,
        main: &mut MainState,
        regs: &mut dyn RegisterSink,
        notes: &mut dyn NoteSink,
    ) {
        loop {
            let code = self.fetch();

            if code & 0x80 == 0 {
                self.commit_note(code, main, regs, notes);
                return;
            }

            match code & 0xF0 {
                0x80 => {
                    // Octave o1..o8.
                    self.octave = code & 0x0F;
                    continue;
                }
                0x90 => {
                    // Volume v0..v15.
                    self.volume = code & 0x0F;
                    continue;
                }
                0xA0 => {
                    // Relative volume up.
                    self.volume = (self.volume + (code & 0x0F)).min(15);
                    continue;
                }
                0xB0 => {
                    // Relative volume down.
                    self.volume = self.volume.saturating_sub(code & 0x0F);
                    continue;
                }
                _ => {}
            }

            match code {
                0xEA => self.cmd_envelope(),
                0xEB => self.cmd_noise_set(main, regs),
                0xEC => self.cmd_noise_adjust(main, regs),
                0xED..=0xEF => self.cmd_mixer(code, main, regs),
                0xF0 => self.cmd_loop_begin(),
                0xF1 | 0xF2 => self.cmd_loop_end(code),
                0xF3 => self.cmd_loop_break(),
                0xF4 => main.i_command_value = self.fetch(),
                0xF5 => self.cmd_vibrato(),
                0xF6 => {
                    // Reserved vibrato on/off toggle.
                }
                0xF7 => self.lplus_default = self.fetch(),
                0xF8 => self.cmd_tempo(main),
                0xF9 => self.l_default = self.fetch(),
                0xFA => self.q_default = self.fetch(),
                0xFB => self.detune = self.fetch(),
                0xFC => self.cmd_detune_adjust(),
                0xFD => self.cmd_vibrato_delta(),
                0xFE => {
                    // J: end marks jump back to here instead of stopping.
                    self.j_return = Some(self.offset);
                    self.j_octave = self.octave;
                }
                0xFF => {
                    if let Some(ret) = self.j_return {
                        self.offset = ret;
                        self.octave = self.j_octave;
                    } else {
                        self.active = false;
                        return;
                    }
                }
                _ => {
                    if !self.unknown_reported {
                        log::warn!(
                            "channel {}: unknown command {code:#04x} at offset {:#06x}, skipping",
                            self.index,
                            self.offset.wrapping_sub(1),
                        );
                        self.unknown_reported = true;
                    }
                }
            }
        }
    }

    /// Commit a note/rest byte: `0 T L1 L0 P3 P2 P1 P0`.
    fn commit_note(
        &mut self,
        code: u8,
        main: &mut MainState,
        regs: &mut dyn RegisterSink,
        notes: &mut dyn NoteSink,
    ) {
        let tie = code & 0x40 != 0;

        // A tied note never gates off.
        let mut q_counter = if tie { 0 } else { self.q_default };

        let note = code & 0x0F;
        let len: u16 = match code & 0x30 {
            0x00 => u16::from(self.l_default),
            0x10 => u16::from(self.lplus_default),
            0x20 => u16::from(self.fetch()),
            _ => {
                let lo = u16::from(self.fetch());
                lo | u16::from(self.fetch()) << 8
            }
        };

        self.wait_counter = len;

        // Even a fully gated note sounds for at least one tick.
        if u16::from(q_counter) >= len {
            q_counter = len.wrapping_sub(1) as u8;
        }
        self.q_counter = q_counter;

        if note == 0 {
            self.flags.insert(ChannelFlags::REST);
            regs.write_reg(regs::volume(self.index), 0);
            notes.note_event(&NoteEvent {
                channel: self.index,
                octave: self.octave,
                note: 0,
                volume: self.volume,
                len,
                is_rest: true,
                bpm_x10: main.bpm_x10,
            });
        } else {
            self.flags.remove(ChannelFlags::REST);

            let prev_tie = self.flags.contains(ChannelFlags::TIE);

            if !prev_tie && self.eg_width_base != 0 {
                self.flags.remove(ChannelFlags::PSG_EG);
                self.eg_count_work = self.eg_count_base;
                self.eg_width_work = 0;
            }

            // LFO restarts on articulation; tied notes keep their phase.
            if self.flags.contains(ChannelFlags::VIB_ON) && !prev_tie {
                self.vibrato_note_init();
            }

            let mut tone = tone_period(self.octave, note);
            if self.detune != 0 {
                if self.detune & 0x80 == 0 {
                    // Sign bit clear: raise the frequency, shrink the period.
                    tone = tone.wrapping_sub(u16::from(self.detune));
                } else {
                    tone = tone.wrapping_add(u16::from(self.detune & 0x7F));
                }
            }

            // Clean attack unless tied over.
            if !prev_tie {
                regs.write_reg(regs::volume(self.index), 0);
            }

            self.freq_value = tone;
            self.write_tone(regs, tone);

            if prev_tie {
                // Carry the envelope correction across the tie.
                self.write_adjusted_volume(regs);
            } else {
                regs.write_reg(regs::volume(self.index), self.volume);
            }

            notes.note_event(&NoteEvent {
                channel: self.index,
                octave: self.octave,
                note,
                volume: self.volume,
                len,
                is_rest: false,
                bpm_x10: main.bpm_x10,
            });
        }

        self.flags.set(ChannelFlags::TIE, tie);
    }

    /// S command: software envelope parameters.
    fn cmd_envelope(&mut self) {
        let p1 = self.fetch();
        self.eg_width_base = p1 as i8;
        if p1 != 0 {
            self.eg_count_base = self.fetch();
            self.eg_delta_base = self.fetch() as i8;
            self.eg2_width_base = self.fetch() as i8;
            self.eg2_count_base = self.fetch();
        }
    }

    /// W command: absolute noise period.
    fn cmd_noise_set(&mut self, main: &mut MainState, regs: &mut dyn RegisterSink) {
        let value = self.fetch();
        regs.write_reg(regs::NOISE_PERIOD, value);
        main.reg6_value = value;
    }

    /// W+/- command: relative noise period, clamped to the 5-bit range.
    fn cmd_noise_adjust(&mut self, main: &mut MainState, regs: &mut dyn RegisterSink) {
        let diff = self.fetch() as i8;
        let value = (i16::from(main.reg6_value) + i16::from(diff)).clamp(0, 31) as u8;
        regs.write_reg(regs::NOISE_PERIOD, value);
        main.reg6_value = value;
    }

    /// P1/P2/P3 commands: per-channel tone/noise enables in the mixer.
    /// Bit 0 of the code enables tone, bit 1 enables noise; an enable
    /// clears the corresponding disable bit in R7.
    fn cmd_mixer(&mut self, code: u8, main: &mut MainState, regs: &mut dyn RegisterSink) {
        let tone_bit = 1u8 << self.index;
        let noise_bit = 1u8 << (self.index + 3);
        let mut reg7 = main.reg7_value;
        if code & 0x01 != 0 {
            reg7 &= !tone_bit;
        } else {
            reg7 |= tone_bit;
        }
        if code & 0x02 != 0 {
            reg7 &= !noise_bit;
        } else {
            reg7 |= noise_bit;
        }
        regs.write_reg(regs::MIXER, reg7);
        main.reg7_value = reg7;
    }

    /// `[` command: push a loop level, capturing the defaults it restores.
    fn cmd_loop_begin(&mut self) {
        let remain = self.fetch();
        if self.nest >= MAX_NEST {
            // Compile-time checked in the toolchain; skip the level here.
            return;
        }
        self.frames[usize::from(self.nest)] = LoopFrame {
            remain,
            l_default: self.l_default,
            lplus_default: self.lplus_default,
            octave: self.octave & 0x0F,
        };
        self.nest += 1;
    }

    /// `]` command: decrement the trip count and either jump back
    /// (restoring the captured defaults) or exit the level.
    fn cmd_loop_end(&mut self, code: u8) {
        let mut offset = u16::from(self.fetch());
        if code == 0xF2 {
            offset |= u16::from(self.fetch()) << 8;
        } else {
            // One-byte form is always a negative 8-bit displacement.
            offset |= 0xFF00;
        }
        if self.nest == 0 {
            return;
        }
        let frame = &mut self.frames[usize::from(self.nest - 1)];
        frame.remain = frame.remain.wrapping_sub(1);
        if frame.remain == 0 {
            self.nest -= 1;
            return;
        }
        let frame = self.frames[usize::from(self.nest - 1)];
        self.offset = self.offset.wrapping_add(offset);
        self.l_default = frame.l_default;
        self.lplus_default = frame.lplus_default;
        self.octave = frame.octave;
    }

    /// `:` command: on the final trip, leave the loop early.
    fn cmd_loop_break(&mut self) {
        let lo = u16::from(self.fetch());
        let offset = lo | u16::from(self.fetch()) << 8;
        if self.nest == 0 || self.nest > MAX_NEST {
            return;
        }
        let frame = &mut self.frames[usize::from(self.nest - 1)];
        if frame.remain == 1 {
            frame.remain = 0;
            self.nest -= 1;
            self.offset = self.offset.wrapping_add(offset);
        }
    }

    /// M command: full LFO parameter set.
    fn cmd_vibrato(&mut self) {
        self.vib_wait_base = self.fetch();
        self.vib_count_base = self.fetch();
        // Parameter 3 counts a quarter cycle; work counters run half
        // cycles, so the stored amplitude is doubled.
        self.vib_amp_base = self.fetch().wrapping_mul(2);
        self.vib_delta_base = self.fetch();
        self.flags
            .set(ChannelFlags::VIB_ON, self.vib_delta_base != 0);
        self.vibrato_note_init();
    }

    /// M% command: replace only the step/direction parameter.
    fn cmd_vibrato_delta(&mut self) {
        self.vib_delta_base = self.fetch();
        self.flags
            .set(ChannelFlags::VIB_ON, self.vib_delta_base != 0);
    }

    /// T command: tempo (T96 value); the second operand is the original
    /// machine's port F6h value and is ignored here.
    fn cmd_tempo(&mut self, main: &mut MainState) {
        let t96 = self.fetch();
        let _port = self.fetch();
        main.tempo_val = t96;
        main.bpm_x10 = bpm_x10_from_t96(t96);
    }

    /// U+/- command: adjust the sign-magnitude detune by a signed delta.
    fn cmd_detune_adjust(&mut self) {
        let diff = self.fetch() as i8;
        let mut signed = if self.detune & 0x80 != 0 {
            -((self.detune & 0x7F) as i8)
        } else {
            self.detune as i8
        };
        signed = signed.wrapping_add(diff);
        self.detune = if signed < 0 {
            signed.wrapping_neg() as u8 | 0x80
        } else {
            signed as u8
        };
    }
}
