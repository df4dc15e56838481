//! Minimal playback status display.
//!
//! The full-screen terminal UI lives outside this program; what ships
//! here is a compact one-line status renderer fed by the same event
//! interfaces the external UI consumes: every register write and every
//! committed note. Rendering is rate-limited to ~10 Hz and happens from
//! the main loop, never from the driver tick itself.

use std::io::{self, Write};

use p6psg_core::{regs, NoteEvent};

/// Render period: 100 ms.
const RENDER_PERIOD_NS: u64 = 100_000_000;

const NOTE_NAMES: [&str; 13] = [
    "--", "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Last committed note of one channel.
#[derive(Debug, Default, Clone, Copy)]
struct ChannelCell {
    octave: u8,
    note: u8,
    volume: u8,
    is_rest: bool,
    seen: bool,
}

/// Status-line state, updated by the sinks and drawn by the main loop.
pub struct Display {
    title: String,
    cells: [ChannelCell; 3],
    bpm_x10: u16,
    reg_shadow: [u8; 16],
    next_render_ns: u64,
    redraw_requested: bool,
    line_dirty: bool,
}

impl Display {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            cells: [ChannelCell::default(); 3],
            bpm_x10: 0,
            reg_shadow: [0; 16],
            next_render_ns: 0,
            redraw_requested: true,
            line_dirty: true,
        }
    }

    /// Mirror a register write into the shadow (noise/mixer display).
    pub fn on_reg_write(&mut self, reg: u8, value: u8) {
        self.reg_shadow[usize::from(reg & 0x0F)] = value;
        self.line_dirty = true;
    }

    /// Record a committed note or rest.
    pub fn on_note_event(&mut self, event: &NoteEvent) {
        if let Some(cell) = self.cells.get_mut(usize::from(event.channel)) {
            *cell = ChannelCell {
                octave: event.octave,
                note: event.note,
                volume: event.volume,
                is_rest: event.is_rest,
                seen: true,
            };
        }
        self.bpm_x10 = event.bpm_x10;
        self.line_dirty = true;
    }

    /// Force a full repaint on the next render (Ctrl-L).
    pub fn request_redraw(&mut self) {
        self.redraw_requested = true;
    }

    /// Repaint if due. Called from the main loop after tick catch-up.
    pub fn maybe_render(&mut self, now_ns: u64) -> io::Result<()> {
        if now_ns < self.next_render_ns && !self.redraw_requested {
            return Ok(());
        }
        self.next_render_ns = now_ns + RENDER_PERIOD_NS;
        if !self.line_dirty && !self.redraw_requested {
            return Ok(());
        }
        self.line_dirty = false;
        self.redraw_requested = false;

        let mut line = String::with_capacity(96);
        line.push_str(&self.title);
        line.push_str("  ");
        if self.bpm_x10 != 0 {
            line.push_str(&format!(
                "{:>3}.{} BPM ",
                self.bpm_x10 / 10,
                self.bpm_x10 % 10
            ));
        }
        for (index, cell) in self.cells.iter().enumerate() {
            line.push_str(&format!(" {}:", (b'A' + index as u8) as char));
            if !cell.seen {
                line.push_str("  --    ");
            } else if cell.is_rest || cell.note == 0 || cell.note > 12 {
                line.push_str(" rest   ");
            } else {
                line.push_str(&format!(
                    " {:<2}{} v{:<2}",
                    NOTE_NAMES[usize::from(cell.note)],
                    cell.octave,
                    cell.volume
                ));
            }
        }
        line.push_str(&format!(
            "  [noise {:2} mix {:02x}]",
            self.reg_shadow[usize::from(regs::NOISE_PERIOD)] & 0x1F,
            self.reg_shadow[usize::from(regs::MIXER)] & 0x3F,
        ));

        let mut out = io::stdout();
        // Overwrite in place; raw mode means we manage the line ourselves.
        write!(out, "\r\x1b[2K{line}")?;
        out.flush()
    }

    /// Leave the status line behind on a fresh row.
    pub fn finish(&mut self) -> io::Result<()> {
        let mut out = io::stdout();
        write!(out, "\r\n")?;
        out.flush()
    }
}
