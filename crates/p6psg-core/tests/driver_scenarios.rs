//! End-to-end driver scenarios against recorded register writes and
//! note events.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use p6psg_core::{NoteEvent, NoteSink, PsgDriver, RegisterSink};

#[derive(Default, Clone)]
struct Recorder {
    writes: Rc<RefCell<Vec<(u8, u8)>>>,
    events: Rc<RefCell<Vec<NoteEvent>>>,
}

impl RegisterSink for Recorder {
    fn write_reg(&mut self, reg: u8, value: u8) {
        self.writes.borrow_mut().push((reg, value));
    }
}

impl NoteSink for Recorder {
    fn note_event(&mut self, event: &NoteEvent) {
        self.events.borrow_mut().push(*event);
    }
}

/// Driver plus recorders, with the power-on writes already discarded.
fn rig(channel_a: &[u8]) -> (PsgDriver, Recorder) {
    let rec = Recorder::default();
    let mut drv = PsgDriver::new(Box::new(rec.clone()), Box::new(rec.clone()));
    drv.set_channel_data(0, Arc::from(channel_a));
    drv.start();
    rec.writes.borrow_mut().clear();
    (drv, rec)
}

/// Advance one music tick at the default tempo (T96 = 10).
fn music_tick(drv: &mut PsgDriver) {
    for _ in 0..10 {
        drv.tick();
    }
}

#[test]
fn simple_note_on_channel_a() {
    // o5 v15, C for 96 ticks.
    let (mut drv, rec) = rig(&[0x85, 0x9F, 0x21, 96, 0xFF]);
    music_tick(&mut drv);

    let events = rec.events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0],
        NoteEvent {
            channel: 0,
            octave: 5,
            note: 1,
            volume: 15,
            len: 96,
            is_rest: false,
            bpm_x10: 1250,
        }
    );

    // Clean attack, then tone 0x1DDD >> 5 = 0x0EE, then full volume.
    assert_eq!(
        &*rec.writes.borrow(),
        &[(8, 0), (0, 0xEE), (1, 0x00), (8, 15)]
    );
}

#[test]
fn gate_time_silences_before_note_end() {
    // Q=5, o5 v15, C for 96 ticks.
    let (mut drv, rec) = rig(&[0xFA, 5, 0x85, 0x9F, 0x21, 96, 0xFF]);

    // Note-on, then coast until one tick before the gate point. Nothing
    // is written while the note sounds (no EG, no LFO).
    for _ in 0..(96 - 5) {
        music_tick(&mut drv);
    }
    assert_eq!(rec.writes.borrow().len(), 4);

    // The next tick hits wait_counter == q_counter and gates off.
    music_tick(&mut drv);
    assert_eq!(rec.writes.borrow().last(), Some(&(8, 0)));
}

#[test]
fn tempo_change_updates_bpm() {
    let (mut drv, _rec) = rig(&[0xF8, 20, 0, 0x21, 4, 0xFF]);
    assert_eq!(drv.bpm_x10(), 1250);
    music_tick(&mut drv);
    // (12500 + 10) / 20 = 625 -> 62.5 BPM.
    assert_eq!(drv.bpm_x10(), 625);
}

#[test]
fn single_level_loop_plays_three_times_then_falls_through() {
    // [3 C24 ] with the one-byte backward jump landing on the note.
    let (mut drv, rec) = rig(&[0xF0, 3, 0x21, 24, 0xF1, 0xFC, 0xFF]);

    for _ in 0..(3 * 24) {
        music_tick(&mut drv);
    }
    assert_eq!(rec.events.borrow().len(), 3);
    assert!(rec.events.borrow().iter().all(|e| e.note == 1 && e.len == 24));

    // Fourth pass leaves the loop and hits the end mark.
    music_tick(&mut drv);
    assert!(!drv.is_active());
    assert_eq!(rec.events.borrow().len(), 3);
}

#[test]
fn loop_break_skips_the_tail_on_the_final_trip() {
    // [2 { C4, :, D4 } ] - the ':' jumps past the ']' on the last trip,
    // so the tail D plays one time fewer than the loop count. A bare ']'
    // would yield C D C D; with ':' the sequence is C D C.
    let (mut drv, rec) = rig(&[
        0xF0, 2, // [ twice
        0x21, 4, // C, length 4
        0xF3, 4, 0, // : forward +4 (past the ])
        0x23, 4, // D, length 4
        0xF1, 0xF7, // ] back -9 (to the C)
        0xFF,
    ]);

    for _ in 0..13 {
        music_tick(&mut drv);
    }
    let notes: Vec<u8> = rec.events.borrow().iter().map(|e| e.note).collect();
    assert_eq!(notes, vec![1, 3, 1]);
    // The break lands on the end mark, so the channel is done.
    assert!(!drv.is_active());
}

#[test]
fn s_command_with_zero_width_disables_the_envelope() {
    // v5, S width=5 count=1 delta=1, C4, then S 0 and another C4.
    let (mut drv, rec) = rig(&[
        0x95, 0xEA, 5, 1, 1, 0, 0, 0x21, 4, 0xEA, 0, 0x21, 4, 0xFF,
    ]);

    // First note: the envelope is live and ramps the volume register.
    music_tick(&mut drv);
    rec.writes.borrow_mut().clear();
    for _ in 0..3 {
        music_tick(&mut drv);
    }
    let ramp: Vec<u8> = rec
        .writes
        .borrow()
        .iter()
        .filter(|&&(reg, _)| reg == 8)
        .map(|&(_, val)| val)
        .collect();
    assert_eq!(ramp, vec![6, 7, 8]);

    // S with p1 = 0 turns the envelope off: after the second note's
    // attack, nothing is written while it sounds.
    music_tick(&mut drv);
    rec.writes.borrow_mut().clear();
    for _ in 0..3 {
        music_tick(&mut drv);
    }
    assert!(rec.writes.borrow().is_empty());
}

#[test]
fn vibrato_engages_only_with_a_nonzero_delta() {
    // v15, M with p4 = 0 (LFO off), C8, then M% 2 (LFO on), C8.
    let (mut drv, rec) = rig(&[
        0x9F, 0xF5, 0, 1, 1, 0, 0x21, 8, 0xFD, 2, 0x21, 8, 0xFF,
    ]);

    // First note: M cleared VIB_ON, so the period is never rewritten.
    music_tick(&mut drv);
    rec.writes.borrow_mut().clear();
    for _ in 0..7 {
        music_tick(&mut drv);
    }
    assert!(rec.writes.borrow().is_empty());

    // M% with a nonzero step re-engages the LFO for the next note:
    // base period 0x1DD, step 2, quarter-cycle amplitude 1.
    music_tick(&mut drv);
    rec.writes.borrow_mut().clear();
    for _ in 0..3 {
        music_tick(&mut drv);
    }
    let fine: Vec<u8> = rec
        .writes
        .borrow()
        .iter()
        .filter(|&&(reg, _)| reg == 0)
        .map(|&(_, val)| val)
        .collect();
    assert_eq!(fine, vec![0xDB, 0xDD, 0xDF]);
}

#[test]
fn tie_carries_envelope_and_skips_reattack() {
    // v5, S width=5 count=1 delta=1 (no second phase), C^4 C4.
    let (mut drv, rec) = rig(&[0x95, 0xEA, 5, 1, 1, 0, 0, 0x61, 4, 0x21, 4, 0xFF]);

    music_tick(&mut drv); // first note commits
    let note_on_writes = rec.writes.borrow().len();

    // Three in-note ticks ramp the envelope: R8 = 6, 7, 8.
    music_tick(&mut drv);
    music_tick(&mut drv);
    music_tick(&mut drv);
    // Fourth tick commits the tied-over second note.
    music_tick(&mut drv);

    let writes = rec.writes.borrow();
    let after_attack = &writes[note_on_writes..];
    // No re-attack (no volume-0 write) anywhere across the tie.
    assert!(after_attack.iter().all(|&(reg, val)| !(reg == 8 && val == 0)));
    // Envelope ramp, then the second note-on carries the accumulated
    // correction: volume 5 + adjust 3.
    let volumes: Vec<u8> = after_attack
        .iter()
        .filter(|&&(reg, _)| reg == 8)
        .map(|&(_, val)| val)
        .collect();
    assert_eq!(volumes, vec![6, 7, 8, 8]);

    assert_eq!(rec.events.borrow().len(), 2);
}

#[test]
fn end_mark_with_jump_return_loops_forever() {
    // o5, J, C4, o1, D4, end mark -> restores octave 5 each pass.
    let (mut drv, rec) = rig(&[0x85, 0xFE, 0x21, 4, 0x81, 0x23, 4, 0xFF]);

    for _ in 0..16 {
        music_tick(&mut drv);
    }
    assert!(drv.is_active());

    let events = rec.events.borrow();
    assert!(events.len() >= 4);
    for pair in events.chunks(2) {
        assert_eq!((pair[0].note, pair[0].octave), (1, 5));
        if pair.len() == 2 {
            assert_eq!((pair[1].note, pair[1].octave), (3, 1));
        }
    }
}

#[test]
fn end_mark_without_jump_deactivates() {
    let (mut drv, _rec) = rig(&[0x21, 4, 0xFF]);
    for _ in 0..5 {
        music_tick(&mut drv);
    }
    assert!(!drv.is_active());
}

#[test]
fn rest_mutes_and_reports() {
    let (mut drv, rec) = rig(&[0x20, 8, 0xFF]); // rest, 1-byte length 8
    music_tick(&mut drv);
    assert_eq!(rec.writes.borrow().as_slice(), &[(8, 0)]);
    let events = rec.events.borrow();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_rest);
    assert_eq!(events[0].len, 8);
}

#[test]
fn volume_up_down_documents_clamp_asymmetry() {
    // v12, +8 clamps at 15, -8 lands on 7 (not 12).
    let (mut drv, rec) = rig(&[0x9C, 0xA8, 0xB8, 0x21, 4, 0xFF]);
    music_tick(&mut drv);
    assert_eq!(rec.events.borrow()[0].volume, 7);
}

#[test]
fn noise_period_writes_clamp_to_five_bits() {
    // W 10, W-10 -> 0, W-100 -> 0, W+100 -> 31.
    let (mut drv, rec) = rig(&[
        0xEB, 10, 0xEC, 0xF6, 0xEC, 0x9C, 0xEC, 100, 0x21, 4, 0xFF,
    ]);
    music_tick(&mut drv);
    let r6: Vec<u8> = rec
        .writes
        .borrow()
        .iter()
        .filter(|&&(reg, _)| reg == 6)
        .map(|&(_, val)| val)
        .collect();
    assert_eq!(r6, vec![10, 0, 0, 31]);
}

#[test]
fn mixer_flips_return_to_initial_and_preserve_io_bits() {
    // P1 (tone only), P3 (tone+noise), P1 again: R7 ends where it began.
    let (mut drv, rec) = rig(&[0xED, 0xEF, 0xED, 0x21, 4, 0xFF]);
    music_tick(&mut drv);
    let r7: Vec<u8> = rec
        .writes
        .borrow()
        .iter()
        .filter(|&&(reg, _)| reg == 7)
        .map(|&(_, val)| val)
        .collect();
    assert_eq!(r7, vec![0xF8, 0xF0, 0xF8]);
    // I/O direction bits never change.
    assert!(r7.iter().all(|v| v & 0xC0 == 0xC0));
}

#[test]
fn vibrato_steps_and_reverses_around_base_period() {
    // M wait=1 count=2 amp=2 delta=+1, v15, C for 20 ticks.
    let (mut drv, rec) = rig(&[0xF5, 1, 2, 2, 1, 0x9F, 0x21, 20, 0xFF]);
    music_tick(&mut drv); // note on: base period 0x1DD
    rec.writes.borrow_mut().clear();

    for _ in 0..7 {
        music_tick(&mut drv);
    }
    // Fine-register rewrites: -1, -2 (half amplitude), then the flip
    // walks back up: -1.
    let fine: Vec<u8> = rec
        .writes
        .borrow()
        .iter()
        .filter(|&&(reg, _)| reg == 0)
        .map(|&(_, val)| val)
        .collect();
    assert_eq!(fine, vec![0xDC, 0xDB, 0xDC]);
}

#[test]
fn three_channels_tick_in_order() {
    let rec = Recorder::default();
    let mut drv = PsgDriver::new(Box::new(rec.clone()), Box::new(rec.clone()));
    for ch in 0..3 {
        drv.set_channel_data(ch, Arc::from(&[0x9F, 0x21, 4, 0xFF][..]));
    }
    drv.start();
    rec.writes.borrow_mut().clear();
    music_tick(&mut drv);

    let events = rec.events.borrow();
    let channels: Vec<u8> = events.iter().map(|e| e.channel).collect();
    assert_eq!(channels, vec![0, 1, 2]);

    // Each channel wrote its own register pair and volume.
    let writes = rec.writes.borrow();
    for base in [0u8, 2, 4] {
        assert!(writes.contains(&(base, 0xDD)));
        assert!(writes.contains(&(base + 1, 0x01)));
    }
    for vol in [8u8, 9, 10] {
        assert!(writes.contains(&(vol, 15)));
    }
}
