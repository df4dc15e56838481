//! Loader-to-driver pipeline: a complete file image through playback.

use std::cell::RefCell;
use std::rc::Rc;

use p6psg_core::{NoteEvent, NoteSink, P6Song, PsgDriver, RegisterSink};

#[derive(Default, Clone)]
struct EventLog(Rc<RefCell<Vec<NoteEvent>>>);

impl NoteSink for EventLog {
    fn note_event(&mut self, event: &NoteEvent) {
        self.0.borrow_mut().push(*event);
    }
}

struct NullRegs;

impl RegisterSink for NullRegs {
    fn write_reg(&mut self, _reg: u8, _value: u8) {}
}

fn build_file(channels: [&[u8]; 3]) -> Vec<u8> {
    let mut file = Vec::new();
    let a = 8u16;
    let b = a + channels[0].len() as u16;
    let c = b + channels[1].len() as u16;
    file.extend_from_slice(&a.to_le_bytes());
    file.extend_from_slice(&b.to_le_bytes());
    file.extend_from_slice(&c.to_le_bytes());
    file.extend_from_slice(&[0, 0]);
    for ch in channels {
        file.extend_from_slice(ch);
    }
    file
}

#[test]
fn full_file_plays_on_all_channels() {
    let image = build_file([
        &[0x85, 0x9F, 0x21, 24, 0xFF], // A: o5 v15 C24
        &[0x20, 24, 0xFF],             // B: rest 24
        &[0x83, 0x25, 24, 0xFF],       // C: o3 E24
    ]);
    let song = P6Song::parse(&image).unwrap();

    let log = EventLog::default();
    let mut driver = PsgDriver::new(Box::new(NullRegs), Box::new(log.clone()));
    for ch in 0..3 {
        driver.set_channel_data(ch, song.channel(ch));
    }
    driver.start();

    // First music tick at the default tempo.
    for _ in 0..10 {
        driver.tick();
    }

    let events = log.0.borrow();
    assert_eq!(events.len(), 3);
    assert_eq!((events[0].channel, events[0].note, events[0].octave), (0, 1, 5));
    assert!(events[1].is_rest);
    assert_eq!((events[2].channel, events[2].note, events[2].octave), (2, 5, 3));
    assert!(events.iter().all(|e| e.len == 24));

    drop(events);

    // Every channel ends after its single note plus the end mark.
    for _ in 0..(24 * 10) {
        driver.tick();
    }
    assert!(!driver.is_active());
}
