//! PC-6001 PSG music player for YM2149F/AY-3-8910 on Raspberry Pi GPIO.
//!
//! Wires the pieces together: loads the music file, brings up the GPIO
//! backend (init -> enable -> reset), builds the driver with a register
//! sink that feeds both the chip and the status display, then runs the
//! 2 ms loop: block on stdin for up to one tick, catch up the ticks that
//! came due, render. `q` quits, Ctrl-L redraws, SIGINT/SIGTERM quit.
//!
//! Exit codes: 0 normal quit, 1 load/backend failure, 2 usage error.

mod args;
mod display;

use std::cell::RefCell;
use std::io;
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use p6psg_core::backend::BackendError;
use p6psg_core::{
    NoteEvent, NoteSink, P6Song, PsgBackend, PsgDriver, RegisterSink, StubBackend, TickScheduler,
};
use p6psg_rpi_gpio::RpiGpioBackend;

use args::CliArgs;
use display::Display;

/// Backend shared between the driver's register sink and the shutdown path.
type SharedBackend = Rc<RefCell<dyn PsgBackend>>;

/// First backend failure seen on the write path; checked between ticks.
type FailureSlot = Rc<RefCell<Option<BackendError>>>;

/// Register sink: hardware first, then the display mirror.
struct HwRegSink {
    backend: SharedBackend,
    display: Rc<RefCell<Display>>,
    failure: FailureSlot,
}

impl RegisterSink for HwRegSink {
    fn write_reg(&mut self, reg: u8, value: u8) {
        if let Err(err) = self.backend.borrow_mut().write_reg(reg, value) {
            let mut slot = self.failure.borrow_mut();
            if slot.is_none() {
                *slot = Some(err);
            }
            return;
        }
        self.display.borrow_mut().on_reg_write(reg, value);
    }
}

/// Note sink: display only.
struct DisplayNoteSink {
    display: Rc<RefCell<Display>>,
}

impl NoteSink for DisplayNoteSink {
    fn note_event(&mut self, event: &NoteEvent) {
        self.display.borrow_mut().on_note_event(event);
    }
}

/// Restores cooked terminal mode on scope exit.
struct RawModeGuard;

impl RawModeGuard {
    fn new() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Disables and finalizes the backend on scope exit, errors included.
struct BackendGuard {
    backend: SharedBackend,
}

impl Drop for BackendGuard {
    fn drop(&mut self) {
        let mut backend = self.backend.borrow_mut();
        backend.disable();
        backend.fini();
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let args = CliArgs::parse();
    if args.show_usage {
        CliArgs::print_usage();
        return ExitCode::from(2);
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
    }
}

fn select_backend() -> SharedBackend {
    if std::env::var_os("P6PSG_BACKEND").is_some_and(|v| v == "stub") {
        log::info!("using stub backend (P6PSG_BACKEND=stub)");
        Rc::new(RefCell::new(StubBackend::new()))
    } else {
        Rc::new(RefCell::new(RpiGpioBackend::new()))
    }
}

fn run(args: &CliArgs) -> Result<(), String> {
    let Some(file) = args.file.as_deref() else {
        return Err("no input file".into());
    };

    let song = P6Song::load(file).map_err(|e| format!("{}: {e}", file.display()))?;

    // Backend up before the driver exists: its construction already
    // writes the mixer/noise defaults.
    let backend = select_backend();
    {
        let mut be = backend.borrow_mut();
        be.init().map_err(|e| e.to_string())?;
        be.enable().map_err(|e| e.to_string())?;
        be.reset().map_err(|e| e.to_string())?;
    }
    let _backend_guard = BackendGuard {
        backend: Rc::clone(&backend),
    };

    let title = args.title.clone().unwrap_or_else(|| {
        file.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "p6psg".to_string())
    });
    let display = Rc::new(RefCell::new(Display::new(&title)));

    // Raw mode after the backend guard: it must be restored first on exit.
    let raw_mode = RawModeGuard::new().map_err(|e| format!("terminal: {e}"))?;

    let failure: FailureSlot = Rc::new(RefCell::new(None));
    let mut driver = PsgDriver::new(
        Box::new(HwRegSink {
            backend: Rc::clone(&backend),
            display: Rc::clone(&display),
            failure: Rc::clone(&failure),
        }),
        Box::new(DisplayNoteSink {
            display: Rc::clone(&display),
        }),
    );
    for channel in 0..p6psg_core::format::CHANNEL_COUNT {
        driver.set_channel_data(channel, song.channel(channel));
    }
    driver.start();

    let quit = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&quit))
            .map_err(|e| format!("signal handler: {e}"))?;
    }

    let start = Instant::now();
    let now_ns = move || start.elapsed().as_nanos() as u64;
    let mut scheduler = TickScheduler::new(now_ns());

    while !quit.load(Ordering::Relaxed) {
        // Block up to one tick on stdin; drift is corrected below.
        if event::poll(Duration::from_millis(2)).map_err(|e| format!("input: {e}"))? {
            match event::read().map_err(|e| format!("input: {e}"))? {
                Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                    KeyCode::Char('q') | KeyCode::Char('Q') => {
                        quit.store(true, Ordering::Relaxed);
                    }
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        // Raw mode swallows the terminal's SIGINT.
                        quit.store(true, Ordering::Relaxed);
                    }
                    KeyCode::Char('l') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        display.borrow_mut().request_redraw();
                    }
                    _ => {}
                },
                _ => {}
            }
        }

        let now = now_ns();
        for _ in 0..scheduler.due_ticks(now) {
            driver.tick();
        }

        if let Some(err) = failure.borrow_mut().take() {
            return Err(err.to_string());
        }

        // Render after tick catch-up so the display never delays music.
        let _ = display.borrow_mut().maybe_render(now);
    }

    driver.stop();
    if let Some(err) = failure.borrow_mut().take() {
        return Err(err.to_string());
    }

    let _ = display.borrow_mut().finish();
    drop(raw_mode);
    Ok(())
    // _backend_guard: disable (mute) then fini (unmap) on return.
}
