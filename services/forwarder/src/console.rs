//! Interactive console shutdown.
//!
//! When stdin is a terminal, key presses are read in raw mode. Pressing
//! Escape twice within one second requests shutdown; Ctrl+C does so
//! immediately.

use std::io::{self, IsTerminal, Write};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::service::ShutdownHandle;

/// Window in which the second Escape press must follow the first.
pub const DOUBLE_PRESS_WINDOW: Duration = Duration::from_secs(1);

/// How often the key loop re-checks the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Detects two presses of the same key within a time window.
#[derive(Debug, Clone)]
pub struct DoublePress {
    window: Duration,
    last: Option<Instant>,
}

impl DoublePress {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Register a press at `now`. Returns `true` when it completes a double
    /// press; the detector is then reset.
    pub fn press(&mut self, now: Instant) -> bool {
        match self.last {
            Some(prev) if now.saturating_duration_since(prev) <= self.window => {
                self.last = None;
                true
            }
            _ => {
                self.last = Some(now);
                false
            }
        }
    }
}

/// Whether the process has an interactive terminal to read keys from.
pub fn is_interactive() -> bool {
    io::stdin().is_terminal()
}

/// Start the key watcher on a blocking thread.
///
/// The watcher exits once shutdown has been requested from anywhere.
pub fn spawn_watcher(shutdown: ShutdownHandle) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = watch_keys(&shutdown) {
            warn!(error = %e, "Console key handling unavailable");
        }
    })
}

fn watch_keys(shutdown: &ShutdownHandle) -> io::Result<()> {
    enable_raw_mode()?;
    let _raw_guard = RawModeGuard;

    let mut escape = DoublePress::new(DOUBLE_PRESS_WINDOW);

    while !shutdown.is_requested() {
        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key.code {
            KeyCode::Esc => {
                if escape.press(Instant::now()) {
                    info!("Shutdown requested from console");
                    shutdown.request();
                } else {
                    info!("Press Escape again within 1s to exit.");
                }
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                info!("Shutdown requested from console");
                shutdown.request();
            }
            _ => {}
        }
    }

    Ok(())
}

struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Stderr writer that emits `\r\n` line endings, so log lines stay aligned
/// while the terminal is in raw mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawConsoleWriter;

impl Write for RawConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut stderr = io::stderr().lock();
        for chunk in buf.split_inclusive(|&b| b == b'\n') {
            match chunk.strip_suffix(b"\n") {
                Some(line) => {
                    stderr.write_all(line)?;
                    stderr.write_all(b"\r\n")?;
                }
                None => stderr.write_all(chunk)?,
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}
