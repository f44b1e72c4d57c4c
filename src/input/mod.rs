//! Keyboard input
//!
//! Polls the terminal in raw mode for a first keypress; any printable
//! character opens multi-line text collection (empty line submits, Esc
//! cancels). Raw mode is suspended during collection so normal line editing
//! works, then re-armed.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal;
use crossterm::tty::IsTty;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::message::Envelope;
use crate::ui::StatusBoard;
use crate::worker::QueueHandle;

/// Keypress poll interval
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Restores cooked mode when dropped
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// The keyboard producer
pub struct KeyboardProducer {
    /// Work queue handle
    pub queue: QueueHandle,
    /// Shared status display
    pub status: Arc<StatusBoard>,
    /// Cooperative stop signal; also cancelled on Ctrl+C in raw mode
    pub stop: CancellationToken,
}

impl KeyboardProducer {
    /// Run the producer loop until stopped; blocking
    ///
    /// Does nothing if stdin is not a TTY (pipes, CI).
    ///
    /// # Errors
    ///
    /// Returns error if the terminal cannot be switched to raw mode.
    pub fn run(self) -> Result<()> {
        if !std::io::stdin().is_tty() {
            tracing::debug!("stdin is not a tty, keyboard input disabled");
            return Ok(());
        }

        let mut guard = Some(RawModeGuard::enable()?);
        tracing::info!("keyboard producer started");

        while !self.stop.is_cancelled() {
            if !event::poll(POLL_INTERVAL)? {
                continue;
            }

            let Event::Key(key) = event::read()? else {
                continue;
            };

            if is_interrupt(&key) {
                tracing::info!("Ctrl+C pressed, requesting shutdown");
                self.stop.cancel();
                break;
            }

            let KeyCode::Char(initial) = key.code else {
                continue;
            };
            if key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) {
                continue;
            }

            // Cooked mode while the user types; re-armed afterwards
            guard.take();
            let text = collect_text(initial, &self.status);
            guard = Some(RawModeGuard::enable()?);

            if let Some(text) = text {
                tracing::info!(text = %text, "keyboard input submitted");
                self.queue.enqueue(Envelope::keyboard_text(text));
            }
        }

        drop(guard);
        tracing::info!("keyboard producer stopped");
        Ok(())
    }
}

/// Whether the key event is Ctrl+C
fn is_interrupt(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
}

/// Collect multi-line input; empty line submits, Esc as a sole line cancels
fn collect_text(initial: char, status: &StatusBoard) -> Option<String> {
    status.print_notice("");
    status.print_notice("Texteingabe (leere Zeile = senden, Esc = abbrechen)");

    let stdin = std::io::stdin();
    let mut lines: Vec<String> = Vec::new();

    print!("> {initial}");
    use std::io::Write;
    let _ = std::io::stdout().flush();

    let mut first = true;
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            status.print_notice("Eingabe abgebrochen.");
            return None;
        };

        let line = if first {
            first = false;
            format!("{initial}{line}")
        } else {
            line
        };

        // Esc as the sole content cancels
        if line == "\u{1b}" {
            status.print_notice("Eingabe abgebrochen.");
            return None;
        }

        if line.is_empty() {
            break;
        }

        lines.push(line);

        print!("> ");
        let _ = std::io::stdout().flush();
    }

    let text = lines.join("\n").trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}
