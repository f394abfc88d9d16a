use std::io::{self, IsTerminal, Read as _, Write as _};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers as Mod};
use crossterm::terminal;

use crate::io::IoProvider;

/// Interactive terminal IO for the VM.
///
/// With a tty attached, raw mode is held for the lifetime of the value so
/// single keypresses are delivered without line buffering; `q` at an input
/// prompt opens a confirm-to-quit dialog. With stdin redirected, input is
/// read straight from the pipe and the status register never reports ready.
pub struct TermIo {
    raw: bool,
}

impl TermIo {
    pub fn new() -> Self {
        let raw = io::stdin().is_terminal();
        if raw {
            terminal::enable_raw_mode().expect("failed to enable raw terminal");
        }
        TermIo { raw }
    }

    /// Ask before tearing the whole process down.
    fn confirm_quit(&mut self) -> bool {
        self.print("\nreally quit? [y/n] ");
        let answer = loop {
            let Ok(event) = event::read() else { continue };
            if let Some(byte) = key_byte(event) {
                break byte;
            }
        };
        self.print("\n");
        matches!(answer, b'y' | b'Y')
    }
}

impl Drop for TermIo {
    fn drop(&mut self) {
        if self.raw {
            let _ = terminal::disable_raw_mode();
        }
    }
}

impl IoProvider for TermIo {
    fn get_char(&mut self) -> u8 {
        if !self.raw {
            let mut byte = [0u8; 1];
            // EOF on a pipe reads as NUL
            return match io::stdin().read(&mut byte) {
                Ok(1) => byte[0],
                _ => 0,
            };
        }
        loop {
            let Ok(event) = event::read() else { continue };
            let Some(byte) = key_byte(event) else { continue };
            if byte == b'q' {
                if self.confirm_quit() {
                    let _ = terminal::disable_raw_mode();
                    std::process::exit(0);
                }
                continue;
            }
            return byte;
        }
    }

    fn poll_char(&mut self) -> Option<u8> {
        if !self.raw {
            return None;
        }
        while event::poll(Duration::ZERO).unwrap_or(false) {
            if let Ok(event) = event::read() {
                if let Some(byte) = key_byte(event) {
                    return Some(byte);
                }
            }
        }
        None
    }

    fn put_char(&mut self, byte: u8) {
        let mut out = io::stdout();
        // Raw mode needs an explicit carriage return
        let result = if byte == b'\n' && self.raw {
            out.write_all(b"\r\n")
        } else {
            out.write_all(&[byte])
        };
        let _ = result;
        let _ = out.flush();
    }

    fn print(&mut self, text: &str) {
        for byte in text.bytes() {
            self.put_char(byte);
        }
    }
}

/// Reduce a terminal event to the input byte the VM cares about, if any.
fn key_byte(event: Event) -> Option<u8> {
    let Event::Key(key) = event else { return None };
    if matches!(key.kind, KeyEventKind::Release) {
        return None;
    }
    match (key.modifiers, key.code) {
        // Ctrl+C always bails out
        (Mod::CONTROL, KeyCode::Char('c')) => {
            let _ = terminal::disable_raw_mode();
            println!();
            std::process::exit(0);
        }
        (_, KeyCode::Enter) | (_, KeyCode::Char('\n')) => Some(b'\n'),
        (_, KeyCode::Backspace) => Some(0x08),
        (Mod::NONE | Mod::SHIFT, KeyCode::Char(ch)) if ch.is_ascii() => Some(ch as u8),
        _ => None,
    }
}
