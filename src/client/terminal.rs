//! Terminal output (SPEC_FULL.md §4.8, §4.11): the client never re-renders glyph
//! data itself (the server already emitted ANSI SGR sequences), it only owns the
//! alternate screen and cursor visibility and writes the decoded `AsciiFrame` bytes
//! straight to stdout.

use std::io::{self, Stdout, Write};

use crossterm::cursor::{Hide, Show};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};

pub struct TerminalView {
    stdout: Stdout,
}

impl TerminalView {
    pub fn enter() -> io::Result<Self> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        execute!(stdout, EnterAlternateScreen, Hide)?;
        Ok(Self { stdout })
    }

    /// Writes an already-ANSI-encoded glyph stream verbatim, positioning the cursor
    /// at the top-left first so each frame fully overwrites the last.
    pub fn write_frame(&mut self, glyph_bytes: &[u8]) -> io::Result<()> {
        queue!(self.stdout, crossterm::cursor::MoveTo(0, 0))?;
        self.stdout.write_all(glyph_bytes)?;
        self.stdout.flush()
    }

    pub fn clear(&mut self) -> io::Result<()> {
        execute!(self.stdout, Clear(ClearType::All))
    }
}

impl Drop for TerminalView {
    fn drop(&mut self) {
        let _ = execute!(self.stdout, Show, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}
