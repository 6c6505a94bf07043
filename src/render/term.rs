use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{poll, read, Event},
    queue,
    style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor},
    terminal::{
        disable_raw_mode, enable_raw_mode, size, Clear, ClearType, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use std::io::{self, Stdout, Write};
use std::time::Duration;

use super::canvas::Canvas;

/// Upper half block: foreground paints the top pixel, background the bottom one.
const HALF_BLOCK: char = '▀';

/// Raw-mode alternate screen that shows a [`Canvas`] with half-block cells.
///
/// Each cell covers one pixel column and two pixel rows. The terminal is
/// restored when the surface is dropped.
pub struct TerminalSurface {
    out: Stdout,
    cols: u16,
    rows: u16,
    status_line: bool,
}

impl TerminalSurface {
    pub fn new(status_line: bool) -> io::Result<Self> {
        let (cols, rows) = size()?;
        enable_raw_mode()?;
        let mut out = io::stdout();
        queue!(out, EnterAlternateScreen, Hide, Clear(ClearType::All))?;
        out.flush()?;
        Ok(Self {
            out,
            cols,
            rows,
            status_line,
        })
    }

    /// Pixel size of the drawable area for the current terminal size.
    pub fn canvas_size(&self) -> (u32, u32) {
        let rows = if self.status_line {
            self.rows.saturating_sub(1)
        } else {
            self.rows
        };
        (self.cols as u32, rows as u32 * 2)
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> io::Result<()> {
        self.cols = cols;
        self.rows = rows;
        queue!(self.out, Clear(ClearType::All))?;
        Ok(())
    }

    /// Non-blocking input poll.
    pub fn poll_event(&self, timeout: Duration) -> io::Result<Option<Event>> {
        if poll(timeout)? {
            return Ok(Some(read()?));
        }
        Ok(None)
    }

    pub fn present(&mut self, canvas: &Canvas, status: Option<&str>) -> io::Result<()> {
        let cols = (canvas.width() as u16).min(self.cols);
        let cell_rows = (canvas.height() / 2) as u16;

        for row in 0..cell_rows {
            queue!(self.out, MoveTo(0, row))?;
            let mut last: Option<([u8; 4], [u8; 4])> = None;
            for col in 0..cols {
                let x = col as u32;
                let y = row as u32 * 2;
                let top = canvas.pixel(x, y).unwrap_or_default();
                let bottom = canvas.pixel(x, y + 1).unwrap_or_default();
                if last != Some((top, bottom)) {
                    queue!(
                        self.out,
                        SetForegroundColor(rgb(top)),
                        SetBackgroundColor(rgb(bottom))
                    )?;
                    last = Some((top, bottom));
                }
                queue!(self.out, Print(HALF_BLOCK))?;
            }
        }
        queue!(self.out, ResetColor)?;

        if let (true, Some(text)) = (self.status_line, status) {
            let line: String = text.chars().take(self.cols as usize).collect();
            queue!(
                self.out,
                MoveTo(0, self.rows.saturating_sub(1)),
                Clear(ClearType::CurrentLine),
                Print(line)
            )?;
        }

        self.out.flush()
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        let _ = queue!(self.out, ResetColor, Show, LeaveAlternateScreen);
        let _ = self.out.flush();
        let _ = disable_raw_mode();
    }
}

fn rgb(px: [u8; 4]) -> Color {
    Color::Rgb {
        r: px[0],
        g: px[1],
        b: px[2],
    }
}
