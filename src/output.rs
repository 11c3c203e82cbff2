use std::io::{self, Write};

use crossterm::cursor::MoveToColumn;
use crossterm::queue;
use crossterm::style::{Print, Stylize};
use crossterm::terminal::{Clear, ClearType};
use serde::Serialize;

use crate::app::{DownloadResult, InfoResult, MetadataResult};
use crate::coordinator::{ProgressEvent, ProgressSink};
use crate::domain::TaskStatus;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_metadata(result: &MetadataResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &InfoResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Single status line on stderr, redrawn in place for every event.
pub struct TerminalProgress {
    enabled: bool,
}

impl TerminalProgress {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Moves past the status line so later output starts on a fresh line.
    pub fn finish(&self) {
        if self.enabled {
            let _ = writeln!(io::stderr());
        }
    }

    fn render(event: &ProgressEvent) -> String {
        let mut line = String::new();
        if event.total > 0 {
            line.push_str(&format!("[{}/{}] ", event.position, event.total));
        }
        if let Some(run) = &event.run {
            line.push_str(run);
            line.push(' ');
        }
        line.push_str(&event.message);
        if let Some(elapsed) = event.elapsed {
            line.push_str(&format!(" ({}s)", elapsed.as_secs()));
        }
        line
    }
}

impl ProgressSink for TerminalProgress {
    fn event(&self, event: ProgressEvent) {
        if !self.enabled {
            return;
        }
        let line = Self::render(&event);
        let styled = match event.status {
            Some(TaskStatus::Complete) => line.green(),
            Some(TaskStatus::PartiallyComplete) => line.yellow(),
            Some(TaskStatus::Failed) => line.red(),
            _ => line.reset(),
        };
        let mut stderr = io::stderr().lock();
        let _ = queue!(
            stderr,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(styled)
        );
        let _ = stderr.flush();
    }
}
