//! Colored progress output

use std::io::Write;

use colored::{ColoredString, Colorize};
use fleet_core::{LineKind, ProgressLine, ProgressSink};

/// Prints progress lines to the terminal; warnings and errors go to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

pub fn render(line: &ProgressLine) -> String {
    let crumbs: String = line
        .crumbs
        .iter()
        .map(|crumb| format!("{} ", format!("[{crumb}]").cyan()))
        .collect();
    let message: ColoredString = match line.kind {
        LineKind::Info => line.message.normal(),
        LineKind::Changed => line.message.green(),
        LineKind::Unchanged | LineKind::Output => line.message.dimmed(),
        LineKind::Removed => line.message.magenta(),
        LineKind::Warning => line.message.yellow(),
        LineKind::Error => line.message.red().bold(),
    };
    format!("{crumbs}{message}")
}

impl ProgressSink for ConsoleSink {
    fn line(&self, line: &ProgressLine) {
        let text = render(line);
        // A closed pipe must not abort the batch.
        let _ = match line.kind {
            LineKind::Warning | LineKind::Error => writeln!(std::io::stderr(), "{text}"),
            _ => writeln!(std::io::stdout(), "{text}"),
        };
    }
}
