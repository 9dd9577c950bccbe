//! Colored terminal output

use std::io::{self, Write};

const RESET: &str = "\x1b[0m";

/// Color family of a terminal line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    OkGreen,
    OkBlue,
    OkCyan,
}

impl Tone {
    fn ansi(&self) -> &'static str {
        match self {
            Tone::Debug | Tone::Info => "\x1b[0m",
            Tone::Warning | Tone::Error => "\x1b[93m",
            Tone::Critical => "\x1b[91m",
            Tone::OkGreen => "\x1b[92m",
            Tone::OkBlue => "\x1b[94m",
            Tone::OkCyan => "\x1b[96m",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Tone::Debug => "DEBUG",
            Tone::Info => "INFO",
            Tone::Warning => "WARNING",
            Tone::Error => "ERROR",
            Tone::Critical => "CRITICAL",
            Tone::OkGreen => "OKGREEN",
            Tone::OkBlue => "OKBLUE",
            Tone::OkCyan => "OKCYAN",
        }
    }

    /// Parse a tone name. `ok` is an alias of `okgreen`; unknown names are `Info`.
    pub fn from_name(name: &str) -> Tone {
        match name.trim().to_ascii_lowercase().as_str() {
            "debug" => Tone::Debug,
            "warning" | "warn" => Tone::Warning,
            "error" => Tone::Error,
            "critical" => Tone::Critical,
            "ok" | "okgreen" => Tone::OkGreen,
            "okblue" => Tone::OkBlue,
            "okcyan" => Tone::OkCyan,
            _ => Tone::Info,
        }
    }
}

/// Render a terminal line without printing it
pub fn render(message: &str, tone: Tone, disable_colors: bool) -> String {
    if disable_colors {
        format!("[{}] {}", tone.label(), message)
    } else {
        format!("{}{}{}", tone.ansi(), message, RESET)
    }
}

/// Print one line to stdout. Write errors (closed pipe, detached terminal) are ignored.
pub fn print_with_color(message: &str, tone: Tone, disable_colors: bool) {
    let line = render(message, tone, disable_colors);
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{}", line);
}
