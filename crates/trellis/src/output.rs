//! Output formatting helpers for the `trellis` CLI.
//!
//! JSON output, aligned tables, and the small color vocabulary the
//! human-readable reports use.

use std::env;
use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;

// General icons
pub const ICON_PASS: &str = "\u{2713}"; // check mark
pub const ICON_WARN: &str = "\u{26A0}"; // warning sign
pub const ICON_FAIL: &str = "\u{2716}"; // heavy cross

// ---------------------------------------------------------------------------
// Color support
// ---------------------------------------------------------------------------

/// Determines if ANSI color codes should be used.
///
/// Respects standard conventions:
/// - `NO_COLOR` (any value): disables color (<https://no-color.org/>)
/// - `CLICOLOR=0`: disables color
/// - `TERM=dumb`: disables color
/// - `CLICOLOR_FORCE` (any value): forces color even in non-TTY
/// - Falls back to TTY detection
pub fn supports_color() -> bool {
    if env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if env::var("CLICOLOR").as_deref() == Ok("0") {
        return false;
    }
    if env::var("TERM").as_deref() == Ok("dumb") {
        return false;
    }
    if env::var_os("CLICOLOR_FORCE").is_some() {
        return true;
    }
    io::stdout().is_terminal()
}

/// Renders text with pass (green) styling.
pub fn render_pass(s: &str) -> String {
    if supports_color() {
        s.green().to_string()
    } else {
        s.to_string()
    }
}

/// Renders text with warning (yellow) styling.
pub fn render_warn(s: &str) -> String {
    if supports_color() {
        s.yellow().to_string()
    } else {
        s.to_string()
    }
}

/// Renders text with fail (red) styling.
pub fn render_fail(s: &str) -> String {
    if supports_color() {
        s.red().to_string()
    } else {
        s.to_string()
    }
}

/// Renders text with muted (dimmed) styling.
pub fn render_muted(s: &str) -> String {
    if supports_color() {
        s.dimmed().to_string()
    } else {
        s.to_string()
    }
}

// ---------------------------------------------------------------------------
// Structured output
// ---------------------------------------------------------------------------

/// Print a value as pretty-printed JSON to stdout.
///
/// Terminates the process with exit code 1 if serialization fails.
pub fn output_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            // Ignore broken pipe errors (e.g., piped to `head`)
            let _ = writeln!(handle, "{}", json);
        }
        Err(e) => {
            eprintln!("Error: failed to serialize JSON: {}", e);
            std::process::exit(1);
        }
    }
}

/// Print a simple aligned table with headers and rows.
///
/// Column widths are computed from the data. Prints nothing when there
/// are no rows.
pub fn output_table(headers: &[&str], rows: &[Vec<String>]) {
    if rows.is_empty() {
        return;
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut out = String::new();
    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(&format!("{:<width$}", header, width = widths[i]));
    }
    out.push('\n');
    for (i, width) in widths.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(&"-".repeat(*width));
    }
    out.push('\n');
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                out.push_str("  ");
            }
            if i < widths.len() {
                out.push_str(&format!("{:<width$}", cell, width = widths[i]));
            } else {
                out.push_str(cell);
            }
        }
        out.push('\n');
    }

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let _ = write!(handle, "{}", out);
}
