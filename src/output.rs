//! Terminal rendering of the overlay as a single status line on stderr.

use crate::overlay::OverlayView;
use crate::session::SessionStatus;
use std::time::Duration;

const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const BLUE: &str = "\x1b[34m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Clear the current terminal line (replaces the status line).
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

fn indicator(view: &OverlayView) -> (&'static str, &'static str) {
    match view.state {
        "error" => (RED, "✖"),
        "speaking" => (BLUE, "◉"),
        "connecting" => (YELLOW, "◌"),
        "listening" => (GREEN, "●"),
        _ => (DIM, "○"),
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Render the overlay and session counters as one ANSI line (no newline).
pub fn render_status_line(view: &OverlayView, status: Option<&SessionStatus>, elapsed: Duration) -> String {
    let (color, glyph) = indicator(view);
    let mut line = format!(
        "{color}{glyph}{RESET} {BOLD}{}{RESET} {DIM}{}{RESET}",
        view.headline, view.caption
    );

    if let Some(status) = status {
        line.push_str(&format!(
            " {DIM}[{} | {} chunk{} | {} queued]{RESET}",
            format_elapsed(elapsed),
            status.chunks_played,
            if status.chunks_played == 1 { "" } else { "s" },
            status.active_sources,
        ));
        if status.decode_errors > 0 {
            line.push_str(&format!(" {YELLOW}{} dropped{RESET}", status.decode_errors));
        }
    }

    if let Some(error) = &view.error {
        line.push_str(&format!(" {RED}{error}{RESET}"));
    }
    line
}

/// Redraw the status line in place.
pub fn print_status_line(view: &OverlayView, status: Option<&SessionStatus>, elapsed: Duration) {
    clear_line();
    eprint!("{}", render_status_line(view, status, elapsed));
}

/// Strip ANSI escape sequences, for width checks and tests.
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
