//! Helpers for the log file: escape stripping and timestamps.

/// Remove terminal escape sequences so styled event text lands in the log
/// file as plain text.
///
/// A CSI sequence (`ESC [`) runs up to its final byte in `@`..=`~`. Any
/// other escape drops the escape and the character after it.
pub(super) fn plain_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\x1b' {
            out.push(c);
            continue;
        }
        if chars.next() == Some('[') {
            let _ = chars.by_ref().find(|inner| ('@'..='~').contains(inner));
        }
    }
    out
}

/// Run header stamp, `YYYY-MM-DD HH:MM:SS` in UTC.
pub(super) fn run_stamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Per-event stamp, `HH:MM:SS.mmm` in UTC.
pub(super) fn event_stamp() -> String {
    chrono::Utc::now().format("%H:%M:%S%.3f").to_string()
}
