/// CLI utilities for consistent output formatting
use std::io::IsTerminal;

/// Get a colored prefix
///
/// Returns bright cyan if stdout is a TTY, plain text otherwise.
pub fn xlab_prefix() -> &'static str {
    if std::io::stdout().is_terminal() {
        "\x1b[96m[xlab]\x1b[0m"
    } else {
        "[xlab]"
    }
}

/// Completion marker used in listings
pub fn completion_mark(complete: bool) -> &'static str {
    if complete {
        "complete"
    } else {
        "pending"
    }
}
