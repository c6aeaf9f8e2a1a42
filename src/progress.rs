//! User-facing progress lines on stderr. Results go to stdout.

const STEP_MARK: char = '\u{2192}';
const WARN_MARK: char = '!';

fn line(mark: char, msg: &str) -> String {
    format!("{mark} {msg}")
}

/// `→ <message>`
pub fn format_step(msg: &str) -> String {
    line(STEP_MARK, msg)
}

/// `! <message>`
pub fn format_warning(msg: &str) -> String {
    line(WARN_MARK, msg)
}

pub fn step(msg: &str) {
    eprintln!("{}", format_step(msg));
}

/// Print a non-fatal warning; the command carries on.
pub fn warn(msg: &str) {
    eprintln!("{}", format_warning(msg));
}
