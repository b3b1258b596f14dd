//! Icon-prefixed user messages. Diagnostics go through `log` instead.

use std::fmt;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

#[derive(Clone, Copy)]
enum Level {
    Info,
    Success,
    Warning,
}

impl Level {
    fn style(self) -> (&'static str, &'static str) {
        match self {
            Level::Info => ("\x1b[34m", "ℹ️"),
            Level::Success => ("\x1b[32m", "✅"),
            Level::Warning => ("\x1b[33m", "⚠️"),
        }
    }
}

fn emit<T: fmt::Display>(level: Level, msg: T) {
    let (color, icon) = level.style();
    println!("{color}{BOLD}{icon}{RESET} {msg}");
}

pub fn info<T: fmt::Display>(msg: T) {
    emit(Level::Info, msg);
}

pub fn success<T: fmt::Display>(msg: T) {
    emit(Level::Success, msg);
}

/// Non-fatal problems (best-effort log writes, rejected fixes, failed uploads).
pub fn warning<T: fmt::Display>(msg: T) {
    emit(Level::Warning, msg);
}

/// Section header for multi-part reports (`status`, `remote rollup`).
pub fn header<T: fmt::Display>(msg: T) {
    println!("\x1b[34m{BOLD}── {msg} ──{RESET}\n");
}
