// src/logger.rs

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use colored::{Color, Colorize};

/// Diagnostic verbosity, ordered from quietest to chattiest. A message is
/// emitted when its level is at or below the global filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

static LEVEL_FILTER: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

pub fn set_log_level(level: LogLevel) {
    LEVEL_FILTER.store(level as u8, Ordering::Relaxed);
}

pub fn get_log_level() -> LogLevel {
    LogLevel::from_raw(LEVEL_FILTER.load(Ordering::Relaxed))
}

impl LogLevel {
    fn from_raw(raw: u8) -> LogLevel {
        match raw {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    fn tag(self) -> (&'static str, Color) {
        match self {
            LogLevel::Error => ("ERROR", Color::Red),
            LogLevel::Warn => ("WARN", Color::Yellow),
            LogLevel::Info => ("INFO", Color::Green),
            LogLevel::Debug => ("DEBUG", Color::Cyan),
            LogLevel::Trace => ("TRACE", Color::BrightBlack),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, color) = self.tag();
        write!(f, "{}", name.color(color).bold())
    }
}

/// Leveled diagnostic logging. Errors and warnings go to stderr so they stay
/// visible when stdout carries the process listing.
#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        {
            let current_level = $crate::logger::get_log_level();
            if $level <= current_level {
                if $level <= $crate::logger::LogLevel::Warn {
                    eprintln!("{} [{}]: {}", $crate::timestamp::now_string(), $level, format!($($arg)*));
                } else {
                    println!("{} [{}]: {}", $crate::timestamp::now_string(), $level, format!($($arg)*));
                }
            }
        }
    };
}
