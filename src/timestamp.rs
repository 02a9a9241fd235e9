use chrono::Local;
use std::time::{SystemTime, UNIX_EPOCH};

/// Retrieves the current Unix timestamp in seconds.
pub fn current_timestamp() -> i64 {
    let start = SystemTime::now();
    let since_the_epoch = start
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards");
    since_the_epoch.as_secs() as i64
}

/// Local wall-clock time for log line prefixes.
pub fn now_string() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Renders an elapsed number of seconds as `<d>d<hh>h<mm>m<ss>s`, dropping
/// the leading units when the total is under a day, an hour, or a minute.
///
/// A process up for 3 days, 12 hours, 45 minutes and 37 seconds renders as
/// `3d12h45m37s`; one up for 83 seconds renders as `1m23s`.
pub fn format_runtime(runtime: i64) -> String {
    let runtime = runtime.max(0);
    let days = runtime / 86400;
    let hours = (runtime % 86400) / 3600;
    let mins = (runtime % 3600) / 60;
    let secs = runtime % 60;

    if runtime < 60 {
        format!("{}s", secs)
    } else if runtime < 3600 {
        format!("{}m{:02}s", mins, secs)
    } else if runtime < 86400 {
        format!("{}h{:02}m{:02}s", hours, mins, secs)
    } else {
        format!("{}d{:02}h{:02}m{:02}s", days, hours, mins, secs)
    }
}
