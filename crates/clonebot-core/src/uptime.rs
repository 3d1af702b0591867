//! Uptime formatting.

use std::time::Duration;

/// Format a duration as `{h}h {m}m {s}s`. Hours are not rolled into days.
pub fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{}h {}m {}s", hours, minutes, seconds)
}
