//! Human-readable sizes and run times for log lines, audit entries and the CLI

use std::time::Duration;

/// Elapsed run time: `850ms`, `4.2s`, `2m 05s`, `1h 02m`
pub fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    match total {
        0 => format!("{}ms", elapsed.as_millis()),
        1..=59 => format!("{:.1}s", elapsed.as_secs_f64()),
        60..=3599 => format!("{}m {:02}s", total / 60, total % 60),
        _ => format!("{}h {:02}m", total / 3600, (total % 3600) / 60),
    }
}

/// Byte count with binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
