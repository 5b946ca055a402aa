//! Human-readable progress lines.

use trickle_protocol::TransferSnapshot;

/// Format bytes in human-readable form.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format a bytes/second rate; non-positive targets read as unlimited.
pub fn format_rate(rate: i64) -> String {
    if rate <= 0 {
        return "unlimited".into();
    }
    format!("{}/s", format_bytes(rate as u64))
}

/// One status line for a transfer.
pub fn render(snap: &TransferSnapshot) -> String {
    let mut line = format!(
        "[{}] {} {:>6.2}% {} / {} at {}/s (target {})",
        snap.status,
        snap.name,
        snap.percentage,
        format_bytes(snap.transferred_size),
        format_bytes(snap.total_size),
        format_bytes(snap.current_rate as u64),
        format_rate(snap.target_rate),
    );
    if !snap.error.is_empty() {
        line.push_str(&format!(": {}", snap.error));
    }
    line
}
