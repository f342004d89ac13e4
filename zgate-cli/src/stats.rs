//! Statistics display and formatting

use std::time::Duration;
use zgate::{Direction, GateStats, SecurityGate};

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format bandwidth in human-readable form
pub fn format_bandwidth(bps: u64) -> String {
    const KBPS: u64 = 1000;
    const MBPS: u64 = KBPS * 1000;

    if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

fn security_label(secured: bool) -> &'static str {
    if secured {
        "secure"
    } else {
        "clear"
    }
}

/// One-line summary of a gate, for periodic logging
pub fn compact_stats(gate: &SecurityGate) -> String {
    let stats = gate.stats();
    let secs = stats.uptime.as_secs();
    let rate = |bytes: u64| if secs > 0 { (bytes * 8) / secs } else { 0 };

    format!(
        "[{}] {} | out {} ({}) {} pkts {} | in {} ({}) {} pkts {} | ctrl {}/{} | crc {} auth {}",
        format_duration(stats.uptime),
        gate.phase(),
        security_label(gate.is_secured(Direction::Sender)),
        format_bandwidth(rate(stats.bytes_sent)),
        stats.media_sent,
        format_bytes(stats.bytes_sent),
        security_label(gate.is_secured(Direction::Receiver)),
        format_bandwidth(rate(stats.bytes_received)),
        stats.media_received,
        format_bytes(stats.bytes_received),
        stats.control_sent,
        stats.control_received,
        stats.crc_failures,
        stats.auth_failures,
    )
}

/// Display gate statistics as a table
pub fn display_gate_stats(stats: &GateStats) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ GATE STATISTICS                                             │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ Uptime:   {:<50}│", format_duration(stats.uptime));
    println!(
        "│ Media:    {:<50}│",
        format!("{} sent / {} received", stats.media_sent, stats.media_received)
    );
    println!(
        "│ Bytes:    {:<50}│",
        format!(
            "{} sent / {} received",
            format_bytes(stats.bytes_sent),
            format_bytes(stats.bytes_received)
        )
    );
    println!(
        "│ Control:  {:<50}│",
        format!(
            "{} sent / {} received / {} failed",
            stats.control_sent, stats.control_received, stats.control_send_failures
        )
    );
    println!(
        "│ Dropped:  {:<50}│",
        format!(
            "{} crc / {} auth",
            stats.crc_failures, stats.auth_failures
        )
    );
    println!("└─────────────────────────────────────────────────────────────┘");
}
