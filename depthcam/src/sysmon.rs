//! Point-in-time host telemetry snapshots.
//!
//! Capture loops request a snapshot when they see an anomaly (long frame
//! gap, slow grab) and on a periodic baseline, tagging each one with the
//! context that triggered it. Every field degrades independently: a metric
//! that cannot be read is simply omitted from the snapshot.

use chrono::Local;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::info;

/// One host telemetry reading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemSnapshot {
    /// Used physical memory as a percentage of total.
    pub mem_used_pct: Option<f64>,
    /// 1, 5, and 15 minute load averages.
    pub load_avg: Option<(f64, f64, f64)>,
    /// Number of USB devices currently attached.
    pub usb_devices: Option<usize>,
}

impl SystemSnapshot {
    /// Read current host telemetry. Never fails; unreadable metrics are None.
    pub fn capture() -> Self {
        Self {
            mem_used_pct: fs::read_to_string("/proc/meminfo")
                .ok()
                .and_then(|text| parse_mem_used_pct(&text)),
            load_avg: fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|text| parse_load_avg(&text)),
            usb_devices: count_usb_devices(Path::new("/sys/bus/usb/devices")),
        }
    }
}

impl fmt::Display for SystemSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote_any = false;
        if let Some(pct) = self.mem_used_pct {
            write!(f, "MEM: {pct:.1}%")?;
            wrote_any = true;
        }
        if let Some((one, five, fifteen)) = self.load_avg {
            if wrote_any {
                write!(f, " | ")?;
            }
            write!(f, "LOAD: {one:.2} {five:.2} {fifteen:.2}")?;
            wrote_any = true;
        }
        if let Some(count) = self.usb_devices {
            if wrote_any {
                write!(f, " | ")?;
            }
            write!(f, "USB: {count} devs")?;
            wrote_any = true;
        }
        if !wrote_any {
            write!(f, "no telemetry available")?;
        }
        Ok(())
    }
}

/// Log a tagged one-line system status snapshot.
pub fn log_status(context: &str) {
    let snapshot = SystemSnapshot::capture();
    info!(
        "[SYSMON {} | {}] {}",
        Local::now().format("%H:%M:%S"),
        context,
        snapshot
    );
}

fn parse_mem_used_pct(meminfo: &str) -> Option<f64> {
    let mut total = None;
    let mut available = None;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = parse_kb(rest);
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }
    let (total, available) = (total?, available?);
    if total == 0 || available > total {
        return None;
    }
    Some(100.0 * (total - available) as f64 / total as f64)
}

fn parse_kb(field: &str) -> Option<u64> {
    field.trim().trim_end_matches("kB").trim().parse().ok()
}

fn parse_load_avg(loadavg: &str) -> Option<(f64, f64, f64)> {
    let mut fields = loadavg.split_whitespace();
    let one = fields.next()?.parse().ok()?;
    let five = fields.next()?.parse().ok()?;
    let fifteen = fields.next()?.parse().ok()?;
    Some((one, five, fifteen))
}

/// Count attached USB devices, skipping root hubs and interface entries.
fn count_usb_devices(dir: &Path) -> Option<usize> {
    let entries = fs::read_dir(dir).ok()?;
    let count = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            !name.starts_with("usb") && !name.contains(':')
        })
        .count();
    Some(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn parses_memory_usage_from_meminfo() {
        let meminfo = "MemTotal:       16000000 kB\n\
                       MemFree:         2000000 kB\n\
                       MemAvailable:    4000000 kB\n\
                       Buffers:          500000 kB\n";
        let pct = parse_mem_used_pct(meminfo).unwrap();
        assert_relative_eq!(pct, 75.0, epsilon = 1e-9);
    }

    #[test]
    fn meminfo_without_available_field_degrades() {
        let meminfo = "MemTotal:       16000000 kB\nMemFree: 2000000 kB\n";
        assert_eq!(parse_mem_used_pct(meminfo), None);
        assert_eq!(parse_mem_used_pct(""), None);
    }

    #[test]
    fn parses_load_averages() {
        let load = parse_load_avg("0.52 0.48 0.40 2/1234 56789\n").unwrap();
        assert_relative_eq!(load.0, 0.52);
        assert_relative_eq!(load.1, 0.48);
        assert_relative_eq!(load.2, 0.40);
        assert_eq!(parse_load_avg("garbage"), None);
    }

    #[test]
    fn counts_usb_devices_ignoring_hubs_and_interfaces() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["usb1", "usb2", "1-1", "1-2", "1-1:1.0", "2-3.4"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(count_usb_devices(dir.path()), Some(3));
    }

    #[test]
    fn missing_usb_directory_degrades() {
        assert_eq!(count_usb_devices(Path::new("/nonexistent/usb")), None);
    }

    #[test]
    fn display_omits_missing_fields() {
        let snapshot = SystemSnapshot {
            mem_used_pct: Some(43.2),
            load_avg: None,
            usb_devices: Some(9),
        };
        assert_eq!(snapshot.to_string(), "MEM: 43.2% | USB: 9 devs");

        let empty = SystemSnapshot::default();
        assert_eq!(empty.to_string(), "no telemetry available");
    }

    #[test]
    fn capture_never_panics() {
        // Whatever the host provides, capture degrades instead of failing.
        let _ = SystemSnapshot::capture();
    }
}
