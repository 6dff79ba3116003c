use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MIB: f64 = 1024.0 * 1024.0;

/// Get current Unix timestamp in seconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Throughput in MB/s (MiB based) for `bytes` moved during `elapsed`.
pub fn throughput_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / MIB / secs
}

pub fn format_speed(mbps: f64) -> String {
    format!("{:.2} MB/s", mbps)
}

pub fn format_size(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / MIB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp() {
        let ts = get_timestamp();
        assert!(ts > 1700000000); // Sanity check
    }

    #[test]
    fn test_throughput() {
        let mbps = throughput_mbps(2 * 1024 * 1024, Duration::from_millis(500));
        assert!((mbps - 4.0).abs() < f64::EPSILON);
        assert_eq!(throughput_mbps(1024, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_speed(1.234), "1.23 MB/s");
        assert_eq!(format_size(1536 * 1024), "1.5 MB");
    }
}
