//! Transfer statistics helpers.

use std::time::Duration;

const MIB: f64 = 1024.0 * 1024.0;

/// Throughput in MiB/s. Zero elapsed time reports 0 rather than infinity.
pub fn transfer_rate(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 / MIB) / secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_mib_in_two_seconds() {
        let rate = transfer_rate(10 * 1024 * 1024, Duration::from_secs(2));
        assert!((rate - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sub_second_transfer() {
        let rate = transfer_rate(512 * 1024, Duration::from_millis(250));
        assert!((rate - 2.0).abs() < 1e-9);
    }

    #[test]
    fn zero_elapsed() {
        assert_eq!(transfer_rate(1024, Duration::ZERO), 0.0);
    }
}
