//! Wall-clock cadence for the poll/report loop.
//!
//! Sampling and reporting are aligned to round wall-clock boundaries: a
//! 180 s report interval fires at :00, :03, :06 and so on, regardless of
//! how long the work in each cycle took. The boundary arithmetic is kept
//! as pure functions over epoch milliseconds so it can be tested without
//! a clock.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Error type for invalid cadence parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CadenceError {
    /// Report interval of zero.
    ZeroReportInterval,
    /// Zero samples per report.
    ZeroSamples,
    /// Report interval too short to fit the requested samples.
    IntervalTooShort { report_secs: u64, samples: u32 },
}

impl std::fmt::Display for CadenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CadenceError::ZeroReportInterval => write!(f, "report interval must be > 0"),
            CadenceError::ZeroSamples => write!(f, "samples per report must be > 0"),
            CadenceError::IntervalTooShort { report_secs, samples } => write!(
                f,
                "{} samples do not fit in a {}s report interval (need >= 1s per sample)",
                samples, report_secs
            ),
        }
    }
}

impl std::error::Error for CadenceError {}

/// Sampling/reporting cadence of the daemon loop.
///
/// The sample interval is derived: `report_interval / samples_per_report`.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    report: Duration,
    sample: Duration,
    samples_per_report: u32,
}

impl Cadence {
    pub fn new(report: Duration, samples_per_report: u32) -> Result<Self, CadenceError> {
        if report.is_zero() {
            return Err(CadenceError::ZeroReportInterval);
        }
        if samples_per_report == 0 {
            return Err(CadenceError::ZeroSamples);
        }
        let sample_ms = report.as_millis() as u64 / u64::from(samples_per_report);
        if sample_ms < 1000 {
            return Err(CadenceError::IntervalTooShort {
                report_secs: report.as_secs(),
                samples: samples_per_report,
            });
        }
        Ok(Self {
            report,
            sample: Duration::from_millis(sample_ms),
            samples_per_report,
        })
    }

    pub fn report_interval(&self) -> Duration {
        self.report
    }

    pub fn sample_interval(&self) -> Duration {
        self.sample
    }

    pub fn samples_per_report(&self) -> u32 {
        self.samples_per_report
    }
}

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Next wall-clock boundary strictly after `now` for the given interval.
///
/// A tick landing exactly on a boundary schedules the next one, so two
/// consecutive ticks are always a full interval apart.
pub fn next_boundary(now: u64, interval: Duration) -> u64 {
    let interval_ms = (interval.as_millis() as u64).max(1);
    now + (interval_ms - now % interval_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_boundary_aligns_to_interval() {
        let interval = Duration::from_millis(100);
        assert_eq!(next_boundary(1010, interval), 1100);
        assert_eq!(next_boundary(1099, interval), 1100);
        assert_eq!(next_boundary(999, interval), 1000);
    }

    #[test]
    fn next_boundary_on_exact_boundary_schedules_next() {
        let interval = Duration::from_millis(100);
        assert_eq!(next_boundary(1000, interval), 1100);
        assert_eq!(next_boundary(0, interval), 100);
    }

    #[test]
    fn next_boundary_holds_for_real_cadences() {
        // 180s report interval: boundaries at :00, :03, :06 ...
        let interval = Duration::from_secs(180);
        let now = 1_700_000_047_500; // 127.5s past the boundary at 1_699_999_920_000
        let next = next_boundary(now, interval);
        assert_eq!(next, 1_700_000_100_000);
        assert_eq!(next % 180_000, 0);
    }

    #[test]
    fn cadence_derives_sample_interval() {
        let cadence = Cadence::new(Duration::from_secs(180), 3).expect("valid");
        assert_eq!(cadence.report_interval(), Duration::from_secs(180));
        assert_eq!(cadence.sample_interval(), Duration::from_secs(60));
        assert_eq!(cadence.samples_per_report(), 3);
    }

    #[test]
    fn cadence_rejects_zero_report_interval() {
        let err = Cadence::new(Duration::ZERO, 3).expect_err("must fail");
        assert_eq!(err, CadenceError::ZeroReportInterval);
    }

    #[test]
    fn cadence_rejects_zero_samples() {
        let err = Cadence::new(Duration::from_secs(180), 0).expect_err("must fail");
        assert_eq!(err, CadenceError::ZeroSamples);
    }

    #[test]
    fn cadence_rejects_subsecond_sampling() {
        let err = Cadence::new(Duration::from_secs(2), 3).expect_err("must fail");
        assert!(matches!(err, CadenceError::IntervalTooShort { .. }));
    }
}
