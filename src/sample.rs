//! UPS sample model and report-window aggregation.
//!
//! A [`Sample`] is one reading of the UPS. The daemon takes several per
//! report interval, collects them in a [`SampleWindow`] and stores the
//! per-field average as a single row.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp format of the `sample_time` column.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Placeholder for readings the UPS does not expose.
pub const MISSING: f64 = -1.0;

/// One reading of the UPS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix seconds at which the reading was taken.
    pub epoch: i64,
    /// Input voltage [V].
    pub volt_in: f64,
    /// Battery voltage [V].
    pub volt_bat: f64,
    /// Battery charge [%].
    pub charge_bat: f64,
    /// UPS load [%].
    pub load_ups: f64,
    /// Estimated battery runtime [s].
    pub runtime_bat: f64,
}

impl Sample {
    /// Renders the epoch in the `sample_time` column format (UTC).
    pub fn time_string(&self) -> String {
        match DateTime::<Utc>::from_timestamp(self.epoch, 0) {
            Some(t) => t.format(TIME_FORMAT).to_string(),
            None => String::new(),
        }
    }
}

/// Bounded window of the samples taken in the current report interval.
///
/// Holds at most `samples_per_report` entries; pushing beyond that drops
/// the oldest. Cleared after every report so each stored row averages
/// only its own window.
#[derive(Debug)]
pub struct SampleWindow {
    cap: usize,
    samples: VecDeque<Sample>,
}

impl SampleWindow {
    pub fn new(cap: u32) -> Self {
        Self {
            cap: cap.max(1) as usize,
            samples: VecDeque::new(),
        }
    }

    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Per-field mean of the window, rounded to three decimals and
    /// stamped with the given report epoch.
    ///
    /// Returns `None` when the window is empty. Missing-value sentinels
    /// participate unchanged, so a field the UPS never reports averages
    /// to exactly `-1.0`.
    pub fn average(&self, epoch: i64) -> Option<Sample> {
        if self.samples.is_empty() {
            return None;
        }
        let n = self.samples.len() as f64;
        let mean = |field: fn(&Sample) -> f64| {
            round3(self.samples.iter().map(field).sum::<f64>() / n)
        };
        Some(Sample {
            epoch,
            volt_in: mean(|s| s.volt_in),
            volt_bat: mean(|s| s.volt_bat),
            charge_bat: mean(|s| s.charge_bat),
            load_ups: mean(|s| s.load_ups),
            runtime_bat: mean(|s| s.runtime_bat),
        })
    }
}

/// Rounds to the three decimals the stored averages carry.
fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(epoch: i64, volt_in: f64) -> Sample {
        Sample {
            epoch,
            volt_in,
            volt_bat: 13.5,
            charge_bat: 100.0,
            load_ups: 2.0,
            runtime_bat: 1800.0,
        }
    }

    #[test]
    fn time_string_renders_utc() {
        let s = sample(0, 230.0);
        assert_eq!(s.time_string(), "1970-01-01 00:00:00");

        let s = sample(1_700_000_000, 230.0);
        assert_eq!(s.time_string(), "2023-11-14 22:13:20");
    }

    #[test]
    fn average_is_per_field_mean() {
        let mut window = SampleWindow::new(3);
        window.push(sample(100, 230.0));
        window.push(sample(160, 231.0));

        let avg = window.average(180).expect("window not empty");
        assert_eq!(avg.epoch, 180);
        assert_eq!(avg.volt_in, 230.5);
        assert_eq!(avg.charge_bat, 100.0);
        assert_eq!(avg.runtime_bat, 1800.0);
    }

    #[test]
    fn average_rounds_to_three_decimals() {
        let mut window = SampleWindow::new(3);
        window.push(sample(0, 0.0));
        window.push(sample(1, 0.0));
        window.push(sample(2, 1.0));

        let avg = window.average(3).expect("window not empty");
        assert_eq!(avg.volt_in, 0.333);
    }

    #[test]
    fn average_of_empty_window_is_none() {
        let window = SampleWindow::new(3);
        assert!(window.average(0).is_none());
    }

    #[test]
    fn missing_sentinel_survives_averaging() {
        let mut window = SampleWindow::new(2);
        let mut s = sample(0, 230.0);
        s.volt_bat = MISSING;
        window.push(s);
        window.push(s);

        let avg = window.average(10).expect("window not empty");
        assert_eq!(avg.volt_bat, MISSING);
    }

    #[test]
    fn window_drops_oldest_beyond_cap() {
        let mut window = SampleWindow::new(2);
        window.push(sample(0, 100.0));
        window.push(sample(1, 200.0));
        window.push(sample(2, 300.0));

        assert_eq!(window.len(), 2);
        let avg = window.average(3).expect("window not empty");
        assert_eq!(avg.volt_in, 250.0);
    }

    #[test]
    fn clear_empties_the_window() {
        let mut window = SampleWindow::new(2);
        window.push(sample(0, 100.0));
        assert!(!window.is_empty());
        window.clear();
        assert!(window.is_empty());
    }
}
