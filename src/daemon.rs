//! The poll/report loop.
//!
//! Samples the UPS on a wall-clock-aligned cadence, keeps the samples
//! of the current report window and writes one averaged row per report
//! interval. A failed poll is retried once after a short delay; a
//! second failure propagates so a supervisor can restart the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::client::{ClientError, UpsClient};
use crate::sample::{Sample, SampleWindow};
use crate::schedule::{Cadence, next_boundary, now_ms};
use crate::storage::{SqliteStore, StoreError};

/// Where samples come from. The loop is written against this seam so it
/// can be exercised without a NUT daemon.
pub trait SampleSource {
    fn read_sample(&mut self) -> Result<Sample, ClientError>;
}

impl SampleSource for UpsClient {
    fn read_sample(&mut self) -> Result<Sample, ClientError> {
        UpsClient::read_sample(self)
    }
}

/// Error type for a terminated daemon loop.
#[derive(Debug)]
pub enum DaemonError {
    Client(ClientError),
    Store(StoreError),
}

impl std::fmt::Display for DaemonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonError::Client(e) => write!(f, "{}", e),
            DaemonError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DaemonError {}

impl From<ClientError> for DaemonError {
    fn from(e: ClientError) -> Self {
        DaemonError::Client(e)
    }
}

impl From<StoreError> for DaemonError {
    fn from(e: StoreError) -> Self {
        DaemonError::Store(e)
    }
}

/// Loop configuration.
#[derive(Debug, Clone, Copy)]
pub struct DaemonConfig {
    pub cadence: Cadence,
    /// Pause before the single retry of a failed poll.
    pub retry_delay: Duration,
}

/// Granularity of the interruptible sleeps.
const SLEEP_STEP: Duration = Duration::from_millis(100);

/// Runs the poll/report loop until `running` is cleared or an error
/// propagates.
///
/// On shutdown the average of any pending samples is flushed so the
/// tail of the history is not lost.
pub fn run(
    source: &mut dyn SampleSource,
    store: &SqliteStore,
    config: &DaemonConfig,
    running: &AtomicBool,
) -> Result<(), DaemonError> {
    let sample_interval = config.cadence.sample_interval();
    let report_interval = config.cadence.report_interval();
    let mut window = SampleWindow::new(config.cadence.samples_per_report());

    let mut next_sample = next_boundary(now_ms(), sample_interval);
    let mut next_report = next_boundary(now_ms(), report_interval);
    let mut report_count: u64 = 0;

    info!("Starting collection loop");

    while running.load(Ordering::SeqCst) {
        if !sleep_until(next_sample, running) {
            break;
        }

        let started = now_ms();
        let sample = match poll_with_retry(source, config.retry_delay, running) {
            Ok(Some(sample)) => sample,
            // shutdown requested during the retry pause
            Ok(None) => break,
            Err(e) => {
                error!("UPS poll failed after retry: {}", e);
                return Err(DaemonError::Client(e));
            }
        };
        debug!(
            "Sampled: volt_in={} charge_bat={} runtime_bat={}",
            sample.volt_in, sample.charge_bat, sample.runtime_bat
        );
        window.push(sample);

        if started >= next_report {
            if let Some(average) = window.average(epoch_secs(started)) {
                store.insert(&average)?;
                report_count += 1;
                info!(
                    "Report #{}: {} samples, volt_in={} charge_bat={} runtime_bat={}",
                    report_count,
                    window.len(),
                    average.volt_in,
                    average.charge_bat,
                    average.runtime_bat
                );
            }
            window.clear();
            next_report = next_boundary(started, report_interval);
        }

        let now = now_ms();
        let due = next_boundary(started, sample_interval);
        next_sample = if now < due {
            due
        } else {
            warn!("Behind: cycle overran its slot by {}ms", now - due);
            next_boundary(now, sample_interval)
        };
    }

    if !window.is_empty()
        && let Some(average) = window.average(epoch_secs(now_ms()))
    {
        info!("Flushing {} pending samples...", window.len());
        store.insert(&average)?;
    }

    info!("Collection loop stopped");
    Ok(())
}

fn epoch_secs(ms: u64) -> i64 {
    (ms / 1000) as i64
}

/// Polls once; on failure waits `retry_delay` and polls a second time.
/// Returns `Ok(None)` if shutdown was requested during the pause.
fn poll_with_retry(
    source: &mut dyn SampleSource,
    retry_delay: Duration,
    running: &AtomicBool,
) -> Result<Option<Sample>, ClientError> {
    match source.read_sample() {
        Ok(sample) => Ok(Some(sample)),
        Err(first) => {
            warn!(
                "UPS poll failed ({}), retrying in {}s",
                first,
                retry_delay.as_secs_f64()
            );
            if !sleep_for(retry_delay, running) {
                return Ok(None);
            }
            source.read_sample().map(Some)
        }
    }
}

/// Sleeps until the epoch-millisecond deadline, waking every 100 ms to
/// honor the shutdown flag. Returns false if shutdown was requested.
fn sleep_until(deadline_ms: u64, running: &AtomicBool) -> bool {
    while running.load(Ordering::SeqCst) {
        let now = now_ms();
        if now >= deadline_ms {
            return true;
        }
        let remaining = Duration::from_millis(deadline_ms - now);
        std::thread::sleep(remaining.min(SLEEP_STEP));
    }
    false
}

/// Interruptible fixed-length sleep. Returns false if shutdown was
/// requested.
fn sleep_for(duration: Duration, running: &AtomicBool) -> bool {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(SLEEP_STEP);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    running.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use chrono::Utc;

    struct SteadySource {
        volt_in: f64,
    }

    impl SampleSource for SteadySource {
        fn read_sample(&mut self) -> Result<Sample, ClientError> {
            Ok(Sample {
                epoch: Utc::now().timestamp(),
                volt_in: self.volt_in,
                volt_bat: 13.5,
                charge_bat: 100.0,
                load_ups: 2.0,
                runtime_bat: 1800.0,
            })
        }
    }

    struct FailingSource;

    impl SampleSource for FailingSource {
        fn read_sample(&mut self) -> Result<Sample, ClientError> {
            Err(ClientError::Protocol("unreachable".to_string()))
        }
    }

    struct FlakySource {
        calls: u32,
    }

    impl SampleSource for FlakySource {
        fn read_sample(&mut self) -> Result<Sample, ClientError> {
            self.calls += 1;
            if self.calls == 1 {
                Err(ClientError::Protocol("transient".to_string()))
            } else {
                SteadySource { volt_in: 230.0 }.read_sample()
            }
        }
    }

    fn test_config() -> DaemonConfig {
        DaemonConfig {
            cadence: Cadence::new(Duration::from_secs(2), 2).expect("valid cadence"),
            retry_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn loop_stores_reports_and_flushes_on_shutdown() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let config = test_config();
        let (tx, rx) = mpsc::channel();

        let handle = std::thread::spawn(move || {
            let store = SqliteStore::open_in_memory().expect("open store");
            let mut source = SteadySource { volt_in: 230.0 };
            let result = run(&mut source, &store, &config, &flag);
            let count = store.count().expect("count");
            let rows = store.query_since(0).expect("rows");
            tx.send((result, count, rows)).expect("send result");
        });

        // Long enough for at least one 1s sample tick and one 2s report
        // boundary.
        std::thread::sleep(Duration::from_millis(2600));
        running.store(false, Ordering::SeqCst);

        let (result, count, rows) = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("loop did not finish");
        handle.join().expect("join loop thread");

        result.expect("loop result");
        assert!(count >= 1, "expected at least one stored row, got {}", count);
        assert_eq!(rows[0].volt_in, 230.0);
    }

    #[test]
    fn second_poll_failure_propagates() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let config = test_config();
        let (tx, rx) = mpsc::channel();

        let handle = std::thread::spawn(move || {
            let store = SqliteStore::open_in_memory().expect("open store");
            let mut source = FailingSource;
            tx.send(run(&mut source, &store, &config, &flag))
                .expect("send result");
        });

        let result = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("loop did not finish");
        running.store(false, Ordering::SeqCst);
        handle.join().expect("join loop thread");

        assert!(matches!(result, Err(DaemonError::Client(_))));
    }

    #[test]
    fn poll_retries_once_after_transient_failure() {
        let running = AtomicBool::new(true);
        let mut source = FlakySource { calls: 0 };

        let sample = poll_with_retry(&mut source, Duration::from_millis(5), &running)
            .expect("retry succeeds")
            .expect("not interrupted");

        assert_eq!(source.calls, 2);
        assert_eq!(sample.volt_in, 230.0);
    }

    #[test]
    fn poll_gives_up_after_second_failure() {
        let running = AtomicBool::new(true);
        let mut source = FailingSource;

        let result = poll_with_retry(&mut source, Duration::from_millis(5), &running);
        assert!(result.is_err());
    }

    #[test]
    fn sleeps_abort_on_shutdown() {
        let running = AtomicBool::new(false);
        assert!(!sleep_until(now_ms() + 60_000, &running));
        assert!(!sleep_for(Duration::from_secs(60), &running));
    }
}
