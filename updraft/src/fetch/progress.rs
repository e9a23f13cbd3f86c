//! Progress reporting for single-file downloads.
//!
//! Events are throttled to integer percentage steps: a new event is emitted
//! only when the percentage strictly increases. Transfer rate is resampled at
//! most once every [`RATE_SAMPLE_INTERVAL`].

use std::fmt;
use std::time::{Duration, Instant};

/// Minimum wall time between transfer-rate samples.
pub const RATE_SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Callback invoked synchronously on the fetching thread.
pub type ProgressCallback<'a> = &'a dyn Fn(&DownloadProgress);

/// Bytes per second over the last sample window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferRate {
    pub bytes_per_second: f64,
}

impl fmt::Display for TransferRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/s", format_size(self.bytes_per_second))
    }
}

/// A progress event.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    /// Source URL of the payload.
    pub url: String,
    /// Integer percentage, 1..=100.
    pub percentage: u8,
    /// Bytes on disk so far, including any resumed prefix.
    pub bytes_downloaded: u64,
    /// Expected final size.
    pub total_bytes: u64,
    /// Most recent transfer-rate sample, once one is available.
    pub rate: Option<TransferRate>,
}

/// Turns raw byte counts into throttled [`DownloadProgress`] events.
#[derive(Debug)]
pub struct ProgressTracker {
    url: String,
    total: Option<u64>,
    last_percentage: u8,
    sample_started: Instant,
    sample_bytes: u64,
    rate: Option<TransferRate>,
}

impl ProgressTracker {
    /// Start tracking at `initial_bytes` (the resume offset).
    pub fn new(url: impl Into<String>, total: Option<u64>, initial_bytes: u64, now: Instant) -> Self {
        Self {
            url: url.into(),
            total,
            last_percentage: 0,
            sample_started: now,
            sample_bytes: initial_bytes,
            rate: None,
        }
    }

    /// Record the current byte count. Returns an event when the integer
    /// percentage has strictly increased since the last one.
    pub fn record(&mut self, downloaded: u64, now: Instant) -> Option<DownloadProgress> {
        let elapsed = now.saturating_duration_since(self.sample_started);
        if elapsed >= RATE_SAMPLE_INTERVAL {
            let delta = downloaded.saturating_sub(self.sample_bytes);
            self.rate = Some(TransferRate {
                bytes_per_second: delta as f64 / elapsed.as_secs_f64(),
            });
            self.sample_started = now;
            self.sample_bytes = downloaded;
        }

        let total = self.total.filter(|t| *t > 0)?;
        let percentage = ((downloaded.min(total) as u128 * 100) / total as u128) as u8;
        if percentage <= self.last_percentage {
            return None;
        }
        self.last_percentage = percentage;

        Some(DownloadProgress {
            url: self.url.clone(),
            percentage,
            bytes_downloaded: downloaded,
            total_bytes: total,
            rate: self.rate,
        })
    }

    /// Latest transfer-rate sample.
    pub fn rate(&self) -> Option<TransferRate> {
        self.rate
    }
}

/// Human-readable byte count (`B`, `KB`, `MB`, `GB`, `TB`).
pub fn format_size(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", value.round() as u64, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_emits_only_on_percentage_increase() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new("u", Some(1000), 0, start);

        assert!(tracker.record(5, start).is_none());
        let event = tracker.record(10, start).unwrap();
        assert_eq!(event.percentage, 1);
        assert!(tracker.record(19, start).is_none());
        assert_eq!(tracker.record(500, start).unwrap().percentage, 50);
        assert_eq!(tracker.record(1000, start).unwrap().percentage, 100);
        assert!(tracker.record(1000, start).is_none());
    }

    #[test]
    fn test_unknown_total_emits_nothing() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new("u", None, 0, start);
        assert!(tracker.record(4096, start).is_none());
    }

    #[test]
    fn test_resumed_download_starts_at_offset() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new("u", Some(100), 40, start);
        let event = tracker.record(41, start).unwrap();
        assert_eq!(event.percentage, 41);
        assert_eq!(event.bytes_downloaded, 41);
    }

    #[test]
    fn test_rate_sampled_after_interval() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new("u", Some(1_000_000), 0, start);

        tracker.record(100_000, start + Duration::from_secs(1));
        assert!(tracker.rate().is_none());

        tracker.record(400_000, start + Duration::from_secs(2));
        let rate = tracker.rate().unwrap();
        assert!((rate.bytes_per_second - 200_000.0).abs() < 1.0);

        // Next sample window starts at the previous sample
        tracker.record(500_000, start + Duration::from_secs(3));
        assert!((tracker.rate().unwrap().bytes_per_second - 200_000.0).abs() < 1.0);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512.0), "512 B");
        assert_eq!(format_size(2048.0), "2.00 KB");
        assert_eq!(format_size(10.0 * 1024.0 * 1024.0), "10.00 MB");
        assert_eq!(
            TransferRate {
                bytes_per_second: 1536.0
            }
            .to_string(),
            "1.50 KB/s"
        );
    }

    proptest! {
        #[test]
        fn prop_percentages_strictly_increase(
            total in 1u64..10_000_000,
            steps in prop::collection::vec(0u64..200_000, 1..300),
        ) {
            let start = Instant::now();
            let mut tracker = ProgressTracker::new("u", Some(total), 0, start);
            let mut downloaded = 0u64;
            let mut emitted = Vec::new();
            for step in steps {
                downloaded = (downloaded + step).min(total);
                if let Some(event) = tracker.record(downloaded, start) {
                    emitted.push(event.percentage);
                }
            }
            prop_assert!(emitted.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(emitted.iter().all(|p| *p >= 1 && *p <= 100));
        }
    }
}
