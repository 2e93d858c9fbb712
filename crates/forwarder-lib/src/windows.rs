//! Historical backfill windowing
//!
//! Collection walks backward in time through non-overlapping windows,
//! nearest-first: offset 0 is the current interval, offset 1 the one
//! before it, and so on. Far-past queries are the slowest and most
//! failure-prone on the backend, so processing nearest-first and
//! persisting incrementally keeps the most recent data even when a
//! mid-loop query times out.

use chrono::{DateTime, Duration, Utc};
use std::str::FromStr;

/// Unit of one collection interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Days,
    Hours,
    Minutes,
}

impl Interval {
    /// The span of `size` units of this interval.
    pub fn span(self, size: u32) -> Duration {
        match self {
            Interval::Days => Duration::days(i64::from(size)),
            Interval::Hours => Duration::hours(i64::from(size)),
            Interval::Minutes => Duration::minutes(i64::from(size)),
        }
    }
}

impl FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "days" | "day" => Ok(Interval::Days),
            "hours" | "hour" => Ok(Interval::Hours),
            "minutes" | "minute" => Ok(Interval::Minutes),
            other => anyhow::bail!("unknown interval unit {other:?}"),
        }
    }
}

/// Compute the `[start, end]` bounds of the window `offset` intervals
/// before the base interval. Offset 0 is the most recent window, ending at
/// `current`.
pub fn window_range(
    interval: Interval,
    size: u32,
    current: DateTime<Utc>,
    offset: u32,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let span = interval.span(size);
    let end = current - span * offset as i32;
    (end - span, end)
}

/// One window yielded by [`Windows`].
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub offset: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Iterator over `history` windows, nearest-first.
#[derive(Debug, Clone)]
pub struct Windows {
    interval: Interval,
    size: u32,
    current: DateTime<Utc>,
    history: u32,
    next_offset: u32,
}

impl Windows {
    pub fn new(interval: Interval, size: u32, current: DateTime<Utc>, history: u32) -> Self {
        Self {
            interval,
            size,
            current,
            history,
            next_offset: 0,
        }
    }
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.next_offset >= self.history {
            return None;
        }
        let offset = self.next_offset;
        self.next_offset += 1;
        let (start, end) = window_range(self.interval, self.size, self.current, offset);
        Some(Window { offset, start, end })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn parses_interval_units() {
        assert_eq!("days".parse::<Interval>().unwrap(), Interval::Days);
        assert_eq!("Hours".parse::<Interval>().unwrap(), Interval::Hours);
        assert_eq!("minute".parse::<Interval>().unwrap(), Interval::Minutes);
        assert!("fortnights".parse::<Interval>().is_err());
    }

    #[test]
    fn three_hourly_windows_walk_backward() {
        let windows: Vec<Window> = Windows::new(Interval::Hours, 1, base(), 3).collect();

        assert_eq!(windows.len(), 3);
        let hours: Vec<u32> = windows
            .iter()
            .map(|w| {
                use chrono::Timelike;
                w.end.hour()
            })
            .collect();
        assert_eq!(hours, vec![10, 9, 8]);

        for w in &windows {
            assert_eq!(w.end - w.start, Duration::hours(1));
        }
        // Adjacent windows share a boundary, no gaps and no overlap.
        assert_eq!(windows[0].start, windows[1].end);
    }

    #[test]
    fn window_count_matches_history() {
        for history in [0u32, 1, 5] {
            let count = Windows::new(Interval::Minutes, 10, base(), history).count();
            assert_eq!(count as u32, history);
        }
    }

    #[test]
    fn offsets_increase_in_distance_from_base() {
        let windows: Vec<Window> = Windows::new(Interval::Days, 1, base(), 4).collect();
        for pair in windows.windows(2) {
            assert!(pair[1].end < pair[0].end);
            assert_eq!(pair[1].end, pair[0].start);
        }
    }

    #[test]
    fn sized_intervals_scale_the_span() {
        let (start, end) = window_range(Interval::Minutes, 30, base(), 2);
        assert_eq!(end, base() - Duration::minutes(60));
        assert_eq!(start, base() - Duration::minutes(90));
    }
}
