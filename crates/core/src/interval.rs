//! Interval algebra over half-open `[start, end)` instant ranges.
//!
//! [`IntervalSet`] is the normalized form used everywhere intervals are
//! compared: sorted ascending, non-overlapping, with adjacent runs merged.
//! All set operations assume (and preserve) this invariant, which makes
//! `union`/`intersect`/`subtract` linear sweeps.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IntervalError {
    /// Zero-width and inverted intervals are invalid input everywhere.
    #[error("interval is empty or inverted: [{start}, {end})")]
    Empty {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// A half-open instant range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Interval {
    /// Validating constructor; rejects zero-width and inverted ranges.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, IntervalError> {
        if start >= end {
            return Err(IntervalError::Empty { start, end });
        }
        Ok(Self { start, end })
    }

    /// Internal constructor for ranges already known to be non-empty.
    pub(crate) fn span(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end);
        Self { start, end }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.start.to_rfc3339(),
            self.end.to_rfc3339()
        )
    }
}

/// A normalized sequence of intervals: sorted, non-overlapping, and with
/// adjacent runs merged. Construction from any iterator re-normalizes, so
/// the algebra contracts hold unconditionally.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Interval>")]
#[serde(into = "Vec<Interval>")]
pub struct IntervalSet {
    runs: Vec<Interval>,
}

impl IntervalSet {
    pub fn empty() -> Self {
        Self { runs: Vec::new() }
    }

    /// Normalize an arbitrary collection of intervals.
    pub fn of<I>(intervals: I) -> Self
    where
        I: IntoIterator<Item = Interval>,
    {
        let mut runs: Vec<Interval> = intervals
            .into_iter()
            .filter(|i| i.start < i.end)
            .collect();
        runs.sort();

        let mut merged: Vec<Interval> = Vec::with_capacity(runs.len());
        for run in runs {
            match merged.last_mut() {
                // Merge overlapping and exactly-adjacent runs.
                Some(last) if run.start <= last.end => {
                    if run.end > last.end {
                        *last = Interval::span(last.start, run.end);
                    }
                }
                _ => merged.push(run),
            }
        }
        Self { runs: merged }
    }

    pub fn single(interval: Interval) -> Self {
        Self {
            runs: vec![interval],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.runs.iter()
    }

    pub fn runs(&self) -> &[Interval] {
        &self.runs
    }

    /// Earliest instant covered, if any.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.runs.first().map(Interval::start)
    }

    /// Latest instant covered, if any.
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.runs.last().map(Interval::end)
    }

    /// Whether `interval` is wholly covered. Normalization guarantees a
    /// covered interval lies inside exactly one run.
    pub fn covers(&self, interval: &Interval) -> bool {
        self.runs.iter().any(|run| run.contains(interval))
    }

    /// Whether `instant` falls inside any run.
    pub fn contains_instant(&self, instant: DateTime<Utc>) -> bool {
        self.runs
            .iter()
            .any(|run| run.start <= instant && instant < run.end)
    }

    /// Merge-sweep union. Empty set is the identity.
    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        IntervalSet::of(self.runs.iter().chain(other.runs.iter()).copied())
    }

    /// Sweep both run lists, emitting overlapping portions only. Empty set
    /// is the absorbing element.
    pub fn intersect(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = Vec::new();
        let (mut a, mut b) = (0, 0);
        while a < self.runs.len() && b < other.runs.len() {
            let (left, right) = (&self.runs[a], &other.runs[b]);
            let start = left.start.max(right.start);
            let end = left.end.min(right.end);
            if start < end {
                out.push(Interval::span(start, end));
            }
            // Advance whichever run ends first.
            if left.end <= right.end {
                a += 1;
            } else {
                b += 1;
            }
        }
        IntervalSet { runs: out }
    }

    /// Clip every portion of `self` covered by `other`, preserving the
    /// remaining sub-intervals. Used for `missing = requested - available`.
    pub fn subtract(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = Vec::new();
        let mut b = 0;
        for run in &self.runs {
            let mut cursor = run.start;
            // Skip clippers that end before this run starts.
            while b < other.runs.len() && other.runs[b].end <= run.start {
                b += 1;
            }
            let mut k = b;
            while k < other.runs.len() && other.runs[k].start < run.end {
                let clip = &other.runs[k];
                if clip.start > cursor {
                    out.push(Interval::span(cursor, clip.start.min(run.end)));
                }
                cursor = cursor.max(clip.end);
                if cursor >= run.end {
                    break;
                }
                k += 1;
            }
            if cursor < run.end {
                out.push(Interval::span(cursor, run.end));
            }
        }
        IntervalSet { runs: out }
    }
}

impl From<Vec<Interval>> for IntervalSet {
    fn from(intervals: Vec<Interval>) -> Self {
        IntervalSet::of(intervals)
    }
}

impl From<IntervalSet> for Vec<Interval> {
    fn from(set: IntervalSet) -> Self {
        set.runs
    }
}

impl FromIterator<Interval> for IntervalSet {
    fn from_iter<I: IntoIterator<Item = Interval>>(iter: I) -> Self {
        IntervalSet::of(iter)
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for run in &self.runs {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", run)?;
            first = false;
        }
        Ok(())
    }
}

/// The time-bucketing unit of a query or table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grain {
    Hour,
    Day,
    Week,
    Month,
}

impl Grain {
    /// Floor an instant to the start of its bucket. Weeks start Monday.
    pub fn floor(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = t.date_naive().and_time(NaiveTime::MIN).and_utc();
        match self {
            Grain::Hour => midnight + Duration::hours(i64::from(t.hour())),
            Grain::Day => midnight,
            Grain::Week => {
                midnight
                    - Duration::days(i64::from(
                        t.date_naive().weekday().num_days_from_monday(),
                    ))
            }
            Grain::Month => NaiveDate::from_ymd_opt(t.year(), t.month(), 1)
                .unwrap_or(t.date_naive())
                .and_time(NaiveTime::MIN)
                .and_utc(),
        }
    }

    /// Start of the bucket after the one containing `t` (for `t` already on
    /// a bucket boundary, the next boundary).
    pub fn next(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Grain::Hour => t + Duration::hours(1),
            Grain::Day => t + Duration::days(1),
            Grain::Week => t + Duration::weeks(1),
            Grain::Month => t + Months::new(1),
        }
    }

    /// Bucket `interval` at this grain. Partial buckets at the edges are
    /// included in full if any part of the bucket was requested.
    pub fn buckets(&self, interval: &Interval) -> Vec<Interval> {
        let mut out = Vec::new();
        let mut cursor = self.floor(interval.start());
        while cursor < interval.end() {
            let next = self.next(cursor);
            out.push(Interval::span(cursor, next));
            cursor = next;
        }
        out
    }

    /// Number of buckets the set touches at this grain.
    pub fn bucket_count(&self, set: &IntervalSet) -> u64 {
        set.iter()
            .map(|run| self.buckets(run).len() as u64)
            .sum()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grain::Hour => "hour",
            Grain::Day => "day",
            Grain::Week => "week",
            Grain::Month => "month",
        }
    }
}

impl fmt::Display for Grain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Grain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hour" => Ok(Grain::Hour),
            "day" => Ok(Grain::Day),
            "week" => Ok(Grain::Week),
            "month" => Ok(Grain::Month),
            other => Err(format!("unknown grain: {}", other)),
        }
    }
}
