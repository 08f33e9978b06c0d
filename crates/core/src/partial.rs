//! Missing-interval computation for partial-data detection.
//!
//! A requested bucket counts as missing unless availability covers it in
//! full. Partially covered buckets are reported whole so clients never see
//! a bucket whose aggregate was computed from incomplete data.

use crate::interval::{Grain, Interval, IntervalSet};
use crate::table::Availability;

/// Buckets of `requested` (at `grain`) that `available` does not wholly
/// cover. `AlwaysAvailable` yields no missing buckets.
pub fn missing_intervals(
    available: &Availability,
    requested: &IntervalSet,
    grain: Grain,
) -> IntervalSet {
    let covered = match available {
        Availability::AlwaysAvailable => return IntervalSet::empty(),
        Availability::Known(set) => set,
    };

    let mut missing: Vec<Interval> = Vec::new();
    for run in requested.iter() {
        for bucket in grain.buckets(run) {
            if !covered.covers(&bucket) {
                missing.push(bucket);
            }
        }
    }
    IntervalSet::of(missing)
}

/// Portion of `requested` that overlaps still-revisable data, bucketed the
/// same whole-bucket way as missing intervals.
pub fn volatile_overlap(
    volatile: &IntervalSet,
    requested: &IntervalSet,
    grain: Grain,
) -> IntervalSet {
    let mut touched: Vec<Interval> = Vec::new();
    for run in requested.iter() {
        for bucket in grain.buckets(run) {
            if !volatile.intersect(&IntervalSet::single(bucket)).is_empty() {
                touched.push(bucket);
            }
        }
    }
    IntervalSet::of(touched)
}
