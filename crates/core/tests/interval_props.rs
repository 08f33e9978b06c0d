//! Property tests for the interval algebra.

use chrono::{DateTime, TimeZone, Utc};
use meridian_core::interval::{Grain, Interval, IntervalSet};
use proptest::prelude::*;

fn instant(hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(hours)
}

prop_compose! {
    fn arb_interval()(start in 0i64..500, width in 1i64..100) -> Interval {
        Interval::new(instant(start), instant(start + width)).unwrap()
    }
}

prop_compose! {
    fn arb_set()(intervals in prop::collection::vec(arb_interval(), 0..8)) -> IntervalSet {
        IntervalSet::of(intervals)
    }
}

fn is_normalized(set: &IntervalSet) -> bool {
    set.runs()
        .windows(2)
        .all(|pair| pair[0].end() < pair[1].start())
}

proptest! {
    #[test]
    fn normalization_sorts_and_separates(set in arb_set()) {
        prop_assert!(is_normalized(&set));
    }

    #[test]
    fn union_is_commutative(a in arb_set(), b in arb_set()) {
        prop_assert_eq!(a.union(&b), b.union(&a));
    }

    #[test]
    fn union_with_empty_is_identity(a in arb_set()) {
        prop_assert_eq!(a.union(&IntervalSet::empty()), a);
    }

    #[test]
    fn intersect_is_commutative(a in arb_set(), b in arb_set()) {
        prop_assert_eq!(a.intersect(&b), b.intersect(&a));
    }

    #[test]
    fn intersection_is_contained_in_both(a in arb_set(), b in arb_set()) {
        let i = a.intersect(&b);
        for run in i.iter() {
            prop_assert!(a.covers(run));
            prop_assert!(b.covers(run));
        }
    }

    #[test]
    fn subtract_self_is_empty(a in arb_set()) {
        prop_assert!(a.subtract(&a).is_empty());
    }

    #[test]
    fn subtract_superset_is_empty(a in arb_set(), b in arb_set()) {
        prop_assert!(a.subtract(&a.union(&b)).is_empty());
    }

    #[test]
    fn subtract_is_disjoint_from_subtrahend(a in arb_set(), b in arb_set()) {
        let d = a.subtract(&b);
        prop_assert!(d.intersect(&b).is_empty());
    }

    #[test]
    fn subtract_plus_intersection_rebuilds(a in arb_set(), b in arb_set()) {
        let rebuilt = a.subtract(&b).union(&a.intersect(&b));
        prop_assert_eq!(rebuilt, a);
    }

    #[test]
    fn all_operations_stay_normalized(a in arb_set(), b in arb_set()) {
        prop_assert!(is_normalized(&a.union(&b)));
        prop_assert!(is_normalized(&a.intersect(&b)));
        prop_assert!(is_normalized(&a.subtract(&b)));
    }

    #[test]
    fn buckets_cover_their_interval(interval in arb_interval()) {
        let buckets = Grain::Day.buckets(&interval);
        let set = IntervalSet::of(buckets);
        prop_assert!(set.covers(&interval));
    }

    #[test]
    fn bucket_edges_align_to_grain(interval in arb_interval()) {
        for bucket in Grain::Hour.buckets(&interval) {
            prop_assert_eq!(Grain::Hour.floor(bucket.start()), bucket.start());
        }
    }
}
