use std::fmt;

use crate::math::cap_add;
use crate::math::cap_mul;
use crate::math::cap_neg;
use crate::math::div_ceil;
use crate::math::div_floor;
use crate::marrow_assert_moderate;

/// A closed interval `[start, end]` of integer values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClosedInterval {
    pub start: i64,
    pub end: i64,
}

impl ClosedInterval {
    pub fn new(start: i64, end: i64) -> ClosedInterval {
        ClosedInterval { start, end }
    }
}

/// An ordered sequence of closed integer intervals, pairwise disjoint and
/// non-adjacent, with set-of-values semantics.
///
/// `i64::MIN` and `i64::MAX` act as minus and plus infinity; all arithmetic on
/// bounds saturates at these values.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Domain {
    intervals: Vec<ClosedInterval>,
}

impl Domain {
    /// The domain `[lower_bound, upper_bound]`; empty if `lower_bound` is
    /// larger than `upper_bound`.
    pub fn new(lower_bound: i64, upper_bound: i64) -> Domain {
        if lower_bound > upper_bound {
            return Domain::empty();
        }
        Domain {
            intervals: vec![ClosedInterval::new(lower_bound, upper_bound)],
        }
    }

    pub fn empty() -> Domain {
        Domain { intervals: vec![] }
    }

    pub fn all_values() -> Domain {
        Domain::new(i64::MIN, i64::MAX)
    }

    pub fn singleton(value: i64) -> Domain {
        Domain::new(value, value)
    }

    /// Builds a domain from an arbitrary list of values.
    pub fn from_values(mut values: Vec<i64>) -> Domain {
        values.sort_unstable();
        values.dedup();

        let mut intervals: Vec<ClosedInterval> = Vec::new();
        for value in values {
            match intervals.last_mut() {
                Some(last) if last.end != i64::MAX && value == last.end + 1 => last.end = value,
                _ => intervals.push(ClosedInterval::new(value, value)),
            }
        }
        Domain { intervals }
    }

    /// Builds a domain from intervals which may overlap or touch; they are
    /// sorted and merged.
    pub fn from_intervals(mut intervals: Vec<ClosedInterval>) -> Domain {
        intervals.retain(|interval| interval.start <= interval.end);
        intervals.sort_unstable_by_key(|interval| (interval.start, interval.end));

        let mut merged: Vec<ClosedInterval> = Vec::new();
        for interval in intervals {
            match merged.last_mut() {
                // Merge overlapping or adjacent intervals.
                Some(last)
                    if interval.start <= last.end
                        || (last.end != i64::MAX && interval.start == last.end + 1) =>
                {
                    last.end = last.end.max(interval.end);
                }
                _ => merged.push(interval),
            }
        }
        Domain { intervals: merged }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn min(&self) -> i64 {
        marrow_assert_moderate!(!self.is_empty());
        self.intervals[0].start
    }

    pub fn max(&self) -> i64 {
        marrow_assert_moderate!(!self.is_empty());
        self.intervals[self.intervals.len() - 1].end
    }

    pub fn is_fixed(&self) -> bool {
        !self.is_empty() && self.min() == self.max()
    }

    pub fn num_intervals(&self) -> usize {
        self.intervals.len()
    }

    pub fn front(&self) -> ClosedInterval {
        marrow_assert_moderate!(!self.is_empty());
        self.intervals[0]
    }

    pub fn back(&self) -> ClosedInterval {
        marrow_assert_moderate!(!self.is_empty());
        self.intervals[self.intervals.len() - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = ClosedInterval> + '_ {
        self.intervals.iter().copied()
    }

    pub fn interval(&self, index: usize) -> ClosedInterval {
        self.intervals[index]
    }

    /// Iterates over the individual values; only sensible for small domains.
    pub fn values(&self) -> impl Iterator<Item = i64> + '_ {
        self.intervals
            .iter()
            .flat_map(|interval| interval.start..=interval.end)
    }

    /// The number of values in the domain, saturating at `u64::MAX`.
    pub fn size(&self) -> u64 {
        self.intervals.iter().fold(0u64, |size, interval| {
            size.saturating_add(interval.end.abs_diff(interval.start).saturating_add(1))
        })
    }

    pub fn contains(&self, value: i64) -> bool {
        self.intervals
            .binary_search_by(|interval| {
                if value < interval.start {
                    std::cmp::Ordering::Greater
                } else if value > interval.end {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    pub fn is_included_in(&self, other: &Domain) -> bool {
        let mut i = 0;
        for interval in &self.intervals {
            while i < other.intervals.len() && other.intervals[i].end < interval.start {
                i += 1;
            }
            if i == other.intervals.len()
                || interval.start < other.intervals[i].start
                || interval.end > other.intervals[i].end
            {
                return false;
            }
        }
        true
    }

    pub fn intersection_with(&self, other: &Domain) -> Domain {
        let mut result = Vec::new();
        let mut i = 0;
        let mut j = 0;
        while i < self.intervals.len() && j < other.intervals.len() {
            let a = self.intervals[i];
            let b = other.intervals[j];
            let start = a.start.max(b.start);
            let end = a.end.min(b.end);
            if start <= end {
                result.push(ClosedInterval::new(start, end));
            }
            if a.end < b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        Domain { intervals: result }
    }

    pub fn union_with(&self, other: &Domain) -> Domain {
        let mut intervals = self.intervals.clone();
        intervals.extend_from_slice(&other.intervals);
        Domain::from_intervals(intervals)
    }

    /// The set `{ -v : v in self }`.
    pub fn negation(&self) -> Domain {
        let intervals = self
            .intervals
            .iter()
            .rev()
            .map(|interval| ClosedInterval::new(cap_neg(interval.end), cap_neg(interval.start)))
            .collect();
        Domain { intervals }
    }

    /// The complement within `[i64::MIN, i64::MAX]`.
    pub fn complement(&self) -> Domain {
        let mut result = Vec::new();
        let mut next_start = i64::MIN;
        for interval in &self.intervals {
            if interval.start > next_start {
                result.push(ClosedInterval::new(next_start, interval.start - 1));
            }
            if interval.end == i64::MAX {
                return Domain { intervals: result };
            }
            next_start = interval.end + 1;
        }
        result.push(ClosedInterval::new(next_start, i64::MAX));
        Domain { intervals: result }
    }

    /// The element-wise sum `{ a + b : a in self, b in other }`.
    pub fn addition_with(&self, other: &Domain) -> Domain {
        let mut intervals = Vec::with_capacity(self.intervals.len() * other.intervals.len());
        for a in &self.intervals {
            for b in &other.intervals {
                intervals.push(ClosedInterval::new(
                    cap_add(a.start, b.start),
                    cap_add(a.end, b.end),
                ));
            }
        }
        Domain::from_intervals(intervals)
    }

    /// A superset of `{ coeff * v : v in self }` obtained by scaling the
    /// interval bounds; the holes a `|coeff| > 1` multiplication introduces
    /// are not represented.
    pub fn continuous_multiplication_by(&self, coeff: i64) -> Domain {
        if coeff == 0 {
            return if self.is_empty() {
                Domain::empty()
            } else {
                Domain::singleton(0)
            };
        }
        let intervals = self
            .intervals
            .iter()
            .map(|interval| {
                let a = cap_mul(interval.start, coeff);
                let b = cap_mul(interval.end, coeff);
                ClosedInterval::new(a.min(b), a.max(b))
            })
            .collect();
        Domain::from_intervals(intervals)
    }

    /// The exact set `{ coeff * v : v in self }`, or `None` when the result
    /// would need too many intervals to be worth representing.
    pub fn multiplication_by(&self, coeff: i64) -> Option<Domain> {
        const MAX_RESULT_SIZE: u64 = 1024;

        if coeff == 0 {
            return Some(if self.is_empty() {
                Domain::empty()
            } else {
                Domain::singleton(0)
            });
        }
        if coeff == 1 {
            return Some(self.clone());
        }
        if coeff == -1 {
            return Some(self.negation());
        }
        if self.size() > MAX_RESULT_SIZE {
            return None;
        }
        let values = self
            .values()
            .map(|value| value.checked_mul(coeff))
            .collect::<Option<Vec<_>>>()?;
        Some(Domain::from_values(values))
    }

    /// The set `{ v : coeff * v in self }`.
    pub fn inverse_multiplication_by(&self, coeff: i64) -> Domain {
        if coeff == 0 {
            return if self.contains(0) {
                Domain::all_values()
            } else {
                Domain::empty()
            };
        }
        if coeff < 0 {
            return self.negation().inverse_multiplication_by(-coeff);
        }
        let intervals = self
            .intervals
            .iter()
            .filter_map(|interval| {
                let start = if interval.start == i64::MIN {
                    i64::MIN
                } else {
                    div_ceil(interval.start, coeff)
                };
                let end = if interval.end == i64::MAX {
                    i64::MAX
                } else {
                    div_floor(interval.end, coeff)
                };
                (start <= end).then_some(ClosedInterval::new(start, end))
            })
            .collect();
        Domain::from_intervals(intervals)
    }

    /// The set `{ v / divisor : v in self }` with integer division truncating
    /// towards zero.
    pub fn division_by(&self, divisor: i64) -> Domain {
        marrow_assert_moderate!(divisor != 0);
        if divisor < 0 {
            return self.negation().division_by(-divisor);
        }
        let intervals = self
            .intervals
            .iter()
            .map(|interval| {
                let start = if interval.start == i64::MIN {
                    i64::MIN
                } else {
                    interval.start / divisor
                };
                let end = if interval.end == i64::MAX {
                    i64::MAX
                } else {
                    interval.end / divisor
                };
                ClosedInterval::new(start, end)
            })
            .collect();
        Domain::from_intervals(intervals)
    }

    /// Replaces the domain by its hull `[min, max]` when it has more than
    /// `limit` intervals. Used to cap the cost of chained additions.
    pub fn relaxed_if_too_complex(self, limit: usize) -> Domain {
        if self.num_intervals() > limit {
            Domain::new(self.min(), self.max())
        } else {
            self
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "{{}}");
        }
        let formatted = self
            .intervals
            .iter()
            .map(|interval| {
                if interval.start == interval.end {
                    format!("{}", interval.start)
                } else {
                    format!("[{}, {}]", interval.start, interval.end)
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        write!(f, "{{{}}}", formatted)
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_values_merges_consecutive_values() {
        let domain = Domain::from_values(vec![5, 1, 2, 3, 9, 2]);
        assert_eq!(
            domain.iter().collect::<Vec<_>>(),
            vec![
                ClosedInterval::new(1, 3),
                ClosedInterval::new(5, 5),
                ClosedInterval::new(9, 9)
            ]
        );
    }

    #[test]
    fn from_intervals_merges_adjacent_intervals() {
        let domain = Domain::from_intervals(vec![
            ClosedInterval::new(4, 6),
            ClosedInterval::new(1, 3),
            ClosedInterval::new(8, 9),
        ]);
        assert_eq!(
            domain.iter().collect::<Vec<_>>(),
            vec![ClosedInterval::new(1, 6), ClosedInterval::new(8, 9)]
        );
    }

    #[test]
    fn intersection_respects_holes() {
        let a = Domain::from_values(vec![1, 2, 3, 7, 8]);
        let b = Domain::new(3, 7);
        let result = a.intersection_with(&b);
        assert_eq!(result, Domain::from_values(vec![3, 7]));
    }

    #[test]
    fn union_of_disjoint_domains() {
        let a = Domain::new(1, 3);
        let b = Domain::new(6, 8);
        let result = a.union_with(&b);
        assert_eq!(result.num_intervals(), 2);
        assert!(result.contains(2));
        assert!(!result.contains(5));
    }

    #[test]
    fn negation_reverses_intervals() {
        let domain = Domain::from_values(vec![1, 2, 5]);
        assert_eq!(domain.negation(), Domain::from_values(vec![-5, -2, -1]));
    }

    #[test]
    fn negation_is_an_involution() {
        let domain = Domain::from_values(vec![-3, 0, 4, 5]);
        assert_eq!(domain.negation().negation(), domain);
    }

    #[test]
    fn complement_within_full_range() {
        let domain = Domain::new(0, 5);
        let complement = domain.complement();
        assert!(complement.contains(-1));
        assert!(complement.contains(6));
        assert!(!complement.contains(0));
        assert!(!complement.contains(5));
        assert_eq!(complement.complement(), domain);
    }

    #[test]
    fn complement_of_all_values_is_empty() {
        assert!(Domain::all_values().complement().is_empty());
        assert_eq!(Domain::empty().complement(), Domain::all_values());
    }

    #[test]
    fn addition_is_elementwise() {
        let a = Domain::from_values(vec![0, 10]);
        let b = Domain::from_values(vec![1, 2]);
        let result = a.addition_with(&b);
        assert_eq!(result, Domain::from_values(vec![1, 2, 11, 12]));
    }

    #[test]
    fn continuous_multiplication_keeps_interval_count() {
        let domain = Domain::new(1, 3);
        assert_eq!(domain.continuous_multiplication_by(2), Domain::new(2, 6));
        assert_eq!(domain.continuous_multiplication_by(-2), Domain::new(-6, -2));
        assert_eq!(domain.continuous_multiplication_by(0), Domain::singleton(0));
    }

    #[test]
    fn precise_multiplication_creates_holes() {
        let domain = Domain::new(0, 2);
        let result = domain.multiplication_by(3).expect("small domain");
        assert_eq!(result, Domain::from_values(vec![0, 3, 6]));
    }

    #[test]
    fn inverse_multiplication_rounds_inwards() {
        // { x : 2x in [1, 7] } = [1, 3].
        let domain = Domain::new(1, 7);
        assert_eq!(domain.inverse_multiplication_by(2), Domain::new(1, 3));
        // { x : -2x in [1, 7] } = [-3, -1].
        assert_eq!(domain.inverse_multiplication_by(-2), Domain::new(-3, -1));
    }

    #[test]
    fn inverse_multiplication_can_be_empty() {
        let domain = Domain::new(1, 1);
        assert!(domain.inverse_multiplication_by(2).is_empty());
    }

    #[test]
    fn division_truncates_towards_zero() {
        let domain = Domain::new(-7, 7);
        assert_eq!(domain.division_by(2), Domain::new(-3, 3));
        let domain = Domain::new(3, 9);
        assert_eq!(domain.division_by(3), Domain::new(1, 3));
    }

    #[test]
    fn inclusion_with_holes() {
        let small = Domain::from_values(vec![1, 5]);
        let big = Domain::from_values(vec![0, 1, 4, 5, 6]);
        assert!(small.is_included_in(&big));
        assert!(!big.is_included_in(&small));
    }

    #[test]
    fn relaxation_takes_the_hull() {
        let domain = Domain::from_values(vec![0, 2, 4, 6]);
        assert_eq!(domain.clone().relaxed_if_too_complex(2), Domain::new(0, 6));
        assert_eq!(domain.clone().relaxed_if_too_complex(10), domain);
    }
}
