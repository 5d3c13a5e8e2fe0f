//! Priority inheritance (spec.md §4.J).
//!
//! At dependency-add time, a child job's effective priority may be pulled
//! upward from its parents so that urgent work isn't stuck behind
//! low-priority blockers. Depth is capped (default 5, configurable); a
//! job's priority is monotonically non-decreasing under this process —
//! [`PriorityInheritance::inherit`] never returns less than the child's
//! current priority.

/// Strategy for combining parent priorities into a child's inherited
/// priority (spec.md §4.J).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InheritanceStrategy {
    /// The maximum priority among all parents, undamped.
    MaxPriority,
    /// The arithmetic mean of all parents' priorities.
    AveragePriority,
    /// Mean of `parent_priority * decay^depth` over all parents.
    WeightedAverage,
    /// `max(parent_priority * decay^depth)` over all parents.
    Propagation,
}

impl Default for InheritanceStrategy {
    fn default() -> Self {
        InheritanceStrategy::Propagation
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PriorityInheritance {
    pub strategy: InheritanceStrategy,
    pub decay: f64,
    pub max_depth: usize,
}

impl Default for PriorityInheritance {
    fn default() -> Self {
        Self { strategy: InheritanceStrategy::default(), decay: 0.8, max_depth: 5 }
    }
}

impl PriorityInheritance {
    pub fn new(strategy: InheritanceStrategy, decay: f64, max_depth: usize) -> Self {
        Self { strategy, decay, max_depth }
    }

    /// Compute the child's new priority given `current` and the set of
    /// `(parent_priority, depth)` pairs reachable within `max_depth`
    /// (depth 1 = direct parent). Depths beyond `max_depth` must already
    /// be excluded by the caller, which owns graph traversal.
    ///
    /// Never returns less than `current` — inheritance only raises
    /// priority, it never lowers it (spec.md §4.J "monotonically
    /// non-decreasing").
    pub fn inherit(&self, current: i32, parents: &[(i32, usize)]) -> i32 {
        let in_range: Vec<(i32, usize)> = parents.iter().copied().filter(|(_, depth)| *depth <= self.max_depth && *depth > 0).collect();
        if in_range.is_empty() {
            return current;
        }

        let candidate = match self.strategy {
            InheritanceStrategy::MaxPriority => in_range.iter().map(|(p, _)| *p).max().unwrap_or(current),
            InheritanceStrategy::AveragePriority => {
                let sum: i64 = in_range.iter().map(|(p, _)| *p as i64).sum();
                (sum as f64 / in_range.len() as f64).round() as i32
            }
            InheritanceStrategy::WeightedAverage => {
                let weighted_sum: f64 = in_range.iter().map(|(p, depth)| *p as f64 * self.decay.powi(*depth as i32)).sum();
                (weighted_sum / in_range.len() as f64).round() as i32
            }
            InheritanceStrategy::Propagation => in_range
                .iter()
                .map(|(p, depth)| *p as f64 * self.decay.powi(*depth as i32))
                .fold(f64::MIN, f64::max)
                .round() as i32,
        };

        candidate.max(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_parent_set_is_a_noop() {
        let inheritance = PriorityInheritance::default();
        assert_eq!(inheritance.inherit(100, &[]), 100);
    }

    #[test]
    fn max_priority_takes_highest_parent_uncapped() {
        let inheritance = PriorityInheritance::new(InheritanceStrategy::MaxPriority, 0.8, 5);
        assert_eq!(inheritance.inherit(100, &[(200, 1), (900, 2)]), 900);
    }

    #[test]
    fn never_decreases_below_current_priority() {
        let inheritance = PriorityInheritance::new(InheritanceStrategy::Propagation, 0.5, 5);
        // Parent is lower priority and decay shrinks it further: child keeps its own.
        assert_eq!(inheritance.inherit(500, &[(100, 3)]), 500);
    }

    #[test]
    fn propagation_applies_decay_per_depth() {
        let inheritance = PriorityInheritance::new(InheritanceStrategy::Propagation, 0.5, 5);
        // parent=1000 at depth=1 -> 1000 * 0.5 = 500
        assert_eq!(inheritance.inherit(0, &[(1000, 1)]), 500);
    }

    #[test]
    fn depths_beyond_max_depth_are_excluded() {
        let inheritance = PriorityInheritance::new(InheritanceStrategy::MaxPriority, 0.8, 2);
        assert_eq!(inheritance.inherit(10, &[(9999, 6)]), 10);
    }

    #[test]
    fn weighted_average_is_a_fixed_point_after_one_pass() {
        // Applying inherit twice with the same parent set produces the
        // same result — one pass reaches the fixed point at depth <= max.
        let inheritance = PriorityInheritance::new(InheritanceStrategy::WeightedAverage, 0.8, 5);
        let once = inheritance.inherit(0, &[(1000, 1), (500, 2)]);
        let twice = inheritance.inherit(once, &[(1000, 1), (500, 2)]);
        assert_eq!(once, twice);
    }
}
