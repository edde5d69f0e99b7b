//! Capacity management for the flow table.
//!
//! `DashMap` keeps its allocated capacity after entries are removed, so a
//! burst of short-lived connections would otherwise pin memory for the rest of
//! the run. The policy here decides when an expiry sweep should give it back.

/// When to call `shrink_to_fit()` on a map after entries have been removed.
///
/// The map is shrunk when `capacity >= entries * numerator / denominator` and
/// the capacity is above `min_capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShrinkPolicy {
    /// Maps at or below this capacity are never shrunk.
    pub min_capacity: usize,
    pub waste_ratio_numerator: usize,
    pub waste_ratio_denominator: usize,
}

impl ShrinkPolicy {
    /// Policy for the flow table: a 23/8 (2.875x) waste ratio and a floor of
    /// 10,000 slots.
    ///
    /// `DashMap` grows when 7/8 full, which leaves it at roughly twice its
    /// entry count right after a resize. Anything under 2x would shrink it
    /// straight back; 23/8 only fires once about a fifth of the entries present
    /// at the resize have gone again.
    pub const fn flow_table() -> Self {
        Self {
            min_capacity: 10_000,
            waste_ratio_numerator: 23,
            waste_ratio_denominator: 8,
        }
    }

    /// Returns true when a map holding `entries` in `capacity` slots is worth shrinking.
    ///
    /// ```
    /// use flowtrack::runtime::memory::ShrinkPolicy;
    ///
    /// let policy = ShrinkPolicy::flow_table();
    /// assert!(!policy.should_shrink(5_000, 10));
    /// assert!(policy.should_shrink(100_000, 20_000));
    /// assert!(!policy.should_shrink(100_000, 60_000));
    /// ```
    pub const fn should_shrink(&self, capacity: usize, entries: usize) -> bool {
        if capacity <= self.min_capacity {
            return false;
        }

        // integer form of capacity >= entries * (numerator / denominator)
        capacity * self.waste_ratio_denominator >= entries * self.waste_ratio_numerator
    }
}

impl Default for ShrinkPolicy {
    fn default() -> Self {
        Self::flow_table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_maps_are_left_alone() {
        let policy = ShrinkPolicy::flow_table();

        assert!(!policy.should_shrink(10_000, 0));
        assert!(!policy.should_shrink(4_096, 1));
    }

    #[test]
    fn test_threshold() {
        let policy = ShrinkPolicy::flow_table();

        // 16_000 * 23 / 8 = 46_000
        assert!(policy.should_shrink(46_000, 16_000));
        assert!(policy.should_shrink(46_000, 15_999));
        assert!(!policy.should_shrink(46_000, 16_001));
    }

    #[test]
    fn test_fresh_resize_does_not_shrink() {
        let policy = ShrinkPolicy::flow_table();

        // 7/8 full map that just doubled
        assert!(!policy.should_shrink(32_768, 14_336));
        // a fifth of those entries expired
        assert!(!policy.should_shrink(32_768, 11_469));
        assert!(policy.should_shrink(32_768, 11_000));
    }

    #[test]
    fn test_empty_map_above_floor_shrinks() {
        let policy = ShrinkPolicy::flow_table();
        assert!(policy.should_shrink(65_536, 0));
    }

    #[test]
    fn test_custom_floor() {
        let policy = ShrinkPolicy {
            min_capacity: 0,
            ..ShrinkPolicy::default()
        };
        assert!(policy.should_shrink(64, 0));
        assert!(!policy.should_shrink(0, 0));
    }
}
