//! Sequence-space arithmetic for 32-bit TCP sequence and acknowledgment numbers.
//!
//! Sequence numbers wrap around at 2^32, so plain integer comparison breaks down
//! near the boundary: `0xFFFF_FFF0` comes *before* `0x0000_0010` on the wire.
//! Every seq/ack comparison in the tracker goes through [`is_before`].

/// Returns true if `a` precedes `b` in the circular sequence space.
///
/// This is the signed interpretation of `b - a` being positive (RFC 1982 style
/// serial number arithmetic). Equal values are never "before" each other.
#[inline]
pub const fn is_before(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) > 0
}

/// Number of sequence numbers covered when moving forward from `from` to `to`.
#[inline]
pub const fn distance(from: u32, to: u32) -> u32 {
    to.wrapping_sub(from)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_is_before_simple() {
        assert!(is_before(1, 2));
        assert!(!is_before(2, 1));
        assert!(!is_before(7, 7));
    }

    #[test]
    fn test_is_before_across_wraparound() {
        assert!(is_before(0xFFFF_FFF0, 0x0000_0010));
        assert!(!is_before(0x0000_0010, 0xFFFF_FFF0));
        assert!(is_before(u32::MAX, 0));
        assert!(!is_before(0, u32::MAX));
    }

    #[test]
    fn test_is_before_half_space_boundary() {
        // A distance of exactly 2^31 is i32::MIN, so neither side is before the other.
        assert!(is_before(0, 0x7FFF_FFFF));
        assert!(!is_before(0, 0x8000_0000));
        assert!(!is_before(0x8000_0000, 0));
    }

    #[test]
    fn test_distance_wraps() {
        assert_eq!(distance(100, 150), 50);
        assert_eq!(distance(0xFFFF_FFFE, 3), 5);
        assert_eq!(distance(42, 42), 0);
    }

    proptest! {
        #[test]
        fn prop_antisymmetric(a in any::<u32>(), b in any::<u32>()) {
            prop_assert!(!(is_before(a, b) && is_before(b, a)));
        }

        #[test]
        fn prop_irreflexive(a in any::<u32>()) {
            prop_assert!(!is_before(a, a));
        }

        #[test]
        fn prop_small_forward_step_is_after(a in any::<u32>(), step in 1u32..0x7FFF_FFFF) {
            let b = a.wrapping_add(step);
            prop_assert!(is_before(a, b));
            prop_assert!(!is_before(b, a));
            prop_assert_eq!(distance(a, b), step);
        }

        #[test]
        fn prop_consistent_near_wraparound(offset_a in 0u32..4096, offset_b in 0u32..4096) {
            // Values straddling the 2^32 boundary compare the same as their
            // unwrapped counterparts would.
            let base = u32::MAX - 2047;
            let a = base.wrapping_add(offset_a);
            let b = base.wrapping_add(offset_b);
            prop_assert_eq!(is_before(a, b), offset_a < offset_b);
        }
    }
}
