//! Wrap-aware ordering of sequence numbers.
//!
//! `x` is before `y` when the signed difference `x - y` is negative. Values
//! exactly half the modulus apart compare as "before" in both directions, so
//! `after` is defined as "neither before nor equal" to keep the three
//! relations mutually exclusive.

use std::cmp::Ordering;

pub trait SeqNum: Copy + Eq {
    fn before(self, other: Self) -> bool;

    fn after(self, other: Self) -> bool {
        self != other && !self.before(other)
    }

    fn at_or_before(self, other: Self) -> bool {
        !self.after(other)
    }

    fn at_or_after(self, other: Self) -> bool {
        !self.before(other)
    }

    fn seq_cmp(self, other: Self) -> Ordering {
        if self == other {
            Ordering::Equal
        } else if self.before(other) {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }

    /// The later of two sequence numbers.
    fn seq_max(self, other: Self) -> Self {
        if self.after(other) { self } else { other }
    }
}

macro_rules! impl_seq_num {
    ($unsigned:ty, $signed:ty) => {
        impl SeqNum for $unsigned {
            #[inline]
            fn before(self, other: Self) -> bool {
                (self.wrapping_sub(other) as $signed) < 0
            }
        }
    };
}

impl_seq_num!(u32, i32);
impl_seq_num!(u64, i64);

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::SeqNum;

    #[test]
    fn compares_across_wraparound() {
        assert!(0xffff_fff0u32.before(0x10));
        assert!(0x10u32.after(0xffff_fff0));
        assert!(5u32.at_or_before(5));
        assert!(5u32.at_or_after(5));
        assert!(!5u32.before(5));
        assert_eq!(0xffff_ffffu32.seq_max(3), 3);
        assert_eq!(u64::MAX.seq_cmp(1), Ordering::Less);
    }

    #[test]
    fn exactly_one_relation_holds() {
        let samples = [
            0u32,
            1,
            2,
            0x7fff_fffe,
            0x7fff_ffff,
            0x8000_0000,
            0x8000_0001,
            0xffff_fffe,
            0xffff_ffff,
            12_345,
        ];
        for &x in &samples {
            for &y in &samples {
                let holds = [x.before(y), x == y, x.after(y)];
                assert_eq!(holds.iter().filter(|&&h| h).count(), 1, "x={x:#x} y={y:#x}");
            }
        }
    }

    #[test]
    fn before_matches_modular_distance() {
        let mut x = 0x9e37_79b9u32;
        for step in 0..10_000u32 {
            x = x.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let delta = step.wrapping_mul(429_497) | 1;
            let y = x.wrapping_add(delta);
            // y lies `delta` ahead of x on the circle
            assert_eq!(x.before(y), delta <= 0x8000_0000, "delta={delta:#x}");
        }
    }

    #[test]
    fn wide_counters_use_the_same_rules() {
        let base = u64::MAX - 10;
        assert!(base.before(base.wrapping_add(20)));
        assert!(base.wrapping_add(20).after(base));
        assert!(!base.after(base));
    }
}
