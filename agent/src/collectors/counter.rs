/// Width of the fixed-size kernel counters a sampler reads.
///
/// Network byte counters and block-device sector counters wrap at 2^32 on
/// 32-bit kernels and at 2^64 elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CounterWidth {
    Bits32,
    #[default]
    Bits64,
}

impl CounterWidth {
    pub fn from_64_bit(is_64_bit: bool) -> Self {
        if is_64_bit {
            CounterWidth::Bits64
        } else {
            CounterWidth::Bits32
        }
    }

    /// Rollover-safe difference: `(current - previous + 2^W) mod 2^W`.
    pub fn delta(self, current: u64, previous: u64) -> u64 {
        let diff = current.wrapping_sub(previous);
        match self {
            CounterWidth::Bits64 => diff,
            CounterWidth::Bits32 => diff & u64::from(u32::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference arithmetic in a type wide enough to never overflow.
    fn reference(current: u64, previous: u64, bits: u32) -> u64 {
        let modulus = 1u128 << bits;
        ((u128::from(current) + modulus - u128::from(previous)) % modulus) as u64
    }

    #[test]
    fn test_delta_without_wrap() {
        assert_eq!(CounterWidth::Bits64.delta(1500, 1000), 500);
        assert_eq!(CounterWidth::Bits32.delta(1500, 1000), 500);
        assert_eq!(CounterWidth::Bits64.delta(7, 7), 0);
    }

    #[test]
    fn test_delta_wraps_at_2_pow_64() {
        let pairs = [
            (u64::MAX, 23),
            (u64::MAX - 41, 0),
            (1, u64::MAX),
            (u64::MAX / 2, u64::MAX),
        ];
        for (previous, current) in pairs {
            assert_eq!(
                CounterWidth::Bits64.delta(current, previous),
                reference(current, previous, 64),
                "prev={previous} cur={current}"
            );
        }
        assert_eq!(CounterWidth::Bits64.delta(16, u64::MAX - 7), 24);
    }

    #[test]
    fn test_delta_wraps_at_2_pow_32() {
        let max32 = u64::from(u32::MAX);
        let pairs = [(max32, 23), (max32 - 41, 0), (1, max32), (65_535, 17)];
        for (previous, current) in pairs {
            assert_eq!(
                CounterWidth::Bits32.delta(current, previous),
                reference(current, previous, 32),
                "prev={previous} cur={current}"
            );
        }
        assert_eq!(CounterWidth::Bits32.delta(16, max32 - 7), 24);
    }

    #[test]
    fn test_from_64_bit() {
        assert_eq!(CounterWidth::from_64_bit(true), CounterWidth::Bits64);
        assert_eq!(CounterWidth::from_64_bit(false), CounterWidth::Bits32);
        assert_eq!(CounterWidth::default(), CounterWidth::Bits64);
    }
}
