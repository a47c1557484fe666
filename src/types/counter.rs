//! Wrapping sequence counter arithmetic

/// Modulus of the 24-bit transport unit counter.
pub const UNIT_COUNTER_MODULUS: u32 = 1 << 24;

/// Modulus of the 14-bit packet sequence count.
pub const PACKET_SEQUENCE_MODULUS: u32 = 1 << 14;

/// How a counter value relates to the previous one on the same stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterStep {
    /// No previous value to compare against.
    First,
    /// Exactly one step ahead.
    Next,
    /// Same value as last time.
    Duplicate,
    /// Ahead by more than one; `missing` values were skipped.
    Gap { missing: u32 },
    /// Behind the previous value (more than half the range ahead).
    Reset,
}

/// Forward distance from `prev` to `next` modulo `modulus` (a power of two).
pub fn counter_delta(prev: u32, next: u32, modulus: u32) -> u32 {
    next.wrapping_sub(prev) & (modulus - 1)
}

/// Classify `next` against `prev` with the half-range rule.
pub fn classify(prev: Option<u32>, next: u32, modulus: u32) -> CounterStep {
    let Some(prev) = prev else {
        return CounterStep::First;
    };
    match counter_delta(prev, next, modulus) {
        0 => CounterStep::Duplicate,
        1 => CounterStep::Next,
        delta if delta < modulus / 2 => CounterStep::Gap { missing: delta - 1 },
        _ => CounterStep::Reset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn steps_are_classified() {
        let m = UNIT_COUNTER_MODULUS;
        assert_eq!(classify(None, 5, m), CounterStep::First);
        assert_eq!(classify(Some(5), 6, m), CounterStep::Next);
        assert_eq!(classify(Some(5), 5, m), CounterStep::Duplicate);
        assert_eq!(classify(Some(5), 9, m), CounterStep::Gap { missing: 3 });
        assert_eq!(classify(Some(5), 4, m), CounterStep::Reset);
        assert_eq!(classify(Some(m - 1), 0, m), CounterStep::Next);
        assert_eq!(classify(Some(m - 2), 1, m), CounterStep::Gap { missing: 2 });
    }

    proptest! {
        #[test]
        fn successor_is_always_next(prev in 0u32..UNIT_COUNTER_MODULUS) {
            let next = (prev + 1) % UNIT_COUNTER_MODULUS;
            prop_assert_eq!(classify(Some(prev), next, UNIT_COUNTER_MODULUS), CounterStep::Next);
        }

        #[test]
        fn forward_skips_are_gaps_of_exact_size(
            prev in 0u32..PACKET_SEQUENCE_MODULUS,
            skip in 1u32..(PACKET_SEQUENCE_MODULUS / 2 - 1),
        ) {
            let next = (prev + skip + 1) % PACKET_SEQUENCE_MODULUS;
            prop_assert_eq!(
                classify(Some(prev), next, PACKET_SEQUENCE_MODULUS),
                CounterStep::Gap { missing: skip }
            );
        }

        #[test]
        fn backward_steps_are_resets(
            prev in 0u32..UNIT_COUNTER_MODULUS,
            back in 1u32..(UNIT_COUNTER_MODULUS / 2),
        ) {
            let next = (prev + UNIT_COUNTER_MODULUS - back) % UNIT_COUNTER_MODULUS;
            prop_assert_eq!(classify(Some(prev), next, UNIT_COUNTER_MODULUS), CounterStep::Reset);
        }
    }
}
