//! Exact integer conversion between media clock domains.

/// The transport clock every frame timestamp is expressed in.
pub const TRANSPORT_CLOCK_RATE: u32 = 90_000;

/// Encoder timestamps are in microseconds.
pub const MICROSECONDS_CLOCK_RATE: u32 = 1_000_000;

/// rescale_timestamp converts `ts` ticks of a `source_rate` clock into ticks
/// of a `target_rate` clock as `ts * target_rate / source_rate`, rounding
/// toward zero. The intermediate product is 128-bit so it cannot overflow.
/// A zero source rate has no meaningful conversion and yields zero.
pub fn rescale_timestamp(ts: u64, source_rate: u32, target_rate: u32) -> u64 {
    if source_rate == 0 {
        return 0;
    }
    let scaled = u128::from(ts) * u128::from(target_rate) / u128::from(source_rate);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Converts a 90 kHz transport timestamp to microseconds.
pub fn transport_to_micros(ts: u64) -> u64 {
    rescale_timestamp(ts, TRANSPORT_CLOCK_RATE, MICROSECONDS_CLOCK_RATE)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rescale_timestamp_boundaries() {
        for target in [8_000, 48_000, 90_000, MICROSECONDS_CLOCK_RATE] {
            assert_eq!(rescale_timestamp(0, TRANSPORT_CLOCK_RATE, target), 0);
        }
        assert_eq!(transport_to_micros(90_000), 1_000_000);
        assert_eq!(rescale_timestamp(90_000, TRANSPORT_CLOCK_RATE, 48_000), 48_000);
    }

    #[test]
    fn test_rescale_timestamp_no_drift() {
        // 3000 ticks per frame at 30 fps; a float conversion drifts after
        // enough frames, the integer one lands exactly on every second.
        let frames_per_second = 30u64;
        for second in [1u64, 60, 3600, 86_400] {
            let ts = second * frames_per_second * 3000;
            assert_eq!(transport_to_micros(ts), second * 1_000_000);
            assert_eq!(rescale_timestamp(ts, TRANSPORT_CLOCK_RATE, 48_000), second * 48_000);
        }
    }

    #[test]
    fn test_rescale_timestamp_large_values() {
        assert_eq!(
            rescale_timestamp(u64::MAX, TRANSPORT_CLOCK_RATE, TRANSPORT_CLOCK_RATE),
            u64::MAX
        );
        assert_eq!(
            rescale_timestamp(u64::MAX, TRANSPORT_CLOCK_RATE, MICROSECONDS_CLOCK_RATE),
            u64::MAX
        );
        assert_eq!(rescale_timestamp(12345, 0, 90_000), 0);
    }
}
