//! Sample-rate conversion by linear interpolation.
//!
//! Output length is `round(n * to / from)` computed in integer arithmetic, so
//! converting a long stream chunk by chunk never drifts: for the integer rate
//! ratios used here (8 kHz ↔ 16 kHz ↔ 24 kHz) every chunk converts exactly.

/// Resample `input` from `from_rate` to `to_rate`.
///
/// Returns the input unchanged when the rates match. Phase is tracked in
/// 32.32 fixed point; interpolation is linear between adjacent samples.
pub fn resample_linear(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }

    let out_len = ((input.len() as u64 * to_rate as u64 + from_rate as u64 / 2)
        / from_rate as u64) as usize;
    let mut output = Vec::with_capacity(out_len);

    // Q32.32 phase step
    let step = ((from_rate as u64) << 32) / to_rate as u64;
    let mut phase: u64 = 0;

    for _ in 0..out_len {
        let index = (phase >> 32) as usize;
        let frac = phase & 0xFFFF_FFFF;

        let s0 = input[index.min(input.len() - 1)] as i64;
        let s1 = input[(index + 1).min(input.len() - 1)] as i64;
        let sample = s0 + ((s1 - s0) * frac as i64 >> 32);
        output.push(sample as i16);

        phase += step;
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let input = vec![1i16, 2, 3, 4];
        assert_eq!(resample_linear(&input, 8_000, 8_000), input);
    }

    #[test]
    fn test_upsample_2x_length() {
        let input = vec![0i16; 160];
        assert_eq!(resample_linear(&input, 8_000, 16_000).len(), 320);
    }

    #[test]
    fn test_downsample_3x_length() {
        let input = vec![0i16; 720];
        assert_eq!(resample_linear(&input, 24_000, 8_000).len(), 240);
    }

    #[test]
    fn test_dc_signal_preserved() {
        let input = vec![1000i16; 100];
        let out = resample_linear(&input, 8_000, 24_000);
        assert!(out.iter().all(|&s| (s - 1000).abs() <= 1));
    }

    #[test]
    fn test_ramp_stays_monotonic() {
        let input: Vec<i16> = (0..100).map(|i| i * 100).collect();
        let out = resample_linear(&input, 8_000, 16_000);
        for pair in out.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn test_no_cumulative_drift() {
        // 10 minutes of audio in 20ms chunks: total output length must be
        // exact, not approximately right.
        let chunk = vec![0i16; 480]; // 20ms at 24kHz
        let mut total = 0usize;
        for _ in 0..30_000 {
            total += resample_linear(&chunk, 24_000, 8_000).len();
        }
        assert_eq!(total, 30_000 * 160);
    }

    #[test]
    fn test_empty_input() {
        assert!(resample_linear(&[], 8_000, 16_000).is_empty());
    }
}
