//! G.711 μ-law companding.
//!
//! Algorithmic encode/decode per ITU-T G.711; bit-exact with the reference
//! tables.

const BIAS: i16 = 0x84;
const CLIP: i16 = 32_635;

/// Decode one μ-law byte into a linear 16-bit sample.
pub fn mulaw_decode(byte: u8) -> i16 {
    let byte = !byte;
    let sign = (byte & 0x80) != 0;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;

    let mut sample = ((mantissa as i16) << 3) + BIAS;
    sample <<= exponent;
    sample -= BIAS;

    if sign { -sample } else { sample }
}

/// Encode a linear 16-bit sample into one μ-law byte.
pub fn mulaw_encode(sample: i16) -> u8 {
    let sign = if sample < 0 { 0x80u8 } else { 0 };
    let mut magnitude = if sample < 0 {
        // i16::MIN has no positive counterpart; clamp
        (sample as i32).unsigned_abs().min(CLIP as u32) as i16
    } else {
        sample.min(CLIP)
    };
    magnitude += BIAS;

    let mut exponent = 7u8;
    let mut mask = 0x4000i16;
    while exponent > 0 && (magnitude & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode a μ-law byte slice into linear samples.
pub fn mulaw_decode_slice(data: &[u8]) -> Vec<i16> {
    data.iter().map(|&b| mulaw_decode(b)).collect()
}

/// Encode linear samples into μ-law bytes.
pub fn mulaw_encode_slice(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| mulaw_encode(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence() {
        // μ-law silence is 0xFF (encoded zero)
        assert_eq!(mulaw_encode(0), 0xFF);
        assert_eq!(mulaw_decode(0xFF), 0);
    }

    #[test]
    fn test_known_values() {
        // Spot checks against the G.711 reference tables
        assert_eq!(mulaw_decode(0x00), -32_124);
        assert_eq!(mulaw_decode(0x80), 32_124);
        assert_eq!(mulaw_decode(0x7F), 0);
    }

    #[test]
    fn test_roundtrip_within_quantization_error() {
        for &sample in &[0i16, 100, -100, 1000, -1000, 8000, -8000, 30000, -30000] {
            let decoded = mulaw_decode(mulaw_encode(sample));
            let err = (decoded as i32 - sample as i32).abs();
            // μ-law quantization step grows with magnitude
            assert!(err <= 1_024, "sample {sample} decoded {decoded}");
        }
    }

    #[test]
    fn test_extremes_do_not_overflow() {
        let _ = mulaw_encode(i16::MIN);
        let _ = mulaw_encode(i16::MAX);
    }

    #[test]
    fn test_sign_preserved() {
        assert!(mulaw_decode(mulaw_encode(5_000)) > 0);
        assert!(mulaw_decode(mulaw_encode(-5_000)) < 0);
    }
}
