// tests/test_codec.rs — Wire-format sweeps for the pixel codec.
//
// The unit tests in src/codec.rs pin individual byte layouts; these sweep
// large slices of each value space.

use boundary_cv::codec::{
    decode_direction, decode_f32, decode_gradient, decode_signed32, decode_unorm16x2,
    encode_direction, encode_f32, encode_gradient, encode_signed32, encode_unorm16x2, Gradient,
    CONFIDENCE_MAX, OFFSETS,
};

/// One 16-bit quantization step over [-1, 1].
const UNORM16_STEP: f32 = 2.0 / 65535.0;

// ===== float32 =====

#[test]
fn f32_bit_patterns_survive_exactly() {
    // Stride through the whole 32-bit space, hitting subnormals, infinities
    // and both signs. NaN payloads are skipped.
    let mut bits: u32 = 0;
    let mut checked = 0;
    loop {
        let v = f32::from_bits(bits);
        if !v.is_nan() {
            assert_eq!(decode_f32(encode_f32(v)).to_bits(), bits, "bits {bits:#010x}");
            checked += 1;
        }
        match bits.checked_add(65_521) {
            Some(next) => bits = next,
            None => break,
        }
    }
    assert!(checked > 60_000);
    for v in [0.0f32, -0.0, f32::MIN_POSITIVE, f32::MAX, f32::INFINITY, f32::NEG_INFINITY] {
        assert_eq!(decode_f32(encode_f32(v)).to_bits(), v.to_bits());
    }
}

// ===== UNORM16 pairs =====

#[test]
fn unorm16_pairs_within_one_step() {
    for i in 0..=200 {
        for j in 0..=200 {
            let (u, v) = (i as f32 / 100.0 - 1.0, j as f32 / 100.0 - 1.0);
            let (du, dv) = decode_unorm16x2(encode_unorm16x2(u, v));
            assert!((du - u).abs() <= UNORM16_STEP, "u {u} -> {du}");
            assert!((dv - v).abs() <= UNORM16_STEP, "v {v} -> {dv}");
        }
    }
}

#[test]
fn gradient_pairs_match_unorm16_layout() {
    for i in 0..=40 {
        let g = Gradient { gx: i as f32 / 20.0 - 1.0, gy: 1.0 - i as f32 / 20.0 };
        let bytes = encode_gradient(g);
        assert_eq!(bytes, encode_unorm16x2(g.gx, g.gy));
        let back = decode_gradient(bytes);
        assert!((back.gx - g.gx).abs() <= UNORM16_STEP);
        assert!((back.gy - g.gy).abs() <= UNORM16_STEP);
    }
}

#[test]
fn unorm16_saturates_out_of_range() {
    assert_eq!(decode_unorm16x2(encode_unorm16x2(3.0, -7.5)), (1.0, -1.0));
}

// ===== signed32 =====

#[test]
fn signed32_round_trip_and_order() {
    let mut prev = None;
    for i in 0..=2000 {
        let v = i as f32 / 1000.0 - 1.0;
        let bytes = encode_signed32(v);
        assert!((decode_signed32(bytes) - v).abs() <= 1e-6, "v {v}");
        // Big-endian words sort the same way as the values they encode.
        if let Some(p) = prev {
            assert!(bytes >= p);
        }
        prev = Some(bytes);
    }
    assert_eq!(decode_signed32(encode_signed32(-1.0)), -1.0);
    assert_eq!(decode_signed32(encode_signed32(1.0)), 1.0);
}

// ===== direction + confidence =====

#[test]
fn direction_and_confidence_survive() {
    for (dir, offset) in OFFSETS.iter().enumerate() {
        for k in 0..=10 {
            let c = k as f32 / 10.0;
            let s = decode_direction(encode_direction(Some(dir as u8), c));
            assert_eq!(s.direction, Some(dir as u8));
            assert_eq!(s.offset(), Some(*offset));
            assert!((s.confidence - c).abs() <= 1.0 / CONFIDENCE_MAX as f32);
        }
    }
}
