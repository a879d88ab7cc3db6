// codec.rs — Byte-level transport of scalars and vectors through RGBA8 pixels.
//
// Kernels can only write 8-bit channels, so every numeric value that crosses
// from GPU to host is packed into a 4-byte tuple (b0, b1, b2, b3). All
// schemes share one convention: the tuple is a BIG-ENDIAN u32, b0 most
// significant.
//
//   scheme                 b0       b1       b2       b3
//   ─────────────────────  ───────  ───────  ───────  ───────
//   float32 bits           [31:24]  [23:16]  [15:8]   [7:0]
//   signed32 normalized    [31:24]  [23:16]  [15:8]   [7:0]   (offset 2^31)
//   unorm16 pair           u.hi     u.lo     v.hi     v.lo
//   gradient pair          gx.hi    gx.lo    gy.hi    gy.lo
//   direction+confidence   dir      conf[23:16] conf[15:8] conf[7:0]
//
// Each encoder here is the exact byte-for-byte twin of the one the kernels
// use; the CPU backend calls these functions directly and the WGSL kernels
// reproduce them bit-for-bit (see src/shaders/common.wgsl).

/// Largest 16-bit fixed-point code.
pub const UNORM16_MAX: f32 = 65535.0;
/// Largest 24-bit confidence code (2^24 − 1).
pub const CONFIDENCE_MAX: u32 = 0x00FF_FFFF;
/// Normalization divisor for signed32 transport (2^31 − 1).
pub const SIGNED32_SCALE: f64 = 2_147_483_647.0;
/// Direction byte written when a pixel has no continuation.
pub const NO_DIRECTION: u8 = 0xFF;

/// The 8 compass offsets as (dx, dy), row-major, centre excluded.
/// A direction byte indexes this table.
pub const OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

#[inline]
fn word(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

// ---------------------------------------------------------------------------
// float32 bit patterns
// ---------------------------------------------------------------------------

#[inline]
pub fn encode_f32(v: f32) -> [u8; 4] {
    v.to_bits().to_be_bytes()
}

/// Reinterpret the big-endian word as an IEEE-754 float. Bit-exact, NaN
/// payloads included.
#[inline]
pub fn decode_f32(bytes: [u8; 4]) -> f32 {
    f32::from_bits(word(bytes))
}

// ---------------------------------------------------------------------------
// signed32 normalized
// ---------------------------------------------------------------------------

/// Encode v ∈ [-1, 1] as `round(v · (2^31 − 1)) + 2^31`.
#[inline]
pub fn encode_signed32(v: f32) -> [u8; 4] {
    let s = (v.clamp(-1.0, 1.0) as f64 * SIGNED32_SCALE).round() as i64;
    ((s + (1i64 << 31)) as u32).to_be_bytes()
}

#[inline]
pub fn decode_signed32(bytes: [u8; 4]) -> f32 {
    let s = word(bytes) as i64 - (1i64 << 31);
    (s as f64 / SIGNED32_SCALE) as f32
}

// ---------------------------------------------------------------------------
// unorm16 pairs
// ---------------------------------------------------------------------------

/// Map v ∈ [-1, 1] to its 16-bit code.
#[inline]
pub fn encode_unorm16(v: f32) -> u16 {
    ((v.clamp(-1.0, 1.0) + 1.0) * 0.5 * UNORM16_MAX).round() as u16
}

#[inline]
pub fn decode_unorm16(code: u16) -> f32 {
    code as f32 / UNORM16_MAX * 2.0 - 1.0
}

#[inline]
pub fn encode_unorm16x2(u: f32, v: f32) -> [u8; 4] {
    let w = (encode_unorm16(u) as u32) << 16 | encode_unorm16(v) as u32;
    w.to_be_bytes()
}

/// Split the word into high/low 16-bit fields, each mapped to [-1, 1].
#[inline]
pub fn decode_unorm16x2(bytes: [u8; 4]) -> (f32, f32) {
    let w = word(bytes);
    (decode_unorm16((w >> 16) as u16), decode_unorm16((w & 0xFFFF) as u16))
}

// ---------------------------------------------------------------------------
// Gradient pairs
// ---------------------------------------------------------------------------

/// A 2D gradient vector as transported by the Sobel kernel. Components are
/// in [-1, 1]; magnitude and angle are derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Gradient {
    pub gx: f32,
    pub gy: f32,
}

impl Gradient {
    /// Euclidean length, clamped to [0, 1].
    #[inline]
    pub fn magnitude(&self) -> f32 {
        self.gx.hypot(self.gy).min(1.0)
    }
}

#[inline]
pub fn encode_gradient(g: Gradient) -> [u8; 4] {
    let x = encode_unorm16(g.gx).to_be_bytes();
    let y = encode_unorm16(g.gy).to_be_bytes();
    [x[0], x[1], y[0], y[1]]
}

/// Assemble (b0 << 8 | b1) and (b2 << 8 | b3), each mapped [0, 65535] → [-1, 1].
#[inline]
pub fn decode_gradient(bytes: [u8; 4]) -> Gradient {
    let gx = decode_unorm16(u16::from_be_bytes([bytes[0], bytes[1]]));
    let gy = decode_unorm16(u16::from_be_bytes([bytes[2], bytes[3]]));
    Gradient { gx, gy }
}

// ---------------------------------------------------------------------------
// Direction + confidence
// ---------------------------------------------------------------------------

/// Decoded continuity sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionSample {
    /// Index into `OFFSETS`, or `None` when the pixel has no continuation.
    pub direction: Option<u8>,
    /// Confidence in [0, 1].
    pub confidence: f32,
}

impl DirectionSample {
    /// The (dx, dy) offset, or `None`.
    #[inline]
    pub fn offset(&self) -> Option<(i32, i32)> {
        self.direction.map(|d| OFFSETS[d as usize])
    }
}

#[inline]
pub fn encode_direction(direction: Option<u8>, confidence: f32) -> [u8; 4] {
    let d = match direction {
        Some(d) if (d as usize) < OFFSETS.len() => d,
        _ => NO_DIRECTION,
    };
    let c = (confidence.clamp(0.0, 1.0) as f64 * CONFIDENCE_MAX as f64).round() as u32;
    (((d as u32) << 24) | c).to_be_bytes()
}

/// byte0 ∈ 0..8 selects an offset (anything else means none); bytes 1–3
/// form a 24-bit confidence divided by 2^24 − 1.
#[inline]
pub fn decode_direction(bytes: [u8; 4]) -> DirectionSample {
    let w = word(bytes);
    let d = (w >> 24) as u8;
    DirectionSample {
        direction: ((d as usize) < OFFSETS.len()).then_some(d),
        confidence: ((w & CONFIDENCE_MAX) as f64 / CONFIDENCE_MAX as f64) as f32,
    }
}

/// Index of (dx, dy) in `OFFSETS`.
#[inline]
pub fn direction_index(dx: i32, dy: i32) -> Option<u8> {
    OFFSETS.iter().position(|&o| o == (dx, dy)).map(|i| i as u8)
}

/// Copy pixel `i` of a quad-channel byte slice into a tuple.
#[inline]
pub fn quad_at(data: &[u8], i: usize) -> [u8; 4] {
    [data[4 * i], data[4 * i + 1], data[4 * i + 2], data[4 * i + 3]]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_byte_order_is_big_endian() {
        // 1.0f32 = 0x3F800000
        assert_eq!(encode_f32(1.0), [0x3F, 0x80, 0x00, 0x00]);
        assert_eq!(decode_f32([0xC0, 0x00, 0x00, 0x00]), -2.0);
    }

    #[test]
    fn test_unorm16x2_byte_order() {
        // u = 1.0 → 0xFFFF in the high half, v = -1.0 → 0x0000 in the low half.
        assert_eq!(encode_unorm16x2(1.0, -1.0), [0xFF, 0xFF, 0x00, 0x00]);
        assert_eq!(decode_unorm16x2([0x00, 0x00, 0xFF, 0xFF]), (-1.0, 1.0));
    }

    #[test]
    fn test_signed32_midpoint_is_zero() {
        assert_eq!(encode_signed32(0.0), [0x80, 0x00, 0x00, 0x00]);
        assert_eq!(decode_signed32([0x80, 0x00, 0x00, 0x00]), 0.0);
        assert_eq!(decode_signed32([0xFF, 0xFF, 0xFF, 0xFF]), 1.0);
    }

    #[test]
    fn test_direction_layout() {
        let b = encode_direction(Some(6), 1.0);
        assert_eq!(b, [6, 0xFF, 0xFF, 0xFF]);
        let s = decode_direction(b);
        assert_eq!(s.offset(), Some((1, 0)));
        assert_eq!(s.confidence, 1.0);
    }

    #[test]
    fn test_no_direction() {
        let s = decode_direction(encode_direction(None, 0.5));
        assert_eq!(s.direction, None);
        assert!((s.confidence - 0.5).abs() < 1e-6);
        // Out-of-table bytes decode as none too.
        assert_eq!(decode_direction([9, 0, 0, 0]).direction, None);
    }

    #[test]
    fn test_direction_index_matches_table() {
        for (i, &(dx, dy)) in OFFSETS.iter().enumerate() {
            assert_eq!(direction_index(dx, dy), Some(i as u8));
        }
        assert_eq!(direction_index(0, 0), None);
    }
}
