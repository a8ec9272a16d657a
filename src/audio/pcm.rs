//! Integer PCM to float conversion

/// Decode little-endian signed PCM into `out` (appending).
///
/// Trailing bytes that do not form a whole sample are ignored. Unsupported
/// sizes decode to nothing.
pub fn decode_le(bytes: &[u8], bits: u8, out: &mut Vec<f32>) {
    match bits {
        16 => out.extend(
            bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0),
        ),
        24 => out.extend(bytes.chunks_exact(3).map(|b| {
            // Sign-extend through the top byte of an i32
            let v = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
            v as f32 / 8_388_608.0
        })),
        32 => out.extend(
            bytes
                .chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0),
        ),
        _ => {}
    }
}

/// Encode float samples as little-endian i16 (test and raw tooling helper)
pub fn encode_i16_le(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|s| ((s.clamp(-1.0, 1.0) * 32_767.0) as i16).to_le_bytes())
        .collect()
}
