//! Channel de-interleave ("shuffle").
//!
//! The hardware multiplexes 1, 2 or 4 channels sample-by-sample into one
//! block; everything downstream — the acquisition rings, the trigger
//! engines, window extraction — works on contiguous per-channel streams.
//! This module does the split: output channel `c` at position `i` equals
//! input sample `i*N + c`.
//!
//! Decoding from little-endian bytes and the transpose happen in one pass.
//! The per-geometry loops walk whole frames with fixed strides so the
//! optimizer can vectorize them; no persistent state, no allocation beyond
//! growing the caller's reusable output buffers.

use scope_core::{Sample, ScopeError};

/// Split an interleaved block into contiguous per-channel sample buffers.
///
/// `channels` must be 1, 2 or 4 and `raw.len()` must be a whole number of
/// interleaved frames (`channels * S::BYTES` bytes each). `out` provides
/// one reusable buffer per channel; each is cleared and refilled.
///
/// For a single channel this degenerates to a straight decode.
pub fn deinterleave<S: Sample>(
    raw: &[u8],
    channels: usize,
    out: &mut [Vec<S>],
) -> Result<(), ScopeError> {
    let frame_bytes = channels * S::BYTES;
    if !matches!(channels, 1 | 2 | 4) || frame_bytes == 0 || raw.len() % frame_bytes != 0 {
        return Err(ScopeError::BlockLengthMisaligned {
            bytes: raw.len(),
            channels,
            format: S::FORMAT,
        });
    }
    if out.len() != channels {
        return Err(ScopeError::OutputChannelMismatch {
            outputs: out.len(),
            channels,
        });
    }

    let ticks = raw.len() / frame_bytes;
    for buf in out.iter_mut() {
        buf.clear();
        buf.reserve(ticks);
    }

    match channels {
        1 => {
            let ch0 = &mut out[0];
            for bytes in raw.chunks_exact(S::BYTES) {
                ch0.push(S::from_le(bytes));
            }
        }
        2 => {
            let (left, right) = out.split_at_mut(1);
            let ch0 = &mut left[0];
            let ch1 = &mut right[0];
            for frame in raw.chunks_exact(frame_bytes) {
                ch0.push(S::from_le(&frame[..S::BYTES]));
                ch1.push(S::from_le(&frame[S::BYTES..]));
            }
        }
        4 => {
            // Two nested split_at_mut calls give four disjoint buffers.
            let (ab, cd) = out.split_at_mut(2);
            let (a, b) = ab.split_at_mut(1);
            let (c, d) = cd.split_at_mut(1);
            let (ch0, ch1, ch2, ch3) = (&mut a[0], &mut b[0], &mut c[0], &mut d[0]);
            for frame in raw.chunks_exact(frame_bytes) {
                ch0.push(S::from_le(&frame[..S::BYTES]));
                ch1.push(S::from_le(&frame[S::BYTES..2 * S::BYTES]));
                ch2.push(S::from_le(&frame[2 * S::BYTES..3 * S::BYTES]));
                ch3.push(S::from_le(&frame[3 * S::BYTES..]));
            }
        }
        _ => unreachable!("validated above"),
    }

    Ok(())
}

/// Encode contiguous samples as little-endian bytes into `dst`.
///
/// The inverse of the decode half of [`deinterleave`]; used when copying an
/// extracted window into a capture slot. `dst` must be exactly
/// `samples.len() * S::BYTES` long.
pub fn encode_samples<S: Sample>(samples: &[S], dst: &mut [u8]) {
    debug_assert_eq!(dst.len(), samples.len() * S::BYTES);
    for (s, bytes) in samples.iter().zip(dst.chunks_exact_mut(S::BYTES)) {
        s.write_le(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interleave_i16(channels: usize, ticks: usize) -> (Vec<u8>, Vec<Vec<i16>>) {
        let mut raw = Vec::new();
        let mut expect = vec![Vec::new(); channels];
        for tick in 0..ticks {
            for (ch, exp) in expect.iter_mut().enumerate() {
                let v = (tick * channels + ch) as i16;
                raw.extend_from_slice(&v.to_le_bytes());
                exp.push(v);
            }
        }
        (raw, expect)
    }

    #[test]
    fn test_single_channel_is_decode() {
        let (raw, expect) = interleave_i16(1, 37);
        let mut out = vec![Vec::new()];
        deinterleave::<i16>(&raw, 1, &mut out).expect("deinterleave");
        assert_eq!(out, expect);
    }

    #[test]
    fn test_index_mapping_two_and_four_channels() {
        for channels in [2usize, 4] {
            let (raw, expect) = interleave_i16(channels, 64);
            let mut out = vec![Vec::new(); channels];
            deinterleave::<i16>(&raw, channels, &mut out).expect("deinterleave");
            assert_eq!(out, expect, "{channels} channels");
        }
    }

    #[test]
    fn test_index_mapping_i8() {
        let raw: Vec<u8> = (0..24u8).collect();
        let mut out = vec![Vec::new(); 4];
        deinterleave::<i8>(&raw, 4, &mut out).expect("deinterleave");
        for (c, buf) in out.iter().enumerate() {
            for (i, &v) in buf.iter().enumerate() {
                assert_eq!(v as usize, i * 4 + c);
            }
        }
    }

    #[test]
    fn test_rejects_misaligned_length() {
        // 10 bytes is not a whole number of 2-channel i16 frames.
        let raw = vec![0u8; 10];
        let mut out = vec![Vec::new(); 2];
        assert!(matches!(
            deinterleave::<i16>(&raw, 2, &mut out),
            Err(ScopeError::BlockLengthMisaligned { .. })
        ));
    }

    #[test]
    fn test_rejects_three_channels() {
        let raw = vec![0u8; 12];
        let mut out = vec![Vec::new(); 3];
        assert!(deinterleave::<i16>(&raw, 3, &mut out).is_err());
    }

    #[test]
    fn test_rejects_output_mismatch() {
        let raw = vec![0u8; 8];
        let mut out = vec![Vec::new(); 1];
        assert!(matches!(
            deinterleave::<i16>(&raw, 2, &mut out),
            Err(ScopeError::OutputChannelMismatch { .. })
        ));
    }

    #[test]
    fn test_buffers_are_reused() {
        let (raw, expect) = interleave_i16(2, 16);
        let mut out = vec![vec![99i16; 500], vec![99i16; 500]];
        deinterleave::<i16>(&raw, 2, &mut out).expect("deinterleave");
        assert_eq!(out, expect);
    }

    #[test]
    fn test_encode_round_trip() {
        let samples: Vec<i16> = (-50..50).map(|v| v * 300).collect();
        let mut bytes = vec![0u8; samples.len() * 2];
        encode_samples(&samples, &mut bytes);
        let mut out = vec![Vec::new()];
        deinterleave::<i16>(&bytes, 1, &mut out).expect("decode");
        assert_eq!(out[0], samples);
    }

    #[test]
    fn test_random_blocks_match_reference() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5C0_9E);
        for _ in 0..20 {
            let channels = [1usize, 2, 4][rng.gen_range(0..3)];
            let ticks = rng.gen_range(1..256);
            let mut raw = vec![0u8; ticks * channels * 2];
            rng.fill(raw.as_mut_slice());

            let mut out = vec![Vec::new(); channels];
            deinterleave::<i16>(&raw, channels, &mut out).expect("deinterleave");

            // Scalar reference: output[c][i] == input sample i*N + c.
            for c in 0..channels {
                for i in 0..ticks {
                    let off = (i * channels + c) * 2;
                    let v = i16::from_le_bytes([raw[off], raw[off + 1]]);
                    assert_eq!(out[c][i], v);
                }
            }
        }
    }
}
