//! Byte-reordering pre-filters: shuffle, bit shuffle and byte delta.
//!
//! Each transform is exactly invertible and leaves any trailing bytes that do
//! not form a complete element untouched, so filtered buffers keep their
//! length.

/// Groups byte lanes: all first bytes of every element, then all second
/// bytes, and so on. `stride` is the element width in bytes.
pub fn shuffle(stride: usize, src: &[u8]) -> Vec<u8> {
    if stride <= 1 || src.len() < stride * 2 {
        return src.to_vec();
    }
    let nel = src.len() / stride;
    let body = nel * stride;
    let mut out = Vec::with_capacity(src.len());
    for lane in 0..stride {
        for el in 0..nel {
            out.push(src[el * stride + lane]);
        }
    }
    out.extend_from_slice(&src[body..]);
    out
}

/// Inverse of [`shuffle`].
pub fn unshuffle(stride: usize, src: &[u8]) -> Vec<u8> {
    if stride <= 1 || src.len() < stride * 2 {
        return src.to_vec();
    }
    let nel = src.len() / stride;
    let body = nel * stride;
    let mut out = vec![0u8; src.len()];
    for lane in 0..stride {
        for el in 0..nel {
            out[el * stride + lane] = src[lane * nel + el];
        }
    }
    out[body..].copy_from_slice(&src[body..]);
    out
}

/// Bit-level transpose: bit `b` of every element is gathered into one
/// contiguous bit stream. Operates on whole elements of `typesize` bytes;
/// the element count is rounded down to a multiple of 8 so output bits pack
/// into whole bytes, and the remainder is copied through.
pub fn bitshuffle(typesize: usize, src: &[u8]) -> Vec<u8> {
    let typesize = typesize.max(1);
    let nel = (src.len() / typesize) & !7;
    if nel == 0 {
        return src.to_vec();
    }
    let body = nel * typesize;
    let nbits = typesize * 8;
    let mut out = Vec::with_capacity(src.len());
    for bit in 0..nbits {
        let byte_in_el = bit / 8;
        let shift = bit % 8;
        // Eight elements fill one output byte.
        for group in 0..nel / 8 {
            let mut packed = 0u8;
            for k in 0..8 {
                let el = group * 8 + k;
                let b = (src[el * typesize + byte_in_el] >> shift) & 1;
                packed |= b << k;
            }
            out.push(packed);
        }
    }
    out.extend_from_slice(&src[body..]);
    out
}

/// Inverse of [`bitshuffle`].
pub fn bitunshuffle(typesize: usize, src: &[u8]) -> Vec<u8> {
    let typesize = typesize.max(1);
    let nel = (src.len() / typesize) & !7;
    if nel == 0 {
        return src.to_vec();
    }
    let body = nel * typesize;
    let nbits = typesize * 8;
    let mut out = vec![0u8; src.len()];
    let mut pos = 0;
    for bit in 0..nbits {
        let byte_in_el = bit / 8;
        let shift = bit % 8;
        for group in 0..nel / 8 {
            let packed = src[pos];
            pos += 1;
            for k in 0..8 {
                let el = group * 8 + k;
                if (packed >> k) & 1 == 1 {
                    out[el * typesize + byte_in_el] |= 1 << shift;
                }
            }
        }
    }
    out[body..].copy_from_slice(&src[body..]);
    out
}

/// Byte-wise delta within each shuffled lane. Expects the lane-contiguous
/// layout produced by [`shuffle`]: `typesize` segments of `nel` bytes each.
/// The first byte of every segment is kept as the reference.
pub fn bytedelta_encode(typesize: usize, src: &[u8]) -> Vec<u8> {
    let typesize = typesize.max(1);
    let nel = src.len() / typesize;
    if nel < 2 {
        return src.to_vec();
    }
    let body = nel * typesize;
    let mut out = Vec::with_capacity(src.len());
    for lane in 0..typesize {
        let seg = &src[lane * nel..(lane + 1) * nel];
        out.push(seg[0]);
        for i in 1..nel {
            out.push(seg[i].wrapping_sub(seg[i - 1]));
        }
    }
    out.extend_from_slice(&src[body..]);
    out
}

/// Inverse of [`bytedelta_encode`].
pub fn bytedelta_decode(typesize: usize, src: &[u8]) -> Vec<u8> {
    let typesize = typesize.max(1);
    let nel = src.len() / typesize;
    if nel < 2 {
        return src.to_vec();
    }
    let body = nel * typesize;
    let mut out = Vec::with_capacity(src.len());
    for lane in 0..typesize {
        let seg = &src[lane * nel..(lane + 1) * nel];
        let mut prev = seg[0];
        out.push(prev);
        for i in 1..nel {
            prev = prev.wrapping_add(seg[i]);
            out.push(prev);
        }
    }
    out.extend_from_slice(&src[body..]);
    out
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i as u32).wrapping_mul(2654435761) as u8).collect()
    }

    #[test]
    fn shuffle_roundtrip() {
        for stride in [1, 2, 4, 8, 16] {
            for n in [0, 7, 64, 65, 1000] {
                let data = sample(n);
                assert_eq!(unshuffle(stride, &shuffle(stride, &data)), data);
            }
        }
    }

    #[test]
    fn shuffle_groups_lanes() {
        // Four u32 little-endian values share their high bytes.
        let data: Vec<u8> = [1u32, 2, 3, 4].iter().flat_map(|v| v.to_le_bytes()).collect();
        let out = shuffle(4, &data);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
        assert!(out[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn bitshuffle_roundtrip() {
        for typesize in [1, 2, 4, 8] {
            for n in [0, 5, 64, 129, 1024] {
                let data = sample(n);
                assert_eq!(bitunshuffle(typesize, &bitshuffle(typesize, &data)), data);
            }
        }
    }

    #[test]
    fn bitshuffle_concentrates_constant_bits() {
        // All elements equal: every bit stream is constant, so the output is
        // runs of 0x00 and 0xff.
        let data = vec![0x0fu8; 64];
        let out = bitshuffle(1, &data);
        assert!(out.iter().all(|&b| b == 0x00 || b == 0xff));
    }

    #[test]
    fn bytedelta_roundtrip() {
        for typesize in [1, 2, 4] {
            for n in [0, 3, 100, 101, 4096] {
                let data = sample(n);
                assert_eq!(bytedelta_decode(typesize, &bytedelta_encode(typesize, &data)), data);
            }
        }
    }

    #[test]
    fn bytedelta_flattens_ramps() {
        // A monotone byte ramp becomes a constant stream of ones.
        let data: Vec<u8> = (0..=255u8).collect();
        let out = bytedelta_encode(1, &data);
        assert_eq!(out[0], 0);
        assert!(out[1..].iter().all(|&b| b == 1));
    }
}
