//! Bytewise XOR reconstruction for XOR-level groups.
//!
//! Grounded on `examples/original_source/src/mount/block_xor.h`'s
//! `blockXor(dest, source, size)` primitive.

/// XORs `source` into `dest` in place. Panics if the slices differ in
/// length — callers always operate on same-sized 64 KiB blocks.
pub fn block_xor(dest: &mut [u8], source: &[u8]) {
    assert_eq!(dest.len(), source.len(), "block_xor requires equal-length blocks");
    for (d, s) in dest.iter_mut().zip(source.iter()) {
        *d ^= s;
    }
}

/// Reconstructs a missing block as the XOR of every other block in its
/// group (the remaining data parts plus the parity part).
pub fn reconstruct_block(present_blocks: &[&[u8]]) -> Vec<u8> {
    let len = present_blocks.first().map(|b| b.len()).unwrap_or(0);
    let mut out = vec![0u8; len];
    for block in present_blocks {
        block_xor(&mut out, block);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_group_identity_holds() {
        let data1 = vec![0xAAu8; 65536];
        let data2 = vec![0x55u8; 65536];
        let mut parity = data1.clone();
        block_xor(&mut parity, &data2);

        let reconstructed_data1 = reconstruct_block(&[&data2, &parity]);
        assert_eq!(reconstructed_data1, data1);
    }

    #[test]
    fn reconstructs_missing_part_from_level_3_group() {
        let d1 = vec![1u8; 4096];
        let d2 = vec![2u8; 4096];
        let d3 = vec![3u8; 4096];
        let mut parity = d1.clone();
        block_xor(&mut parity, &d2);
        block_xor(&mut parity, &d3);

        let reconstructed_d2 = reconstruct_block(&[&d1, &d3, &parity]);
        assert_eq!(reconstructed_d2, d2);
    }
}
