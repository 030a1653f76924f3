//! CRC-32 helper wrapping `crc32fast`.
//!
//! `crc32fast::Hasher` already dispatches to a hardware-accelerated
//! (SSE4.2/PCLMULQDQ) implementation when the running CPU supports it and
//! falls back to a table-driven software path otherwise, which is exactly
//! the capability split the original's `CrcIfc`/SSE4.2 implementation pair
//! expressed through virtual dispatch (see `SPEC_FULL.md`, C1).

pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Incrementally computed CRC, used when only part of a block changed and
/// the full block must be rehashed after merging in new bytes.
#[derive(Default)]
pub struct Crc32Builder(crc32fast::Hasher);

impl Crc32Builder {
    pub fn new() -> Self {
        Self(crc32fast::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.0.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_vector() {
        // "123456789" is the canonical CRC-32 (IEEE / 0xEDB88320) test vector.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn builder_matches_one_shot() {
        let mut builder = Crc32Builder::new();
        builder.update(b"hello ");
        builder.update(b"world");
        assert_eq!(builder.finalize(), crc32(b"hello world"));
    }
}
