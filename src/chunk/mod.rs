//! C1 — chunk-file format, CRC, and the filename scheme chunks are stored
//! under (`SPEC_FULL.md` §6).

pub mod crc;
pub mod format;
pub mod part_type;

pub use format::{ChunkFile, ChunkSignature, BLOCK_SIZE, CHUNK_SIZE, LOGICAL_BLOCKS};
pub use part_type::{PartType, PartTypeError, XorPart};

use std::path::PathBuf;

/// Builds the on-disk filename for a `(chunk_id, version, part_type)`,
/// e.g. `chunk_0000000000000001_00000001.lzc` for Standard,
/// `chunk_xor_1_of_2_0000000000000001_00000001.lzc` for XOR,
/// `chunk_ec_4_2_0_0000000000000001_00000001.lzc` for EC.
pub fn chunk_filename(chunk_id: u64, version: u32, part_type: &PartType) -> String {
    match *part_type {
        PartType::Standard => format!("chunk_{:016x}_{:08x}.lzc", chunk_id, version),
        PartType::Xor { level, part } => {
            let part_name = match part {
                XorPart::Parity => "parity".to_string(),
                XorPart::Data(p) => p.to_string(),
            };
            format!("chunk_xor_{}_of_{}_{:016x}_{:08x}.lzc", part_name, level, chunk_id, version)
        }
        PartType::Ec { k, m, index } => {
            format!("chunk_ec_{}_{}_{}_{:016x}_{:08x}.lzc", k, m, index, chunk_id, version)
        }
    }
}

/// Parses a filename built by [`chunk_filename`], used by the disk scan to
/// recover identity from a path without opening the file.
pub fn parse_chunk_filename(name: &str) -> Option<(u64, u32, PartType)> {
    let stem = name.strip_suffix(".lzc")?;
    let parts: Vec<&str> = stem.split('_').collect();
    match parts.as_slice() {
        ["chunk", id_hex, ver_hex] => {
            let id = u64::from_str_radix(id_hex, 16).ok()?;
            let ver = u32::from_str_radix(ver_hex, 16).ok()?;
            Some((id, ver, PartType::Standard))
        }
        ["chunk", "xor", part, "of", level, id_hex, ver_hex] => {
            let level: u8 = level.parse().ok()?;
            let part = if *part == "parity" {
                XorPart::Parity
            } else {
                XorPart::Data(part.parse().ok()?)
            };
            let id = u64::from_str_radix(id_hex, 16).ok()?;
            let ver = u32::from_str_radix(ver_hex, 16).ok()?;
            let part_type = PartType::Xor { level, part };
            part_type.validate().ok()?;
            Some((id, ver, part_type))
        }
        ["chunk", "ec", k, m, index, id_hex, ver_hex] => {
            let k: u8 = k.parse().ok()?;
            let m: u8 = m.parse().ok()?;
            let index: u8 = index.parse().ok()?;
            let id = u64::from_str_radix(id_hex, 16).ok()?;
            let ver = u32::from_str_radix(ver_hex, 16).ok()?;
            let part_type = PartType::Ec { k, m, index };
            part_type.validate().ok()?;
            Some((id, ver, part_type))
        }
        _ => None,
    }
}

/// A chunk's path relative to a disk root.
pub fn chunk_path(root: &std::path::Path, chunk_id: u64, version: u32, part_type: &PartType) -> PathBuf {
    root.join(chunk_filename(chunk_id, version, part_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_filename_round_trips() {
        let (id, ver, pt) = parse_chunk_filename(&chunk_filename(1, 1, &PartType::Standard)).unwrap();
        assert_eq!((id, ver, pt), (1, 1, PartType::Standard));
    }

    #[test]
    fn xor_filename_round_trips() {
        let pt = PartType::Xor { level: 2, part: XorPart::Data(1) };
        let name = chunk_filename(7, 3, &pt);
        assert_eq!(parse_chunk_filename(&name), Some((7, 3, pt)));

        let parity = PartType::Xor { level: 2, part: XorPart::Parity };
        let name = chunk_filename(7, 3, &parity);
        assert_eq!(parse_chunk_filename(&name), Some((7, 3, parity)));
    }

    #[test]
    fn ec_filename_round_trips() {
        let pt = PartType::Ec { k: 4, m: 2, index: 0 };
        let name = chunk_filename(42, 5, &pt);
        assert_eq!(parse_chunk_filename(&name), Some((42, 5, pt)));
    }
}
