//! Chunk identity and part-type encoding.
//!
//! The wire and on-disk encodings are kept as two explicit, independent
//! functions (see `DESIGN.md`, Open Question 2) rather than one shared
//! byte: a future wire revision shouldn't force a disk-format migration.
//!
//! EC fragments can't be told apart with a single byte once `k`/`m` range
//! up to 32 each, so the wire id here is a `u16`, not the `u8` a literal
//! reading of one part of the spec's framing table suggests (`DESIGN.md`,
//! Open Question 4) — the alternative is to simply refuse most EC
//! configurations, which defeats the point of supporting them at all.

use std::fmt;

pub const XOR_MAX_LEVEL: u8 = 10;
pub const EC_MAX_K: u8 = 32;
pub const EC_MAX_M: u8 = 32;
pub const EC_WIRE_BASE: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XorPart {
    Data(u8),
    Parity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartType {
    Standard,
    Xor { level: u8, part: XorPart },
    Ec { k: u8, m: u8, index: u8 },
}

impl fmt::Display for PartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartType::Standard => write!(f, "standard"),
            PartType::Xor { level, part: XorPart::Data(p) } => write!(f, "xor{}_of_{}", p, level),
            PartType::Xor { level, part: XorPart::Parity } => write!(f, "xorparity_of_{}", level),
            PartType::Ec { k, m, index } => write!(f, "ec_{}_{}_{}", k, m, index),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PartTypeError {
    #[error("unknown part-type wire id {0}")]
    UnknownWireId(u16),
    #[error("unknown part-type disk id {0}")]
    UnknownDiskId(u8),
    #[error("xor level {0} out of range 2..=10")]
    XorLevelOutOfRange(u8),
    #[error("xor part index {0} out of range for level {1}")]
    XorPartOutOfRange(u8, u8),
    #[error("reed-solomon parameters k={k} m={m} out of range (k in 2..=32, m in 1..=32, k+m<=40)")]
    EcParamsOutOfRange { k: u8, m: u8 },
}

impl PartType {
    pub fn validate(&self) -> Result<(), PartTypeError> {
        match *self {
            PartType::Standard => Ok(()),
            PartType::Xor { level, part } => {
                if !(2..=XOR_MAX_LEVEL).contains(&level) {
                    return Err(PartTypeError::XorLevelOutOfRange(level));
                }
                if let XorPart::Data(p) = part {
                    if p == 0 || p > level {
                        return Err(PartTypeError::XorPartOutOfRange(p, level));
                    }
                }
                Ok(())
            }
            PartType::Ec { k, m, index } => {
                if !(2..=EC_MAX_K).contains(&k)
                    || !(1..=EC_MAX_M).contains(&m)
                    || (k as u16 + m as u16) > 40
                    || index as u16 >= (k as u16 + m as u16)
                {
                    return Err(PartTypeError::EcParamsOutOfRange { k, m });
                }
                Ok(())
            }
        }
    }

    /// Number of blocks this part stores out of the chunk's logical 1024.
    pub fn block_count(&self, logical_blocks: u32) -> u32 {
        match *self {
            PartType::Standard => logical_blocks,
            PartType::Xor { level, .. } => {
                (logical_blocks + level as u32 - 1) / level as u32
            }
            PartType::Ec { k, .. } => (logical_blocks + k as u32 - 1) / k as u32,
        }
    }

    /// Wire-protocol encoding (see module docs for why this is a `u16`).
    pub fn to_wire_id(&self) -> u16 {
        match *self {
            PartType::Standard => 0,
            PartType::Xor { level, part } => {
                let base = (XOR_MAX_LEVEL as u16 + 1) * level as u16;
                match part {
                    XorPart::Parity => base,
                    XorPart::Data(p) => base + p as u16,
                }
            }
            PartType::Ec { k, m, index } => {
                let k0 = (k - 2) as u16;
                let m0 = (m - 1) as u16;
                EC_WIRE_BASE + k0 * (EC_MAX_M as u16 + 1) * 64 + m0 * 64 + index as u16
            }
        }
    }

    pub fn from_wire_id(id: u16) -> Result<Self, PartTypeError> {
        if id == 0 {
            return Ok(PartType::Standard);
        }
        if id < EC_WIRE_BASE {
            let level = id / (XOR_MAX_LEVEL as u16 + 1);
            let rem = id % (XOR_MAX_LEVEL as u16 + 1);
            if !(2..=XOR_MAX_LEVEL as u16).contains(&level) {
                return Err(PartTypeError::UnknownWireId(id));
            }
            let level = level as u8;
            let part = if rem == 0 {
                XorPart::Parity
            } else if rem as u8 <= level {
                XorPart::Data(rem as u8)
            } else {
                return Err(PartTypeError::UnknownWireId(id));
            };
            let pt = PartType::Xor { level, part };
            pt.validate().map_err(|_| PartTypeError::UnknownWireId(id))?;
            Ok(pt)
        } else {
            let rest = id - EC_WIRE_BASE;
            let stride = (EC_MAX_M as u16 + 1) * 64;
            let k0 = rest / stride;
            let rem = rest % stride;
            let m0 = rem / 64;
            let index = (rem % 64) as u8;
            let k = k0 as u8 + 2;
            let m = m0 as u8 + 1;
            let pt = PartType::Ec { k, m, index };
            pt.validate().map_err(|_| PartTypeError::UnknownWireId(id))?;
            Ok(pt)
        }
    }

    /// On-disk header tag byte (offset 20, see `chunk::format`). Independent
    /// from the wire id: a compact dense encoding is enough here because
    /// the filename (not this byte alone) also carries `(k, m, index)` for
    /// EC parts, so collisions within the byte are resolved by the path.
    pub fn to_disk_tag(&self) -> u8 {
        match *self {
            PartType::Standard => 0,
            PartType::Xor { .. } => 1,
            PartType::Ec { .. } => 2,
        }
    }

    pub fn from_disk_tag(tag: u8, level_or_k: u8, part_or_m: u8, index: u8) -> Result<Self, PartTypeError> {
        match tag {
            0 => Ok(PartType::Standard),
            1 => {
                let part = if part_or_m == 0 { XorPart::Parity } else { XorPart::Data(part_or_m) };
                let pt = PartType::Xor { level: level_or_k, part };
                pt.validate().map_err(|_| PartTypeError::UnknownDiskId(tag))?;
                Ok(pt)
            }
            2 => {
                let pt = PartType::Ec { k: level_or_k, m: part_or_m, index };
                pt.validate().map_err(|_| PartTypeError::UnknownDiskId(tag))?;
                Ok(pt)
            }
            other => Err(PartTypeError::UnknownDiskId(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_round_trips() {
        assert_eq!(PartType::Standard.to_wire_id(), 0);
        assert_eq!(PartType::from_wire_id(0).unwrap(), PartType::Standard);
    }

    #[test]
    fn xor_parts_round_trip_across_levels() {
        for level in 2..=XOR_MAX_LEVEL {
            let parity = PartType::Xor { level, part: XorPart::Parity };
            assert_eq!(PartType::from_wire_id(parity.to_wire_id()).unwrap(), parity);
            for p in 1..=level {
                let data = PartType::Xor { level, part: XorPart::Data(p) };
                assert_eq!(PartType::from_wire_id(data.to_wire_id()).unwrap(), data);
            }
        }
    }

    #[test]
    fn xor_wire_ids_do_not_collide_across_levels() {
        let mut ids = std::collections::HashSet::new();
        for level in 2..=XOR_MAX_LEVEL {
            let parity = PartType::Xor { level, part: XorPart::Parity };
            assert!(ids.insert(parity.to_wire_id()));
            for p in 1..=level {
                let data = PartType::Xor { level, part: XorPart::Data(p) };
                assert!(ids.insert(data.to_wire_id()));
            }
        }
    }

    #[test]
    fn ec_round_trips() {
        let pt = PartType::Ec { k: 4, m: 2, index: 5 };
        assert_eq!(PartType::from_wire_id(pt.to_wire_id()).unwrap(), pt);
        let pt = PartType::Ec { k: 32, m: 32, index: 63 };
        assert!(pt.validate().is_err(), "k+m must be <= 40");
    }

    #[test]
    fn rejects_unknown_ids() {
        assert!(PartType::from_wire_id(1).is_err());
    }
}
