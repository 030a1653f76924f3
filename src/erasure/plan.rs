//! Read-plan construction (C3): decide which parts to fetch for a read and
//! how to recombine them.
//!
//! Grounded on `examples/original_source/src/mount/read_operation_planner.h`:
//! the same `Plan { requiredBufferSize, readOperations, xorOperations }`
//! shape, and the same part-selection preference order described in
//! `SPEC_FULL.md` §4.3.

use std::collections::BTreeMap;

use crate::chunk::{PartType, XorPart, BLOCK_SIZE};
use crate::error::ChunkserverError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOp {
    pub request_offset: u32,
    pub request_size: u32,
    /// Destination offset (in the assembled output buffer) of each block
    /// read by this op, in the order the blocks arrive on the wire.
    pub dst_offsets: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XorOp {
    pub dst_offset: u32,
    pub sources: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcRecoverOp {
    pub k: usize,
    pub m: usize,
    /// `(row_in_generator_matrix, dst_offset)` for each part being read, in
    /// the order fragments should be handed to `ReedSolomon::recover`.
    pub fragments: Vec<(usize, u32)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadPlan {
    /// Total size of the scratch buffer the executor must allocate —
    /// includes any per-part row scratch used to reconstruct missing
    /// blocks, which is larger than `output_size` for degraded XOR reads.
    pub required_buffer_size: u32,
    /// Size of the answer the caller actually wants, always a prefix of
    /// the scratch buffer starting at offset 0.
    pub output_size: u32,
    pub read_ops: BTreeMap<PartTypeKey, ReadOp>,
    pub xor_ops: Vec<XorOp>,
    pub ec_recover: Option<EcRecoverOp>,
}

/// `PartType` isn't `Ord`, but `BTreeMap` keys need to be; this is a small
/// orderable projection used only as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartTypeKey(pub u16);

impl From<PartType> for PartTypeKey {
    fn from(pt: PartType) -> Self {
        PartTypeKey(pt.to_wire_id())
    }
}

/// Picks which parts of a chunk to use for a read, following the
/// preference order in `SPEC_FULL.md` §4.3: Standard, then a complete
/// same-level XOR data set, then `L-1` data parts plus parity, then
/// Reed-Solomon.
pub fn choose_parts(available: &[PartType]) -> Result<Vec<PartType>, ChunkserverError> {
    if available.contains(&PartType::Standard) {
        return Ok(vec![PartType::Standard]);
    }

    let mut xor_levels: BTreeMap<u8, Vec<PartType>> = BTreeMap::new();
    for pt in available {
        if let PartType::Xor { level, .. } = pt {
            xor_levels.entry(*level).or_default().push(*pt);
        }
    }
    for (level, parts) in &xor_levels {
        let data_count = parts.iter().filter(|p| matches!(p, PartType::Xor { part: XorPart::Data(_), .. })).count();
        if data_count == *level as usize {
            let mut data: Vec<PartType> = parts
                .iter()
                .filter(|p| matches!(p, PartType::Xor { part: XorPart::Data(_), .. }))
                .cloned()
                .collect();
            data.sort_by_key(|p| match p {
                PartType::Xor { part: XorPart::Data(i), .. } => *i,
                _ => unreachable!(),
            });
            return Ok(data);
        }
    }
    for (level, parts) in &xor_levels {
        let data: Vec<PartType> = parts
            .iter()
            .filter(|p| matches!(p, PartType::Xor { part: XorPart::Data(_), .. }))
            .cloned()
            .collect();
        let has_parity = parts.iter().any(|p| matches!(p, PartType::Xor { part: XorPart::Parity, .. }));
        if has_parity && data.len() as u8 == level - 1 {
            let mut chosen = data;
            chosen.push(PartType::Xor { level: *level, part: XorPart::Parity });
            return Ok(chosen);
        }
    }

    let ec_parts: Vec<PartType> = available.iter().filter(|p| matches!(p, PartType::Ec { .. })).cloned().collect();
    if let Some(PartType::Ec { k, .. }) = ec_parts.first() {
        if ec_parts.len() >= *k as usize {
            return Ok(ec_parts.into_iter().take(*k as usize).collect());
        }
    }

    Err(ChunkserverError::InsufficientParts { chunk_id: 0, have: available.len(), need: 1 })
}

/// Builds a `ReadPlan` for logical blocks `[first_block, first_block +
/// block_count)` given the parts `choose_parts` selected.
pub fn build_plan(chosen: &[PartType], first_block: u32, block_count: u32) -> ReadPlan {
    let mut plan = ReadPlan::default();
    plan.required_buffer_size = block_count * BLOCK_SIZE;
    plan.output_size = block_count * BLOCK_SIZE;

    if chosen.len() == 1 && matches!(chosen[0], PartType::Standard) {
        plan.read_ops.insert(
            PartTypeKey::from(chosen[0]),
            ReadOp {
                request_offset: first_block * BLOCK_SIZE,
                request_size: block_count * BLOCK_SIZE,
                dst_offsets: (0..block_count).map(|i| i * BLOCK_SIZE).collect(),
            },
        );
        return plan;
    }

    if let Some(PartType::Xor { level, .. }) = chosen.iter().find(|p| matches!(p, PartType::Xor { .. })) {
        let level = *level;
        let data_parts: Vec<u8> = chosen
            .iter()
            .filter_map(|p| match p {
                PartType::Xor { part: XorPart::Data(i), .. } => Some(*i),
                _ => None,
            })
            .collect();
        let has_full_set = data_parts.len() == level as usize;

        if has_full_set {
            for &part_index in &data_parts {
                let mut dst_offsets = Vec::new();
                let mut physical_indices = Vec::new();
                for b in first_block..first_block + block_count {
                    if (b % level as u32) == (part_index as u32 - 1) {
                        dst_offsets.push(b * BLOCK_SIZE);
                        physical_indices.push(b / level as u32);
                    }
                }
                if physical_indices.is_empty() {
                    continue;
                }
                let first_physical = *physical_indices.first().unwrap();
                let count = physical_indices.len() as u32;
                plan.read_ops.insert(
                    PartTypeKey::from(PartType::Xor { level, part: XorPart::Data(part_index) }),
                    ReadOp {
                        request_offset: first_physical * BLOCK_SIZE,
                        request_size: count * BLOCK_SIZE,
                        dst_offsets,
                    },
                );
            }
            return plan;
        }

        // One data part is missing: every present data part and the parity
        // must be read over the *full* physical row range spanning the
        // request (not just the rows each part happens to own), because
        // reconstructing a missing row needs every other part's value at
        // that same physical row. Each part's bytes land in a private
        // scratch region; the final logical block is then either a direct
        // copy (its owning part is present) or an XOR of parity with every
        // present data part at that row (its owning part is missing).
        let parity_present = chosen.iter().any(|p| matches!(p, PartType::Xor { part: XorPart::Parity, .. }));
        if parity_present {
            let first_physical = first_block / level as u32;
            let last_physical = (first_block + block_count - 1) / level as u32;
            let row_count = last_physical - first_physical + 1;

            let mut scratch_base: BTreeMap<u8, u32> = BTreeMap::new();
            let mut next_scratch = block_count * BLOCK_SIZE;
            for &part_index in &data_parts {
                scratch_base.insert(part_index, next_scratch);
                plan.read_ops.insert(
                    PartTypeKey::from(PartType::Xor { level, part: XorPart::Data(part_index) }),
                    ReadOp {
                        request_offset: first_physical * BLOCK_SIZE,
                        request_size: row_count * BLOCK_SIZE,
                        dst_offsets: (0..row_count).map(|r| next_scratch + r * BLOCK_SIZE).collect(),
                    },
                );
                next_scratch += row_count * BLOCK_SIZE;
            }
            let parity_scratch_base = next_scratch;
            plan.read_ops.insert(
                PartTypeKey::from(PartType::Xor { level, part: XorPart::Parity }),
                ReadOp {
                    request_offset: first_physical * BLOCK_SIZE,
                    request_size: row_count * BLOCK_SIZE,
                    dst_offsets: (0..row_count).map(|r| parity_scratch_base + r * BLOCK_SIZE).collect(),
                },
            );
            next_scratch += row_count * BLOCK_SIZE;
            plan.required_buffer_size = next_scratch;

            for b in first_block..first_block + block_count {
                let row = b / level as u32 - first_physical;
                let owning_part = (b % level as u32) as u8 + 1;
                let dst_offset = (b - first_block) * BLOCK_SIZE;
                if let Some(&base) = scratch_base.get(&owning_part) {
                    // Owning part present: a single-source "xor" is a copy.
                    plan.xor_ops.push(XorOp { dst_offset, sources: vec![base + row * BLOCK_SIZE] });
                } else {
                    let mut sources: Vec<u32> = data_parts.iter().map(|p| scratch_base[p] + row * BLOCK_SIZE).collect();
                    sources.push(parity_scratch_base + row * BLOCK_SIZE);
                    plan.xor_ops.push(XorOp { dst_offset, sources });
                }
            }
        }
        return plan;
    }

    if chosen.iter().all(|p| matches!(p, PartType::Ec { .. })) && !chosen.is_empty() {
        if let PartType::Ec { k, m, .. } = chosen[0] {
            let mut fragments = Vec::new();
            for (slot, part) in chosen.iter().enumerate() {
                if let PartType::Ec { index, .. } = part {
                    let dst_offset = slot as u32 * BLOCK_SIZE;
                    fragments.push((*index as usize, dst_offset));
                    plan.read_ops.insert(
                        PartTypeKey::from(*part),
                        ReadOp {
                            request_offset: first_block * BLOCK_SIZE,
                            request_size: block_count * BLOCK_SIZE,
                            dst_offsets: vec![dst_offset],
                        },
                    );
                }
            }
            plan.ec_recover = Some(EcRecoverOp { k: k as usize, m: m as usize, fragments });
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_standard_when_available() {
        let available = vec![
            PartType::Standard,
            PartType::Xor { level: 2, part: XorPart::Data(1) },
        ];
        assert_eq!(choose_parts(&available).unwrap(), vec![PartType::Standard]);
    }

    #[test]
    fn picks_complete_xor_data_set_over_partial() {
        let available = vec![
            PartType::Xor { level: 2, part: XorPart::Data(1) },
            PartType::Xor { level: 2, part: XorPart::Data(2) },
            PartType::Xor { level: 2, part: XorPart::Parity },
        ];
        let chosen = choose_parts(&available).unwrap();
        assert!(chosen.iter().all(|p| matches!(p, PartType::Xor { part: XorPart::Data(_), .. })));
    }

    #[test]
    fn falls_back_to_data_plus_parity_when_one_data_part_missing() {
        let available = vec![
            PartType::Xor { level: 2, part: XorPart::Data(2) },
            PartType::Xor { level: 2, part: XorPart::Parity },
        ];
        let chosen = choose_parts(&available).unwrap();
        assert!(chosen.contains(&PartType::Xor { level: 2, part: XorPart::Parity }));
    }

    #[test]
    fn plan_for_standard_maps_blocks_contiguously() {
        let plan = build_plan(&[PartType::Standard], 0, 3);
        assert_eq!(plan.required_buffer_size, 3 * BLOCK_SIZE);
        let op = plan.read_ops.values().next().unwrap();
        assert_eq!(op.dst_offsets, vec![0, BLOCK_SIZE, 2 * BLOCK_SIZE]);
    }

    #[test]
    fn degraded_xor_plan_emits_one_op_per_requested_block() {
        let chosen = vec![
            PartType::Xor { level: 2, part: XorPart::Data(2) },
            PartType::Xor { level: 2, part: XorPart::Parity },
        ];
        let plan = build_plan(&chosen, 0, 2);
        // block 0 (owned by the missing part) reconstructs via XOR of
        // data_2 + parity; block 1 (owned by present data_2) is a copy.
        assert_eq!(plan.xor_ops.len(), 2);
        let missing_op = plan.xor_ops.iter().find(|op| op.dst_offset == 0).unwrap();
        assert_eq!(missing_op.sources.len(), 2);
        let present_op = plan.xor_ops.iter().find(|op| op.dst_offset == BLOCK_SIZE).unwrap();
        assert_eq!(present_op.sources.len(), 1);
    }

    #[test]
    fn degraded_xor_scratch_buffer_is_larger_than_output() {
        let chosen = vec![
            PartType::Xor { level: 2, part: XorPart::Data(2) },
            PartType::Xor { level: 2, part: XorPart::Parity },
        ];
        let plan = build_plan(&chosen, 0, 2);
        assert_eq!(plan.output_size, 2 * BLOCK_SIZE);
        assert!(plan.required_buffer_size > plan.output_size);
    }
}
