//! C3 — erasure/XOR planner: read-plan construction, XOR reconstruction,
//! and Reed–Solomon GF(2^8) encode/recover.

pub mod galois;
pub mod plan;
pub mod reed_solomon;
pub mod xor;

pub use plan::{build_plan, choose_parts, EcRecoverOp, ReadOp, ReadPlan, XorOp};
pub use reed_solomon::ReedSolomon;
pub use xor::{block_xor, reconstruct_block};
