//! Job types: the request a worker executes and the completion it reports.

use crate::error::StatusCode;

/// Operation codes a job can carry, mirroring
/// `examples/original_source/src/chunkserver/bgjobs.cc`'s op table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Exit,
    Inval,
    ChunkOp,
    Open,
    Close,
    Read,
    Prefetch,
    Write,
    LegacyReplicate,
    Replicate,
    GetBlocks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Enabled,
    InProgress,
    Disabled,
}

/// The work a job performs, run on a worker thread. Returns the status to
/// report back through the completion callback.
pub type JobBody = Box<dyn FnOnce() -> StatusCode + Send + 'static>;

/// Invoked on the thread that drains completions (`job_pool_check_jobs`),
/// never on a worker thread.
pub type JobCallback = Box<dyn FnOnce(u32, StatusCode) + Send + 'static>;

pub(crate) struct JobRecord {
    pub state: JobState,
    pub op: OpCode,
    pub callback: JobCallback,
}
