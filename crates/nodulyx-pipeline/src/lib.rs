//! nodulyx-pipeline — Batch orchestration over classification and mapping.
//!
//! Ties the crates together for one batch run: parse, classify through the
//! rule cache, look up the case's profile, resolve to canonical form, and
//! record detection history best-effort. Per-document failures accumulate;
//! only an unreachable rule repository aborts the batch.

pub mod config;
pub mod pipeline;

pub use config::PipelineConfig;
pub use pipeline::{
    run_batch, BatchDocument, BatchJob, BatchProgress, BatchResult, DocumentError, DocumentInput,
};
