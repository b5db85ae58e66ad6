//! Range math and chunk planning.
//!
//! Splits a download into N chunks with fixed half-open byte ranges. Chunk
//! boundaries are decided once, at the first transfer start, and persisted
//! with the job so resume and retry reopen the same ranges.

mod range;

pub use range::{chunk_count, plan_chunks, Chunk};
