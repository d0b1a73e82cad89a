//! Data path (chuck)
//!
//! Responsibilities:
//! - Buffer writes per path and turn them into single-shot or multipart
//!   uploads (`writer`).
//! - Serve reads from one shared streaming download per path (`reader`).
//! - Bound concurrent part uploads and retry transient failures (`limiter`,
//!   `retry`).
//!
//! Submodules:
//! - `limiter`: FIFO admission gate for part uploads
//! - `reader`: per-path read stream buffers
//! - `retry`: bounded retry policies and `execute_with_retry`
//! - `util`: transfer statistics
//! - `writer`: per-path upload pipeline
pub mod limiter;
pub mod reader;
pub mod retry;
pub mod util;
pub mod writer;

pub use reader::ReadBuffers;
pub use writer::{FlushSummary, UploadPipeline};
