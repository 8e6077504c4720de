//! tbx Test & Validation Infrastructure
//!
//! Integration suites and property-based tests for the tbx streaming layer,
//! plus the stream test doubles they share: chunked and stuttering sources,
//! throttled sinks with delayed close acknowledgement, and a block filter.

pub mod compose_tests;
pub mod harness;
pub mod pipeline_integration;
pub mod proptest_streams;

pub use harness::{
    init_tracing, pattern, BlockReverseFilter, ChunkedSource, TestEnv, ThrottledSink,
};
