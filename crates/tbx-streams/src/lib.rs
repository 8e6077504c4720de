#![warn(missing_docs)]

//! tbx streaming layer: growable byte buffers with backpatching, filter
//! pipelines, source-to-sink pipes and a paged file cache.
//!
//! Everything is single-threaded and cooperative. Sources and sinks move what
//! they can per call and report [`Transfer::Bytes`]`(0)` when the caller
//! should come back later; [`Transfer::EndOfStream`] marks the end. The usual
//! composition is `Source -> filters -> Pipe -> Sink`, or reads straight from
//! a [`PagedSource`].

pub mod adapters;
pub mod buffer;
pub mod concat;
pub mod digest;
pub mod error;
pub mod file;
pub mod filter;
pub mod filter_sink;
pub mod filter_source;
pub mod paged;
pub mod patch;
pub mod pipe;
pub mod split;
pub mod stream;
pub mod tap;

pub use adapters::{InitHookSource, NullSink, SourceSlice};
pub use buffer::{Buffer, BufferId, Scalar};
pub use concat::ConcatSource;
pub use digest::{Blake3, Crc32, Digest, DigestBytes, Sha256};
pub use error::{StreamError, StreamResult};
pub use file::{FileHandle, FileMode, FileSink, FileSource};
pub use filter::{Filter, FilterConfig, FilterIo, FilterStage, FilterState, IdentityFilter};
pub use filter_sink::FilterSink;
pub use filter_source::FilterSource;
pub use paged::{PagedCacheConfig, PagedCacheStats, PagedSource};
pub use patch::{ArrayRef, RegionRef, ValueRef};
pub use pipe::{Pipe, PipeConfig, PipeState, PipeStats};
pub use split::{FixedSizePolicy, SplitPolicy, SplitSink};
pub use stream::{read_to_end, RandomAccess, Seekable, Sink, Source, Transfer, END_OF_STREAM};
pub use tap::{FnObserver, Observer, TapSink, TapSource};
