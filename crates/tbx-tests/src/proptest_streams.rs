//! Property-Based Tests for the streaming layer

use proptest::prelude::*;
use tbx_streams::{
    read_to_end, Buffer, ConcatSource, FilterConfig, FilterSink, FilterSource, FixedSizePolicy,
    IdentityFilter, PagedCacheConfig, PagedSource, Pipe, PipeState, Sink, SplitSink, Transfer,
};

use crate::harness::{BlockReverseFilter, ChunkedSource, ThrottledSink};

/// Generates small positive buffer sizes, biased toward tiny ones.
pub fn arb_buffer_size() -> impl Strategy<Value = usize> {
    prop_oneof![1usize..8, 8usize..64, 64usize..2048]
}

/// Generates payloads up to 8 KiB.
pub fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..8192)
}

fn pipe_identity(data: Vec<u8>, chunk: usize, filter_buffer: usize, pipe_buffer: usize, max_write: usize) {
    let source = FilterSource::new(
        ChunkedSource::new(data.clone(), chunk),
        IdentityFilter,
        &FilterConfig::symmetric(filter_buffer),
    )
    .unwrap();
    let sink = ThrottledSink::unlimited().with_max_write(max_write).with_close_delay(1);
    let mut pipe = Pipe::new(source, sink, pipe_buffer).unwrap();
    pipe.process().unwrap();
    assert_eq!(pipe.state(), PipeState::Closed);
    assert_eq!(pipe.sink().data(), data.as_slice());
    assert_eq!(pipe.sink().eos_acks(), 1);
}

fn block_filter_sink(data: Vec<u8>, block: usize, filter_buffer: usize, pipe_buffer: usize) {
    let sink = FilterSink::new(
        ThrottledSink::unlimited(),
        BlockReverseFilter::new(block),
        &FilterConfig::symmetric(filter_buffer.max(block)),
    )
    .unwrap();
    let mut pipe = Pipe::new(Buffer::from_slice(&data), sink, pipe_buffer).unwrap();
    pipe.process().unwrap();
    let (_, sink) = pipe.into_parts();
    let (downstream, filter) = sink.into_parts();
    assert_eq!(downstream.data(), BlockReverseFilter::expected(&data, block).as_slice());
    assert_eq!(filter.finalizes(), 1);
}

fn paged_reads(data: Vec<u8>, page_size: usize, max_pages: usize, read_size: usize) {
    let mut src = PagedSource::new(
        Buffer::from_slice(&data),
        PagedCacheConfig {
            page_size,
            max_pages,
        },
    )
    .unwrap();
    assert_eq!(read_to_end(&mut src, read_size).unwrap(), data);
    assert!(src.resident_pages() <= max_pages);
}

fn split_then_concat(data: Vec<u8>, volume: u64, write_size: usize) {
    let volumes = (data.len() as u64 / volume + 1) as usize;
    let policy = FixedSizePolicy::new(vec![volume; volumes], |_| Ok(Buffer::new()));
    let mut split = SplitSink::new(policy);
    let mut rest = data.as_slice();
    while !rest.is_empty() {
        match split.write(&rest[..rest.len().min(write_size)]).unwrap() {
            Transfer::Bytes(n) => rest = &rest[n..],
            Transfer::EndOfStream => panic!("volumes exhausted"),
        }
    }
    assert_eq!(split.close().unwrap(), Transfer::EndOfStream);
    let parts = split.into_sinks();
    assert!(parts.iter().all(|p| p.size() as u64 <= volume));
    // Each volume's cursor sits at its end after writing; read from fresh copies.
    let mut concat = ConcatSource::new(parts.iter().map(|p| Buffer::from_slice(p.as_slice())).collect());
    assert_eq!(read_to_end(&mut concat, 97).unwrap(), data);
}

fn buffer_writes_accumulate(chunks: Vec<Vec<u8>>, initial: usize) {
    let mut buf = Buffer::with_capacity(initial);
    let mut expected = Vec::new();
    for chunk in &chunks {
        buf.write_bytes(chunk).unwrap();
        expected.extend_from_slice(chunk);
        assert!(buf.capacity() >= buf.size());
    }
    assert_eq!(buf.as_slice(), expected.as_slice());
    assert_eq!(buf.position(), expected.len());
}

proptest! {
    #[test]
    fn prop_pipe_identity_preserves_bytes(
        data in arb_payload(),
        chunk in arb_buffer_size(),
        filter_buffer in arb_buffer_size(),
        pipe_buffer in arb_buffer_size(),
        max_write in arb_buffer_size(),
    ) {
        pipe_identity(data, chunk, filter_buffer, pipe_buffer, max_write);
    }

    #[test]
    fn prop_block_filter_sink(
        data in arb_payload(),
        block in 1usize..64,
        filter_buffer in arb_buffer_size(),
        pipe_buffer in arb_buffer_size(),
    ) {
        block_filter_sink(data, block, filter_buffer, pipe_buffer);
    }

    #[test]
    fn prop_paged_reads_equal_backing(
        data in arb_payload(),
        page_size in 1usize..1024,
        max_pages in 1usize..8,
        read_size in arb_buffer_size(),
    ) {
        paged_reads(data, page_size, max_pages, read_size);
    }

    #[test]
    fn prop_split_then_concat(
        data in arb_payload(),
        volume in 1u64..3000,
        write_size in arb_buffer_size(),
    ) {
        split_then_concat(data, volume, write_size);
    }

    #[test]
    fn prop_buffer_writes_accumulate(
        chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..300), 0..20),
        initial in 0usize..64,
    ) {
        buffer_writes_accumulate(chunks, initial);
    }
}
