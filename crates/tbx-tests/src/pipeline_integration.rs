//! End-to-end pipeline tests: sources, filters, pipes and sinks together

use tbx_streams::{
    Buffer, Crc32, Digest, FileSink, FileSource, FilterConfig, FilterSink, FilterSource,
    FilterState, FixedSizePolicy, IdentityFilter, NullSink, Pipe, PipeState, Sha256, SplitSink,
    StreamError, TapSink, TapSource,
};

use crate::harness::{init_tracing, pattern, BlockReverseFilter, ChunkedSource, TestEnv, ThrottledSink};

fn identity_roundtrip(len: usize, pipe_buffer: usize) {
    let data = pattern(len);
    let source = ChunkedSource::new(data.clone(), 37);
    let filtered = FilterSource::new(source, IdentityFilter, &FilterConfig::symmetric(64)).unwrap();
    let mut pipe = Pipe::new(filtered, ThrottledSink::unlimited(), pipe_buffer).unwrap();

    let stats = pipe.process().unwrap();
    assert_eq!(pipe.state(), PipeState::Closed);
    assert_eq!(stats.bytes_out, len as u64);

    let (filtered, sink) = pipe.into_parts();
    assert_eq!(filtered.state(), FilterState::Finalized);
    assert_eq!(sink.data(), data.as_slice());
    assert_eq!(sink.eos_acks(), 1);
    assert_eq!(sink.writes_after_close(), 0);
}

#[test]
fn test_identity_pipe_buffer_smaller_than_stream() {
    init_tracing();
    identity_roundtrip(1000, 100);
}

#[test]
fn test_identity_pipe_buffer_equal_to_stream() {
    identity_roundtrip(1000, 1000);
}

#[test]
fn test_identity_pipe_buffer_larger_than_stream() {
    identity_roundtrip(1000, 4096);
}

#[test]
fn test_identity_pipe_empty_stream() {
    identity_roundtrip(0, 16);
}

#[test]
fn test_ten_byte_pipe_twenty_five_byte_source() {
    let data = pattern(25);
    let mut pipe = Pipe::new(Buffer::from_slice(&data), ThrottledSink::unlimited(), 10).unwrap();
    pipe.process().unwrap();
    assert_eq!(pipe.state(), PipeState::Closed);
    assert_eq!(pipe.sink().data(), data.as_slice());
    assert_eq!(pipe.sink().eos_acks(), 1);
}

#[test]
fn test_stuttering_source_and_throttled_sink() {
    let data = pattern(5000);
    let source = ChunkedSource::new(data.clone(), 300).with_stutter(3);
    let sink = ThrottledSink::unlimited().with_max_write(77).with_close_delay(4);
    let mut pipe = Pipe::new(source, sink, 256).unwrap();

    let mut saw_notified = false;
    pipe.process_with(|state, _| {
        saw_notified |= state == PipeState::NotifiedSink;
        Ok(())
    })
    .unwrap();

    assert!(saw_notified);
    assert_eq!(pipe.sink().data(), data.as_slice());
    assert_eq!(pipe.sink().eos_acks(), 1);
    assert_eq!(pipe.sink().close_calls(), 5);
    assert_eq!(pipe.source().eos_reported(), 1);
}

#[test]
fn test_block_filter_on_both_sides() {
    let data = pattern(3001);
    let source = FilterSource::new(
        ChunkedSource::new(data.clone(), 500),
        BlockReverseFilter::new(16),
        &FilterConfig::symmetric(128),
    )
    .unwrap();
    let sink = FilterSink::new(
        ThrottledSink::unlimited().with_max_write(50).with_close_delay(2),
        BlockReverseFilter::new(16),
        &FilterConfig::symmetric(96),
    )
    .unwrap();
    let mut pipe = Pipe::new(source, sink, 200).unwrap();
    pipe.process().unwrap();

    let (source, sink) = pipe.into_parts();
    let (_, forward) = source.into_parts();
    assert_eq!(sink.state(), FilterState::Finalized);
    let (downstream, backward) = sink.into_parts();

    // Reversing 16-byte blocks twice restores the input.
    assert_eq!(downstream.data(), data.as_slice());
    assert_eq!(downstream.eos_acks(), 1);
    assert_eq!((forward.inits(), forward.finalizes()), (1, 1));
    assert_eq!((backward.inits(), backward.finalizes()), (1, 1));
}

#[test]
fn test_block_filter_changes_stream() {
    let data = pattern(100);
    let sink = FilterSink::new(ThrottledSink::unlimited(), BlockReverseFilter::new(7), &FilterConfig::symmetric(32)).unwrap();
    let mut pipe = Pipe::new(Buffer::from_slice(&data), sink, 13).unwrap();
    pipe.process().unwrap();
    let (_, sink) = pipe.into_parts();
    let (downstream, _) = sink.into_parts();
    assert_eq!(downstream.data(), BlockReverseFilter::expected(&data, 7).as_slice());
}

#[test]
fn test_file_copy_with_checksums() {
    let env = TestEnv::new("file_copy").unwrap();
    let data = pattern(200_000);
    let input = env.write_file("in.bin", &data).unwrap();
    let output = env.file("out.bin");

    let source = TapSource::new(FileSource::open(&input).unwrap(), Crc32::default());
    let sink = TapSink::new(FileSink::create(&output).unwrap(), Sha256::default());
    let mut pipe = Pipe::new(source, sink, 8192).unwrap();
    let stats = pipe.process().unwrap();
    assert_eq!(stats.bytes_in, 200_000);

    let (source, sink) = pipe.into_parts();
    assert_eq!(source.observer().get(), Crc32::compute_file(&input).unwrap());
    assert_eq!(sink.observer().get(), Sha256::compute(&data));
    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[test]
fn test_pipe_into_split_volumes() {
    let env = TestEnv::new("split_volumes").unwrap();
    let data = pattern(2500);
    let dir = env.tempdir().to_path_buf();
    let policy = FixedSizePolicy::new(vec![1000, 1000, 1000], |i| {
        FileSink::create(dir.join(format!("vol{}.bin", i)))
    });
    let mut pipe = Pipe::new(Buffer::from_slice(&data), SplitSink::new(policy), 300).unwrap();
    pipe.process().unwrap();

    let (_, split) = pipe.into_parts();
    assert_eq!(split.into_sinks().len(), 3);
    let mut joined = Vec::new();
    for i in 0..3 {
        let part = std::fs::read(env.file(&format!("vol{}.bin", i))).unwrap();
        assert!(part.len() <= 1000);
        joined.extend(part);
    }
    assert_eq!(joined, data);
}

#[test]
fn test_quota_sink_stops_pipe() {
    let mut pipe = Pipe::new(Buffer::from_slice(&pattern(100)), NullSink::with_quota(40), 16).unwrap();
    let err = pipe.process().unwrap_err();
    assert!(matches!(err, StreamError::SinkClosed { .. }));
    assert_eq!(pipe.stats().bytes_out, 40);
}

#[test]
fn test_monitor_abort_leaves_pipe_resumable() {
    let data = pattern(1000);
    let mut pipe = Pipe::new(Buffer::from_slice(&data), ThrottledSink::unlimited(), 100).unwrap();
    let err = pipe
        .process_with(|_, stats| {
            if stats.bytes_out >= 300 {
                Err(StreamError::Aborted("cancelled".to_string()))
            } else {
                Ok(())
            }
        })
        .unwrap_err();
    assert!(matches!(err, StreamError::Aborted(_)));
    assert!(!pipe.is_closed());

    pipe.process().unwrap();
    assert_eq!(pipe.sink().data(), data.as_slice());
    assert_eq!(pipe.sink().eos_acks(), 1);
}
