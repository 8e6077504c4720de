//! Composition tests: concatenation, splitting, slices and init hooks

use std::cell::RefCell;
use std::rc::Rc;

use tbx_streams::{
    read_to_end, Buffer, ConcatSource, Crc32, Digest, FileSink, FileSource, FixedSizePolicy,
    InitHookSource, Pipe, Seekable, Sink, Source, SourceSlice, SplitSink, TapSource, Transfer,
};

use crate::harness::{pattern, ChunkedSource, TestEnv, ThrottledSink};

#[test]
fn test_concat_five_empty_seven() {
    let parts = vec![
        ChunkedSource::new(pattern(5), 3),
        ChunkedSource::new(Vec::new(), 3),
        ChunkedSource::new(pattern(7), 3),
    ];
    let begins = RefCell::new(Vec::new());
    let ends = RefCell::new(Vec::new());
    let mut concat = ConcatSource::new(parts)
        .on_begin(|i| begins.borrow_mut().push(i))
        .on_end(|i| ends.borrow_mut().push(i));

    let out = read_to_end(&mut concat, 64).unwrap();
    assert_eq!(out.len(), 12);
    assert_eq!(&out[..5], pattern(5).as_slice());
    assert_eq!(&out[5..], pattern(7).as_slice());
    drop(concat);

    assert_eq!(begins.into_inner(), vec![0, 1, 2]);
    assert_eq!(ends.into_inner(), vec![0, 1, 2]);
}

#[test]
fn test_concat_hooks_bracket_each_file() {
    let env = TestEnv::new("concat_files").unwrap();
    let contents = [pattern(100), pattern(0), pattern(4097)];
    let sources: Vec<_> = contents
        .iter()
        .enumerate()
        .map(|(i, data)| {
            let path = env.write_file(&format!("f{}.bin", i), data).unwrap();
            TapSource::new(FileSource::open(path).unwrap(), Crc32::default())
        })
        .collect();

    let log = RefCell::new(Vec::new());
    let mut concat = ConcatSource::new(sources)
        .on_begin(|i| log.borrow_mut().push(format!("begin {}", i)))
        .on_end(|i| log.borrow_mut().push(format!("end {}", i)));
    let out = read_to_end(&mut concat, 1000).unwrap();
    assert_eq!(out.len(), 4197);

    let taps = concat.into_sources();
    for (tap, data) in taps.iter().zip(contents.iter()) {
        assert_eq!(tap.observer().get(), Crc32::compute(data));
    }
    assert_eq!(
        log.into_inner(),
        vec!["begin 0", "end 0", "begin 1", "end 1", "begin 2", "end 2"]
    );
}

#[test]
fn test_deferred_open_through_init_hook() {
    let env = TestEnv::new("deferred").unwrap();
    let paths: Vec<_> = (0..4).map(|i| env.file(&format!("late{}.bin", i))).collect();
    let opened = RefCell::new(0usize);
    let sources: Vec<_> = paths
        .iter()
        .map(|p| {
            InitHookSource::new(FileSource::deferred(p), |s: &mut FileSource| {
                *opened.borrow_mut() += 1;
                s.open_file()
            })
        })
        .collect();

    // Files appear only after the sources were built.
    for (i, path) in paths.iter().enumerate() {
        std::fs::write(path, vec![i as u8; 10]).unwrap();
    }
    let mut concat = ConcatSource::new(sources);
    let out = read_to_end(&mut concat, 4).unwrap();
    drop(concat);
    assert_eq!(out.len(), 40);
    assert_eq!(*opened.borrow(), 4);
}

#[test]
fn test_split_into_file_volumes_reassembles() {
    let env = TestEnv::new("split").unwrap();
    let data = pattern(10_000);
    let dir = env.tempdir().to_path_buf();
    let policy = FixedSizePolicy::new(vec![4096, 4096, 4096], |i| {
        FileSink::create(dir.join(format!("part{}", i)))
    });
    let mut split = SplitSink::new(policy);

    let mut rest = data.as_slice();
    while !rest.is_empty() {
        match split.write(&rest[..rest.len().min(1500)]).unwrap() {
            Transfer::Bytes(n) => rest = &rest[n..],
            Transfer::EndOfStream => panic!("ran out of volumes"),
        }
    }
    assert_eq!(split.close().unwrap(), Transfer::EndOfStream);
    assert_eq!(split.sinks().len(), 3);

    let parts: Vec<_> = (0..3)
        .map(|i| FileSource::open(env.file(&format!("part{}", i))).unwrap())
        .collect();
    let sizes: Vec<_> = parts.iter().map(|p| p.size()).collect();
    assert_eq!(sizes, vec![4096, 4096, 1808]);
    let mut concat = ConcatSource::new(parts);
    assert_eq!(read_to_end(&mut concat, 777).unwrap(), data);
}

#[test]
fn test_split_behind_pipe_with_slow_volumes() {
    let data = pattern(900);
    let policy = FixedSizePolicy::new(vec![300, 300, 300], |_| {
        Ok(ThrottledSink::unlimited().with_max_write(64).with_close_delay(1))
    });
    let mut pipe = Pipe::new(Buffer::from_slice(&data), SplitSink::new(policy), 128).unwrap();
    pipe.process().unwrap();

    let (_, split) = pipe.into_parts();
    let volumes = split.into_sinks();
    assert_eq!(volumes.len(), 3);
    let joined: Vec<u8> = volumes.iter().flat_map(|v| v.data().iter().copied()).collect();
    assert_eq!(joined, data);
    assert!(volumes.iter().all(|v| v.eos_acks() == 1));
}

#[test]
fn test_slices_read_same_file_independently() {
    let env = TestEnv::new("slices").unwrap();
    let data = pattern(1000);
    let path = env.write_file("shared.bin", &data).unwrap();
    let shared = Rc::new(RefCell::new(FileSource::open(path).unwrap()));

    let mut head = SourceSlice::new(Rc::clone(&shared));
    let mut tail = SourceSlice::new(Rc::clone(&shared));
    tail.seek(500).unwrap();

    let mut a = [0u8; 100];
    let mut b = [0u8; 100];
    assert_eq!(head.read(&mut a).unwrap(), Transfer::Bytes(100));
    assert_eq!(tail.read(&mut b).unwrap(), Transfer::Bytes(100));
    assert_eq!(&a[..], &data[..100]);
    assert_eq!(&b[..], &data[500..600]);
    assert_eq!(shared.borrow().tell(), 0);

    let rest = read_to_end(&mut tail, 64).unwrap();
    assert_eq!(rest, &data[600..]);
    assert_eq!(head.tell(), 100);
}
