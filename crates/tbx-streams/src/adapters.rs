//! Small sources and sinks used to wire pipelines together.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use crate::error::{StreamError, StreamResult};
use crate::stream::{Seekable, Sink, Source, Transfer};

/// Discards everything written to it, optionally up to a byte quota.
#[derive(Debug, Default, Clone)]
pub struct NullSink {
    quota: Option<u64>,
    accepted: u64,
    closed: bool,
}

impl NullSink {
    /// Accepts without limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `quota` bytes, then reports end-of-stream.
    pub fn with_quota(quota: u64) -> Self {
        Self {
            quota: Some(quota),
            accepted: 0,
            closed: false,
        }
    }

    /// Bytes accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }
}

impl Sink for NullSink {
    fn write(&mut self, src: &[u8]) -> StreamResult<Transfer> {
        if self.closed {
            return Err(StreamError::SinkClosed { pending: src.len() });
        }
        if src.is_empty() {
            return Ok(Transfer::WOULD_BLOCK);
        }
        let n = match self.quota {
            None => src.len(),
            Some(quota) => {
                let left = quota - self.accepted;
                if left == 0 {
                    trace!(quota, "null sink quota exhausted");
                    return Ok(Transfer::EndOfStream);
                }
                src.len().min(usize::try_from(left).unwrap_or(usize::MAX))
            }
        };
        self.accepted += n as u64;
        Ok(Transfer::Bytes(n))
    }

    fn close(&mut self) -> StreamResult<Transfer> {
        self.closed = true;
        Ok(Transfer::EndOfStream)
    }
}

/// Independent cursor over a seekable source shared with other slices.
///
/// Each read seeks the shared source to this slice's position and restores
/// the source's own position afterwards.
pub struct SourceSlice<S> {
    source: Rc<RefCell<S>>,
    position: u64,
}

impl<S: Source + Seekable> SourceSlice<S> {
    /// Creates a slice positioned at 0.
    pub fn new(source: Rc<RefCell<S>>) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    /// The shared source.
    pub fn shared(&self) -> &Rc<RefCell<S>> {
        &self.source
    }
}

impl<S: Source + Seekable> Source for SourceSlice<S> {
    fn read(&mut self, dest: &mut [u8]) -> StreamResult<Transfer> {
        let mut source = self.source.borrow_mut();
        let mark = source.tell();
        source.seek(self.position)?;
        let transfer = source.read(dest);
        source.seek(mark)?;
        let transfer = transfer?;
        if let Transfer::Bytes(n) = transfer {
            self.position += n as u64;
        }
        Ok(transfer)
    }
}

impl<S: Source + Seekable> Seekable for SourceSlice<S> {
    fn seek(&mut self, offset: u64) -> StreamResult<()> {
        self.position = offset;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.source.borrow().size()
    }
}

/// Runs a one-shot hook right before the first read of the wrapped source.
///
/// Typical use is opening a deferred file at the moment a concatenation
/// reaches it.
pub struct InitHookSource<S, F> {
    source: S,
    hook: Option<F>,
}

impl<S, F> InitHookSource<S, F>
where
    S: Source,
    F: FnOnce(&mut S) -> StreamResult<()>,
{
    /// Wraps `source`; `hook` receives it before the first read.
    pub fn new(source: S, hook: F) -> Self {
        Self {
            source,
            hook: Some(hook),
        }
    }

    /// True once the hook has run.
    pub fn has_run(&self) -> bool {
        self.hook.is_none()
    }

    /// The wrapped source.
    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S, F> Source for InitHookSource<S, F>
where
    S: Source,
    F: FnOnce(&mut S) -> StreamResult<()>,
{
    fn read(&mut self, dest: &mut [u8]) -> StreamResult<Transfer> {
        if let Some(hook) = self.hook.take() {
            hook(&mut self.source)?;
        }
        self.source.read(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::concat::ConcatSource;
    use crate::error::StreamError;
    use crate::file::FileSource;
    use crate::stream::read_to_end;

    #[test]
    fn test_null_sink_unlimited() {
        let mut sink = NullSink::new();
        assert_eq!(sink.write(&[0u8; 1000]).unwrap(), Transfer::Bytes(1000));
        assert_eq!(sink.accepted(), 1000);
        assert_eq!(sink.close().unwrap(), Transfer::EndOfStream);
    }

    #[test]
    fn test_write_after_close_refused() {
        let mut sink = NullSink::new();
        assert_eq!(sink.write(b"abc").unwrap(), Transfer::Bytes(3));
        assert_eq!(sink.close().unwrap(), Transfer::EndOfStream);
        assert!(matches!(
            sink.write(b"def"),
            Err(StreamError::SinkClosed { pending: 3 })
        ));
        assert_eq!(sink.accepted(), 3);
    }

    #[test]
    fn test_null_sink_quota() {
        let mut sink = NullSink::with_quota(5);
        assert_eq!(sink.write(b"abc").unwrap(), Transfer::Bytes(3));
        assert_eq!(sink.write(b"def").unwrap(), Transfer::Bytes(2));
        assert_eq!(sink.write(b"f").unwrap(), Transfer::EndOfStream);
        assert_eq!(sink.write(b"").unwrap(), Transfer::WOULD_BLOCK);
    }

    #[test]
    fn test_slices_keep_independent_positions() {
        let shared = Rc::new(RefCell::new(Buffer::from_slice(b"0123456789")));
        let mut a = SourceSlice::new(Rc::clone(&shared));
        let mut b = SourceSlice::new(Rc::clone(&shared));
        b.seek(5).unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(a.read(&mut buf).unwrap(), Transfer::Bytes(3));
        assert_eq!(&buf, b"012");
        assert_eq!(b.read(&mut buf).unwrap(), Transfer::Bytes(3));
        assert_eq!(&buf, b"567");
        assert_eq!(a.read(&mut buf).unwrap(), Transfer::Bytes(3));
        assert_eq!(&buf, b"345");

        assert_eq!(shared.borrow().tell(), 0);
        assert_eq!(a.tell(), 6);
        assert_eq!(b.size(), 10);
    }

    #[test]
    fn test_init_hook_runs_once() {
        let mut calls = 0;
        {
            let mut src = InitHookSource::new(Buffer::from_slice(b"abc"), |_: &mut Buffer| {
                calls += 1;
                Ok(())
            });
            assert!(!src.has_run());
            assert_eq!(read_to_end(&mut src, 1).unwrap(), b"abc");
            assert!(src.has_run());
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_init_hook_error_propagates() {
        let mut src = InitHookSource::new(Buffer::new(), |_: &mut Buffer| {
            Err(StreamError::Aborted("hook".to_string()))
        });
        let mut buf = [0u8; 1];
        assert!(matches!(src.read(&mut buf), Err(StreamError::Aborted(_))));
    }

    #[test]
    fn test_deferred_files_opened_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<_> = (0..3).map(|i| dir.path().join(format!("part{}.bin", i))).collect();
        for (i, path) in paths.iter().enumerate() {
            std::fs::write(path, vec![b'a' + i as u8; 3]).unwrap();
        }
        let sources: Vec<_> = paths
            .iter()
            .map(|p| InitHookSource::new(FileSource::deferred(p), |s: &mut FileSource| s.open_file()))
            .collect();
        let mut concat = ConcatSource::new(sources);
        assert_eq!(read_to_end(&mut concat, 2).unwrap(), b"aaabbbccc");
    }
}
