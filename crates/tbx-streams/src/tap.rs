//! Pass-through adapters that show every transferred byte to an observer.

use crate::digest::Digest;
use crate::error::StreamResult;
use crate::stream::{Sink, Source, Transfer};

/// Receives the bytes flowing through a tap, in order.
pub trait Observer {
    /// Called with each run of transferred bytes.
    fn observe(&mut self, data: &[u8]);
}

impl<D: Digest> Observer for D {
    fn observe(&mut self, data: &[u8]) {
        self.update(data);
    }
}

/// Adapts a closure into an [`Observer`].
pub struct FnObserver<F>(pub F);

impl<F: FnMut(&[u8])> Observer for FnObserver<F> {
    fn observe(&mut self, data: &[u8]) {
        (self.0)(data)
    }
}

/// Source that forwards reads and observes what was read.
pub struct TapSource<S, O> {
    source: S,
    observer: O,
    total: u64,
}

impl<S: Source, O: Observer> TapSource<S, O> {
    /// Wraps `source`.
    pub fn new(source: S, observer: O) -> Self {
        Self {
            source,
            observer,
            total: 0,
        }
    }

    /// The observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// The observer, mutably.
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Bytes observed so far.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Splits into the source and the observer.
    pub fn into_parts(self) -> (S, O) {
        (self.source, self.observer)
    }
}

impl<S: Source, O: Observer> Source for TapSource<S, O> {
    fn read(&mut self, dest: &mut [u8]) -> StreamResult<Transfer> {
        let transfer = self.source.read(dest)?;
        if let Transfer::Bytes(n) = transfer {
            if n > 0 {
                self.observer.observe(&dest[..n]);
                self.total += n as u64;
            }
        }
        Ok(transfer)
    }
}

/// Sink that forwards writes and observes what was accepted.
pub struct TapSink<K, O> {
    sink: K,
    observer: O,
    total: u64,
}

impl<K: Sink, O: Observer> TapSink<K, O> {
    /// Wraps `sink`.
    pub fn new(sink: K, observer: O) -> Self {
        Self {
            sink,
            observer,
            total: 0,
        }
    }

    /// The observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// The observer, mutably.
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Bytes observed so far.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Splits into the sink and the observer.
    pub fn into_parts(self) -> (K, O) {
        (self.sink, self.observer)
    }
}

impl<K: Sink, O: Observer> Sink for TapSink<K, O> {
    fn write(&mut self, src: &[u8]) -> StreamResult<Transfer> {
        let transfer = self.sink.write(src)?;
        if let Transfer::Bytes(n) = transfer {
            if n > 0 {
                // Only the accepted prefix counts; the rest will be offered again.
                self.observer.observe(&src[..n]);
                self.total += n as u64;
            }
        }
        Ok(transfer)
    }

    fn close(&mut self) -> StreamResult<Transfer> {
        self.sink.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::digest::Crc32;
    use crate::stream::read_to_end;

    /// Accepts at most two bytes per call.
    struct Narrow(Vec<u8>);

    impl Sink for Narrow {
        fn write(&mut self, src: &[u8]) -> StreamResult<Transfer> {
            let n = src.len().min(2);
            self.0.extend_from_slice(&src[..n]);
            Ok(Transfer::Bytes(n))
        }

        fn close(&mut self) -> StreamResult<Transfer> {
            Ok(Transfer::EndOfStream)
        }
    }

    #[test]
    fn test_tap_source_checksums_stream() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let mut tap = TapSource::new(Buffer::from_slice(data), Crc32::default());
        let out = read_to_end(&mut tap, 5).unwrap();
        assert_eq!(out, data);
        assert_eq!(tap.total(), data.len() as u64);
        assert_eq!(tap.observer().get(), 0x414F_A339);
    }

    #[test]
    fn test_tap_sink_observes_only_accepted_bytes() {
        let mut seen = Vec::new();
        {
            let mut tap = TapSink::new(Narrow(Vec::new()), FnObserver(|d: &[u8]| seen.extend_from_slice(d)));
            assert_eq!(tap.write(b"abcde").unwrap(), Transfer::Bytes(2));
            assert_eq!(tap.write(b"cde").unwrap(), Transfer::Bytes(2));
            assert_eq!(tap.write(b"e").unwrap(), Transfer::Bytes(1));
            assert_eq!(tap.total(), 5);
            assert_eq!(tap.close().unwrap(), Transfer::EndOfStream);
            let (sink, _) = tap.into_parts();
            assert_eq!(sink.0, b"abcde");
        }
        assert_eq!(seen, b"abcde");
    }

    #[test]
    fn test_eos_is_not_observed() {
        let mut calls = 0;
        let mut tap = TapSource::new(Buffer::new(), FnObserver(|_: &[u8]| calls += 1));
        let mut buf = [0u8; 4];
        assert_eq!(tap.read(&mut buf).unwrap(), Transfer::EndOfStream);
        drop(tap);
        assert_eq!(calls, 0);
    }
}
