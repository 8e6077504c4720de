//! Sink that spreads its input across a series of sinks chosen by a policy.

use tracing::debug;

use crate::error::{StreamError, StreamResult};
use crate::stream::{Sink, Transfer};

/// Decides how much the current sink may take and builds the next one.
pub trait SplitPolicy {
    /// Sink type produced.
    type Sink: Sink;

    /// Bytes out of `requested` the current sink may still accept.
    /// [`Transfer::EndOfStream`] forces a rotation to a new sink.
    fn available_to_write(&mut self, requested: usize) -> Transfer;

    /// Records bytes the current sink actually accepted.
    fn commit(&mut self, written: usize);

    /// Builds the next sink; `None` when the series is exhausted.
    fn next_sink(&mut self) -> StreamResult<Option<Self::Sink>>;
}

/// Rotates through sinks of fixed byte sizes, one per listed size.
pub struct FixedSizePolicy<K, F> {
    sizes: Vec<u64>,
    built: usize,
    remaining: u64,
    factory: F,
    _sink: std::marker::PhantomData<fn() -> K>,
}

impl<K, F> FixedSizePolicy<K, F>
where
    K: Sink,
    F: FnMut(usize) -> StreamResult<K>,
{
    /// `factory` receives the volume index and builds its sink.
    pub fn new(sizes: Vec<u64>, factory: F) -> Self {
        Self {
            sizes,
            built: 0,
            remaining: 0,
            factory,
            _sink: std::marker::PhantomData,
        }
    }

    /// Volumes built so far.
    pub fn volumes_built(&self) -> usize {
        self.built
    }
}

impl<K, F> SplitPolicy for FixedSizePolicy<K, F>
where
    K: Sink,
    F: FnMut(usize) -> StreamResult<K>,
{
    type Sink = K;

    fn available_to_write(&mut self, requested: usize) -> Transfer {
        if self.remaining == 0 {
            Transfer::EndOfStream
        } else {
            Transfer::Bytes(requested.min(usize::try_from(self.remaining).unwrap_or(usize::MAX)))
        }
    }

    fn commit(&mut self, written: usize) {
        self.remaining = self.remaining.saturating_sub(written as u64);
    }

    fn next_sink(&mut self) -> StreamResult<Option<K>> {
        let Some(&size) = self.sizes.get(self.built) else {
            return Ok(None);
        };
        let sink = (self.factory)(self.built)?;
        self.built += 1;
        self.remaining = size;
        Ok(Some(sink))
    }
}

/// Sink distributing writes across policy-built sinks.
///
/// Rotation is transparent to the writer. When the policy has no further
/// sinks, writes report end-of-stream. `close` closes every sink and reports
/// end-of-stream once all of them have acknowledged.
pub struct SplitSink<P: SplitPolicy> {
    policy: P,
    sinks: Vec<P::Sink>,
    acked: Vec<bool>,
    current: Option<usize>,
    closing: bool,
}

impl<P: SplitPolicy> SplitSink<P> {
    /// Creates the sink; the first downstream sink is built on first write.
    pub fn new(policy: P) -> Self {
        Self {
            policy,
            sinks: Vec::new(),
            acked: Vec::new(),
            current: None,
            closing: false,
        }
    }

    /// The policy.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// All sinks built so far, in order.
    pub fn sinks(&self) -> &[P::Sink] {
        &self.sinks
    }

    /// Consumes the splitter, returning its sinks.
    pub fn into_sinks(self) -> Vec<P::Sink> {
        self.sinks
    }

    fn close_one(&mut self, index: usize) -> StreamResult<bool> {
        if !self.acked[index] {
            if let Transfer::EndOfStream = self.sinks[index].close()? {
                self.acked[index] = true;
            }
        }
        Ok(self.acked[index])
    }

    fn rotate(&mut self) -> StreamResult<()> {
        if let Some(index) = self.current.take() {
            let acked = self.close_one(index)?;
            debug!(volume = index, acked, "split sink retired");
        }
        Ok(())
    }
}

impl<P: SplitPolicy> Sink for SplitSink<P> {
    fn write(&mut self, src: &[u8]) -> StreamResult<Transfer> {
        if self.closing {
            return Err(StreamError::SinkClosed { pending: src.len() });
        }
        loop {
            let index = match self.current {
                Some(index) => index,
                None => match self.policy.next_sink()? {
                    Some(sink) => {
                        self.sinks.push(sink);
                        self.acked.push(false);
                        let index = self.sinks.len() - 1;
                        debug!(volume = index, "split sink opened");
                        self.current = Some(index);
                        index
                    }
                    None => return Ok(Transfer::EndOfStream),
                },
            };
            let allowed = match self.policy.available_to_write(src.len()) {
                Transfer::EndOfStream => {
                    self.rotate()?;
                    continue;
                }
                Transfer::Bytes(n) => n.min(src.len()),
            };
            return match self.sinks[index].write(&src[..allowed])? {
                Transfer::Bytes(n) => {
                    self.policy.commit(n);
                    Ok(Transfer::Bytes(n))
                }
                Transfer::EndOfStream => Err(StreamError::SinkClosed { pending: allowed }),
            };
        }
    }

    fn close(&mut self) -> StreamResult<Transfer> {
        self.closing = true;
        self.current = None;
        let mut all_acked = true;
        for index in 0..self.sinks.len() {
            all_acked &= self.close_one(index)?;
        }
        if all_acked {
            Ok(Transfer::EndOfStream)
        } else {
            Ok(Transfer::WOULD_BLOCK)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;

    fn volumes(sizes: Vec<u64>) -> SplitSink<FixedSizePolicy<Buffer, impl FnMut(usize) -> StreamResult<Buffer>>> {
        SplitSink::new(FixedSizePolicy::new(sizes, |_| Ok(Buffer::new())))
    }

    /// Needs one retry before acknowledging close.
    #[derive(Default)]
    struct Lazy {
        data: Vec<u8>,
        polls: usize,
    }

    impl Sink for Lazy {
        fn write(&mut self, src: &[u8]) -> StreamResult<Transfer> {
            self.data.extend_from_slice(src);
            Ok(Transfer::Bytes(src.len()))
        }

        fn close(&mut self) -> StreamResult<Transfer> {
            self.polls += 1;
            if self.polls > 1 {
                Ok(Transfer::EndOfStream)
            } else {
                Ok(Transfer::WOULD_BLOCK)
            }
        }
    }

    #[test]
    fn test_rotates_at_volume_boundary() {
        let mut split = volumes(vec![4, 4, 4]);
        assert_eq!(split.write(b"abcdef").unwrap(), Transfer::Bytes(4));
        assert_eq!(split.write(b"ef").unwrap(), Transfer::Bytes(2));
        assert_eq!(split.write(b"ghij").unwrap(), Transfer::Bytes(2));
        assert_eq!(split.write(b"ij").unwrap(), Transfer::Bytes(2));
        assert_eq!(split.close().unwrap(), Transfer::EndOfStream);

        let sinks = split.into_sinks();
        assert_eq!(sinks.len(), 3);
        assert_eq!(sinks[0].as_slice(), b"abcd");
        assert_eq!(sinks[1].as_slice(), b"efgh");
        assert_eq!(sinks[2].as_slice(), b"ij");
    }

    #[test]
    fn test_exhausted_policy_reports_eos() {
        let mut split = volumes(vec![3]);
        assert_eq!(split.write(b"abc").unwrap(), Transfer::Bytes(3));
        assert_eq!(split.write(b"d").unwrap(), Transfer::EndOfStream);
        assert_eq!(split.policy().volumes_built(), 1);
    }

    #[test]
    fn test_factory_sees_volume_index() {
        let mut seen = Vec::new();
        {
            let policy = FixedSizePolicy::new(vec![1, 1], |i| {
                seen.push(i);
                Ok(Buffer::new())
            });
            let mut split = SplitSink::new(policy);
            assert_eq!(split.write(b"xy").unwrap(), Transfer::Bytes(1));
            assert_eq!(split.write(b"y").unwrap(), Transfer::Bytes(1));
        }
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn test_factory_error_propagates() {
        let policy = FixedSizePolicy::new(vec![8], |_| -> StreamResult<Buffer> {
            Err(StreamError::Aborted("no volume".to_string()))
        });
        let mut split = SplitSink::new(policy);
        assert!(matches!(split.write(b"a"), Err(StreamError::Aborted(_))));
    }

    #[test]
    fn test_close_waits_for_every_volume() {
        let policy = FixedSizePolicy::new(vec![2, 2], |_| Ok(Lazy::default()));
        let mut split = SplitSink::new(policy);
        assert_eq!(split.write(b"ab").unwrap(), Transfer::Bytes(2));
        // Rotation closes the first volume once; it asks for a retry.
        assert_eq!(split.write(b"cd").unwrap(), Transfer::Bytes(2));
        assert_eq!(split.sinks()[0].polls, 1);

        // The first volume acknowledges now, the second still needs a retry.
        assert_eq!(split.close().unwrap(), Transfer::WOULD_BLOCK);
        assert_eq!(split.close().unwrap(), Transfer::EndOfStream);
        assert!(split.sinks().iter().all(|s| s.polls == 2));
        assert!(matches!(
            split.write(b"e"),
            Err(StreamError::SinkClosed { pending: 1 })
        ));
    }

    #[test]
    fn test_close_reports_pending_ack() {
        let policy = FixedSizePolicy::new(vec![8], |_| Ok(Lazy::default()));
        let mut split = SplitSink::new(policy);
        split.write(b"abc").unwrap();
        assert_eq!(split.close().unwrap(), Transfer::WOULD_BLOCK);
        assert_eq!(split.close().unwrap(), Transfer::EndOfStream);
        assert_eq!(split.close().unwrap(), Transfer::EndOfStream);
        assert_eq!(split.sinks()[0].polls, 2);
    }
}
