//! Pull-driven filter adapter: a [`Filter`] exposed as a [`Source`].

use tracing::trace;

use crate::error::StreamResult;
use crate::filter::{Filter, FilterConfig, FilterStage, FilterState};
use crate::stream::{Source, Transfer};

/// Reads from an upstream source through a filter.
///
/// Each `read` performs one fetch, at most one `process` call and one dump,
/// in that order. A zero count means "try again"; end-of-stream is reported
/// only once the filter has ended, finished and both buffers are empty.
pub struct FilterSource<S, F> {
    source: S,
    stage: FilterStage<F>,
}

impl<S: Source, F: Filter> FilterSource<S, F> {
    /// Wraps `source` with `filter`, sizing buffers from `config`.
    pub fn new(source: S, filter: F, config: &FilterConfig) -> StreamResult<Self> {
        Ok(Self {
            source,
            stage: FilterStage::new(filter, config)?,
        })
    }

    /// Wraps `source` with default-sized buffers.
    pub fn with_defaults(source: S, filter: F) -> StreamResult<Self> {
        Self::new(source, filter, &FilterConfig::default())
    }

    /// The filter stage.
    pub fn stage(&self) -> &FilterStage<F> {
        &self.stage
    }

    /// The filter stage, mutably (for resizing).
    pub fn stage_mut(&mut self) -> &mut FilterStage<F> {
        &mut self.stage
    }

    /// The wrapped filter.
    pub fn filter(&self) -> &F {
        self.stage.filter()
    }

    /// Lifecycle state of the filter.
    pub fn state(&self) -> FilterState {
        self.stage.state()
    }

    /// Replaces the upstream source.
    pub fn set_source(&mut self, source: S) {
        self.source = source;
    }

    /// Splits into the upstream source and the filter.
    pub fn into_parts(self) -> (S, F) {
        (self.source, self.stage.into_filter())
    }

    fn fetch_input(&mut self) -> StreamResult<()> {
        let state = self.stage.state();
        if state.is_ended() {
            return Ok(());
        }
        if state.is_finished() {
            // Keep draining upstream so it can reach end-of-stream.
            self.stage.discard_input();
        }
        let input = &mut self.stage.input;
        if input.is_full() {
            return Ok(());
        }
        match self.source.read(input.tail_mut())? {
            Transfer::Bytes(n) => {
                input.advance(n);
                trace!(filter = self.stage.filter().name(), amount = n, "filter source fetch");
            }
            Transfer::EndOfStream => {
                trace!(filter = self.stage.filter().name(), "filter source fetch EOS");
                self.stage.mark_ended();
            }
        }
        Ok(())
    }

    fn dump_output(&mut self, dest: &mut [u8]) -> usize {
        let output = &mut self.stage.output;
        let n = output.used().min(dest.len());
        if n > 0 {
            dest[..n].copy_from_slice(&output.head()[..n]);
            output.consume(n);
            trace!(filter = self.stage.filter().name(), amount = n, requested = dest.len(), "filter source dump");
        }
        n
    }
}

impl<S: Source, F: Filter> Source for FilterSource<S, F> {
    fn read(&mut self, dest: &mut [u8]) -> StreamResult<Transfer> {
        self.stage.start()?;
        self.fetch_input()?;

        if self.stage.can_process() {
            self.stage.process()?;
        }

        let n = self.dump_output(dest);

        if self.stage.state() == FilterState::Complete {
            self.stage.discard_input();
            self.stage.finalize()?;
        }

        let state = self.stage.state();
        if n == 0 && state.is_ended() && state.is_finished() && self.stage.is_drained() {
            Ok(Transfer::EndOfStream)
        } else {
            Ok(Transfer::Bytes(n))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::error::StreamError;
    use crate::filter::{FilterIo, IdentityFilter};
    use crate::stream::read_to_end;

    /// Emits each input byte twice and counts lifecycle calls.
    #[derive(Default)]
    struct Doubler {
        inits: usize,
        finalizes: usize,
    }

    impl Filter for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn init(&mut self) -> StreamResult<()> {
            self.inits += 1;
            Ok(())
        }

        fn process(&mut self, io: &mut FilterIo<'_>) -> StreamResult<()> {
            let ended = io.is_input_ended();
            let (input, output) = io.buffers();
            let n = input.used().min(output.available() / 2);
            for i in 0..n {
                let b = input.head()[i];
                output.tail_mut()[..2].copy_from_slice(&[b, b]);
                output.advance(2);
            }
            input.consume(n);
            if ended && input.is_empty() {
                io.finish();
            }
            Ok(())
        }

        fn finalize(&mut self) -> StreamResult<()> {
            self.finalizes += 1;
            Ok(())
        }
    }

    /// Takes only the first `limit` bytes, then declares itself finished.
    struct Head {
        limit: usize,
    }

    impl Filter for Head {
        fn name(&self) -> &str {
            "head"
        }

        fn process(&mut self, io: &mut FilterIo<'_>) -> StreamResult<()> {
            let (input, output) = io.buffers();
            let n = input.used().min(output.available()).min(self.limit);
            output.tail_mut()[..n].copy_from_slice(&input.head()[..n]);
            output.advance(n);
            input.consume(n);
            self.limit -= n;
            if self.limit == 0 {
                io.finish();
            }
            Ok(())
        }
    }

    struct Failing;

    impl Filter for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn process(&mut self, _io: &mut FilterIo<'_>) -> StreamResult<()> {
            Err(StreamError::Aborted("transform failed".to_string()))
        }
    }

    #[test]
    fn test_identity_passthrough() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let upstream = Buffer::from_slice(&data);
        let mut src = FilterSource::new(upstream, IdentityFilter, &FilterConfig::symmetric(64)).unwrap();
        assert_eq!(read_to_end(&mut src, 100).unwrap(), data);
        assert_eq!(src.state(), FilterState::Finalized);
    }

    #[test]
    fn test_eos_is_sticky() {
        let mut src = FilterSource::new(Buffer::from_slice(b"ab"), IdentityFilter, &FilterConfig::symmetric(4)).unwrap();
        let mut out = [0u8; 8];
        let mut collected = Vec::new();
        loop {
            match src.read(&mut out).unwrap() {
                Transfer::Bytes(n) => collected.extend_from_slice(&out[..n]),
                Transfer::EndOfStream => break,
            }
        }
        assert_eq!(collected, b"ab");
        assert_eq!(src.read(&mut out).unwrap(), Transfer::EndOfStream);
        assert_eq!(src.read(&mut out).unwrap(), Transfer::EndOfStream);
    }

    #[test]
    fn test_init_and_finalize_exactly_once() {
        let mut src = FilterSource::new(
            Buffer::from_slice(b"hello"),
            Doubler::default(),
            &FilterConfig::symmetric(4),
        )
        .unwrap();
        let out = read_to_end(&mut src, 3).unwrap();
        assert_eq!(out, b"hheelllloo");
        for _ in 0..5 {
            let mut buf = [0u8; 4];
            assert_eq!(src.read(&mut buf).unwrap(), Transfer::EndOfStream);
        }
        assert_eq!(src.filter().inits, 1);
        assert_eq!(src.filter().finalizes, 1);
    }

    #[test]
    fn test_narrow_output_buffer() {
        // Output is only 2 bytes wide; the first read fetches and processes.
        let config = FilterConfig {
            input_capacity: 8,
            output_capacity: 2,
        };
        let mut src = FilterSource::new(Buffer::from_slice(b"xyz"), IdentityFilter, &config).unwrap();
        let mut out = [0u8; 1];
        assert_eq!(src.read(&mut out).unwrap(), Transfer::Bytes(1));
        assert_eq!(out[0], b'x');
        assert_eq!(src.stage().output().head(), b"y");
    }

    #[test]
    fn test_early_finish_discards_rest() {
        let data = vec![9u8; 100];
        let mut src = FilterSource::new(
            Buffer::from_slice(&data),
            Head { limit: 10 },
            &FilterConfig::symmetric(16),
        )
        .unwrap();
        let out = read_to_end(&mut src, 7).unwrap();
        assert_eq!(out, vec![9u8; 10]);
        assert_eq!(src.state(), FilterState::Finalized);
        let (upstream, _) = src.into_parts();
        assert!(upstream.is_at_end());
    }

    #[test]
    fn test_process_error_propagates() {
        let mut src = FilterSource::with_defaults(Buffer::from_slice(b"a"), Failing).unwrap();
        let mut out = [0u8; 4];
        assert!(matches!(src.read(&mut out), Err(StreamError::Aborted(_))));
    }
}
