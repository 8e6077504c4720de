//! Push-driven filter adapter: a [`Filter`] exposed as a [`Sink`].

use tracing::trace;

use crate::error::{StreamError, StreamResult};
use crate::filter::{Filter, FilterConfig, FilterStage, FilterState};
use crate::stream::{Sink, Transfer};

/// Writes through a filter into a downstream sink.
///
/// `write` accepts as much as fits in the input buffer, running the filter
/// and draining its output downstream for as long as that makes progress.
/// `close` ends the input and keeps flushing; it reports end-of-stream only
/// after the downstream sink has acknowledged its own close, at which point
/// the filter is finalized.
pub struct FilterSink<K, F> {
    sink: K,
    stage: FilterStage<F>,
}

impl<K: Sink, F: Filter> FilterSink<K, F> {
    /// Wraps `sink` with `filter`, sizing buffers from `config`.
    pub fn new(sink: K, filter: F, config: &FilterConfig) -> StreamResult<Self> {
        Ok(Self {
            sink,
            stage: FilterStage::new(filter, config)?,
        })
    }

    /// Wraps `sink` with default-sized buffers.
    pub fn with_defaults(sink: K, filter: F) -> StreamResult<Self> {
        Self::new(sink, filter, &FilterConfig::default())
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

    /// The downstream sink.
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// The downstream sink, mutably.
    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    /// Splits into the downstream sink and the filter.
    pub fn into_parts(self) -> (K, F) {
        (self.sink, self.stage.into_filter())
    }

    /// Pushes buffered output downstream; returns the bytes accepted.
    fn drain(&mut self) -> StreamResult<usize> {
        let output = &mut self.stage.output;
        if output.is_empty() {
            return Ok(0);
        }
        match self.sink.write(output.head())? {
            Transfer::Bytes(n) => {
                output.consume(n);
                trace!(filter = self.stage.filter().name(), amount = n, "filter sink drain");
                Ok(n)
            }
            Transfer::EndOfStream => Err(StreamError::SinkClosed {
                pending: output.used(),
            }),
        }
    }

    /// Alternates process and drain until neither moves anything.
    fn pump(&mut self) -> StreamResult<()> {
        loop {
            let mut progress = false;
            if self.stage.can_process() {
                let before = (
                    self.stage.input.used(),
                    self.stage.output.used(),
                    self.stage.state(),
                );
                self.stage.process()?;
                let after = (
                    self.stage.input.used(),
                    self.stage.output.used(),
                    self.stage.state(),
                );
                progress = before != after;
            }
            if self.drain()? > 0 {
                progress = true;
            }
            if !progress {
                return Ok(());
            }
        }
    }
}

impl<K: Sink, F: Filter> Sink for FilterSink<K, F> {
    fn write(&mut self, src: &[u8]) -> StreamResult<Transfer> {
        let state = self.stage.state();
        if state == FilterState::Finalized {
            return Err(StreamError::SinkClosed { pending: src.len() });
        }
        if state.is_ended() {
            return Err(StreamError::FilterMisuse {
                name: self.stage.filter().name().to_string(),
                reason: "write after close",
            });
        }
        self.stage.start()?;
        self.pump()?;

        if self.stage.state().is_finished() {
            trace!(filter = self.stage.filter().name(), amount = src.len(), "filter finished, discarding write");
            return Ok(Transfer::Bytes(src.len()));
        }

        let input = &mut self.stage.input;
        let n = src.len().min(input.available());
        input.tail_mut()[..n].copy_from_slice(&src[..n]);
        input.advance(n);
        trace!(filter = self.stage.filter().name(), amount = n, requested = src.len(), "filter sink accept");

        self.pump()?;
        Ok(Transfer::Bytes(n))
    }

    fn close(&mut self) -> StreamResult<Transfer> {
        if self.stage.state() == FilterState::Finalized {
            return Ok(Transfer::EndOfStream);
        }
        self.stage.start()?;
        self.stage.mark_ended();
        self.pump()?;

        if !self.stage.state().is_finished() || !self.stage.output.is_empty() {
            return Ok(Transfer::WOULD_BLOCK);
        }
        match self.sink.close()? {
            Transfer::EndOfStream => {
                self.stage.discard_input();
                self.stage.finalize()?;
                Ok(Transfer::EndOfStream)
            }
            Transfer::Bytes(_) => Ok(Transfer::WOULD_BLOCK),
        }
    }
}
