//! Source-to-sink pump with an end-of-stream handshake.
//!
//! A [`Pipe`] owns one intermediate buffer. Input steps fill it from the
//! source, output steps drain it into the sink. Once the source is exhausted
//! and the buffer is empty the sink is closed, possibly over several steps if
//! it needs time to flush.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::buffer::Buffer;
use crate::error::{StreamError, StreamResult};
use crate::stream::{Sink, Source, Transfer};

/// Default intermediate buffer size: 16 KiB.
pub const DEFAULT_PIPE_BUFFER: usize = 16 * 1024;

/// Configuration for a [`Pipe`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeConfig {
    /// Intermediate buffer size in bytes (default 16 KiB).
    pub buffer_size: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_PIPE_BUFFER,
        }
    }
}

impl PipeConfig {
    fn validate(&self) -> StreamResult<()> {
        if self.buffer_size == 0 {
            return Err(StreamError::InvalidConfig {
                reason: "pipe buffer size must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Where a pipe is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipeState {
    /// Moving data.
    Opened,
    /// Source exhausted; the buffer may still hold data.
    EndOfInput,
    /// Sink told to close but has not acknowledged yet.
    NotifiedSink,
    /// Sink acknowledged. Terminal.
    Closed,
}

/// Counters for a pipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeStats {
    /// Bytes read from the source.
    pub bytes_in: u64,
    /// Bytes accepted by the sink.
    pub bytes_out: u64,
    /// Completed steps.
    pub steps: u64,
}

/// Drains a source into a sink through one buffer.
pub struct Pipe<S, K> {
    source: S,
    sink: K,
    buffer: Buffer,
    state: PipeState,
    stats: PipeStats,
}

impl<S: Source, K: Sink> Pipe<S, K> {
    /// Creates a pipe with a `buffer_size`-byte buffer.
    pub fn new(source: S, sink: K, buffer_size: usize) -> StreamResult<Self> {
        Self::with_config(source, sink, &PipeConfig { buffer_size })
    }

    /// Creates a pipe from a config.
    pub fn with_config(source: S, sink: K, config: &PipeConfig) -> StreamResult<Self> {
        config.validate()?;
        Ok(Self {
            source,
            sink,
            buffer: Buffer::try_with_capacity(config.buffer_size)?,
            state: PipeState::Opened,
            stats: PipeStats::default(),
        })
    }

    /// Current state.
    pub fn state(&self) -> PipeState {
        self.state
    }

    /// True once the sink has acknowledged end-of-stream.
    pub fn is_closed(&self) -> bool {
        self.state == PipeState::Closed
    }

    /// Transfer counters.
    pub fn stats(&self) -> &PipeStats {
        &self.stats
    }

    /// The intermediate buffer.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// The source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The sink.
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// The sink, mutably.
    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    /// Splits into source and sink.
    pub fn into_parts(self) -> (S, K) {
        (self.source, self.sink)
    }

    fn transition(&mut self, next: PipeState) {
        debug!(from = ?self.state, to = ?next, bytes_in = self.stats.bytes_in, bytes_out = self.stats.bytes_out, "pipe state change");
        self.state = next;
    }

    /// Reads from the source into free buffer space.
    pub fn step_input(&mut self) -> StreamResult<()> {
        if self.state != PipeState::Opened || self.buffer.is_full() {
            return Ok(());
        }
        match self.source.read(self.buffer.tail_mut())? {
            Transfer::Bytes(n) => {
                self.buffer.advance(n);
                self.stats.bytes_in += n as u64;
                trace!(amount = n, buffered = self.buffer.used(), "pipe input");
            }
            Transfer::EndOfStream => self.transition(PipeState::EndOfInput),
        }
        Ok(())
    }

    /// Drains buffered bytes and drives the close handshake.
    pub fn step_output(&mut self) -> StreamResult<()> {
        if !self.buffer.is_empty() {
            match self.sink.write(self.buffer.head())? {
                Transfer::Bytes(n) => {
                    self.buffer.consume(n);
                    self.stats.bytes_out += n as u64;
                    trace!(amount = n, buffered = self.buffer.used(), "pipe output");
                }
                Transfer::EndOfStream => {
                    return Err(StreamError::SinkClosed {
                        pending: self.buffer.used(),
                    })
                }
            }
        }
        if self.buffer.is_empty()
            && matches!(self.state, PipeState::EndOfInput | PipeState::NotifiedSink)
        {
            match self.sink.close()? {
                Transfer::EndOfStream => self.transition(PipeState::Closed),
                Transfer::Bytes(_) => {
                    if self.state == PipeState::EndOfInput {
                        self.transition(PipeState::NotifiedSink);
                    }
                }
            }
        }
        Ok(())
    }

    /// One input step and one output step. No-op once closed.
    pub fn step(&mut self) -> StreamResult<PipeState> {
        if self.state == PipeState::Closed {
            return Ok(self.state);
        }
        self.step_input()?;
        self.step_output()?;
        self.stats.steps += 1;
        Ok(self.state)
    }

    /// Steps until closed.
    pub fn process(&mut self) -> StreamResult<PipeStats> {
        while self.state != PipeState::Closed {
            self.step()?;
        }
        Ok(self.stats)
    }

    /// Steps until at least `required` more bytes reached the sink or the
    /// pipe closed; returns the bytes delivered by this call. Always takes at
    /// least one step, so `required == 0` still makes progress.
    pub fn process_at_least(&mut self, required: u64) -> StreamResult<u64> {
        let start = self.stats.bytes_out;
        loop {
            self.step()?;
            if self.state == PipeState::Closed || self.stats.bytes_out - start >= required {
                return Ok(self.stats.bytes_out - start);
            }
        }
    }

    /// Steps until closed, calling `monitor` after every step. An error from
    /// the monitor stops the pipe where it is and is returned.
    pub fn process_with<M>(&mut self, mut monitor: M) -> StreamResult<PipeStats>
    where
        M: FnMut(PipeState, &PipeStats) -> StreamResult<()>,
    {
        while self.state != PipeState::Closed {
            let state = self.step()?;
            monitor(state, &self.stats)?;
        }
        Ok(self.stats)
    }
}
