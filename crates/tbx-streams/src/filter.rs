//! Stateful transforms between two buffers.
//!
//! A [`Filter`] consumes bytes from its input buffer and produces bytes into
//! its output buffer, in whatever amounts suit it. [`FilterStage`] owns the
//! filter, both buffers and the lifecycle state; the
//! [`FilterSource`](crate::filter_source::FilterSource) and
//! [`FilterSink`](crate::filter_sink::FilterSink) adapters drive a stage from
//! the pull and push side respectively.
//!
//! Keeping input and output separate lets a transform work in its own block
//! size regardless of the chunk sizes callers read or write with.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer::Buffer;
use crate::error::{StreamError, StreamResult};

/// Default capacity of each filter buffer: 16 KiB.
pub const DEFAULT_FILTER_BUFFER: usize = 16 * 1024;

/// Buffer sizing for a filter stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Capacity of the input buffer in bytes (default 16 KiB).
    pub input_capacity: usize,
    /// Capacity of the output buffer in bytes (default 16 KiB).
    pub output_capacity: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            input_capacity: DEFAULT_FILTER_BUFFER,
            output_capacity: DEFAULT_FILTER_BUFFER,
        }
    }
}

impl FilterConfig {
    /// Same capacity for both buffers.
    pub fn symmetric(capacity: usize) -> Self {
        Self {
            input_capacity: capacity,
            output_capacity: capacity,
        }
    }

    fn validate(&self) -> StreamResult<()> {
        if self.input_capacity == 0 || self.output_capacity == 0 {
            return Err(StreamError::InvalidConfig {
                reason: format!(
                    "filter buffers must be non-empty (input {}, output {})",
                    self.input_capacity, self.output_capacity
                ),
            });
        }
        Ok(())
    }
}

/// Lifecycle of a filter stage.
///
/// "Ended" means no more input will arrive; "finished" means the transform
/// has produced all the output it ever will. They are independent: a
/// transform usually still holds output after its input ends, and may also
/// declare itself done before its input runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterState {
    /// `init` has not run yet.
    NotStarted,
    /// Input open, transform producing.
    Running,
    /// Input exhausted, transform still flushing.
    InputEnded,
    /// Transform done while input is still open; further input is discarded.
    OutputFinished,
    /// Input exhausted and transform done; finalize is due.
    Complete,
    /// Finalize has run. Terminal.
    Finalized,
}

impl FilterState {
    /// True once `init` has run.
    pub fn is_started(self) -> bool {
        self != FilterState::NotStarted
    }

    /// True once no more input will arrive.
    pub fn is_ended(self) -> bool {
        matches!(
            self,
            FilterState::InputEnded | FilterState::Complete | FilterState::Finalized
        )
    }

    /// True once the transform will produce nothing more.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            FilterState::OutputFinished | FilterState::Complete | FilterState::Finalized
        )
    }

    fn input_ended(self) -> Self {
        match self {
            FilterState::Running => FilterState::InputEnded,
            FilterState::OutputFinished => FilterState::Complete,
            other => other,
        }
    }

    fn output_finished(self) -> Self {
        match self {
            FilterState::Running => FilterState::OutputFinished,
            FilterState::InputEnded => FilterState::Complete,
            other => other,
        }
    }
}

/// View handed to [`Filter::process`].
pub struct FilterIo<'a> {
    input: &'a mut Buffer,
    output: &'a mut Buffer,
    input_ended: bool,
    finished: bool,
}

impl<'a> FilterIo<'a> {
    /// The input buffer; consume what was processed.
    pub fn input(&mut self) -> &mut Buffer {
        &mut *self.input
    }

    /// The output buffer; advance over what was produced.
    pub fn output(&mut self) -> &mut Buffer {
        &mut *self.output
    }

    /// Both buffers at once.
    pub fn buffers(&mut self) -> (&mut Buffer, &mut Buffer) {
        (&mut *self.input, &mut *self.output)
    }

    /// True when the input buffer holds everything that will ever arrive.
    pub fn is_input_ended(&self) -> bool {
        self.input_ended
    }

    /// Declares that no further output will be produced.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// True if [`FilterIo::finish`] was called during this step.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// A stateful transform driven incrementally.
pub trait Filter {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called once before the first `process`.
    fn init(&mut self) -> StreamResult<()> {
        Ok(())
    }

    /// Moves some or all of the input to the output.
    ///
    /// Called repeatedly; must tolerate an empty input. Call
    /// [`FilterIo::finish`] once all output has been produced.
    fn process(&mut self, io: &mut FilterIo<'_>) -> StreamResult<()>;

    /// Called exactly once after input ended and the transform finished.
    fn finalize(&mut self) -> StreamResult<()> {
        Ok(())
    }
}

/// A filter together with its buffers and lifecycle.
pub struct FilterStage<F> {
    filter: F,
    pub(crate) input: Buffer,
    pub(crate) output: Buffer,
    state: FilterState,
}

impl<F: Filter> FilterStage<F> {
    /// Creates a stage with buffers sized by `config`.
    pub fn new(filter: F, config: &FilterConfig) -> StreamResult<Self> {
        config.validate()?;
        Ok(Self {
            filter,
            input: Buffer::try_with_capacity(config.input_capacity)?,
            output: Buffer::try_with_capacity(config.output_capacity)?,
            state: FilterState::NotStarted,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FilterState {
        self.state
    }

    /// The wrapped filter.
    pub fn filter(&self) -> &F {
        &self.filter
    }

    /// The wrapped filter, mutably.
    pub fn filter_mut(&mut self) -> &mut F {
        &mut self.filter
    }

    /// Consumes the stage, returning the filter.
    pub fn into_filter(self) -> F {
        self.filter
    }

    /// The input buffer.
    pub fn input(&self) -> &Buffer {
        &self.input
    }

    /// The output buffer.
    pub fn output(&self) -> &Buffer {
        &self.output
    }

    /// Grows the input buffer.
    pub fn resize_input(&mut self, capacity: usize) -> StreamResult<()> {
        self.input.resize(capacity)
    }

    /// Grows the output buffer.
    pub fn resize_output(&mut self, capacity: usize) -> StreamResult<()> {
        self.output.resize(capacity)
    }

    /// Grows both buffers.
    pub fn resize(&mut self, capacity: usize) -> StreamResult<()> {
        self.resize_input(capacity)?;
        self.resize_output(capacity)
    }

    pub(crate) fn start(&mut self) -> StreamResult<()> {
        if self.state == FilterState::NotStarted {
            self.filter.init()?;
            self.state = FilterState::Running;
            debug!(filter = self.filter.name(), "filter started");
        }
        Ok(())
    }

    pub(crate) fn mark_ended(&mut self) {
        if !self.state.is_ended() {
            self.state = self.state.input_ended();
            debug!(filter = self.filter.name(), state = ?self.state, "filter input ended");
        }
    }

    /// Unfinished and either input to chew on or room to produce into.
    pub(crate) fn can_process(&self) -> bool {
        !self.state.is_finished() && (!self.input.is_empty() || !self.output.is_full())
    }

    pub(crate) fn process(&mut self) -> StreamResult<()> {
        let mut io = FilterIo {
            input: &mut self.input,
            output: &mut self.output,
            input_ended: self.state.is_ended(),
            finished: false,
        };
        self.filter.process(&mut io)?;
        if io.finished {
            self.state = self.state.output_finished();
            debug!(filter = self.filter.name(), state = ?self.state, "filter output finished");
        }
        Ok(())
    }

    /// Drops input the transform will never look at.
    pub(crate) fn discard_input(&mut self) {
        let residual = self.input.used();
        if residual > 0 {
            tracing::warn!(filter = self.filter.name(), bytes = residual, "discarding residual filter input");
            self.input.consume(residual);
        }
    }

    /// Runs `finalize` on a complete stage; the only way into `Finalized`.
    pub(crate) fn finalize(&mut self) -> StreamResult<()> {
        match self.state {
            FilterState::Complete => {
                self.state = FilterState::Finalized;
                debug!(filter = self.filter.name(), "filter finalized");
                self.filter.finalize()
            }
            FilterState::Finalized => Err(StreamError::FilterMisuse {
                name: self.filter.name().to_string(),
                reason: "finalize called twice",
            }),
            _ => Err(StreamError::FilterMisuse {
                name: self.filter.name().to_string(),
                reason: "finalize before input ended and output finished",
            }),
        }
    }

    /// Nothing buffered on either side.
    pub(crate) fn is_drained(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }
}

/// Passes input through unchanged.
#[derive(Debug, Default, Clone)]
pub struct IdentityFilter;

impl Filter for IdentityFilter {
    fn name(&self) -> &str {
        "identity"
    }

    fn process(&mut self, io: &mut FilterIo<'_>) -> StreamResult<()> {
        let ended = io.is_input_ended();
        let (input, output) = io.buffers();
        let n = input.used().min(output.available());
        output.tail_mut()[..n].copy_from_slice(&input.head()[..n]);
        output.advance(n);
        input.consume(n);
        if ended && input.is_empty() {
            io.finish();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FilterConfig::default();
        assert_eq!(config.input_capacity, 16 * 1024);
        assert_eq!(config.output_capacity, 16 * 1024);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = FilterConfig::symmetric(512);
        let json = serde_json::to_string(&config).unwrap();
        let back: FilterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.input_capacity, 512);
        assert_eq!(back.output_capacity, 512);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = FilterConfig {
            input_capacity: 0,
            output_capacity: 8,
        };
        assert!(matches!(
            FilterStage::new(IdentityFilter, &config),
            Err(StreamError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_state_transitions() {
        use FilterState::*;
        assert_eq!(Running.input_ended(), InputEnded);
        assert_eq!(Running.output_finished(), OutputFinished);
        assert_eq!(InputEnded.output_finished(), Complete);
        assert_eq!(OutputFinished.input_ended(), Complete);
        assert_eq!(Finalized.input_ended(), Finalized);

        assert!(!NotStarted.is_started());
        assert!(Complete.is_ended() && Complete.is_finished());
        assert!(InputEnded.is_ended() && !InputEnded.is_finished());
        assert!(!OutputFinished.is_ended() && OutputFinished.is_finished());
    }

    #[test]
    fn test_stage_lifecycle() {
        let mut stage = FilterStage::new(IdentityFilter, &FilterConfig::symmetric(8)).unwrap();
        assert_eq!(stage.state(), FilterState::NotStarted);
        stage.start().unwrap();
        assert_eq!(stage.state(), FilterState::Running);

        stage.input.tail_mut()[..3].copy_from_slice(b"abc");
        stage.input.advance(3);
        stage.process().unwrap();
        assert_eq!(stage.output().head(), b"abc");
        assert!(stage.input().is_empty());
        assert_eq!(stage.state(), FilterState::Running);

        stage.mark_ended();
        assert_eq!(stage.state(), FilterState::InputEnded);
        assert!(matches!(
            stage.finalize(),
            Err(StreamError::FilterMisuse { .. })
        ));

        stage.process().unwrap();
        assert_eq!(stage.state(), FilterState::Complete);
        stage.finalize().unwrap();
        assert_eq!(stage.state(), FilterState::Finalized);
        assert!(matches!(
            stage.finalize(),
            Err(StreamError::FilterMisuse { reason: "finalize called twice", .. })
        ));
    }

    #[test]
    fn test_identity_respects_output_room() {
        let config = FilterConfig {
            input_capacity: 16,
            output_capacity: 4,
        };
        let mut stage = FilterStage::new(IdentityFilter, &config).unwrap();
        stage.start().unwrap();
        stage.input.tail_mut()[..10].copy_from_slice(b"0123456789");
        stage.input.advance(10);

        stage.process().unwrap();
        assert_eq!(stage.output().head(), b"0123");
        assert_eq!(stage.input().head(), b"456789");
        assert!(stage.output().is_full());
    }

    #[test]
    fn test_resize_grows_buffers() {
        let mut stage = FilterStage::new(IdentityFilter, &FilterConfig::symmetric(8)).unwrap();
        stage.resize(32).unwrap();
        assert_eq!(stage.input().capacity(), 32);
        assert_eq!(stage.output().capacity(), 32);
    }
}
