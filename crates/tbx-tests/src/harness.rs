//! Test Harness - environments and stream test doubles

use std::path::{Path, PathBuf};

use tbx_streams::{Filter, FilterIo, Sink, Source, StreamResult, Transfer};
use tempfile::TempDir;

/// Temp directory scoped to one test.
#[derive(Debug)]
pub struct TestEnv {
    temp_dir: TempDir,
    test_name: String,
}

impl TestEnv {
    /// Creates a fresh temp directory for `test_name`.
    pub fn new(test_name: &str) -> std::io::Result<Self> {
        Ok(Self {
            temp_dir: tempfile::tempdir()?,
            test_name: test_name.to_string(),
        })
    }

    /// Root of the temp directory.
    pub fn tempdir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Path of `name` inside the temp directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes `data` to `name` and returns its path.
    pub fn write_file(&self, name: &str, data: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.file(name);
        std::fs::write(&path, data)?;
        Ok(path)
    }

    /// Name given at construction.
    pub fn test_name(&self) -> &str {
        &self.test_name
    }
}

/// Installs a test-writer tracing subscriber; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Deterministic non-repeating-looking payload.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 251) as u8).collect()
}

/// Source handing out data in fixed-size chunks, optionally answering
/// every `stutter`-th read with "try again".
#[derive(Debug, Clone)]
pub struct ChunkedSource {
    data: Vec<u8>,
    position: usize,
    chunk: usize,
    stutter: Option<usize>,
    reads: usize,
    eos_reported: usize,
}

impl ChunkedSource {
    /// Serves `data` at most `chunk` bytes per read.
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data,
            position: 0,
            chunk: chunk.max(1),
            stutter: None,
            reads: 0,
            eos_reported: 0,
        }
    }

    /// Makes every `every`-th read return zero bytes.
    pub fn with_stutter(mut self, every: usize) -> Self {
        self.stutter = Some(every.max(1));
        self
    }

    /// Read calls seen.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Times end-of-stream was returned.
    pub fn eos_reported(&self) -> usize {
        self.eos_reported
    }
}

impl Source for ChunkedSource {
    fn read(&mut self, dest: &mut [u8]) -> StreamResult<Transfer> {
        self.reads += 1;
        if self.position == self.data.len() {
            self.eos_reported += 1;
            return Ok(Transfer::EndOfStream);
        }
        if let Some(every) = self.stutter {
            if self.reads % every == 0 {
                return Ok(Transfer::WOULD_BLOCK);
            }
        }
        let n = dest.len().min(self.chunk).min(self.data.len() - self.position);
        dest[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(Transfer::Bytes(n))
    }
}

/// Collecting sink that accepts a bounded amount per write and acknowledges
/// close only after a number of retries.
#[derive(Debug, Clone, Default)]
pub struct ThrottledSink {
    data: Vec<u8>,
    max_write: Option<usize>,
    close_delay: usize,
    close_calls: usize,
    eos_acks: usize,
    writes_after_close: usize,
}

impl ThrottledSink {
    /// Accepts everything and acknowledges close immediately.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Accepts at most `max_write` bytes per call.
    pub fn with_max_write(mut self, max_write: usize) -> Self {
        self.max_write = Some(max_write);
        self
    }

    /// Needs `delay` extra close calls before acknowledging.
    pub fn with_close_delay(mut self, delay: usize) -> Self {
        self.close_delay = delay;
        self
    }

    /// Bytes collected.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Times end-of-stream was acknowledged.
    pub fn eos_acks(&self) -> usize {
        self.eos_acks
    }

    /// Close calls seen.
    pub fn close_calls(&self) -> usize {
        self.close_calls
    }

    /// Data writes received after the first close call.
    pub fn writes_after_close(&self) -> usize {
        self.writes_after_close
    }
}

impl Sink for ThrottledSink {
    fn write(&mut self, src: &[u8]) -> StreamResult<Transfer> {
        if self.close_calls > 0 {
            self.writes_after_close += 1;
        }
        let n = match self.max_write {
            Some(max) => src.len().min(max),
            None => src.len(),
        };
        self.data.extend_from_slice(&src[..n]);
        Ok(Transfer::Bytes(n))
    }

    fn close(&mut self) -> StreamResult<Transfer> {
        self.close_calls += 1;
        if self.close_calls > self.close_delay {
            self.eos_acks += 1;
            Ok(Transfer::EndOfStream)
        } else {
            Ok(Transfer::WOULD_BLOCK)
        }
    }
}

/// Reverses the bytes of every `block`-sized block; a trailing partial block
/// is reversed on its own once input ends.
#[derive(Debug, Clone)]
pub struct BlockReverseFilter {
    block: usize,
    inits: usize,
    finalizes: usize,
}

impl BlockReverseFilter {
    /// Filter working on `block`-byte blocks.
    pub fn new(block: usize) -> Self {
        Self {
            block: block.max(1),
            inits: 0,
            finalizes: 0,
        }
    }

    /// Calls to `init`.
    pub fn inits(&self) -> usize {
        self.inits
    }

    /// Calls to `finalize`.
    pub fn finalizes(&self) -> usize {
        self.finalizes
    }

    /// What the filter produces for `data`.
    pub fn expected(data: &[u8], block: usize) -> Vec<u8> {
        data.chunks(block.max(1))
            .flat_map(|c| c.iter().rev().copied())
            .collect()
    }
}

impl Filter for BlockReverseFilter {
    fn name(&self) -> &str {
        "block-reverse"
    }

    fn init(&mut self) -> StreamResult<()> {
        self.inits += 1;
        Ok(())
    }

    fn process(&mut self, io: &mut FilterIo<'_>) -> StreamResult<()> {
        let ended = io.is_input_ended();
        let block = self.block;
        let (input, output) = io.buffers();
        loop {
            let take = if input.used() >= block {
                block
            } else if ended && !input.is_empty() {
                input.used()
            } else {
                break;
            };
            if output.available() < take {
                break;
            }
            for (dst, src) in output.tail_mut()[..take]
                .iter_mut()
                .zip(input.head()[..take].iter().rev())
            {
                *dst = *src;
            }
            output.advance(take);
            input.consume(take);
        }
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
