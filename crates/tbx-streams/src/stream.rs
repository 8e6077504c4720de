//! Source/sink contracts shared by every streaming component.
//!
//! All I/O is cooperative: a call moves whatever it can right now and returns.
//! [`Transfer::Bytes(0)`](Transfer::Bytes) means "nothing moved, try again";
//! [`Transfer::EndOfStream`] means the stream is permanently exhausted (for a
//! source) or fully flushed and closed (for a sink).

use crate::error::{StreamError, StreamResult};

/// Raw value reserved for end-of-stream on a plain byte-count channel.
pub const END_OF_STREAM: usize = usize::MAX;

/// Outcome of a single read or write call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transfer {
    /// This many bytes moved. Zero means "would block, retry later".
    Bytes(usize),
    /// No more data will ever flow.
    EndOfStream,
}

impl Transfer {
    /// Nothing moved this call; more may follow.
    pub const WOULD_BLOCK: Transfer = Transfer::Bytes(0);

    /// Decodes a raw count where [`END_OF_STREAM`] marks the end.
    pub fn from_raw(raw: usize) -> Self {
        if raw == END_OF_STREAM {
            Transfer::EndOfStream
        } else {
            Transfer::Bytes(raw)
        }
    }

    /// Encodes onto a raw count channel.
    pub fn into_raw(self) -> usize {
        match self {
            Transfer::Bytes(n) => n,
            Transfer::EndOfStream => END_OF_STREAM,
        }
    }

    /// True for [`Transfer::EndOfStream`].
    pub fn is_eos(&self) -> bool {
        matches!(self, Transfer::EndOfStream)
    }

    /// True when zero bytes moved but the stream is still live.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Transfer::Bytes(0))
    }

    /// Bytes moved, counting end-of-stream as zero.
    pub fn bytes(&self) -> usize {
        match self {
            Transfer::Bytes(n) => *n,
            Transfer::EndOfStream => 0,
        }
    }
}

/// A pollable producer of bytes.
pub trait Source {
    /// Copies at most `dest.len()` bytes into `dest`.
    ///
    /// A short count (including zero) only means nothing more is available
    /// yet, never that the stream is shorter than expected.
    fn read(&mut self, dest: &mut [u8]) -> StreamResult<Transfer>;
}

/// A pollable consumer of bytes.
pub trait Sink {
    /// Accepts a prefix of `src` and reports how much was taken.
    fn write(&mut self, src: &[u8]) -> StreamResult<Transfer>;

    /// Signals that no more data will follow.
    ///
    /// Returns [`Transfer::EndOfStream`] once everything has been flushed.
    /// Until then it returns `Bytes(_)` and must be called again. Real writes
    /// after the end-of-stream echo are refused.
    fn close(&mut self) -> StreamResult<Transfer>;
}

/// Random-access cursor capability, composable with [`Source`] and [`Sink`].
pub trait Seekable {
    /// Moves the cursor to an absolute offset.
    fn seek(&mut self, offset: u64) -> StreamResult<()>;

    /// Current cursor offset.
    fn tell(&self) -> u64;

    /// Total length of the underlying data.
    fn size(&self) -> u64;

    /// Moves the cursor back to the start.
    fn rewind(&mut self) -> StreamResult<()> {
        self.seek(0)
    }
}

/// Positional reads over a fixed-length backing store.
pub trait RandomAccess {
    /// Reads up to `dest.len()` bytes starting at `offset`; returns the count.
    fn read_at(&mut self, offset: u64, dest: &mut [u8]) -> StreamResult<usize>;

    /// Total length in bytes.
    fn length(&self) -> StreamResult<u64>;

    /// Fills `dest` from `offset`. Running out of data first is an
    /// `UnexpectedEof` failure, never a short success.
    fn read_exact_at(&mut self, offset: u64, dest: &mut [u8]) -> StreamResult<()> {
        let mut filled = 0;
        while filled < dest.len() {
            let n = self.read_at(offset + filled as u64, &mut dest[filled..])?;
            if n == 0 {
                return Err(StreamError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("backing ended at {} of {} bytes requested", filled, dest.len()),
                )));
            }
            filled += n;
        }
        Ok(())
    }
}

impl<S: Source + ?Sized> Source for &mut S {
    fn read(&mut self, dest: &mut [u8]) -> StreamResult<Transfer> {
        (**self).read(dest)
    }
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn read(&mut self, dest: &mut [u8]) -> StreamResult<Transfer> {
        (**self).read(dest)
    }
}

impl<K: Sink + ?Sized> Sink for &mut K {
    fn write(&mut self, src: &[u8]) -> StreamResult<Transfer> {
        (**self).write(src)
    }

    fn close(&mut self) -> StreamResult<Transfer> {
        (**self).close()
    }
}

impl<K: Sink + ?Sized> Sink for Box<K> {
    fn write(&mut self, src: &[u8]) -> StreamResult<Transfer> {
        (**self).write(src)
    }

    fn close(&mut self) -> StreamResult<Transfer> {
        (**self).close()
    }
}

impl<T: Seekable + ?Sized> Seekable for &mut T {
    fn seek(&mut self, offset: u64) -> StreamResult<()> {
        (**self).seek(offset)
    }

    fn tell(&self) -> u64 {
        (**self).tell()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

impl<T: Seekable + ?Sized> Seekable for Box<T> {
    fn seek(&mut self, offset: u64) -> StreamResult<()> {
        (**self).seek(offset)
    }

    fn tell(&self) -> u64 {
        (**self).tell()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

/// Polls `source` until end-of-stream, collecting everything it yields.
///
/// Spins on would-block results, so only use it on sources that make progress
/// on their own.
pub fn read_to_end<S: Source + ?Sized>(source: &mut S, chunk_size: usize) -> StreamResult<Vec<u8>> {
    if chunk_size == 0 {
        return Err(StreamError::InvalidConfig {
            reason: "read_to_end chunk size must be non-zero".to_string(),
        });
    }
    let mut out = Vec::new();
    let mut chunk = vec![0u8; chunk_size];
    loop {
        match source.read(&mut chunk)? {
            Transfer::Bytes(n) => out.extend_from_slice(&chunk[..n]),
            Transfer::EndOfStream => return Ok(out),
        }
    }
}
