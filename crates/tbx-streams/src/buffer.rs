//! Growable byte buffer with random-access and streaming views.
//!
//! A [`Buffer`] plays two roles at once:
//!
//! - a seekable store: `seek`/`tell` move a cursor and `write_bytes`/
//!   `read_bytes`/typed values operate at it, growing capacity as needed;
//! - a producer/consumer window: `head()` is the first unconsumed byte,
//!   `tail_mut()` the free space after the last valid byte. Producers fill the
//!   tail and call [`Buffer::advance`]; consumers read the head and call
//!   [`Buffer::consume`], which compacts the remainder to the front.
//!
//! Storage is either owned (`Vec<u8>`) or a read-only wrap of external memory
//! (`bytes::Bytes`). Writes to a wrapped buffer fail with
//! [`StreamError::ReadOnlyBuffer`].

use std::fmt;
use std::io::SeekFrom;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, Bytes};
use tracing::trace;

use crate::error::{StreamError, StreamResult};
use crate::file::FileHandle;
use crate::patch::{ArrayRef, RegionRef, ValueRef};
use crate::stream::{RandomAccess, Seekable, Sink, Source, Transfer};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a buffer, used to bind patch references to their owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Fixed-width value that can be written to and read from a buffer.
///
/// Encoding is little-endian.
pub trait Scalar: Copy {
    /// Encoded width in bytes.
    const WIDTH: usize;
    /// Encodes into exactly `WIDTH` bytes.
    fn encode(self, out: &mut [u8]);
    /// Decodes from exactly `WIDTH` bytes.
    fn decode(src: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            impl Scalar for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                fn encode(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(src: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(src);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_scalar!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

const MAX_SCALAR_WIDTH: usize = 8;

enum Storage {
    Owned(Vec<u8>),
    Shared(Bytes),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v,
            Storage::Shared(b) => b,
        }
    }
}

/// Growable byte container with a cursor and a streaming window.
pub struct Buffer {
    id: BufferId,
    generation: u64,
    storage: Storage,
    position: usize,
    size: usize,
    sink_closed: bool,
}

impl Buffer {
    /// Creates an empty owned buffer with zero capacity.
    pub fn new() -> Self {
        Self::from_storage(Storage::Owned(Vec::new()), 0)
    }

    /// Creates an empty owned buffer with `capacity` zeroed bytes allocated.
    pub fn with_capacity(capacity: usize) -> Self {
        trace!(capacity, "buffer created");
        Self::from_storage(Storage::Owned(vec![0u8; capacity]), 0)
    }

    /// Like [`Buffer::with_capacity`] but reports allocation failure.
    pub fn try_with_capacity(capacity: usize) -> StreamResult<Self> {
        let mut buffer = Self::new();
        buffer.ensure_capacity(capacity)?;
        Ok(buffer)
    }

    /// Creates an owned buffer holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Creates an owned buffer taking `data` as its valid contents.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let size = data.len();
        Self::from_storage(Storage::Owned(data), size)
    }

    /// Wraps externally owned memory read-only.
    pub fn from_bytes(data: Bytes) -> Self {
        let size = data.len();
        Self::from_storage(Storage::Shared(data), size)
    }

    fn from_storage(storage: Storage, size: usize) -> Self {
        Self {
            id: BufferId::next(),
            generation: 0,
            storage,
            position: 0,
            size,
            sink_closed: false,
        }
    }

    /// Identity used by patch references.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Bumped whenever existing offsets stop meaning what they meant.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Allocated size in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.as_slice().len()
    }

    /// High-water mark of valid bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Cursor offset for random access.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Valid bytes between the cursor and the end.
    pub fn remaining(&self) -> usize {
        self.size.saturating_sub(self.position)
    }

    /// True when the cursor is at (or past) the last valid byte.
    pub fn is_at_end(&self) -> bool {
        self.position >= self.size
    }

    /// True when the buffer wraps external memory.
    pub fn is_read_only(&self) -> bool {
        matches!(self.storage, Storage::Shared(_))
    }

    /// Valid bytes, from offset 0 to `size`.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage.as_slice()[..self.size]
    }

    fn owned_mut(&mut self) -> StreamResult<&mut Vec<u8>> {
        match &mut self.storage {
            Storage::Owned(v) => Ok(v),
            Storage::Shared(_) => Err(StreamError::ReadOnlyBuffer),
        }
    }

    /// Grows to exactly `capacity` bytes if currently smaller.
    pub fn ensure_capacity(&mut self, capacity: usize) -> StreamResult<()> {
        let current = self.capacity();
        if capacity <= current {
            return Ok(());
        }
        let data = self.owned_mut()?;
        data.try_reserve_exact(capacity - current)
            .map_err(|_| StreamError::CapacityExhausted { requested: capacity })?;
        data.resize(capacity, 0);
        trace!(old = current, new = capacity, "buffer capacity grown");
        Ok(())
    }

    /// Grows capacity for streaming use; never shrinks.
    pub fn resize(&mut self, capacity: usize) -> StreamResult<()> {
        self.ensure_capacity(capacity)
    }

    /// Reallocates down to exactly `size` bytes.
    pub fn trim(&mut self) -> &mut Self {
        let size = self.size;
        if let Storage::Owned(data) = &mut self.storage {
            if data.len() > size {
                data.truncate(size);
                data.shrink_to_fit();
                trace!(capacity = size, "buffer trimmed");
            }
        }
        self
    }

    /// Drops all contents and invalidates outstanding patch references.
    pub fn clear(&mut self) {
        self.size = 0;
        self.position = 0;
        self.sink_closed = false;
        self.generation += 1;
        if let Storage::Shared(b) = &mut self.storage {
            b.clear();
        }
    }

    /// Moves the cursor; the result is clamped at zero.
    pub fn seek(&mut self, pos: SeekFrom) -> usize {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => self.size as i128 + delta as i128,
        };
        self.position = target.clamp(0, usize::MAX as i128) as usize;
        trace!(position = self.position, "buffer seek");
        self.position
    }

    /// Cursor offset, same as [`Buffer::position`].
    pub fn tell(&self) -> usize {
        self.position
    }

    /// Writes `data` at the cursor, growing geometrically when needed.
    ///
    /// New capacity is the larger of 1.5x the current capacity and exactly
    /// what the write requires.
    pub fn write_bytes(&mut self, data: &[u8]) -> StreamResult<usize> {
        let start = self.position;
        let required = start
            .checked_add(data.len())
            .ok_or(StreamError::CapacityExhausted {
                requested: usize::MAX,
            })?;
        let capacity = self.capacity();
        if required > capacity {
            let grown = capacity.saturating_add(capacity / 2);
            self.ensure_capacity(grown.max(required))?;
        }
        let size = self.size;
        let buf = self.owned_mut()?;
        if start > size {
            buf[size..start].fill(0);
        }
        buf[start..required].copy_from_slice(data);
        self.position = required;
        self.size = self.size.max(required);
        trace!(amount = data.len(), size = self.size, capacity = self.capacity(), "buffer write");
        Ok(data.len())
    }

    /// Copies up to `dest.len()` bytes from the cursor; returns the count.
    pub fn read_bytes(&mut self, dest: &mut [u8]) -> usize {
        let n = self.remaining().min(dest.len());
        let start = self.position;
        dest[..n].copy_from_slice(&self.storage.as_slice()[start..start + n]);
        self.position += n;
        n
    }

    /// Writes a fixed-width value at the cursor.
    pub fn write_value<T: Scalar>(&mut self, value: T) -> StreamResult<()> {
        let mut raw = [0u8; MAX_SCALAR_WIDTH];
        value.encode(&mut raw[..T::WIDTH]);
        self.write_bytes(&raw[..T::WIDTH])?;
        Ok(())
    }

    /// Reads a fixed-width value at the cursor, or `None` if too few bytes remain.
    pub fn read_value<T: Scalar>(&mut self) -> Option<T> {
        if self.remaining() < T::WIDTH {
            return None;
        }
        let start = self.position;
        let value = T::decode(&self.storage.as_slice()[start..start + T::WIDTH]);
        self.position += T::WIDTH;
        Some(value)
    }

    /// Reserves `len` zeroed bytes at the end for a later backpatch.
    ///
    /// The cursor must sit at the end of the buffer.
    pub fn reserve(&mut self, len: usize) -> StreamResult<RegionRef> {
        if self.position != self.size {
            return Err(StreamError::ReserveNotAtEnd {
                position: self.position,
                size: self.size,
            });
        }
        let start = self.size;
        let end = start.checked_add(len).ok_or(StreamError::CapacityExhausted {
            requested: usize::MAX,
        })?;
        self.ensure_capacity(end)?;
        self.owned_mut()?[start..end].fill(0);
        self.position = end;
        self.size = end;
        trace!(offset = start, len, "buffer reserve");
        Ok(RegionRef::new(self.id, self.generation, start, len))
    }

    /// Reserves space for one value of type `T`.
    pub fn reserve_value<T: Scalar>(&mut self) -> StreamResult<ValueRef<T>> {
        self.reserve(T::WIDTH).map(ValueRef::new)
    }

    /// Reserves space for `count` values of type `T`.
    pub fn reserve_array<T: Scalar>(&mut self, count: usize) -> StreamResult<ArrayRef<T>> {
        let len = count
            .checked_mul(T::WIDTH)
            .ok_or(StreamError::CapacityExhausted {
                requested: usize::MAX,
            })?;
        self.reserve(len).map(|region| ArrayRef::new(region, count))
    }

    /// Writes `data` at `offset`, restoring the cursor afterwards.
    pub(crate) fn patch(&mut self, offset: usize, data: &[u8]) -> StreamResult<()> {
        let mark = self.position;
        self.position = offset;
        let result = self.write_bytes(data);
        self.position = mark;
        result.map(|_| ())
    }

    /// Valid bytes at `offset..offset + len`.
    pub(crate) fn peek(&self, offset: usize, len: usize) -> &[u8] {
        &self.as_slice()[offset..offset + len]
    }

    /// First unconsumed byte onwards.
    pub fn head(&self) -> &[u8] {
        self.as_slice()
    }

    /// Free space after the last valid byte. Empty for read-only buffers.
    pub fn tail_mut(&mut self) -> &mut [u8] {
        let size = self.size;
        match &mut self.storage {
            Storage::Owned(v) => &mut v[size..],
            Storage::Shared(_) => &mut [],
        }
    }

    /// Free space in bytes.
    pub fn available(&self) -> usize {
        self.capacity() - self.size
    }

    /// Bytes waiting to be consumed.
    pub fn used(&self) -> usize {
        self.size
    }

    /// True when nothing waits to be consumed.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// True when there is no free space left.
    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    /// Marks `n` bytes written into [`Buffer::tail_mut`] as valid.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`Buffer::available`].
    pub fn advance(&mut self, n: usize) {
        assert!(
            n <= self.available(),
            "advance of {} exceeds available {}",
            n,
            self.available()
        );
        self.size += n;
        trace!(amount = n, size = self.size, capacity = self.capacity(), "buffer advance");
    }

    /// Drops `n` bytes from the head and shifts the rest to the front.
    ///
    /// Outstanding patch references become stale.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`Buffer::used`].
    pub fn consume(&mut self, n: usize) {
        assert!(
            n <= self.size,
            "consume of {} exceeds used {}",
            n,
            self.size
        );
        if n == 0 {
            return;
        }
        let size = self.size;
        match &mut self.storage {
            Storage::Owned(v) => v.copy_within(n..size, 0),
            Storage::Shared(b) => b.advance(n),
        }
        self.size -= n;
        self.position = self.position.saturating_sub(n);
        self.generation += 1;
        trace!(amount = n, size = self.size, capacity = self.capacity(), "buffer consume");
    }

    /// Writes the valid bytes to `file` at its current offset.
    pub fn save(&self, file: &mut FileHandle) -> StreamResult<()> {
        file.write(self.as_slice())?;
        Ok(())
    }

    /// Reads the whole of `file` into a new buffer with the cursor at 0.
    pub fn load(file: &mut FileHandle) -> StreamResult<Self> {
        let length = file.length()? as usize;
        let mut buffer = Self::try_with_capacity(length)?;
        file.seek(0)?;
        let n = file.read(buffer.tail_mut())?;
        if n < length {
            return Err(StreamError::ReadFailed {
                path: file.path().to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("expected {} bytes, read {}", length, n),
                ),
            });
        }
        buffer.advance(n);
        Ok(buffer)
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        let mut copy = Self::from_slice(self.as_slice());
        copy.position = self.position;
        copy
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("capacity", &self.capacity())
            .field("position", &self.position)
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Buffer {}

impl Source for Buffer {
    fn read(&mut self, dest: &mut [u8]) -> StreamResult<Transfer> {
        if self.is_at_end() {
            trace!("buffer read EOS");
            return Ok(Transfer::EndOfStream);
        }
        Ok(Transfer::Bytes(self.read_bytes(dest)))
    }
}

/// Once `close()` has echoed end-of-stream, further writes through the
/// sink interface fail until [`Buffer::clear`]. Direct `write_bytes` calls
/// are unaffected.
impl Sink for Buffer {
    fn write(&mut self, src: &[u8]) -> StreamResult<Transfer> {
        if self.sink_closed {
            return Err(StreamError::SinkClosed { pending: src.len() });
        }
        self.write_bytes(src).map(Transfer::Bytes)
    }

    fn close(&mut self) -> StreamResult<Transfer> {
        self.sink_closed = true;
        Ok(Transfer::EndOfStream)
    }
}

impl Seekable for Buffer {
    fn seek(&mut self, offset: u64) -> StreamResult<()> {
        Buffer::seek(self, SeekFrom::Start(offset));
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.position as u64
    }

    fn size(&self) -> u64 {
        self.size as u64
    }
}

impl RandomAccess for Buffer {
    fn read_at(&mut self, offset: u64, dest: &mut [u8]) -> StreamResult<usize> {
        let data = self.as_slice();
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = (data.len() - start).min(dest.len());
        dest[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn length(&self) -> StreamResult<u64> {
        Ok(self.size as u64)
    }
}
