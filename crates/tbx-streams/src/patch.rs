//! Offset-based backpatch handles into a [`Buffer`].
//!
//! A reservation hands back a reference made of the owning buffer's identity,
//! its generation at reservation time and a byte offset. Nothing here holds a
//! pointer: every access resolves through the buffer passed in, so references
//! survive reallocation. Compacting or clearing the buffer bumps its
//! generation, after which the reference reports [`StreamError::StalePatch`].

use std::marker::PhantomData;

use crate::buffer::{Buffer, BufferId, Scalar};
use crate::error::{StreamError, StreamResult};

/// Handle to a reserved byte region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionRef {
    buffer: BufferId,
    generation: u64,
    offset: usize,
    len: usize,
}

impl RegionRef {
    pub(crate) fn new(buffer: BufferId, generation: u64, offset: usize, len: usize) -> Self {
        Self {
            buffer,
            generation,
            offset,
            len,
        }
    }

    /// Start of the region within the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Size of the region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length reservation.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, buffer: &Buffer, offset: usize, len: usize) -> StreamResult<()> {
        if buffer.id() != self.buffer {
            return Err(StreamError::ForeignPatch);
        }
        if buffer.generation() != self.generation || offset + len > buffer.size() {
            return Err(StreamError::StalePatch { offset, len });
        }
        Ok(())
    }

    /// Writes `data` at the start of the region; the cursor is left untouched.
    pub fn write(&self, buffer: &mut Buffer, data: &[u8]) -> StreamResult<()> {
        self.write_at(buffer, 0, data)
    }

    fn write_at(&self, buffer: &mut Buffer, rel: usize, data: &[u8]) -> StreamResult<()> {
        if rel + data.len() > self.len {
            return Err(StreamError::PatchOverflow {
                len: rel + data.len(),
                reserved: self.len,
            });
        }
        self.check(buffer, self.offset + rel, data.len())?;
        buffer.patch(self.offset + rel, data)
    }

    /// Current contents of the region.
    pub fn read<'b>(&self, buffer: &'b Buffer) -> StreamResult<&'b [u8]> {
        self.check(buffer, self.offset, self.len)?;
        Ok(buffer.peek(self.offset, self.len))
    }
}

/// Handle to a single reserved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRef<T: Scalar> {
    region: RegionRef,
    _marker: PhantomData<T>,
}

impl<T: Scalar> ValueRef<T> {
    pub(crate) fn new(region: RegionRef) -> Self {
        Self {
            region,
            _marker: PhantomData,
        }
    }

    /// Byte offset of the value.
    pub fn offset(&self) -> usize {
        self.region.offset()
    }

    /// Fills in the value.
    pub fn write(&self, buffer: &mut Buffer, value: T) -> StreamResult<()> {
        let mut raw = [0u8; 8];
        value.encode(&mut raw[..T::WIDTH]);
        self.region.write(buffer, &raw[..T::WIDTH])
    }

    /// Reads back the value.
    pub fn read(&self, buffer: &Buffer) -> StreamResult<T> {
        self.region.read(buffer).map(T::decode)
    }
}

/// Handle to a reserved array of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayRef<T: Scalar> {
    region: RegionRef,
    count: usize,
    _marker: PhantomData<T>,
}

impl<T: Scalar> ArrayRef<T> {
    pub(crate) fn new(region: RegionRef, count: usize) -> Self {
        Self {
            region,
            count,
            _marker: PhantomData,
        }
    }

    /// Byte offset of the first element.
    pub fn offset(&self) -> usize {
        self.region.offset()
    }

    /// Number of reserved elements.
    pub fn count(&self) -> usize {
        self.count
    }

    fn element_offset(&self, index: usize) -> StreamResult<usize> {
        if index >= self.count {
            return Err(StreamError::PatchIndexOutOfRange {
                index,
                count: self.count,
            });
        }
        Ok(index * T::WIDTH)
    }

    /// Fills in element `index`.
    pub fn write(&self, buffer: &mut Buffer, index: usize, value: T) -> StreamResult<()> {
        let rel = self.element_offset(index)?;
        let mut raw = [0u8; 8];
        value.encode(&mut raw[..T::WIDTH]);
        self.region.write_at(buffer, rel, &raw[..T::WIDTH])
    }

    /// Reads back element `index`.
    pub fn read(&self, buffer: &Buffer, index: usize) -> StreamResult<T> {
        let rel = self.element_offset(index)?;
        let bytes = self.region.read(buffer)?;
        Ok(T::decode(&bytes[rel..rel + T::WIDTH]))
    }
}
