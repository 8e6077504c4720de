//! File handles and file-backed sources and sinks.
//!
//! Every failure carries the offending path. A handle may be created unopened
//! and opened later, which lets callers build long source lists without
//! holding one descriptor per file.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::{StreamError, StreamResult};
use crate::stream::{RandomAccess, Seekable, Sink, Source, Transfer};

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Existing file, read-only.
    Read,
    /// Created or truncated, write-only.
    Write,
}

/// Random-access handle to a file on disk.
#[derive(Debug)]
pub struct FileHandle {
    path: PathBuf,
    file: Option<File>,
    position: u64,
}

impl FileHandle {
    /// Opens `path` in the given mode.
    pub fn open(path: impl AsRef<Path>, mode: FileMode) -> StreamResult<Self> {
        let mut handle = Self::unopened(path);
        handle.reopen(mode)?;
        Ok(handle)
    }

    /// Creates a handle bound to `path` without opening it.
    pub fn unopened(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            position: 0,
        }
    }

    /// Opens (or re-opens) the bound path and rewinds to offset 0.
    pub fn reopen(&mut self, mode: FileMode) -> StreamResult<()> {
        if mode == FileMode::Read && !self.path.exists() {
            return Err(StreamError::NotFound {
                path: self.path.clone(),
            });
        }
        let result = match mode {
            FileMode::Read => File::open(&self.path),
            FileMode::Write => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path),
        };
        let file = result.map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                StreamError::NotFound {
                    path: self.path.clone(),
                }
            } else {
                StreamError::OpenFailed {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;
        debug!(path = %self.path.display(), ?mode, "file opened");
        self.file = Some(file);
        self.position = 0;
        Ok(())
    }

    /// Releases the descriptor; the handle can be reopened.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(path = %self.path.display(), "file closed");
        }
    }

    /// True while a descriptor is held.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// The bound path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_mut(&mut self) -> StreamResult<&mut File> {
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(StreamError::NotOpen {
                path: self.path.clone(),
            }),
        }
    }

    fn truncated(&self, got: usize, wanted: usize) -> StreamError {
        StreamError::ReadFailed {
            path: self.path.clone(),
            source: std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("file ended after {got} of {wanted} bytes"),
            ),
        }
    }

    /// Reads until `dest` is full or the file ends; returns the count.
    pub fn read(&mut self, dest: &mut [u8]) -> StreamResult<usize> {
        let mut filled = 0;
        while filled < dest.len() {
            let file = self.file_mut()?;
            match file.read(&mut dest[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(StreamError::ReadFailed {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }

    /// Writes all of `src`; returns its length.
    pub fn write(&mut self, src: &[u8]) -> StreamResult<usize> {
        let path = self.path.clone();
        let file = self.file_mut()?;
        file.write_all(src)
            .map_err(|source| StreamError::WriteFailed { path, source })?;
        self.position += src.len() as u64;
        Ok(src.len())
    }

    /// Flushes OS buffers.
    pub fn flush(&mut self) -> StreamResult<()> {
        let path = self.path.clone();
        self.file_mut()?
            .flush()
            .map_err(|source| StreamError::WriteFailed { path, source })
    }

    /// Moves to an absolute offset.
    pub fn seek(&mut self, offset: u64) -> StreamResult<()> {
        let path = self.path.clone();
        self.file_mut()?
            .seek(SeekFrom::Start(offset))
            .map_err(|source| StreamError::ReadFailed { path, source })?;
        self.position = offset;
        Ok(())
    }

    /// Current offset.
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// File length in bytes.
    pub fn length(&self) -> StreamResult<u64> {
        let file = self.file.as_ref().ok_or_else(|| StreamError::NotOpen {
            path: self.path.clone(),
        })?;
        file.metadata()
            .map(|m| m.len())
            .map_err(|source| StreamError::ReadFailed {
                path: self.path.clone(),
                source,
            })
    }
}

impl RandomAccess for FileHandle {
    fn read_at(&mut self, offset: u64, dest: &mut [u8]) -> StreamResult<usize> {
        self.seek(offset)?;
        self.read(dest)
    }

    fn length(&self) -> StreamResult<u64> {
        FileHandle::length(self)
    }

    fn read_exact_at(&mut self, offset: u64, dest: &mut [u8]) -> StreamResult<()> {
        self.seek(offset)?;
        let n = self.read(dest)?;
        if n < dest.len() {
            return Err(self.truncated(n, dest.len()));
        }
        Ok(())
    }
}

/// Seekable source reading a file from start to end.
#[derive(Debug)]
pub struct FileSource {
    handle: FileHandle,
    length: u64,
}

impl FileSource {
    /// Opens `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> StreamResult<Self> {
        let handle = FileHandle::open(path, FileMode::Read)?;
        let length = handle.length()?;
        Ok(Self { handle, length })
    }

    /// Binds `path` without opening it; call [`FileSource::open_file`] before reading.
    pub fn deferred(path: impl AsRef<Path>) -> Self {
        Self {
            handle: FileHandle::unopened(path),
            length: 0,
        }
    }

    /// Opens a deferred source.
    pub fn open_file(&mut self) -> StreamResult<()> {
        self.handle.reopen(FileMode::Read)?;
        self.length = self.handle.length()?;
        Ok(())
    }

    /// The file path.
    pub fn path(&self) -> &Path {
        self.handle.path()
    }
}

impl Source for FileSource {
    fn read(&mut self, dest: &mut [u8]) -> StreamResult<Transfer> {
        if self.handle.tell() >= self.length {
            return Ok(Transfer::EndOfStream);
        }
        let n = self.handle.read(dest)?;
        trace!(path = %self.handle.path().display(), position = self.handle.tell(), length = self.length, "file read");
        if n == 0 && !dest.is_empty() {
            // The file shrank below the length seen at open.
            return Err(self.handle.truncated(0, dest.len()));
        }
        Ok(Transfer::Bytes(n))
    }
}

impl Seekable for FileSource {
    fn seek(&mut self, offset: u64) -> StreamResult<()> {
        trace!(path = %self.handle.path().display(), offset, "file seek");
        self.handle.seek(offset)
    }

    fn tell(&self) -> u64 {
        self.handle.tell()
    }

    fn size(&self) -> u64 {
        self.length
    }
}

/// Sink writing to a file, truncating it on open.
#[derive(Debug)]
pub struct FileSink {
    handle: FileHandle,
    closed: bool,
}

impl FileSink {
    /// Creates or truncates `path`.
    pub fn create(path: impl AsRef<Path>) -> StreamResult<Self> {
        Ok(Self {
            handle: FileHandle::open(path, FileMode::Write)?,
            closed: false,
        })
    }

    /// Binds `path` without creating it; call [`FileSink::open_file`] before writing.
    pub fn deferred(path: impl AsRef<Path>) -> Self {
        Self {
            handle: FileHandle::unopened(path),
            closed: false,
        }
    }

    /// Creates the file of a deferred sink.
    pub fn open_file(&mut self) -> StreamResult<()> {
        self.handle.reopen(FileMode::Write)
    }

    /// The file path.
    pub fn path(&self) -> &Path {
        self.handle.path()
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.handle.tell()
    }
}

impl Sink for FileSink {
    fn write(&mut self, src: &[u8]) -> StreamResult<Transfer> {
        if self.closed {
            return Err(StreamError::SinkClosed { pending: src.len() });
        }
        let n = self.handle.write(src)?;
        trace!(path = %self.handle.path().display(), amount = n, total = self.handle.tell(), "file write");
        Ok(Transfer::Bytes(n))
    }

    fn close(&mut self) -> StreamResult<Transfer> {
        if !self.closed {
            self.handle.flush()?;
            self.closed = true;
        }
        Ok(Transfer::EndOfStream)
    }
}
