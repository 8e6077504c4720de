//! Seekable source over a random-access backing, cached in fixed-size pages.
//!
//! At most `max_pages` pages are resident. When the cache is full the page
//! loaded earliest is evicted, regardless of how recently it was read.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{StreamError, StreamResult};
use crate::file::{FileHandle, FileMode};
use crate::stream::{RandomAccess, Seekable, Source, Transfer};

/// Default page size: 64 KiB.
pub const DEFAULT_PAGE_SIZE: usize = 64 * 1024;

/// Default resident page cap.
pub const DEFAULT_MAX_PAGES: usize = 64;

/// Paged cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedCacheConfig {
    /// Page size in bytes (default 64 KiB).
    pub page_size: usize,
    /// Maximum resident pages (default 64).
    pub max_pages: usize,
}

impl Default for PagedCacheConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl PagedCacheConfig {
    fn validate(&self) -> StreamResult<()> {
        if self.page_size == 0 || self.max_pages == 0 {
            return Err(StreamError::InvalidConfig {
                reason: format!(
                    "page size and page count must be non-zero (page_size {}, max_pages {})",
                    self.page_size, self.max_pages
                ),
            });
        }
        Ok(())
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedCacheStats {
    /// Page lookups served from memory.
    pub hits: u64,
    /// Page lookups that had to load.
    pub misses: u64,
    /// Pages read from the backing.
    pub loads: u64,
    /// Pages dropped to make room.
    pub evictions: u64,
}

/// Source reading through a bounded page cache.
pub struct PagedSource<F = FileHandle> {
    backing: F,
    config: PagedCacheConfig,
    pages: HashMap<u64, Vec<u8>>,
    load_order: VecDeque<u64>,
    position: u64,
    length: u64,
    valid_pages: u64,
    stats: PagedCacheStats,
}

impl<F: RandomAccess> PagedSource<F> {
    /// Wraps an opened backing.
    pub fn new(backing: F, config: PagedCacheConfig) -> StreamResult<Self> {
        config.validate()?;
        let length = backing.length()?;
        let mut source = Self {
            backing,
            config,
            pages: HashMap::new(),
            load_order: VecDeque::new(),
            position: 0,
            length: 0,
            valid_pages: 0,
            stats: PagedCacheStats::default(),
        };
        source.set_length(length);
        Ok(source)
    }

    fn set_length(&mut self, length: u64) {
        let page_size = self.config.page_size as u64;
        self.length = length;
        self.valid_pages = length.div_ceil(page_size);
        self.position = 0;
        self.pages.clear();
        self.load_order.clear();
    }

    /// The configuration.
    pub fn config(&self) -> &PagedCacheConfig {
        &self.config
    }

    /// Cache counters.
    pub fn stats(&self) -> &PagedCacheStats {
        &self.stats
    }

    /// Number of pages covering the backing.
    pub fn page_count(&self) -> u64 {
        self.valid_pages
    }

    /// Pages currently in memory.
    pub fn resident_pages(&self) -> usize {
        self.pages.len()
    }

    /// True if page `index` is in memory.
    pub fn is_resident(&self, index: u64) -> bool {
        self.pages.contains_key(&index)
    }

    /// Resident page indices, oldest load first.
    pub fn load_order(&self) -> impl Iterator<Item = u64> + '_ {
        self.load_order.iter().copied()
    }

    /// Memory held by resident pages, counted in whole pages.
    pub fn size_in_memory(&self) -> usize {
        self.config.page_size * self.pages.len()
    }

    /// Page `index`, loading it if needed. `None` past the last page.
    pub fn page(&mut self, index: u64) -> StreamResult<Option<&[u8]>> {
        if index >= self.valid_pages {
            return Ok(None);
        }
        if self.pages.contains_key(&index) {
            self.stats.hits += 1;
            trace!(page = index, "page cache hit");
            return Ok(self.pages.get(&index).map(Vec::as_slice));
        }

        self.stats.misses += 1;
        if self.pages.len() >= self.config.max_pages {
            if let Some(oldest) = self.load_order.pop_front() {
                self.pages.remove(&oldest);
                self.stats.evictions += 1;
                debug!(evicted = oldest, loading = index, "page cache eviction");
            }
        }

        let page = self.load(index)?;
        self.pages.insert(index, page);
        self.load_order.push_back(index);
        Ok(self.pages.get(&index).map(Vec::as_slice))
    }

    fn load(&mut self, index: u64) -> StreamResult<Vec<u8>> {
        let page_size = self.config.page_size as u64;
        let offset = index * page_size;
        let want = (self.length - offset).min(page_size) as usize;
        let mut page = vec![0u8; want];
        self.backing.read_exact_at(offset, &mut page)?;
        self.stats.loads += 1;
        trace!(page = index, offset, bytes = want, "page loaded");
        Ok(page)
    }

    /// Splits off the backing.
    pub fn into_inner(self) -> F {
        self.backing
    }
}

impl PagedSource<FileHandle> {
    /// Opens `path` and wraps it.
    pub fn open(path: impl AsRef<Path>, config: PagedCacheConfig) -> StreamResult<Self> {
        Self::new(FileHandle::open(path, FileMode::Read)?, config)
    }

    /// Binds `path` without opening it; call [`PagedSource::open_file`] before reading.
    pub fn deferred(path: impl AsRef<Path>, config: PagedCacheConfig) -> StreamResult<Self> {
        config.validate()?;
        Ok(Self {
            backing: FileHandle::unopened(path),
            config,
            pages: HashMap::new(),
            load_order: VecDeque::new(),
            position: 0,
            length: 0,
            valid_pages: 0,
            stats: PagedCacheStats::default(),
        })
    }

    /// Opens a deferred source, resetting position and cache.
    pub fn open_file(&mut self) -> StreamResult<()> {
        self.backing.reopen(FileMode::Read)?;
        let length = self.backing.length()?;
        self.set_length(length);
        debug!(path = %self.backing.path().display(), length, pages = self.valid_pages, "paged source opened");
        Ok(())
    }

    /// The file path.
    pub fn path(&self) -> &Path {
        self.backing.path()
    }
}

impl<F: RandomAccess> Source for PagedSource<F> {
    fn read(&mut self, dest: &mut [u8]) -> StreamResult<Transfer> {
        let page_size = self.config.page_size as u64;
        let index = self.position / page_size;
        let in_page = (self.position % page_size) as usize;
        let Some(page) = self.page(index)? else {
            return Ok(Transfer::EndOfStream);
        };
        if in_page >= page.len() {
            // Past the end of a short last page.
            return Ok(Transfer::EndOfStream);
        }
        let n = dest.len().min(page.len() - in_page);
        dest[..n].copy_from_slice(&page[in_page..in_page + n]);
        self.position += n as u64;
        Ok(Transfer::Bytes(n))
    }
}

impl<F: RandomAccess> Seekable for PagedSource<F> {
    fn seek(&mut self, offset: u64) -> StreamResult<()> {
        let _ = self.page(offset / self.config.page_size as u64)?;
        self.position = offset;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.position
    }

    fn size(&self) -> u64 {
        self.length
    }
}
