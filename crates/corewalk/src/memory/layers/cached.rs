//! Page-granular LRU read cache in front of another address space.
//!
//! Traversals re-read the same headers over and over (pool puddle headers,
//! table headers, tree nodes near the root). Against a live process every
//! one of those is a syscall, so reads are served from whole cached pages
//! whenever the page could be read in full.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use structinfo::{AccessError, AddressSpace};

/// Default page size used for caching.
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Default number of cached pages.
pub const DEFAULT_CACHE_PAGES: usize = 1024;

/// A cached page: `None` when the whole page could not be read.
type CachedPage = Option<Arc<Vec<u8>>>;

/// An `AddressSpace` that caches whole pages of an inner address space.
///
/// Pages that cannot be read in full are remembered as unreadable; requests
/// touching them are passed straight through to the inner space so that a
/// partially mapped page still serves its readable part.
pub struct CachedAddressSpace {
    inner: Arc<dyn AddressSpace>,
    page_size: u64,
    pages: Mutex<LruCache<u64, CachedPage>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedAddressSpace {
    /// Wrap `inner` with a cache of `cache_pages` pages of `page_size` bytes.
    pub fn new(inner: Arc<dyn AddressSpace>, page_size: u64, cache_pages: usize) -> Self {
        let page_size = page_size.max(1).next_power_of_two();
        let capacity = NonZeroUsize::new(cache_pages).unwrap_or(NonZeroUsize::MIN);
        CachedAddressSpace {
            inner,
            page_size,
            pages: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Wrap `inner` with the default page size and capacity.
    pub fn with_defaults(inner: Arc<dyn AddressSpace>) -> Self {
        Self::new(inner, DEFAULT_PAGE_SIZE, DEFAULT_CACHE_PAGES)
    }

    /// Drop every cached page. Needed after a live target has run.
    pub fn invalidate(&self) {
        self.pages.lock().clear();
    }

    /// (hits, misses) page lookups so far.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    fn page(&self, page_addr: u64) -> CachedPage {
        if let Some(page) = self.pages.lock().get(&page_addr) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return page.clone();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let page = self
            .inner
            .read(page_addr, self.page_size as usize)
            .ok()
            .filter(|bytes| bytes.len() as u64 == self.page_size)
            .map(Arc::new);
        self.pages.lock().put(page_addr, page.clone());
        page
    }
}

impl AddressSpace for CachedAddressSpace {
    fn read(&self, address: u64, length: usize) -> Result<Vec<u8>, AccessError> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let end = match address.checked_add(length as u64) {
            Some(end) => end,
            None => return self.inner.read(address, length),
        };

        let mask = !(self.page_size - 1);
        let mut out = Vec::with_capacity(length);
        let mut page_addr = address & mask;
        while page_addr < end {
            let Some(page) = self.page(page_addr) else {
                return self.inner.read(address, length);
            };
            let next = page_addr.checked_add(self.page_size);
            let from = address.max(page_addr) - page_addr;
            let to = next.map_or(end, |next| end.min(next)) - page_addr;
            out.extend_from_slice(&page[from as usize..to as usize]);
            match next {
                Some(next) => page_addr = next,
                None => break,
            }
        }
        Ok(out)
    }

    fn is_valid(&self, address: u64, length: u64) -> bool {
        self.inner.is_valid(address, length)
    }
}
