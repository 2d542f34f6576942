//! Per-thread pool of read buffers.
//!
//! Used only when content is read from the file rather than sliced from a
//! whole-file mapping. Each thread keeps at most [`MAX_CACHED_BUFFERS`]
//! buffers, sorted by decreasing capacity, with explicit eviction of the
//! smallest. Buffers larger than [`LARGE_BUFFER`] bypass the pool.

use std::cell::RefCell;

/// Buffers kept per thread.
pub const MAX_CACHED_BUFFERS: usize = 3;

/// Requests above this size are never pooled.
pub const LARGE_BUFFER: usize = 0x10000;

/// Allocation granularity.
const PAGE_SIZE: usize = 0x1000;

thread_local! {
    static CACHE: RefCell<Vec<Vec<u8>>> = RefCell::new(Vec::with_capacity(MAX_CACHED_BUFFERS + 1));
}

/// A pooled byte buffer whose usable window is `[0, limit)`.
#[derive(Debug)]
pub struct ImageBuffer {
    data: Vec<u8>,
    limit: usize,
}

impl ImageBuffer {
    fn allocate(size: usize) -> Self {
        let capacity = size.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        Self {
            data: vec![0u8; capacity],
            limit: size,
        }
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.limit]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.limit]
    }
}

/// Get a buffer with `limit() == size` and `capacity() >= size`.
pub fn acquire(size: usize) -> ImageBuffer {
    if size > LARGE_BUFFER {
        return ImageBuffer::allocate(size);
    }

    let cached = CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        // Sorted by decreasing capacity: the best fit is the last one that fits.
        let index = cache.iter().rposition(|buffer| buffer.len() >= size);
        index.map(|index| cache.remove(index))
    });

    match cached {
        Some(data) => ImageBuffer { data, limit: size },
        None => ImageBuffer::allocate(size),
    }
}

/// Return a buffer to this thread's pool.
pub fn release(buffer: ImageBuffer) {
    if buffer.capacity() > LARGE_BUFFER {
        return;
    }

    CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        cache.push(buffer.data);
        cache.sort_by(|a, b| b.len().cmp(&a.len()));
        cache.truncate(MAX_CACHED_BUFFERS);
    });
}

/// Number of buffers pooled on the calling thread.
pub fn cached_buffers() -> usize {
    CACHE.with(|cache| cache.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_and_capacity() {
        for size in [1, 17, PAGE_SIZE, PAGE_SIZE + 1, LARGE_BUFFER, LARGE_BUFFER + 1, 3 * LARGE_BUFFER] {
            let buffer = acquire(size);
            assert_eq!(buffer.limit(), size);
            assert!(buffer.capacity() >= size);
            assert_eq!(buffer.capacity() % PAGE_SIZE, 0);
            release(buffer);
        }
    }

    #[test]
    fn test_reuse_best_fit() {
        std::thread::spawn(|| {
            let large = acquire(3 * PAGE_SIZE);
            let small = acquire(PAGE_SIZE);
            release(large);
            release(small);
            assert_eq!(cached_buffers(), 2);

            let buffer = acquire(100);
            assert_eq!(buffer.capacity(), PAGE_SIZE);
            assert_eq!(cached_buffers(), 1);
            release(buffer);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_large_buffers_bypass_pool() {
        std::thread::spawn(|| {
            release(acquire(LARGE_BUFFER + 1));
            assert_eq!(cached_buffers(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_evicts_smallest() {
        std::thread::spawn(|| {
            let buffers: Vec<_> = (1..=4).map(|pages| acquire(pages * PAGE_SIZE)).collect();
            for buffer in buffers {
                release(buffer);
            }
            assert_eq!(cached_buffers(), MAX_CACHED_BUFFERS);

            // The one-page buffer was evicted, so a one-page request takes the two-page one.
            let buffer = acquire(PAGE_SIZE);
            assert_eq!(buffer.capacity(), 2 * PAGE_SIZE);
        })
        .join()
        .unwrap();
    }
}
