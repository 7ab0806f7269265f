//! Reusable read-buffer pool.
//!
//! Connection handlers read blob bodies into a `BytesMut` sized for the
//! maximum blob; pooling the buffers avoids a 2 MiB allocation per request.

use bytes::BytesMut;
use depot_core::MAX_BLOB_SIZE;
use std::sync::Mutex;

/// Buffers smaller than this after use are dropped instead of pooled
/// (freezing a body splits off part of the allocation).
const MIN_RETAINED_CAPACITY: usize = 64 * 1024;

/// Maximum number of idle buffers kept.
const MAX_POOLED: usize = 32;

/// A pool of read buffers shared by a server's connection handlers.
pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
        }
    }

    /// Take a buffer from the pool, or allocate a fresh one.
    pub fn get(&self) -> BytesMut {
        let mut buffers = self.buffers.lock().expect("buffer pool lock poisoned");
        buffers
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(MAX_BLOB_SIZE + 1024))
    }

    /// Return a buffer to the pool.
    pub fn put(&self, mut buf: BytesMut) {
        buf.clear();
        if buf.capacity() < MIN_RETAINED_CAPACITY {
            return;
        }
        let mut buffers = self.buffers.lock().expect("buffer pool lock poisoned");
        if buffers.len() < MAX_POOLED {
            buffers.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuses_buffers() {
        let pool = BufferPool::new();
        let mut buf = pool.get();
        buf.extend_from_slice(b"scratch");
        let capacity = buf.capacity();
        pool.put(buf);

        let reused = pool.get();
        assert!(reused.is_empty());
        assert_eq!(reused.capacity(), capacity);
    }

    #[test]
    fn test_drops_shrunken_buffers() {
        let pool = BufferPool::new();
        pool.put(BytesMut::with_capacity(16));
        assert_eq!(pool.buffers.lock().unwrap().len(), 0);
    }
}
