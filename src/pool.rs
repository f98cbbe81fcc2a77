use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// A process-wide free-list of reusable byte buffers.
///
/// Each proxied connection drives its own read/parse/write loop, and every
/// iteration of that loop needs a scratch buffer. Rather than allocate one
/// per iteration, pipelines borrow a buffer from this pool at connection
/// start and return it (cleared, capacity retained) when the connection
/// ends, so steady-state traffic does not churn the allocator.
#[derive(Clone)]
pub struct BufferPool {
    free: Arc<Mutex<Vec<Vec<u8>>>>,
    default_capacity: usize,
}

impl BufferPool {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            free: Arc::new(Mutex::new(Vec::new())),
            default_capacity,
        }
    }

    /// Borrows a buffer from the pool, allocating a fresh one if the pool is
    /// empty.
    pub fn acquire(&self) -> PooledBuf {
        let buf = self
            .free
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.default_capacity));
        PooledBuf {
            buf: Some(buf),
            pool: self.free.clone(),
        }
    }
}

/// A buffer checked out of a [`BufferPool`]. Clears and returns itself to
/// the pool when dropped.
pub struct PooledBuf {
    buf: Option<Vec<u8>>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;
    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer taken")
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer taken")
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            self.pool.lock().unwrap_or_else(|p| p.into_inner()).push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BufferPool;

    #[test]
    fn buffers_are_recycled() {
        let pool = BufferPool::new(64);
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"hello");
        }
        let buf = pool.acquire();
        assert!(buf.is_empty(), "recycled buffer should be cleared");
        assert!(buf.capacity() >= 5);
    }
}
