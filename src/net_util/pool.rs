//! Scoped reuse of receive buffers.
//!
//! Every receive borrows a 9000-octet buffer from the pool and
//! returns it when the handle drops, so the hot loop does not
//! allocate per datagram.  Buffers are zeroed on release: a reused
//! buffer must never leak one datagram's octets into the next
//! caller's view.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use crate::protocol::wire_types::MAX_DATAGRAM_SIZE;

/// Buffers kept for reuse; anything released beyond this is dropped.
const MAX_RETAINED: usize = 64;

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] buffer pool mutex poisoned, cannot recover from this - aborting";

/// A pool of fixed-size receive buffers.  Cloning gives a handle to
/// the same pool.
#[derive(Debug, Clone, Default)]
pub struct BufferPool {
    free: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow a zeroed buffer.  Allocates if the pool is empty.
    pub fn acquire(&self) -> PooledBuffer {
        let octets = self
            .free
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .pop()
            .unwrap_or_else(|| vec![0; MAX_DATAGRAM_SIZE]);

        PooledBuffer {
            octets,
            free: Arc::clone(&self.free),
        }
    }

    /// How many buffers are currently idle in the pool.
    pub fn retained(&self) -> usize {
        self.free.lock().expect(MUTEX_POISON_MESSAGE).len()
    }
}

/// A borrowed buffer.  Dropping it zeroes the contents and returns it
/// to the pool, on every exit path.
pub struct PooledBuffer {
    octets: Vec<u8>,
    free: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.octets
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.octets
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut octets = std::mem::take(&mut self.octets);
        octets.fill(0);

        let mut free = self.free.lock().expect(MUTEX_POISON_MESSAGE);
        if free.len() < MAX_RETAINED {
            free.push(octets);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_datagram_sized() {
        let pool = BufferPool::new();
        assert_eq!(MAX_DATAGRAM_SIZE, pool.acquire().len());
    }

    #[test]
    fn released_buffers_are_reused() {
        let pool = BufferPool::new();

        drop(pool.acquire());
        assert_eq!(1, pool.retained());

        drop(pool.acquire());
        assert_eq!(1, pool.retained());
    }

    #[test]
    fn released_buffers_are_zeroed() {
        let pool = BufferPool::new();

        let mut buffer = pool.acquire();
        buffer[0] = 0xff;
        buffer[MAX_DATAGRAM_SIZE - 1] = 0xff;
        drop(buffer);

        let reused = pool.acquire();
        assert!(reused.iter().all(|&octet| octet == 0));
    }

    #[test]
    fn retention_is_capped() {
        let pool = BufferPool::new();

        let buffers: Vec<_> = (0..MAX_RETAINED + 10).map(|_| pool.acquire()).collect();
        drop(buffers);

        assert_eq!(MAX_RETAINED, pool.retained());
    }

    #[test]
    fn buffers_return_on_panic_paths() {
        let pool = BufferPool::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _buffer = pool.acquire();
            panic!("receive blew up");
        }));

        assert!(result.is_err());
        assert_eq!(1, pool.retained());
    }
}
