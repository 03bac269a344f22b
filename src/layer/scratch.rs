use std::cell::RefCell;
use std::rc::Rc;

#[derive(Default)]
struct Pool {
    users: usize,
    words: Vec<u32>,
    bytes: Vec<u8>,
    floats: Vec<f32>,
}

impl Pool {
    fn release(&mut self) {
        self.users = self.users.saturating_sub(1);
        if self.users == 0 {
            self.words = Vec::new();
            self.bytes = Vec::new();
            self.floats = Vec::new();
        }
    }
}

/// Staging arrays shared by every layer of a scene, so per-portion updates
/// do not allocate. Storage is freed when the last lease goes away.
#[derive(Clone, Default)]
pub struct ScratchMemory {
    pool: Rc<RefCell<Pool>>,
}

impl ScratchMemory {
    pub fn new() -> ScratchMemory {
        ScratchMemory::default()
    }

    pub fn acquire(&self) -> ScratchLease {
        self.pool.borrow_mut().users += 1;
        ScratchLease {
            pool: Rc::clone(&self.pool),
        }
    }

    /// Number of outstanding leases
    pub fn users(&self) -> usize {
        self.pool.borrow().users
    }

    pub fn capacity_bytes(&self) -> usize {
        let pool = self.pool.borrow();
        pool.words.capacity() * 4 + pool.bytes.capacity() + pool.floats.capacity() * 4
    }
}

/// One layer's hold on the scratch pool, released on drop
pub struct ScratchLease {
    pool: Rc<RefCell<Pool>>,
}

fn zeroed<T: Copy + Default>(buf: &mut Vec<T>, len: usize) -> &mut [T] {
    if buf.len() < len {
        buf.resize(len, T::default());
    }
    let slice = &mut buf[..len];
    slice.fill(T::default());
    slice
}

impl ScratchLease {
    pub fn with_words<R>(&self, len: usize, f: impl FnOnce(&mut [u32]) -> R) -> R {
        let mut pool = self.pool.borrow_mut();
        f(zeroed(&mut pool.words, len))
    }

    pub fn with_bytes<R>(&self, len: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut pool = self.pool.borrow_mut();
        f(zeroed(&mut pool.bytes, len))
    }

    pub fn with_floats<R>(&self, len: usize, f: impl FnOnce(&mut [f32]) -> R) -> R {
        let mut pool = self.pool.borrow_mut();
        f(zeroed(&mut pool.floats, len))
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        self.pool.borrow_mut().release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leases_pair_with_releases() {
        let scratch = ScratchMemory::new();
        let a = scratch.acquire();
        let b = scratch.acquire();
        assert_eq!(scratch.users(), 2);

        a.with_words(64, |words| words[63] = 7);
        drop(a);
        assert_eq!(scratch.users(), 1);
        assert!(scratch.capacity_bytes() > 0);

        // Reused storage comes back zeroed
        b.with_words(64, |words| assert_eq!(words[63], 0));
        drop(b);
        assert_eq!(scratch.users(), 0);
        assert_eq!(scratch.capacity_bytes(), 0);
    }
}
