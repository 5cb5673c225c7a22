//! Re-entrant locking for state shared across interception contexts.
//!
//! A handler running under the fd-table lock can recursively trigger
//! another classification lookup on the same thread (dup reads the source
//! class, then a nested call classifies again), so a plain `std::sync`
//! mutex would self-deadlock. This wraps a raw pthread mutex configured
//! `PTHREAD_MUTEX_RECURSIVE`.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// A re-entrant mutex over raw pthread primitives.
///
/// The pthread mutex attribute cannot be set in a `const fn`, so the
/// recursive attribute is applied lazily on first lock, serialized by a
/// spin flag.
pub struct RecursiveMutex<T> {
    raw: UnsafeCell<libc::pthread_mutex_t>,
    data: UnsafeCell<T>,
    initialized: AtomicBool,
    init_lock: AtomicBool,
}

unsafe impl<T: Send> Send for RecursiveMutex<T> {}
unsafe impl<T: Send> Sync for RecursiveMutex<T> {}

impl<T> RecursiveMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            raw: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
            data: UnsafeCell::new(data),
            initialized: AtomicBool::new(false),
            init_lock: AtomicBool::new(false),
        }
    }

    fn ensure_init(&self) {
        if self.initialized.load(Ordering::Acquire) {
            return;
        }
        while self
            .init_lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        if !self.initialized.load(Ordering::Relaxed) {
            unsafe {
                let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
                libc::pthread_mutexattr_init(&mut attr);
                libc::pthread_mutexattr_settype(&mut attr, libc::PTHREAD_MUTEX_RECURSIVE);
                libc::pthread_mutex_init(self.raw.get(), &attr);
                libc::pthread_mutexattr_destroy(&mut attr);
            }
            self.initialized.store(true, Ordering::Release);
        }
        self.init_lock.store(false, Ordering::Release);
    }

    pub fn lock(&self) -> RecursiveMutexGuard<'_, T> {
        self.ensure_init();
        unsafe {
            libc::pthread_mutex_lock(self.raw.get());
        }
        RecursiveMutexGuard { mutex: self }
    }
}

impl<T> Drop for RecursiveMutex<T> {
    fn drop(&mut self) {
        if self.initialized.load(Ordering::Acquire) {
            unsafe {
                libc::pthread_mutex_destroy(self.raw.get());
            }
        }
    }
}

pub struct RecursiveMutexGuard<'a, T> {
    mutex: &'a RecursiveMutex<T>,
}

impl<T> Deref for RecursiveMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for RecursiveMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for RecursiveMutexGuard<'_, T> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.mutex.raw.get());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentrant_lock_on_same_thread() {
        let m = RecursiveMutex::new(0u32);
        let mut outer = m.lock();
        *outer += 1;
        {
            // A second acquisition on the same thread must not deadlock.
            let inner = m.lock();
            assert_eq!(*inner, 1);
        }
        *outer += 1;
        drop(outer);
        assert_eq!(*m.lock(), 2);
    }

    #[test]
    fn excludes_other_threads() {
        use std::sync::Arc;
        let m = Arc::new(RecursiveMutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let m = Arc::clone(&m);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    m.lock().push(i);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(m.lock().len(), 800);
    }
}
