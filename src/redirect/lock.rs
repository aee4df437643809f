//! A reentrant reader/single-writer lock.
//!
//! `RedirectDatabase` methods call back into other `RedirectDatabase`
//! methods while holding a lock (for example, chained-redirect resolution
//! reads the table while a bulk mutation still holds the write lock to
//! validate what it's about to insert). `std::sync::RwLock` and
//! `parking_lot::RwLock` both deadlock or panic if the owning thread tries
//! to re-acquire a lock it already holds, so this is hand-rolled on top of
//! `Mutex` + `Condvar`.
//!
//! Recursion rules, matching spec.md §3.3:
//! - A thread holding the write lock may re-acquire it, or acquire a read
//!   lock, any number of times.
//! - A thread holding only a read lock may not recurse into another read
//!   lock acquisition (that case is rejected rather than silently
//!   permitted, since it would hide a real read/write ordering bug).

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

#[derive(Default)]
struct State {
    /// `None` when unlocked, `Some(id)` when a thread holds the write lock.
    writer: Option<ThreadId>,
    writer_depth: u32,
    /// Threads currently holding a read lock, each with its recursion depth.
    readers: HashSet<ThreadId>,
    reader_count: u32,
}

/// A recursive reader/single-writer lock guarding `T`.
pub struct RecursiveRwLock<T> {
    state: Mutex<State>,
    condvar: Condvar,
    data: std::cell::UnsafeCell<T>,
}

unsafe impl<T: Send> Send for RecursiveRwLock<T> {}
unsafe impl<T: Send> Sync for RecursiveRwLock<T> {}

impl<T: Default> Default for RecursiveRwLock<T> {
    fn default() -> Self {
        RecursiveRwLock::new(T::default())
    }
}

impl<T> RecursiveRwLock<T> {
    pub fn new(value: T) -> Self {
        RecursiveRwLock {
            state: Mutex::new(State::default()),
            condvar: Condvar::new(),
            data: std::cell::UnsafeCell::new(value),
        }
    }

    pub fn read(&self) -> ReadGuard<'_, T> {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap();

        loop {
            if state.writer == Some(me) {
                // Writer re-entering as a reader: allowed, no extra bookkeeping
                // needed beyond the drop doing nothing for this borrow.
                break;
            }
            if state.readers.contains(&me) {
                panic!("read-while-read recursion on the same thread is not supported");
            }
            if state.writer.is_none() {
                state.reader_count += 1;
                state.readers.insert(me);
                break;
            }
            state = self.condvar.wait(state).unwrap();
        }

        drop(state);
        ReadGuard {
            lock: self,
            reentrant_via_writer: self.is_writer(me),
        }
    }

    pub fn write(&self) -> WriteGuard<'_, T> {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap();

        loop {
            if state.writer == Some(me) {
                state.writer_depth += 1;
                break;
            }
            if state.writer.is_none() && state.readers.is_empty() {
                state.writer = Some(me);
                state.writer_depth = 1;
                break;
            }
            state = self.condvar.wait(state).unwrap();
        }

        WriteGuard { lock: self }
    }

    fn is_writer(&self, id: ThreadId) -> bool {
        self.state.lock().unwrap().writer == Some(id)
    }

    fn unlock_read(&self, reentrant_via_writer: bool) {
        if reentrant_via_writer {
            return;
        }
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap();
        state.readers.remove(&me);
        state.reader_count = state.reader_count.saturating_sub(1);
        if state.reader_count == 0 {
            self.condvar.notify_all();
        }
    }

    fn unlock_write(&self) {
        let mut state = self.state.lock().unwrap();
        state.writer_depth -= 1;
        if state.writer_depth == 0 {
            state.writer = None;
            self.condvar.notify_all();
        }
    }
}

pub struct ReadGuard<'a, T> {
    lock: &'a RecursiveRwLock<T>,
    reentrant_via_writer: bool,
}

impl<'a, T> std::ops::Deref for ReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> Drop for ReadGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.unlock_read(self.reentrant_via_writer);
    }
}

pub struct WriteGuard<'a, T> {
    lock: &'a RecursiveRwLock<T>,
}

impl<'a, T> std::ops::Deref for WriteGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> std::ops::DerefMut for WriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for WriteGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.unlock_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn write_lock_is_reentrant() {
        let lock = RecursiveRwLock::new(0);
        let mut guard = lock.write();
        *guard += 1;
        {
            let mut inner = lock.write();
            *inner += 1;
        }
        assert_eq!(*guard, 2);
    }

    #[test]
    fn writer_can_read_while_holding_write_lock() {
        let lock = RecursiveRwLock::new(5);
        let guard = lock.write();
        let read = lock.read();
        assert_eq!(*read, 5);
        drop(read);
        drop(guard);
    }

    #[test]
    fn concurrent_readers_proceed() {
        let lock = Arc::new(RecursiveRwLock::new(42));
        let l2 = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            let g = l2.read();
            assert_eq!(*g, 42);
        });
        let g = lock.read();
        assert_eq!(*g, 42);
        drop(g);
        handle.join().unwrap();
    }

    #[test]
    fn writer_excludes_other_threads() {
        let lock = Arc::new(RecursiveRwLock::new(0));
        let guard = lock.write();
        let l2 = Arc::clone(&lock);
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = thread::spawn(move || {
            let _g = l2.write();
            tx.send(()).unwrap();
        });
        assert!(rx.recv_timeout(std::time::Duration::from_millis(50)).is_err());
        drop(guard);
        rx.recv().unwrap();
        handle.join().unwrap();
    }
}
