use std::sync::{Mutex, MutexGuard, PoisonError};

pub trait MutexUtils<T> {
    /// Run `f` while holding the lock, released as soon as `f` returns.
    ///
    /// A lock poisoned by a panicking holder is recovered: the guarded
    /// connections and buffers stay usable after a failed item.
    fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(MutexGuard<'_, T>) -> R;
}

impl<T> MutexUtils<T> for Mutex<T> {
    fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(MutexGuard<'_, T>) -> R,
    {
        f(self.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn poisoned_lock_is_recovered() {
        let counter = Arc::new(Mutex::new(1));
        let poisoner = Arc::clone(&counter);
        let _ = thread::spawn(move || {
            poisoner.with_lock(|mut n| {
                *n += 1;
                panic!("holder panicked");
            })
        })
        .join();

        assert!(counter.is_poisoned());
        assert_eq!(counter.with_lock(|n| *n), 2);
    }
}
