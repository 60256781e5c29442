use std::sync::{Mutex, MutexGuard, PoisonError};

// Every critical section is a single read or write of the guarded value, so
// a panicking holder cannot leave it half-updated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
