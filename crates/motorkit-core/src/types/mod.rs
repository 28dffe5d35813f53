//! Type aliases for shared state.
//!
//! Gives names to the `Arc<Mutex<T>>` / `Arc<RwLock<T>>` shapes used across
//! the link and session code. Uses `parking_lot` locks.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// A thread-safe, mutex-protected wrapper for cross-thread sharing.
pub type ThreadSafe<T> = Arc<Mutex<T>>;

/// A thread-safe reader-writer lock wrapper for read-heavy state.
///
/// Multiple readers can access concurrently, writes require exclusive access.
pub type ThreadSafeRw<T> = Arc<RwLock<T>>;

/// Create a new thread-safe wrapper.
#[inline]
pub fn thread_safe<T>(value: T) -> ThreadSafe<T> {
    Arc::new(Mutex::new(value))
}

/// Create a new thread-safe reader-writer wrapper.
#[inline]
pub fn thread_safe_rw<T>(value: T) -> ThreadSafeRw<T> {
    Arc::new(RwLock::new(value))
}
