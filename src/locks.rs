// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-tolerant lock helpers.
//!
//! A panic inside one install future must not take the whole run down with
//! it. These helpers recover the guard of a poisoned [`RwLock`] and log the
//! event instead of propagating the panic.
//!
//! ```
//! use std::sync::RwLock;
//! use tcsync::locks::{resilient_read, resilient_write};
//!
//! let lock = RwLock::new(1);
//! *resilient_write(&lock) += 1;
//! assert_eq!(*resilient_read(&lock), 2);
//! ```

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poisoning.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "tcsync::locks",
                "RwLock poisoned during read; recovering. A task panicked while holding it."
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering from poisoning.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "tcsync::locks",
                "RwLock poisoned during write; recovering. A task panicked while holding it."
            );
            poisoned.into_inner()
        }
    }
}
