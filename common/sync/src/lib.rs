// Copyright 2020 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A `Mutex` that does not poison on panic.
//!
//! Every device and irqchip in this workspace is shared behind an
//! `Arc<sync::Mutex<_>>` and accessed from both vCPU threads and the
//! `vmsg` worker thread; a panicking holder should not wedge every other
//! holder behind a poisoned lock, so this wraps `std::sync::Mutex` and
//! unwraps the poison on every access instead of propagating it.

use std::sync::MutexGuard;
use std::sync::TryLockError;

pub struct Mutex<T: ?Sized> {
    inner: std::sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub fn new(val: T) -> Self {
        Mutex {
            inner: std::sync::Mutex::new(val),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<T> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn try_lock(&self) -> Option<MutexGuard<T>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Mutex::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn survives_panic() {
        let m = Arc::new(Mutex::new(0));
        let m2 = m.clone();
        let _ = thread::spawn(move || {
            let mut guard = m2.lock();
            *guard += 1;
            panic!("boom");
        })
        .join();

        assert_eq!(*m.lock(), 1);
    }
}
