// Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::io;
use std::result;

use thiserror::Error;

/// A wrapper for libc errno, plus the handful of error cases this core's
/// emulators raise themselves (`from_raw`).
#[derive(Error, Clone, Copy, PartialEq, Eq)]
pub struct Error(i32);

impl Error {
    /// Constructs an `Error` from a raw errno value.
    pub fn new(e: i32) -> Error {
        Error(e)
    }

    /// Returns the last OS error as an `Error`.
    pub fn last() -> Error {
        Error(io::Error::last_os_error().raw_os_error().unwrap_or_default())
    }

    /// The raw errno value wrapped by this `Error`.
    pub fn errno(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        io::Error::from_raw_os_error(self.0).fmt(f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "errno({})", self.0)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error(e.raw_os_error().unwrap_or_default())
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Returns `Err(Error::last())`. Convenient as the tail of a libc-backed call.
pub fn errno_result<T>() -> Result<T> {
    Err(Error::last())
}
