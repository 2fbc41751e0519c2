// Copyright 2020 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Ambient stack shared by every crate in this workspace: a logging facade,
//! a common error/result type, and init helpers. Trimmed from the host-OS
//! abstraction layer the teacher crate carries (descriptors, mmap, Tube,
//! WaitContext) since this core has no host-process surface of its own.

mod errno;

pub use errno::{errno_result, Error, Result};
pub use log::*;

use std::sync::Once;

static LOG_INIT: Once = Once::new();

/// Initializes the `env_logger` backend for the `log` facade. Safe to call
/// more than once; only the first call takes effect.
pub fn init_logging() {
    LOG_INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .format_timestamp_micros()
            .init();
    });
}
