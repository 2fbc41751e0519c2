// Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The message type nodes exchange. `vmm_vmsg_alloc`/`alloc_ext` paired
//! a malloc'd header with an xref refcount so a producer could drop its
//! reference the moment the work queue (or a fast-path receiver) picked
//! the message up; `Arc` gives the same sharing for free.

use std::sync::Arc;

/// A node address. `ADDR_ANY` is a wildcard destination (broadcast to
/// every ready node); real node addresses start at `ADDR_MIN` and are
/// always below the `ADDR_ANY` sentinel.
pub const ADDR_ANY: u32 = u32::MAX;
pub const ADDR_MIN: u32 = 1;

/// A message in flight between nodes of the same domain. Cheap to
/// clone: the payload is shared, not copied, matching the refcounted
/// header the C side passed around by pointer.
#[derive(Clone, Debug)]
pub struct Message {
    pub dst: u32,
    pub src: u32,
    pub local: u32,
    data: Arc<[u8]>,
}

impl Message {
    /// Builds a message addressed to `dst`. `src` is filled in by
    /// `Node::send`/`send_fast` with the sending node's own address, so
    /// callers normally pass 0 here.
    pub fn new(dst: u32, local: u32, data: Vec<u8>) -> Self {
        Message {
            dst,
            src: 0,
            local,
            data: Arc::from(data),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_the_payload_without_copying() {
        let msg = Message::new(5, 0, vec![1, 2, 3]);
        let cloned = msg.clone();
        assert_eq!(cloned.data(), msg.data());
        assert_eq!(cloned.len(), 3);
    }
}
