// Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A node subscribed to a [`crate::Domain`]. `struct vmm_vmsg_node_ops`
//! is implied by the `node->ops->peer_down`/`peer_up`/`can_recv_msg`/
//! `recv_msg` call sites in the original; `NodeOps` gives it a name.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Weak;

use crate::domain::Domain;
use crate::message::Message;
use crate::Error;
use crate::Result;

/// Callbacks a node implements to take part in peer notifications and
/// message delivery. All of these run on the owning domain's worker
/// thread, except for the fast-path `send_fast` call into `recv_msg`,
/// which runs on the caller's thread instead.
pub trait NodeOps: Send + Sync {
    /// Whether this node currently has room to accept a unicast
    /// message. Broadcast messages are delivered regardless.
    fn can_recv_msg(&self) -> bool {
        true
    }

    fn recv_msg(&self, msg: &Message) -> Result<()>;

    /// Another node in the domain became ready.
    fn peer_up(&self, _peer_name: &str, _peer_addr: u32) {}

    /// Another node in the domain stopped being ready.
    fn peer_down(&self, _peer_name: &str, _peer_addr: u32) {}
}

pub struct Node {
    pub(crate) name: String,
    pub(crate) addr: u32,
    pub(crate) max_data_len: usize,
    pub(crate) is_ready: AtomicBool,
    pub(crate) ops: Box<dyn NodeOps>,
    pub(crate) domain: Weak<Domain>,
}

impl Node {
    pub(crate) fn new(
        name: String,
        addr: u32,
        max_data_len: usize,
        ops: Box<dyn NodeOps>,
        domain: Weak<Domain>,
    ) -> Self {
        Node {
            name,
            addr,
            max_data_len,
            is_ready: AtomicBool::new(false),
            ops,
            domain,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> u32 {
        self.addr
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::Acquire)
    }

    fn domain(&self) -> Result<std::sync::Arc<Domain>> {
        self.domain.upgrade().ok_or(Error::DomainGone)
    }

    /// Marks the node ready and queues a peer-up notification to every
    /// other ready node (which in turn get told about this one).
    /// A no-op if the node was already ready.
    pub fn peer_up(&self) -> Result<()> {
        if !self.is_ready.swap(true, Ordering::AcqRel) {
            self.domain()?.enqueue_peer_up(self.name.clone(), self.addr);
        }
        Ok(())
    }

    /// Marks the node not-ready and queues a peer-down notification to
    /// every other ready node. A no-op if already not ready.
    pub fn peer_down(&self) -> Result<()> {
        if self.is_ready.swap(false, Ordering::AcqRel) {
            self.domain()?
                .enqueue_peer_down(self.name.clone(), self.addr);
        }
        Ok(())
    }

    /// Sends `msg` to its destination. `fast` bypasses the work queue
    /// and dispatches synchronously on the caller's thread; otherwise
    /// the send is queued and runs on the domain's worker thread.
    pub fn send(&self, mut msg: Message, fast: bool) -> Result<()> {
        if msg.is_empty() || msg.dst == self.addr || msg.dst < crate::message::ADDR_MIN {
            return Err(Error::InvalidMessage);
        }
        msg.src = self.addr;

        let domain = self.domain()?;
        if fast {
            domain.send_fast(&msg)
        } else {
            domain.enqueue_send(msg);
            Ok(())
        }
    }

    /// Schedules `func` to run once on the domain's worker thread,
    /// returning a handle that can later be passed to `stop_work` to
    /// cancel it before it runs.
    pub fn start_work<F>(&self, func: F) -> Result<u64>
    where
        F: FnMut() + Send + 'static,
    {
        let domain = self.domain()?;
        Ok(domain.enqueue_start(self.addr, Box::new(func)))
    }

    /// Cancels a pending `start_work` closure if it hasn't run yet.
    pub fn stop_work(&self, id: u64) -> Result<()> {
        self.domain()?.cancel_start(self.addr, id);
        Ok(())
    }
}
