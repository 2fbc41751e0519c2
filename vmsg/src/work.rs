// Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The per-domain work queue. `vmsg_domain_enqueue_work` drew its
//! `vmsg_work` records from a fixed-page `mempool` and only fell back to
//! `vmm_malloc` once that pool was exhausted, so a burst of peer-up /
//! peer-down / send work couldn't outrun a single page allocation. The
//! pool itself was just bounded storage for otherwise-identical structs,
//! so here it is modeled as a capacity permit rather than a literal slab:
//! `WorkPool::try_acquire` hands out up to `capacity` permits before a
//! caller falls back to an unbounded heap-allocated work item, which
//! keeps the same bounded-vs-unbounded control flow without reimplementing
//! a page allocator Rust has no use for.

use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;

use base::warn;
use sync::Mutex;

use crate::message::Message;

pub(crate) struct WorkPool {
    capacity: usize,
    outstanding: AtomicUsize,
}

impl WorkPool {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        Arc::new(WorkPool {
            capacity,
            outstanding: AtomicUsize::new(0),
        })
    }

    /// Reserves a pool slot if one is free. `None` means the caller
    /// should fall back to a plain heap allocation for this work item.
    fn try_acquire(self: &Arc<Self>) -> Option<PoolPermit> {
        let mut cur = self.outstanding.load(Ordering::Acquire);
        loop {
            if cur >= self.capacity {
                return None;
            }
            match self.outstanding.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(PoolPermit {
                        pool: self.clone(),
                    })
                }
                Err(observed) => cur = observed,
            }
        }
    }
}

struct PoolPermit {
    pool: Arc<WorkPool>,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// What a queued work item does once the worker thread dequeues it.
pub(crate) enum WorkKind {
    PeerUp { peer_name: String, peer_addr: u32 },
    PeerDown { peer_name: String, peer_addr: u32 },
    Send { msg: Message },
    Start {
        id: u64,
        addr: u32,
        func: Box<dyn FnMut() + Send>,
    },
}

pub(crate) struct Work {
    pub(crate) kind: WorkKind,
    // Held only for its Drop impl, which releases the pool slot (if any)
    // back to the pool once this work item is done.
    _permit: Option<PoolPermit>,
}

/// The completion-signalled FIFO a domain's worker thread drains.
/// `vmsg_domain_worker_main` waited on a completion, popped the list
/// head under a spinlock, and re-queued the item at the tail on
/// `VMM_EAGAIN`; `Condvar` plus a `VecDeque` give the same shape.
pub(crate) struct WorkQueue {
    pool: Arc<WorkPool>,
    state: Mutex<QueueState>,
    avail: Condvar,
}

struct QueueState {
    items: VecDeque<Work>,
    shutdown: bool,
}

impl WorkQueue {
    pub(crate) fn new(pool_capacity: usize) -> Arc<Self> {
        Arc::new(WorkQueue {
            pool: WorkPool::new(pool_capacity),
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                shutdown: false,
            }),
            avail: Condvar::new(),
        })
    }

    pub(crate) fn push(&self, kind: WorkKind) {
        let permit = self.pool.try_acquire();
        if permit.is_none() {
            warn!("vmsg work pool exhausted, falling back to heap allocation");
        }
        let work = Work {
            kind,
            _permit: permit,
        };
        let mut state = self.state.lock();
        state.items.push_back(work);
        self.avail.notify_one();
    }

    fn push_front(&self, work: Work) {
        let mut state = self.state.lock();
        state.items.push_front(work);
        self.avail.notify_one();
    }

    /// Blocks until a work item is available or the queue is shut down.
    fn pop_blocking(&self) -> Option<Work> {
        let mut state = self.state.lock();
        loop {
            if let Some(work) = state.items.pop_front() {
                return Some(work);
            }
            if state.shutdown {
                return None;
            }
            state = self.avail.wait(state);
        }
    }

    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.avail.notify_all();
    }

    /// Removes every still-queued `Start` work item matching `addr` and
    /// `id`, mirroring `vmsg_node_stop_work`'s scan-and-delete over the
    /// domain's work list (only items that haven't started running yet
    /// can be cancelled this way).
    pub(crate) fn cancel_start(&self, addr: u32, id: u64) {
        let mut state = self.state.lock();
        state.items.retain(|work| match &work.kind {
            WorkKind::Start { addr: a, id: i, .. } => !(*a == addr && *i == id),
            _ => true,
        });
    }
}

/// Runs one worker-thread iteration: pop, dispatch, and on `Err(true)`
/// (the `VMM_EAGAIN` case) requeue at the tail instead of dropping the
/// item, exactly as `vmsg_domain_worker_main` did.
pub(crate) fn run_one<F>(queue: &Arc<WorkQueue>, mut dispatch: F) -> bool
where
    F: FnMut(&mut WorkKind) -> Result<(), bool>,
{
    let Some(mut work) = queue.pop_blocking() else {
        return false;
    };
    match dispatch(&mut work.kind) {
        Ok(()) => {}
        Err(true) => queue.push_front(work),
        Err(false) => {}
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_falls_back_to_heap_once_capacity_is_exhausted() {
        let pool = WorkPool::new(1);
        let first = pool.try_acquire();
        assert!(first.is_some());
        let second = pool.try_acquire();
        assert!(second.is_none());
        drop(first);
        let third = pool.try_acquire();
        assert!(third.is_some());
    }

    #[test]
    fn cancel_start_removes_only_the_matching_item() {
        let queue = WorkQueue::new(4);
        queue.push(WorkKind::Start {
            id: 1,
            addr: 10,
            func: Box::new(|| {}),
        });
        queue.push(WorkKind::Start {
            id: 2,
            addr: 10,
            func: Box::new(|| {}),
        });
        queue.cancel_start(10, 1);
        let remaining = queue.pop_blocking().unwrap();
        match remaining.kind {
            WorkKind::Start { id, .. } => assert_eq!(id, 2),
            _ => panic!("expected a Start work item"),
        }
    }
}
