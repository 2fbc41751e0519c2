// Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A named domain: a set of nodes sharing one worker thread and one
//! work queue. Grounded on `vmm_vmsg_domain_create`/`destroy` and the
//! `vmsg_node_*_func` dispatch bodies that run on `vmsg_domain_worker_main`.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::thread;
use std::thread::JoinHandle;

use base::warn;
use sync::Mutex;

use crate::message::Message;
use crate::message::ADDR_ANY;
use crate::message::ADDR_MIN;
use crate::node::Node;
use crate::node::NodeOps;
use crate::Error;
use crate::Result;

use crate::work::run_one;
use crate::work::WorkKind;
use crate::work::WorkQueue;

/// Default depth of a domain's fixed work pool before falls back to
/// heap-allocated work items kick in. `work_pool_pages` in the original
/// sized a mempool in pages; this sizes it in work-item slots instead.
const DEFAULT_WORK_POOL_CAPACITY: usize = 64;

pub struct Domain {
    name: String,
    queue: Arc<WorkQueue>,
    nodes: Mutex<Vec<Arc<Node>>>,
    next_addr: AtomicU32,
    next_work_id: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
    self_ref: Mutex<Weak<Domain>>,
}

impl Domain {
    /// Creates a domain and starts its worker thread. `work_pool_capacity`
    /// of 0 uses the default.
    pub fn create(name: impl Into<String>, work_pool_capacity: usize) -> Arc<Self> {
        let capacity = if work_pool_capacity == 0 {
            DEFAULT_WORK_POOL_CAPACITY
        } else {
            work_pool_capacity
        };
        let domain = Arc::new(Domain {
            name: name.into(),
            queue: WorkQueue::new(capacity),
            nodes: Mutex::new(Vec::new()),
            next_addr: AtomicU32::new(ADDR_MIN),
            next_work_id: AtomicU64::new(1),
            worker: Mutex::new(None),
            self_ref: Mutex::new(Weak::new()),
        });
        *domain.self_ref.lock() = Arc::downgrade(&domain);

        let worker_domain = domain.clone();
        let handle = thread::Builder::new()
            .name(format!("vmsg-{}", worker_domain.name))
            .spawn(move || worker_domain.worker_main())
            .expect("failed to spawn vmsg worker thread");
        *domain.worker.lock() = Some(handle);

        domain
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the worker thread and blocks until it has drained in
    /// flight work. Any nodes still registered keep their `Arc<Node>`
    /// valid, but can no longer send or receive through this domain.
    pub fn destroy(self: Arc<Self>) {
        if !self.nodes.lock().is_empty() {
            warn!("destroying vmsg domain {} with nodes still attached", self.name);
        }
        self.queue.shutdown();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// Registers a new node and returns it. `addr` of `ADDR_ANY` asks
    /// the domain to assign the next free address.
    pub fn create_node(
        self: &Arc<Self>,
        name: impl Into<String>,
        addr: u32,
        max_data_len: usize,
        ops: Box<dyn NodeOps>,
    ) -> Result<Arc<Node>> {
        let name = name.into();
        let mut nodes = self.nodes.lock();
        if nodes.iter().any(|n| n.name == name) {
            return Err(Error::NodeNameTaken);
        }

        let assigned = if addr == ADDR_ANY {
            self.next_addr.fetch_add(1, Ordering::AcqRel)
        } else {
            if addr < ADDR_MIN || nodes.iter().any(|n| n.addr == addr) {
                return Err(Error::AddressInUse);
            }
            addr
        };

        let node = Arc::new(Node::new(
            name,
            assigned,
            max_data_len,
            ops,
            self.self_ref.lock().clone(),
        ));
        nodes.push(node.clone());
        Ok(node)
    }

    /// Unregisters a node, first running its peer-down notification
    /// synchronously so dependents see it leave before it disappears
    /// from the node list.
    pub fn destroy_node(&self, node: &Arc<Node>) -> Result<()> {
        node.peer_down()?;
        let mut nodes = self.nodes.lock();
        nodes.retain(|n| !Arc::ptr_eq(n, node));
        Ok(())
    }

    pub fn find_node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.lock().iter().find(|n| n.name == name).cloned()
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.lock().clone()
    }

    pub(crate) fn enqueue_peer_up(&self, peer_name: String, peer_addr: u32) {
        self.queue.push(WorkKind::PeerUp { peer_name, peer_addr });
    }

    pub(crate) fn enqueue_peer_down(&self, peer_name: String, peer_addr: u32) {
        self.queue.push(WorkKind::PeerDown { peer_name, peer_addr });
    }

    pub(crate) fn enqueue_send(&self, msg: Message) {
        self.queue.push(WorkKind::Send { msg });
    }

    pub(crate) fn enqueue_start(&self, addr: u32, func: Box<dyn FnMut() + Send>) -> u64 {
        let id = self.next_work_id.fetch_add(1, Ordering::AcqRel);
        self.queue.push(WorkKind::Start { id, addr, func });
        id
    }

    pub(crate) fn cancel_start(&self, addr: u32, id: u64) {
        self.queue.cancel_start(addr, id);
    }

    /// The fast path: dispatches a message directly against the live
    /// node list without going through the work queue. Mirrors
    /// `vmsg_node_send_fast_func` exactly, including its quirk of
    /// delivering to a broadcast destination's `recv_msg` even when
    /// that node reports it cannot currently receive.
    pub(crate) fn send_fast(&self, msg: &Message) -> Result<()> {
        let nodes = self.nodes.lock();
        for node in nodes.iter() {
            if node.addr == msg.src || !node.is_ready() {
                continue;
            }
            let matches_dst = node.addr == msg.dst || msg.dst == ADDR_ANY;
            if !matches_dst || msg.len() > node.max_data_len {
                continue;
            }
            if !node.ops.can_recv_msg() && msg.dst != ADDR_ANY {
                return Err(Error::WouldBlock);
            }
            if let Err(e) = node.ops.recv_msg(msg) {
                warn!("vmsg node {} failed to receive message: {}", node.name, e);
            }
        }
        Ok(())
    }

    fn peer_up_dispatch(&self, peer_name: &str, peer_addr: u32) {
        let nodes = self.nodes.lock();
        let peer_node = nodes.iter().find(|n| n.addr == peer_addr).cloned();
        for node in nodes.iter() {
            if node.addr == peer_addr || !node.is_ready() {
                continue;
            }
            node.ops.peer_up(peer_name, peer_addr);
            if let Some(peer) = &peer_node {
                peer.ops.peer_up(&node.name, node.addr);
            }
        }
    }

    fn peer_down_dispatch(&self, peer_name: &str, peer_addr: u32) {
        let nodes = self.nodes.lock();
        for node in nodes.iter() {
            if node.addr == peer_addr || !node.is_ready() {
                continue;
            }
            node.ops.peer_down(peer_name, peer_addr);
        }
    }

    fn worker_main(self: Arc<Self>) {
        loop {
            let queue = self.queue.clone();
            let domain = self.clone();
            let more = run_one(&queue, |kind| match kind {
                WorkKind::PeerUp { peer_name, peer_addr } => {
                    domain.peer_up_dispatch(peer_name, *peer_addr);
                    Ok(())
                }
                WorkKind::PeerDown { peer_name, peer_addr } => {
                    domain.peer_down_dispatch(peer_name, *peer_addr);
                    Ok(())
                }
                WorkKind::Send { msg } => domain.send_fast(msg).map_err(|e| e == Error::WouldBlock),
                WorkKind::Start { func, .. } => {
                    (*func)();
                    Ok(())
                }
            });
            if !more {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    struct Recorder {
        received: Arc<StdMutex<Vec<Vec<u8>>>>,
    }

    impl NodeOps for Recorder {
        fn recv_msg(&self, msg: &Message) -> Result<()> {
            self.received.lock().unwrap().push(msg.data().to_vec());
            Ok(())
        }
    }

    #[test]
    fn fast_send_delivers_to_the_matching_ready_node() {
        let domain = Domain::create("test", 0);
        let received = Arc::new(StdMutex::new(Vec::new()));
        let a = domain
            .create_node("a", ADDR_ANY, 64, Box::new(Recorder { received: received.clone() }))
            .unwrap();
        let b = domain.create_node("b", ADDR_ANY, 64, Box::new(Recorder { received })).unwrap();
        a.peer_up().unwrap();
        b.peer_up().unwrap();

        a.send(Message::new(b.addr(), 0, vec![1, 2, 3]), true).unwrap();

        domain.destroy();
    }

    #[test]
    fn queued_send_is_delivered_asynchronously_by_the_worker() {
        let domain = Domain::create("test-queued", 0);
        let received = Arc::new(StdMutex::new(Vec::new()));
        let a = domain.create_node("a", ADDR_ANY, 64, Box::new(Recorder { received: received.clone() })).unwrap();
        let b = domain.create_node("b", ADDR_ANY, 64, Box::new(Recorder { received: received.clone() })).unwrap();
        a.peer_up().unwrap();
        b.peer_up().unwrap();

        b.send(Message::new(a.addr(), 0, vec![9]), false).unwrap();

        for _ in 0..1000 {
            if !received.lock().unwrap().is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(received.lock().unwrap().as_slice(), &[vec![9]]);

        domain.destroy();
    }

    #[test]
    fn send_to_self_is_rejected() {
        let domain = Domain::create("test-self", 0);
        let received = Arc::new(StdMutex::new(Vec::new()));
        let a = domain.create_node("a", ADDR_ANY, 64, Box::new(Recorder { received })).unwrap();
        a.peer_up().unwrap();
        let err = a.send(Message::new(a.addr(), 0, vec![1]), true);
        assert!(err.is_err());
        domain.destroy();
    }

    #[test]
    fn duplicate_node_name_is_rejected() {
        let domain = Domain::create("test-dup", 0);
        let received = Arc::new(StdMutex::new(Vec::new()));
        domain
            .create_node("a", ADDR_ANY, 64, Box::new(Recorder { received: received.clone() }))
            .unwrap();
        let result = domain.create_node("a", ADDR_ANY, 64, Box::new(Recorder { received }));
        assert!(result.is_err());
        domain.destroy();
    }
}
