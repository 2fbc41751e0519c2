// Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Inter-guest messaging: named domains, each running one worker thread
//! and a fixed-capacity work pool, host nodes that exchange fixed-size
//! messages and get peer-up/peer-down notifications about each other.
//!
//! Grounded on `core/vio/vmm_vmsg.c`'s domain/node/message machinery:
//! refcounted messages become `Arc`-shared ones, the mempool-then-heap
//! work allocator becomes a capacity-bounded permit with heap fallback,
//! and the single completion-signalled work list becomes a
//! `Mutex<VecDeque<_>>` plus `Condvar`.

mod domain;
mod message;
mod node;
mod work;

pub use domain::Domain;
pub use message::Message;
pub use message::ADDR_ANY;
pub use message::ADDR_MIN;
pub use node::Node;
pub use node::NodeOps;

use remain::sorted;
use thiserror::Error;

#[sorted]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("node address is already in use")]
    AddressInUse,
    #[error("domain has already been destroyed")]
    DomainGone,
    #[error("message destination is invalid for this send")]
    InvalidMessage,
    #[error("node name is already registered in this domain")]
    NodeNameTaken,
    #[error("receiver cannot accept the message right now")]
    WouldBlock,
}

pub type Result<T> = std::result::Result<T, Error>;
