// Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The VirtIO split-ring transport: descriptor table, available ring,
//! used ring, and the free-list chain-walking that turns a raw avail
//! index into a `DescriptorChain` a device can read/write through.
//!
//! Ring layout, `VIRTQ_DESC_F_*` flags, and the `EVENT_IDX`
//! used/avail-event suppression logic follow the VirtIO 1.1 split
//! virtqueue layout; naming (`Queue`, `DescriptorChain`, `Interrupt`,
//! `copy_config`, `VirtioDevice`) matches what
//! `devices/src/virtio/input/mod.rs` imports from this module, since
//! that file's own `super::{Queue, DescriptorChain, ...}` imports fix
//! the surface this module must provide.

pub mod input;

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use base::warn;
use sync::Mutex;

pub const VIRTQ_DESC_F_NEXT: u16 = 1;
pub const VIRTQ_DESC_F_WRITE: u16 = 2;
pub const VIRTQ_DESC_F_INDIRECT: u16 = 4;

pub const VIRTQ_AVAIL_F_NO_INTERRUPT: u16 = 1;
pub const VIRTQ_USED_F_NO_NOTIFY: u16 = 1;

/// The subset of guest RAM a virtqueue needs: flat byte addressing, no
/// page-table walk, matching the flat-buffer guest memory model used
/// elsewhere in this core.
pub trait GuestMemory: Send {
    fn read_into(&self, addr: u64, buf: &mut [u8]);
    fn write_from(&mut self, addr: u64, buf: &[u8]);

    fn read_u16(&self, addr: u64) -> u16 {
        let mut buf = [0u8; 2];
        self.read_into(addr, &mut buf);
        u16::from_le_bytes(buf)
    }

    fn read_u32(&self, addr: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read_into(addr, &mut buf);
        u32::from_le_bytes(buf)
    }

    fn read_u64(&self, addr: u64) -> u64 {
        let mut buf = [0u8; 8];
        self.read_into(addr, &mut buf);
        u64::from_le_bytes(buf)
    }

    fn write_u16(&mut self, addr: u64, val: u16) {
        self.write_from(addr, &val.to_le_bytes());
    }

    fn write_u32(&mut self, addr: u64, val: u32) {
        self.write_from(addr, &val.to_le_bytes());
    }

    fn write_u64(&mut self, addr: u64, val: u64) {
        self.write_from(addr, &val.to_le_bytes());
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeviceType {
    Input,
}

/// A single resolved buffer from a descriptor chain: its guest address,
/// length, and direction (device-writable or device-readable).
#[derive(Debug, Copy, Clone)]
pub struct DescriptorSegment {
    pub addr: u64,
    pub len: u32,
    pub write: bool,
}

/// A fully walked descriptor chain, ready for the device to read the
/// readable segments and fill the writable ones.
#[derive(Debug, Clone)]
pub struct DescriptorChain {
    pub index: u16,
    pub segments: Vec<DescriptorSegment>,
}

impl DescriptorChain {
    pub fn reader_segments(&self) -> impl Iterator<Item = &DescriptorSegment> {
        self.segments.iter().filter(|s| !s.write)
    }

    pub fn writer_segments(&self) -> impl Iterator<Item = &DescriptorSegment> {
        self.segments.iter().filter(|s| s.write)
    }

    /// Copies `src` into the chain's writable segments in order,
    /// returning the number of bytes actually written.
    pub fn write_to_chain(&self, mem: &mut dyn GuestMemory, src: &[u8]) -> usize {
        let mut written = 0;
        for seg in self.writer_segments() {
            if written >= src.len() {
                break;
            }
            let take = (seg.len as usize).min(src.len() - written);
            mem.write_from(seg.addr, &src[written..written + take]);
            written += take;
        }
        written
    }

    /// Reads the chain's readable segments into `dst`, returning the
    /// number of bytes actually read.
    pub fn read_from_chain(&self, mem: &dyn GuestMemory, dst: &mut [u8]) -> usize {
        let mut read = 0;
        for seg in self.reader_segments() {
            if read >= dst.len() {
                break;
            }
            let take = (seg.len as usize).min(dst.len() - read);
            mem.read_into(seg.addr, &mut dst[read..read + take]);
            read += take;
        }
        read
    }
}

const MAX_CHAIN_DEPTH: usize = 512;

/// A signal path to the guest: either an MSI write or a level-triggered
/// legacy GSI, delivered through the shared interrupt fabric.
#[derive(Clone)]
pub struct Interrupt {
    pending: Arc<AtomicU16>,
    raise: Arc<dyn Fn() + Send + Sync>,
}

impl Interrupt {
    pub fn new(raise: Arc<dyn Fn() + Send + Sync>) -> Self {
        Interrupt {
            pending: Arc::new(AtomicU16::new(0)),
            raise,
        }
    }

    pub fn signal_used_queue(&self) {
        self.pending.fetch_or(1, Ordering::SeqCst);
        (self.raise)();
    }

    pub fn interrupt_status(&self) -> u8 {
        self.pending.swap(0, Ordering::SeqCst) as u8
    }
}

/// One split virtqueue: descriptor table plus avail/used rings, each
/// addressed in guest memory at a fixed base the driver programs before
/// setting `ready`.
pub struct Queue {
    pub size: u16,
    pub max_size: u16,
    pub ready: bool,
    pub desc_table: u64,
    pub avail_ring: u64,
    pub used_ring: u64,
    event_idx: bool,
    next_avail: u16,
    next_used: u16,
    interrupt: Option<Interrupt>,
    broken: bool,
}

impl Queue {
    pub fn new(max_size: u16) -> Self {
        Queue {
            size: max_size,
            max_size,
            ready: false,
            desc_table: 0,
            avail_ring: 0,
            used_ring: 0,
            event_idx: false,
            next_avail: 0,
            next_used: 0,
            interrupt: None,
            broken: false,
        }
    }

    /// True once a descriptor-chain protocol violation has been
    /// detected; `pop` refuses to hand out further chains until
    /// `reset`, matching a ring inconsistency latching the queue until
    /// the guest resets the device.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Clears the broken latch and rewinds the ring indices, as a
    /// guest-initiated device reset would.
    pub fn reset(&mut self) {
        self.broken = false;
        self.next_avail = 0;
        self.next_used = 0;
    }

    pub fn set_event_idx(&mut self, enabled: bool) {
        self.event_idx = enabled;
    }

    pub fn set_interrupt(&mut self, interrupt: Interrupt) {
        self.interrupt = Some(interrupt);
    }

    fn avail_idx(&self, mem: &dyn GuestMemory) -> u16 {
        mem.read_u16(self.avail_ring + 2)
    }

    fn avail_ring_entry(&self, mem: &dyn GuestMemory, slot: u16) -> u16 {
        mem.read_u16(self.avail_ring + 4 + (slot as u64 % self.size as u64) * 2)
    }

    fn read_descriptor(&self, mem: &dyn GuestMemory, idx: u16, table_base: u64) -> (DescriptorSegment, u16, u16) {
        let entry = table_base + idx as u64 * 16;
        let addr = mem.read_u64(entry);
        let len = mem.read_u32(entry + 8);
        let flags = mem.read_u16(entry + 12);
        let next = mem.read_u16(entry + 14);
        (
            DescriptorSegment {
                addr,
                len,
                write: flags & VIRTQ_DESC_F_WRITE != 0,
            },
            flags,
            next,
        )
    }

    /// Walks the next available descriptor chain, following `NEXT` links
    /// and expanding a single `INDIRECT` descriptor into its own table.
    /// Returns `None` once the driver has no more available buffers, or
    /// once the queue has latched broken from an earlier ring
    /// inconsistency.
    ///
    /// Enforces the "readable-first, then writable" ordering the
    /// dequeue contract requires: a chain that crosses back from a
    /// writable segment to a readable one, or an indirect table that
    /// nests a further `INDIRECT` descriptor, marks the queue broken
    /// and yields no chain.
    pub fn pop(&mut self, mem: &dyn GuestMemory) -> Option<DescriptorChain> {
        if self.broken || !self.ready || self.next_avail == self.avail_idx(mem) {
            return None;
        }
        let head = self.avail_ring_entry(mem, self.next_avail);
        self.next_avail = self.next_avail.wrapping_add(1);

        let mut segments = Vec::new();
        let mut idx = head;
        let mut table_base = self.desc_table;
        let mut in_indirect = false;
        let mut seen_writable = false;
        let mut depth = 0;
        loop {
            depth += 1;
            if depth > MAX_CHAIN_DEPTH {
                warn!("virtio queue: descriptor chain exceeds {} entries, marking queue broken", MAX_CHAIN_DEPTH);
                self.broken = true;
                return None;
            }
            let (seg, flags, next) = self.read_descriptor(mem, idx, table_base);
            if flags & VIRTQ_DESC_F_INDIRECT != 0 {
                if in_indirect {
                    warn!("virtio queue: indirect descriptor table nests another INDIRECT, marking queue broken");
                    self.broken = true;
                    return None;
                }
                table_base = seg.addr;
                idx = 0;
                in_indirect = true;
                if flags & VIRTQ_DESC_F_NEXT == 0 {
                    continue;
                }
            } else {
                if seg.write {
                    seen_writable = true;
                } else if seen_writable {
                    warn!("virtio queue: descriptor chain crosses from writable back to readable, marking queue broken");
                    self.broken = true;
                    return None;
                }
                segments.push(seg);
                if flags & VIRTQ_DESC_F_NEXT == 0 {
                    break;
                }
                idx = next;
            }
        }

        Some(DescriptorChain {
            index: head,
            segments,
        })
    }

    /// Publishes a completed chain to the used ring. `written` is the
    /// number of bytes the device wrote into the chain's writable
    /// segments.
    pub fn add_used(&mut self, mem: &mut dyn GuestMemory, chain: &DescriptorChain, written: u32) {
        let slot = self.next_used % self.size;
        let entry = self.used_ring + 4 + slot as u64 * 8;
        mem.write_u32(entry, chain.index as u32);
        mem.write_u32(entry + 4, written);
        self.next_used = self.next_used.wrapping_add(1);
        mem.write_u16(self.used_ring + 2, self.next_used);
    }

    /// Signals the driver that new used entries are available, honoring
    /// `VIRTQ_AVAIL_F_NO_INTERRUPT`/`used_event` suppression when
    /// `EVENT_IDX` negotiated.
    pub fn trigger_interrupt(&self, mem: &dyn GuestMemory) {
        if self.event_idx {
            let used_event = mem.read_u16(self.avail_ring + 4 + self.size as u64 * 2);
            if used_event == self.next_used {
                return;
            }
        } else {
            let avail_flags = mem.read_u16(self.avail_ring);
            if avail_flags & VIRTQ_AVAIL_F_NO_INTERRUPT != 0 {
                return;
            }
        }
        if let Some(interrupt) = &self.interrupt {
            interrupt.signal_used_queue();
        }
    }
}

pub trait VirtioDevice: Send {
    fn device_type(&self) -> DeviceType;
    fn queue_max_sizes(&self) -> &[u16];
    fn read_config(&self, offset: u64, data: &mut [u8]);
    fn write_config(&mut self, offset: u64, data: &[u8]);
    fn activate(&mut self, mem: Arc<Mutex<dyn GuestMemory>>, interrupt: Interrupt, queues: Vec<Queue>);
}

/// Copies `src[src_offset..]` into `dst[dst_offset..]`, clamped to
/// whichever buffer is shorter. Used by config-space reads where the
/// driver's access window can straddle the end of the struct.
pub fn copy_config(dst: &mut [u8], dst_offset: u64, src: &[u8], src_offset: u64) {
    let dst_offset = dst_offset as usize;
    let src_offset = src_offset as usize;
    if src_offset >= src.len() || dst_offset >= dst.len() {
        return;
    }
    let len = (dst.len() - dst_offset).min(src.len() - src_offset);
    dst[dst_offset..dst_offset + len].copy_from_slice(&src[src_offset..src_offset + len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatMem(Vec<u8>);

    impl GuestMemory for FlatMem {
        fn read_into(&self, addr: u64, buf: &mut [u8]) {
            let addr = addr as usize;
            buf.copy_from_slice(&self.0[addr..addr + buf.len()]);
        }

        fn write_from(&mut self, addr: u64, buf: &[u8]) {
            let addr = addr as usize;
            self.0[addr..addr + buf.len()].copy_from_slice(buf);
        }
    }

    fn setup_single_descriptor_chain(mem: &mut FlatMem, desc_table: u64, avail: u64, used: u64, queue_size: u16) -> Queue {
        let mut queue = Queue::new(queue_size);
        queue.desc_table = desc_table;
        queue.avail_ring = avail;
        queue.used_ring = used;
        queue.ready = true;

        // One descriptor: writable, 4 bytes at address 0x5000.
        mem.write_u64(desc_table, 0x5000);
        mem.write_u32(desc_table + 8, 4);
        mem.write_u16(desc_table + 12, VIRTQ_DESC_F_WRITE);
        mem.write_u16(desc_table + 14, 0);

        // Avail ring: flags=0, idx=1, ring[0]=0.
        mem.write_u16(avail, 0);
        mem.write_u16(avail + 2, 1);
        mem.write_u16(avail + 4, 0);

        queue
    }

    #[test]
    fn pop_walks_a_single_descriptor_chain() {
        let mut mem = FlatMem(vec![0u8; 0x6000]);
        let mut queue = setup_single_descriptor_chain(&mut mem, 0x1000, 0x2000, 0x3000, 4);

        let chain = queue.pop(&mem).expect("chain available");
        assert_eq!(chain.segments.len(), 1);
        assert_eq!(chain.segments[0].addr, 0x5000);
        assert!(chain.segments[0].write);
        assert!(queue.pop(&mem).is_none());
    }

    #[test]
    fn add_used_advances_used_idx() {
        let mut mem = FlatMem(vec![0u8; 0x6000]);
        let mut queue = setup_single_descriptor_chain(&mut mem, 0x1000, 0x2000, 0x3000, 4);
        let chain = queue.pop(&mem).unwrap();
        queue.add_used(&mut mem, &chain, 4);
        assert_eq!(mem.read_u16(0x3000 + 2), 1);
        assert_eq!(mem.read_u32(0x3000 + 4), chain.index as u32);
        assert_eq!(mem.read_u32(0x3000 + 8), 4);
    }

    #[test]
    fn copy_config_clamps_to_shorter_buffer() {
        let src = [1u8, 2, 3, 4];
        let mut dst = [0u8; 2];
        copy_config(&mut dst, 0, &src, 2);
        assert_eq!(dst, [3, 4]);
    }

    #[test]
    fn pop_rejects_a_chain_that_crosses_back_to_readable() {
        let mut mem = FlatMem(vec![0u8; 0x6000]);
        let desc_table = 0x1000;
        let mut queue = Queue::new(4);
        queue.desc_table = desc_table;
        queue.avail_ring = 0x2000;
        queue.used_ring = 0x3000;
        queue.ready = true;

        // Descriptor 0: writable, chains to descriptor 1.
        mem.write_u64(desc_table, 0x5000);
        mem.write_u32(desc_table + 8, 4);
        mem.write_u16(desc_table + 12, VIRTQ_DESC_F_WRITE | VIRTQ_DESC_F_NEXT);
        mem.write_u16(desc_table + 14, 1);

        // Descriptor 1: readable, violating the writable-then-readable order.
        mem.write_u64(desc_table + 16, 0x5100);
        mem.write_u32(desc_table + 16 + 8, 4);
        mem.write_u16(desc_table + 16 + 12, 0);
        mem.write_u16(desc_table + 16 + 14, 0);

        mem.write_u16(0x2000, 0);
        mem.write_u16(0x2000 + 2, 1);
        mem.write_u16(0x2000 + 4, 0);

        assert!(queue.pop(&mem).is_none());
        assert!(queue.is_broken());
    }

    #[test]
    fn pop_rejects_an_indirect_table_nesting_another_indirect() {
        let mut mem = FlatMem(vec![0u8; 0x6000]);
        let desc_table = 0x1000;
        let indirect_table = 0x4000;
        let mut queue = Queue::new(4);
        queue.desc_table = desc_table;
        queue.avail_ring = 0x2000;
        queue.used_ring = 0x3000;
        queue.ready = true;

        // Head descriptor: indirect, pointing at indirect_table.
        mem.write_u64(desc_table, indirect_table);
        mem.write_u32(desc_table + 8, 16);
        mem.write_u16(desc_table + 12, VIRTQ_DESC_F_INDIRECT);
        mem.write_u16(desc_table + 14, 0);

        // Within the indirect table, descriptor 0 is itself indirect.
        mem.write_u64(indirect_table, 0x5000);
        mem.write_u32(indirect_table + 8, 4);
        mem.write_u16(indirect_table + 12, VIRTQ_DESC_F_INDIRECT);
        mem.write_u16(indirect_table + 14, 0);

        mem.write_u16(0x2000, 0);
        mem.write_u16(0x2000 + 2, 1);
        mem.write_u16(0x2000 + 4, 0);

        assert!(queue.pop(&mem).is_none());
        assert!(queue.is_broken());
    }

    #[test]
    fn reset_clears_the_broken_latch() {
        let mut mem = FlatMem(vec![0u8; 0x6000]);
        let mut queue = setup_single_descriptor_chain(&mut mem, 0x1000, 0x2000, 0x3000, 4);
        queue.broken = true;

        assert!(queue.pop(&mem).is_none());
        queue.reset();
        assert!(queue.pop(&mem).is_some());
    }
}
