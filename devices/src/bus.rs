// Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The MMIO emulation bus: a sorted, non-overlapping set of address
//! ranges, each backed by a device behind `Arc<sync::Mutex<dyn BusDevice>>`.
//! A vCPU exit carrying an MMIO address is routed here and dispatched to
//! whichever device's range contains it.
//!
//! Device and range naming (`BusDevice`, `BusAccessInfo`, `BusRange`,
//! `BusType`) follows the names `devices::lib`'s original `pub use
//! self::bus::{...}` re-export list carried, reconstructed since the
//! bus module itself wasn't in the retrieval pack for this teacher.

use std::sync::Arc;

use base::warn;
use remain::sorted;
use sync::Mutex;
use thiserror::Error;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("bus range {0:#x}..{1:#x} overlaps an existing device")]
    Overlap(u64, u64),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BusType {
    Mmio,
    Io,
}

/// The address and access width an exit handler passes down to the bus,
/// already translated to bus-local (range-relative where the device
/// wants it) addressing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BusAccessInfo {
    pub address: u64,
    pub offset: u64,
    pub id: usize,
}

pub trait BusDevice: Send {
    fn debug_label(&self) -> String {
        "unknown".to_string()
    }

    fn read(&mut self, info: BusAccessInfo, data: &mut [u8]);
    fn write(&mut self, info: BusAccessInfo, data: &[u8]);
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct BusRange {
    pub base: u64,
    pub len: u64,
}

impl BusRange {
    fn end(&self) -> u64 {
        self.base + self.len
    }

    fn overlaps(&self, other: &BusRange) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

struct Entry {
    range: BusRange,
    device: Arc<Mutex<dyn BusDevice>>,
    id: usize,
}

/// A bus holding one address space (MMIO or legacy IO port). Lookup walks
/// the sorted range list; ranges never overlap, enforced at insert time.
pub struct Bus {
    bus_type: BusType,
    entries: Vec<Entry>,
    next_id: usize,
}

impl Bus {
    pub fn new(bus_type: BusType) -> Self {
        Bus {
            bus_type,
            entries: Vec::new(),
            next_id: 0,
        }
    }

    pub fn bus_type(&self) -> BusType {
        self.bus_type
    }

    pub fn insert(&mut self, device: Arc<Mutex<dyn BusDevice>>, base: u64, len: u64) -> Result<()> {
        let range = BusRange { base, len };
        if self.entries.iter().any(|e| e.range.overlaps(&range)) {
            warn!("rejecting bus device at {:#x}..{:#x}: overlaps an existing range", base, base + len);
            return Err(Error::Overlap(base, base + len));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Entry { range, device, id });
        self.entries.sort_by_key(|e| e.range.base);
        Ok(())
    }

    fn find(&self, address: u64) -> Option<(&Entry, u64)> {
        self.entries
            .iter()
            .find(|e| address >= e.range.base && address < e.range.end())
            .map(|e| (e, address - e.range.base))
    }

    /// Reads `data.len()` bytes starting at `address`. Returns false (and
    /// leaves `data` unmodified) if no device claims the address.
    pub fn read(&self, address: u64, data: &mut [u8]) -> bool {
        match self.find(address) {
            Some((entry, offset)) => {
                let info = BusAccessInfo {
                    address,
                    offset,
                    id: entry.id,
                };
                entry.device.lock().read(info, data);
                true
            }
            None => false,
        }
    }

    pub fn write(&self, address: u64, data: &[u8]) -> bool {
        match self.find(address) {
            Some((entry, offset)) => {
                let info = BusAccessInfo {
                    address,
                    offset,
                    id: entry.id,
                };
                entry.device.lock().write(info, data);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(Vec<u8>);

    impl BusDevice for Echo {
        fn read(&mut self, info: BusAccessInfo, data: &mut [u8]) {
            let offset = info.offset as usize;
            data.copy_from_slice(&self.0[offset..offset + data.len()]);
        }

        fn write(&mut self, info: BusAccessInfo, data: &[u8]) {
            let offset = info.offset as usize;
            self.0[offset..offset + data.len()].copy_from_slice(data);
        }
    }

    #[test]
    fn dispatches_to_the_owning_range() {
        let mut bus = Bus::new(BusType::Mmio);
        bus.insert(Arc::new(Mutex::new(Echo(vec![0u8; 16]))), 0x1000, 0x10)
            .unwrap();
        bus.insert(Arc::new(Mutex::new(Echo(vec![0xffu8; 16]))), 0x2000, 0x10)
            .unwrap();

        let mut buf = [0u8; 4];
        assert!(bus.read(0x2004, &mut buf));
        assert_eq!(buf, [0xff; 4]);
        assert!(!bus.read(0x3000, &mut buf));
    }

    #[test]
    fn overlapping_insert_is_rejected() {
        let mut bus = Bus::new(BusType::Mmio);
        bus.insert(Arc::new(Mutex::new(Echo(vec![0u8; 16]))), 0x1000, 0x10)
            .unwrap();
        let result = bus.insert(Arc::new(Mutex::new(Echo(vec![0u8; 16]))), 0x1008, 0x10);
        assert!(result.is_err());
    }

    #[test]
    fn write_then_read_roundtrips_through_the_device() {
        let mut bus = Bus::new(BusType::Mmio);
        bus.insert(Arc::new(Mutex::new(Echo(vec![0u8; 16]))), 0x1000, 0x10)
            .unwrap();
        bus.write(0x1004, &[1, 2, 3, 4]);
        let mut buf = [0u8; 4];
        bus.read(0x1004, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
    }
}
