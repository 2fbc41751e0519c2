// Copyright 2020 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! High Precision Event Timer.
//!
//! Register layout, tick<->nanosecond conversion and one-shot/periodic
//! re-arm semantics follow `examples/original_source/emulators/timer/hpet.c`.
//! This core has no OS timer queue of its own: the embedder supplies the
//! current wall-clock time in nanoseconds to every accessor and drives
//! expiry by calling `tick()` periodically (or right before reading a
//! register), rather than this module scheduling a callback itself.

use log::warn;

pub const NUM_TIMERS: usize = 3;

/// One HPET tick is ten nanoseconds (`HPET_CLK_PERIOD` = 10,000,000 fs;
/// `FS_PER_NS` = 1,000,000).
const HPET_CLK_PERIOD_FS: u64 = 10_000_000;
const FS_PER_NS: u64 = 1_000_000;

const GENERAL_CAP_ID: u64 = 0x000;
const GENERAL_CONFIG: u64 = 0x010;
const GENERAL_ISR: u64 = 0x020;
const MAIN_COUNTER: u64 = 0x0f0;
const TIMER_BLOCK_BASE: u64 = 0x100;
const TIMER_BLOCK_STRIDE: u64 = 0x20;
const TIMER_CONFIG_OFFSET: u64 = 0x00;
const TIMER_COMPARATOR_OFFSET: u64 = 0x08;

const CONFIG_ENABLE: u64 = 1 << 0;
const CONFIG_LEGACY_ROUTE: u64 = 1 << 1;

const TN_INT_TYPE_LEVEL: u32 = 1 << 1;
const TN_PERIODIC_CAPABLE: u32 = 1 << 4;
const TN_PERIODIC: u32 = 1 << 3;
const TN_32BIT_CAPABLE: u32 = 1 << 5;
const TN_VALUE_SET: u32 = 1 << 6;
const TN_32BIT_MODE: u32 = 1 << 8;
const TN_INT_ROUTE_SHIFT: u32 = 9;
const TN_INT_ROUTE_MASK: u32 = 0x1f << TN_INT_ROUTE_SHIFT;

fn muldiv64(value: u64, mul: u64, div: u64) -> u64 {
    ((value as u128 * mul as u128) / div as u128) as u64
}

fn ticks_to_ns(ticks: u64) -> u64 {
    muldiv64(ticks, HPET_CLK_PERIOD_FS, FS_PER_NS)
}

fn ns_to_ticks(ns: u64) -> u64 {
    muldiv64(ns, FS_PER_NS, HPET_CLK_PERIOD_FS)
}

#[derive(Debug, Copy, Clone, Default)]
pub struct HpetTimer {
    config: u32,
    comparator: u64,
    period: u64,
    wrap_flag: bool,
}

impl HpetTimer {
    fn is_periodic(&self) -> bool {
        self.config & TN_PERIODIC != 0
    }

    fn is_enabled(&self) -> bool {
        self.config & TN_VALUE_SET == 0 && self.config_int_enabled()
    }

    fn config_int_enabled(&self) -> bool {
        // bit 2 (Tn_INT_ENB_CNF) gates whether this timer raises its line.
        self.config & (1 << 2) != 0
    }

    fn is_32bit(&self) -> bool {
        self.config & TN_32BIT_MODE != 0
    }

    fn int_route(&self) -> u32 {
        (self.config & TN_INT_ROUTE_MASK) >> TN_INT_ROUTE_SHIFT
    }

    fn diff_ticks(&self, current: u64) -> u64 {
        if self.is_32bit() {
            let diff = (self.comparator as u32).wrapping_sub(current as u32) as i32;
            if diff > 0 {
                diff as u64
            } else {
                1
            }
        } else {
            let diff = (self.comparator.wrapping_sub(current)) as i64;
            if diff > 0 {
                diff as u64
            } else {
                1
            }
        }
    }
}

/// One timer block's expiry: which GSI to drive and whether it is a level
/// line that stays asserted until EOI, or an edge pulse.
#[derive(Debug, Copy, Clone)]
pub struct TimerFired {
    pub timer: usize,
    pub gsi: u32,
    pub level_triggered: bool,
}

#[derive(Debug, Clone)]
pub struct Hpet {
    general_config: u64,
    isr: u32,
    counter_base_ticks: u64,
    counter_base_ns: u64,
    timers: [HpetTimer; NUM_TIMERS],
}

impl Default for Hpet {
    fn default() -> Self {
        Hpet {
            general_config: 0,
            isr: 0,
            counter_base_ticks: 0,
            counter_base_ns: 0,
            timers: [HpetTimer::default(); NUM_TIMERS],
        }
    }
}

impl Hpet {
    fn enabled(&self) -> bool {
        self.general_config & CONFIG_ENABLE != 0
    }

    fn in_legacy_mode(&self) -> bool {
        self.general_config & CONFIG_LEGACY_ROUTE != 0
    }

    /// Current main-counter value in ticks, projected forward from the
    /// last time the counter was written or enabled.
    pub fn counter(&self, now_ns: u64) -> u64 {
        if !self.enabled() {
            return self.counter_base_ticks;
        }
        self.counter_base_ticks + ns_to_ticks(now_ns.saturating_sub(self.counter_base_ns))
    }

    fn set_counter(&mut self, ticks: u64, now_ns: u64) {
        self.counter_base_ticks = ticks;
        self.counter_base_ns = now_ns;
    }

    /// Legacy-replacement route for timers 0/1: timer 0 steals ISA IRQ0,
    /// timer 1 steals the RTC's ISA IRQ8, overriding their configured
    /// I/O APIC route.
    fn route_for(&self, idx: usize) -> u32 {
        if idx <= 1 && self.in_legacy_mode() {
            if idx == 0 {
                0
            } else {
                8
            }
        } else {
            self.timers[idx].int_route()
        }
    }

    pub fn read(&self, offset: u64, now_ns: u64) -> u64 {
        match offset {
            GENERAL_CAP_ID => {
                let period_fs = HPET_CLK_PERIOD_FS << 32;
                let num_tim_cap = (NUM_TIMERS as u64 - 1) << 8;
                let leg_rt_cap = 1u64 << 15;
                period_fs | num_tim_cap | leg_rt_cap | 0x1
            }
            GENERAL_CONFIG => self.general_config,
            GENERAL_ISR => self.isr as u64,
            MAIN_COUNTER => self.counter(now_ns),
            _ if (TIMER_BLOCK_BASE..TIMER_BLOCK_BASE + TIMER_BLOCK_STRIDE * NUM_TIMERS as u64)
                .contains(&offset) =>
            {
                let rel = offset - TIMER_BLOCK_BASE;
                let idx = (rel / TIMER_BLOCK_STRIDE) as usize;
                let timer = &self.timers[idx];
                match rel % TIMER_BLOCK_STRIDE {
                    TIMER_CONFIG_OFFSET => {
                        let caps = TN_INT_TYPE_LEVEL | TN_PERIODIC_CAPABLE | TN_32BIT_CAPABLE;
                        ((caps as u64) << 32) | timer.config as u64
                    }
                    TIMER_COMPARATOR_OFFSET => timer.comparator,
                    _ => 0,
                }
            }
            _ => {
                warn!("hpet: read from unmapped offset {offset:#x}");
                0
            }
        }
    }

    pub fn write(&mut self, offset: u64, value: u64, now_ns: u64) {
        match offset {
            GENERAL_CONFIG => {
                let was_enabled = self.enabled();
                self.general_config = value & (CONFIG_ENABLE | CONFIG_LEGACY_ROUTE);
                if !was_enabled && self.enabled() {
                    self.counter_base_ns = now_ns;
                } else if was_enabled && !self.enabled() {
                    self.counter_base_ticks = self.counter(now_ns);
                }
            }
            GENERAL_ISR => self.isr &= !(value as u32),
            MAIN_COUNTER => self.set_counter(value, now_ns),
            _ if (TIMER_BLOCK_BASE..TIMER_BLOCK_BASE + TIMER_BLOCK_STRIDE * NUM_TIMERS as u64)
                .contains(&offset) =>
            {
                let rel = offset - TIMER_BLOCK_BASE;
                let idx = (rel / TIMER_BLOCK_STRIDE) as usize;
                match rel % TIMER_BLOCK_STRIDE {
                    TIMER_CONFIG_OFFSET => {
                        let writable = TN_PERIODIC | TN_32BIT_MODE | TN_INT_ROUTE_MASK | (1 << 2);
                        self.timers[idx].config =
                            (self.timers[idx].config & !writable) | (value as u32 & writable);
                    }
                    TIMER_COMPARATOR_OFFSET => {
                        let timer = &mut self.timers[idx];
                        if timer.is_periodic() && timer.config & TN_VALUE_SET != 0 {
                            timer.period = value;
                            timer.config &= !TN_VALUE_SET;
                        }
                        timer.comparator = value;
                        timer.wrap_flag = false;
                        if timer.is_32bit() && !timer.is_periodic() {
                            let cur = self.counter(now_ns);
                            let wrap_diff = (u32::MAX as u64).wrapping_sub(cur & 0xffff_ffff);
                            if wrap_diff < timer.diff_ticks(cur) {
                                timer.wrap_flag = true;
                            }
                        }
                    }
                    _ => {}
                }
            }
            _ => warn!("hpet: write to unmapped offset {offset:#x}"),
        }
    }

    /// Next absolute nanosecond timestamp at which `timer` should next be
    /// checked, or `None` if it is masked/disabled/one-shot-already-fired.
    pub fn next_deadline_ns(&self, idx: usize, now_ns: u64) -> Option<u64> {
        let timer = &self.timers[idx];
        if !self.enabled() || !timer.is_enabled() {
            return None;
        }
        let cur = self.counter(now_ns);
        let diff = timer.diff_ticks(cur);
        Some(now_ns + ticks_to_ns(diff))
    }

    /// Advances periodic timers whose comparator has been passed and
    /// returns which timers fired since the caller's last call. One-shot
    /// timers are left at their expired comparator value (matching
    /// `hpet_timer`'s wrap-then-fire behavior for 32-bit one-shot mode).
    pub fn tick(&mut self, now_ns: u64) -> Vec<TimerFired> {
        let mut fired = Vec::new();
        let cur = self.counter(now_ns);
        for idx in 0..NUM_TIMERS {
            if !self.enabled() || !self.timers[idx].is_enabled() {
                continue;
            }
            let expired = if self.timers[idx].is_32bit() {
                (cur as u32).wrapping_sub(self.timers[idx].comparator as u32) as i32 >= 0
            } else {
                cur >= self.timers[idx].comparator
            };
            if !expired {
                continue;
            }
            if self.timers[idx].is_periodic() && self.timers[idx].period != 0 {
                let period = self.timers[idx].period;
                while cur >= self.timers[idx].comparator {
                    self.timers[idx].comparator = self.timers[idx].comparator.wrapping_add(period);
                }
            }
            let route = self.route_for(idx);
            let level = self.timers[idx].config & TN_INT_TYPE_LEVEL != 0;
            if level {
                self.isr |= 1 << idx;
            }
            fired.push(TimerFired {
                timer: idx,
                gsi: route,
                level_triggered: level,
            });
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_to_ns_is_ten_nanoseconds() {
        assert_eq!(ticks_to_ns(1), 10);
        assert_eq!(ns_to_ticks(10), 1);
    }

    #[test]
    fn counter_advances_monotonically_while_enabled() {
        let mut hpet = Hpet::default();
        hpet.write(GENERAL_CONFIG, CONFIG_ENABLE, 0);
        assert_eq!(hpet.counter(0), 0);
        assert_eq!(hpet.counter(100), 10);
    }

    #[test]
    fn counter_frozen_while_disabled() {
        let mut hpet = Hpet::default();
        hpet.write(GENERAL_CONFIG, CONFIG_ENABLE, 0);
        hpet.write(GENERAL_CONFIG, 0, 1000);
        assert_eq!(hpet.counter(5000), hpet.counter(1000));
    }

    #[test]
    fn periodic_timer_rearms_past_comparator() {
        let mut hpet = Hpet::default();
        hpet.write(GENERAL_CONFIG, CONFIG_ENABLE, 0);
        hpet.write(TIMER_BLOCK_BASE, (TN_PERIODIC | (1 << 2)) as u64, 0);
        hpet.write(
            TIMER_BLOCK_BASE + TIMER_COMPARATOR_OFFSET,
            10,
            0,
        );
        // arm the period (second write while periodic+VALUE_SET)
        hpet.timers[0].config |= TN_VALUE_SET;
        hpet.write(TIMER_BLOCK_BASE + TIMER_COMPARATOR_OFFSET, 50, 0);

        let fired = hpet.tick(2000);
        assert_eq!(fired.len(), 1);
        assert!(hpet.timers[0].comparator > 10);
    }
}
