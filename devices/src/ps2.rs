// Copyright 2020 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! PS/2 keyboard and mouse state machines, behind the i8042-style pair of
//! IO ports (data at 0x60, status/command at 0x64) the MMIO/IO bus wires
//! up per device.
//!
//! Command dispatch and the IntelliMouse sample-rate detection sequence
//! follow `examples/original_source/emulators/input/ps2_emu.c`'s
//! `ps2_emu_write_keyboard`/`ps2_emu_write_mouse`.

use std::collections::VecDeque;

use base::warn;

const KBD_REPLY_ACK: u8 = 0xfa;
const KBD_REPLY_RESEND: u8 = 0xfe;
const KBD_REPLY_ID: u8 = 0xab;
const KBD_REPLY_POR: u8 = 0xaa;

const KBD_CMD_GET_ID: u8 = 0xf2;
const KBD_CMD_ECHO: u8 = 0xee;
const KBD_CMD_ENABLE: u8 = 0xf4;
const KBD_CMD_SCANCODE: u8 = 0xf0;
const KBD_CMD_SET_LEDS: u8 = 0xed;
const KBD_CMD_SET_RATE: u8 = 0xf3;
const KBD_CMD_RESET_DISABLE: u8 = 0xf5;
const KBD_CMD_RESET_ENABLE: u8 = 0xf6;
const KBD_CMD_RESET: u8 = 0xff;

const AUX_SET_SCALE11: u8 = 0xe6;
const AUX_SET_SCALE21: u8 = 0xe7;
const AUX_SET_STREAM: u8 = 0xea;
const AUX_SET_WRAP: u8 = 0xec;
const AUX_RESET_WRAP: u8 = 0xec;
const AUX_SET_REMOTE: u8 = 0xf0;
const AUX_GET_TYPE: u8 = 0xf2;
const AUX_SET_RES: u8 = 0xe8;
const AUX_SET_SAMPLE: u8 = 0xf3;
const AUX_GET_SCALE: u8 = 0xe9;
const AUX_POLL: u8 = 0xeb;
const AUX_ENABLE_DEV: u8 = 0xf4;
const AUX_DISABLE_DEV: u8 = 0xf5;
const AUX_SET_DEFAULT: u8 = 0xf6;
const AUX_RESET: u8 = 0xff;
const AUX_ACK: u8 = 0xfa;

const MOUSE_STATUS_REMOTE: u8 = 0x40;
const MOUSE_STATUS_ENABLED: u8 = 0x20;
const MOUSE_STATUS_SCALE21: u8 = 0x10;

const QUEUE_SIZE: usize = 16;

/// Shared output-buffer FIFO plumbing both the keyboard and mouse
/// devices use. The real i8042 only has one output byte latched at a
/// time; the queue models what each device would feed it one byte at a
/// time as the host keeps reading port 0x60.
#[derive(Debug, Default)]
struct ReplyQueue {
    bytes: VecDeque<u8>,
    write_cmd: Option<u8>,
}

impl ReplyQueue {
    fn push(&mut self, b: u8) {
        if self.bytes.len() < QUEUE_SIZE {
            self.bytes.push_back(b);
        }
    }

    fn pop(&mut self) -> Option<u8> {
        self.bytes.pop_front()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ScancodeSet {
    Set1,
    Set2,
    Set3,
}

pub struct Ps2Keyboard {
    queue: ReplyQueue,
    scan_enabled: bool,
    scancode_set: ScancodeSet,
    translate: bool,
    led_state: u8,
}

impl Default for Ps2Keyboard {
    fn default() -> Self {
        Ps2Keyboard {
            queue: ReplyQueue::default(),
            scan_enabled: true,
            scancode_set: ScancodeSet::Set2,
            translate: true,
            led_state: 0,
        }
    }
}

impl Ps2Keyboard {
    pub fn has_data(&self) -> bool {
        !self.queue.bytes.is_empty()
    }

    pub fn read_data(&mut self) -> Option<u8> {
        self.queue.pop()
    }

    fn soft_reset(&mut self) {
        self.scan_enabled = true;
        self.scancode_set = ScancodeSet::Set2;
        self.led_state = 0;
    }

    /// Feeds one scancode (already translated by the caller for the
    /// active keymap) into the output queue, provided scanning is on.
    pub fn push_scancode(&mut self, bytes: &[u8]) {
        if !self.scan_enabled {
            return;
        }
        for &b in bytes {
            self.queue.push(b);
        }
    }

    pub fn write_command(&mut self, val: u8) {
        match self.queue.write_cmd {
            None => match val {
                0x00 => self.queue.push(KBD_REPLY_ACK),
                0x05 => self.queue.push(KBD_REPLY_RESEND),
                KBD_CMD_GET_ID => {
                    self.queue.push(KBD_REPLY_ACK);
                    self.queue.push(KBD_REPLY_ID);
                    self.queue.push(if self.translate { 0x41 } else { 0x83 });
                }
                KBD_CMD_ECHO => self.queue.push(KBD_CMD_ECHO),
                KBD_CMD_ENABLE => {
                    self.scan_enabled = true;
                    self.queue.push(KBD_REPLY_ACK);
                }
                KBD_CMD_SCANCODE | KBD_CMD_SET_LEDS | KBD_CMD_SET_RATE => {
                    self.queue.write_cmd = Some(val);
                    self.queue.push(KBD_REPLY_ACK);
                }
                KBD_CMD_RESET_DISABLE => {
                    self.soft_reset();
                    self.scan_enabled = false;
                    self.queue.push(KBD_REPLY_ACK);
                }
                KBD_CMD_RESET_ENABLE => {
                    self.soft_reset();
                    self.scan_enabled = true;
                    self.queue.push(KBD_REPLY_ACK);
                }
                KBD_CMD_RESET => {
                    self.soft_reset();
                    self.queue.push(KBD_REPLY_ACK);
                    self.queue.push(KBD_REPLY_POR);
                }
                _ => {
                    warn!("ps2 keyboard: unhandled command {:#x}, acking anyway", val);
                    self.queue.push(KBD_REPLY_ACK);
                }
            },
            Some(KBD_CMD_SCANCODE) => {
                if val == 0 {
                    let report = match self.scancode_set {
                        ScancodeSet::Set1 => 0x43,
                        ScancodeSet::Set2 => 0x41,
                        ScancodeSet::Set3 => 0x3f,
                    };
                    self.queue.push(report);
                } else {
                    self.scancode_set = match val {
                        1 => ScancodeSet::Set1,
                        3 => ScancodeSet::Set3,
                        _ => ScancodeSet::Set2,
                    };
                    self.queue.push(KBD_REPLY_ACK);
                }
                self.queue.write_cmd = None;
            }
            Some(KBD_CMD_SET_LEDS) => {
                self.led_state = val;
                self.queue.push(KBD_REPLY_ACK);
                self.queue.write_cmd = None;
            }
            Some(KBD_CMD_SET_RATE) => {
                self.queue.push(KBD_REPLY_ACK);
                self.queue.write_cmd = None;
            }
            Some(_) => self.queue.write_cmd = None,
        }
    }
}

/// IntelliMouse/IntelliMouse-Explorer detection needs the host to probe
/// with a specific 200/100/80 (or 200/200/80) sample-rate sequence; this
/// tracks that rolling window.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum MouseType {
    Plain,
    ImPs2,
    ImEx,
}

pub struct Ps2Mouse {
    queue: ReplyQueue,
    status: u8,
    resolution: u8,
    sample_rate: u8,
    mouse_type: MouseType,
    detect_state: u8,
    wrap: bool,
}

impl Default for Ps2Mouse {
    fn default() -> Self {
        Ps2Mouse {
            queue: ReplyQueue::default(),
            status: 0,
            resolution: 2,
            sample_rate: 100,
            mouse_type: MouseType::Plain,
            detect_state: 0,
            wrap: false,
        }
    }
}

impl Ps2Mouse {
    pub fn has_data(&self) -> bool {
        !self.queue.bytes.is_empty()
    }

    pub fn read_data(&mut self) -> Option<u8> {
        self.queue.pop()
    }

    /// Pushes a movement/button-state packet (3 bytes plain, 4 bytes for
    /// IntelliMouse wheel data) if streaming and enabled.
    pub fn push_packet(&mut self, dx: i32, dy: i32, dz: i32, buttons: u8) {
        if self.status & MOUSE_STATUS_REMOTE != 0 || self.status & MOUSE_STATUS_ENABLED == 0 {
            return;
        }
        self.queue_packet(dx, dy, dz, buttons);
    }

    fn queue_packet(&mut self, dx: i32, dy: i32, dz: i32, buttons: u8) {
        let clamp = |v: i32| v.clamp(-256, 255) as i16 as u8;
        let dx1 = clamp(dx);
        let dy1 = clamp(dy);
        let mut b0 = 0x08 | (buttons & 0x07);
        b0 |= ((dx < -256 || dx > 255) as u8) << 6;
        b0 |= ((dy < -256 || dy > 255) as u8) << 7;
        self.queue.push(b0);
        self.queue.push(dx1);
        self.queue.push(dy1);
        if matches!(self.mouse_type, MouseType::ImPs2 | MouseType::ImEx) {
            self.queue.push(dz.clamp(-8, 7) as i8 as u8);
        }
    }

    pub fn write_command(&mut self, val: u8) {
        match self.queue.write_cmd {
            None => {
                if self.wrap {
                    if val == AUX_RESET_WRAP {
                        self.wrap = false;
                        self.queue.push(AUX_ACK);
                        return;
                    } else if val != AUX_RESET {
                        self.queue.push(val);
                        return;
                    }
                }
                match val {
                    AUX_SET_SCALE11 => {
                        self.status &= !MOUSE_STATUS_SCALE21;
                        self.queue.push(AUX_ACK);
                    }
                    AUX_SET_SCALE21 => {
                        self.status |= MOUSE_STATUS_SCALE21;
                        self.queue.push(AUX_ACK);
                    }
                    AUX_SET_STREAM => {
                        self.status &= !MOUSE_STATUS_REMOTE;
                        self.queue.push(AUX_ACK);
                    }
                    AUX_SET_WRAP => {
                        self.wrap = true;
                        self.queue.push(AUX_ACK);
                    }
                    AUX_SET_REMOTE => {
                        self.status |= MOUSE_STATUS_REMOTE;
                        self.queue.push(AUX_ACK);
                    }
                    AUX_GET_TYPE => {
                        self.queue.push(AUX_ACK);
                        self.queue.push(match self.mouse_type {
                            MouseType::Plain => 0,
                            MouseType::ImPs2 => 3,
                            MouseType::ImEx => 4,
                        });
                    }
                    AUX_SET_RES | AUX_SET_SAMPLE => {
                        self.queue.write_cmd = Some(val);
                        self.queue.push(AUX_ACK);
                    }
                    AUX_GET_SCALE => {
                        self.queue.push(AUX_ACK);
                        self.queue.push(self.status);
                        self.queue.push(self.resolution);
                        self.queue.push(self.sample_rate);
                    }
                    AUX_POLL => {
                        self.queue.push(AUX_ACK);
                        self.queue_packet(0, 0, 0, 0);
                    }
                    AUX_ENABLE_DEV => {
                        self.status |= MOUSE_STATUS_ENABLED;
                        self.queue.push(AUX_ACK);
                    }
                    AUX_DISABLE_DEV => {
                        self.status &= !MOUSE_STATUS_ENABLED;
                        self.queue.push(AUX_ACK);
                    }
                    AUX_SET_DEFAULT => {
                        self.sample_rate = 100;
                        self.resolution = 2;
                        self.status = 0;
                        self.queue.push(AUX_ACK);
                    }
                    AUX_RESET => {
                        self.sample_rate = 100;
                        self.resolution = 2;
                        self.status = 0;
                        self.mouse_type = MouseType::Plain;
                        self.queue.push(AUX_ACK);
                        self.queue.push(0xaa);
                        self.queue.push(0);
                    }
                    _ => {}
                }
            }
            Some(AUX_SET_SAMPLE) => {
                self.sample_rate = val;
                self.detect_state = match (self.detect_state, val) {
                    (0, 200) => 1,
                    (1, 100) => 2,
                    (1, 200) => 3,
                    (1, _) => 0,
                    (2, 80) => {
                        self.mouse_type = MouseType::ImPs2;
                        0
                    }
                    (3, 80) => {
                        self.mouse_type = MouseType::ImEx;
                        0
                    }
                    (2, _) | (3, _) => 0,
                    _ => 0,
                };
                self.queue.push(AUX_ACK);
                self.queue.write_cmd = None;
            }
            Some(AUX_SET_RES) => {
                self.resolution = val;
                self.queue.push(AUX_ACK);
                self.queue.write_cmd = None;
            }
            Some(_) => self.queue.write_cmd = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_reset_replies_ack_then_por() {
        let mut kbd = Ps2Keyboard::default();
        kbd.write_command(KBD_CMD_RESET);
        assert_eq!(kbd.read_data(), Some(KBD_REPLY_ACK));
        assert_eq!(kbd.read_data(), Some(KBD_REPLY_POR));
        assert!(kbd.scan_enabled);
    }

    #[test]
    fn keyboard_scancode_set_roundtrip() {
        let mut kbd = Ps2Keyboard::default();
        kbd.write_command(KBD_CMD_SCANCODE);
        assert_eq!(kbd.read_data(), Some(KBD_REPLY_ACK));
        kbd.write_command(2);
        assert_eq!(kbd.read_data(), Some(KBD_REPLY_ACK));
        assert_eq!(kbd.scancode_set, ScancodeSet::Set2);
    }

    #[test]
    fn mouse_intellimouse_detection_sequence() {
        let mut m = Ps2Mouse::default();
        for rate in [200, 100, 80] {
            m.write_command(AUX_SET_SAMPLE);
            m.read_data();
            m.write_command(rate);
            m.read_data();
        }
        assert_eq!(m.mouse_type, MouseType::ImPs2);
    }

    #[test]
    fn mouse_wrap_mode_echoes_bytes_until_reset() {
        let mut m = Ps2Mouse::default();
        m.write_command(AUX_SET_WRAP);
        assert_eq!(m.read_data(), Some(AUX_ACK));
        m.write_command(0x77);
        assert_eq!(m.read_data(), Some(0x77));
        m.write_command(AUX_RESET_WRAP);
        assert_eq!(m.read_data(), Some(AUX_ACK));
        assert!(!m.wrap);
    }
}
