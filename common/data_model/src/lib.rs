// Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Little-endian wire-format integer newtypes.
//!
//! Every on-the-wire register and VirtIO/descriptor struct in this
//! workspace stores its multi-byte fields as one of these rather than a
//! bare `u16`/`u32`/`u64`, so a struct that derives `zerocopy::AsBytes` +
//! `FromBytes` is byte-exact on any host regardless of native endianness.

use std::mem::size_of;

use static_assertions::const_assert_eq;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::FromZeroes;

macro_rules! le_int_type {
    ($name:ident, $native:ty) => {
        #[derive(
            Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, AsBytes, FromZeroes, FromBytes,
        )]
        #[repr(transparent)]
        pub struct $name($native);

        impl $name {
            pub fn new(v: $native) -> $name {
                $name(v.to_le())
            }

            pub fn to_native(self) -> $native {
                <$native>::from_le(self.0)
            }
        }

        impl From<$native> for $name {
            fn from(v: $native) -> Self {
                $name::new(v)
            }
        }

        impl From<$name> for $native {
            fn from(v: $name) -> $native {
                v.to_native()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_native())
            }
        }
    };
}

le_int_type!(Le16, u16);
le_int_type!(Le32, u32);
le_int_type!(Le64, u64);

const_assert_eq!(size_of::<Le16>(), size_of::<u16>());
const_assert_eq!(size_of::<Le32>(), size_of::<u32>());
const_assert_eq!(size_of::<Le64>(), size_of::<u64>());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        assert_eq!(Le32::new(0x1234_5678).to_native(), 0x1234_5678);
        assert_eq!(Le16::from(0xbeefu16).to_native(), 0xbeef);
    }

    #[test]
    fn le_bytes() {
        let v = Le32::new(0x0102_0304);
        assert_eq!(v.as_bytes(), &[0x04, 0x03, 0x02, 0x01]);
    }
}
