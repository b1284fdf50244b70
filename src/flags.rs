// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Characteristics of sources and the packed flag algebra tracking them
//! through a pipeline.
//!
//! Each [`StreamFlag`] occupies two bits of a [`Flags`] value:
//! - `01`: the property is known to hold (set),
//! - `10`: the property is known not to hold (cleared),
//! - `11`: the property is preserved from upstream,
//! - `00`: nothing is said about the property.
//!
//! The bit layout of the "set" bits of the first four flags matches the bit
//! layout of the corresponding [`Characteristics`], so that converting between
//! the two is a matter of masking.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Bitmask of properties of a [`Spliterator`](crate::source::Spliterator).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Characteristics(u32);

impl Characteristics {
    /// No characteristics.
    pub const NONE: Self = Self(0);
    /// No two elements compare equal.
    pub const DISTINCT: Self = Self(0x0000_0001);
    /// Elements are sorted by their natural order (or by the comparator
    /// reported by the source).
    pub const SORTED: Self = Self(0x0000_0004);
    /// Elements have a defined encounter order.
    pub const ORDERED: Self = Self(0x0000_0010);
    /// The estimated size is exact.
    pub const SIZED: Self = Self(0x0000_0040);
    /// The underlying elements cannot be structurally modified.
    pub const IMMUTABLE: Self = Self(0x0000_0400);
    /// The underlying elements may be modified concurrently.
    pub const CONCURRENT: Self = Self(0x0000_1000);
    /// All the splits of this source are [`SIZED`](Self::SIZED) too.
    pub const SUBSIZED: Self = Self(0x0000_4000);

    const ALL: [(Self, &'static str); 7] = [
        (Self::DISTINCT, "DISTINCT"),
        (Self::SORTED, "SORTED"),
        (Self::ORDERED, "ORDERED"),
        (Self::SIZED, "SIZED"),
        (Self::IMMUTABLE, "IMMUTABLE"),
        (Self::CONCURRENT, "CONCURRENT"),
        (Self::SUBSIZED, "SUBSIZED"),
    ];

    /// Returns the raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Builds characteristics from raw bits, discarding unknown bits.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & 0x5455)
    }

    /// Returns true if all the characteristics of `other` are set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `self` without the characteristics of `other`.
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for Characteristics {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Characteristics {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Characteristics {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for Characteristics {
    type Output = Self;

    fn not(self) -> Self {
        Self::from_bits_truncate(!self.0)
    }
}

impl fmt::Debug for Characteristics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (c, name) in Self::ALL {
            if self.contains(c) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// A property tracked by the flag algebra.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamFlag {
    /// Elements are distinct.
    Distinct,
    /// Elements are sorted by their natural order.
    Sorted,
    /// Elements have a defined encounter order.
    Ordered,
    /// The number of elements is known exactly.
    Sized,
    /// The operation may stop before consuming all its input.
    ShortCircuit,
}

impl StreamFlag {
    const fn bit_position(self) -> u32 {
        match self {
            StreamFlag::Distinct => 0,
            StreamFlag::Sorted => 2,
            StreamFlag::Ordered => 4,
            StreamFlag::Sized => 6,
            StreamFlag::ShortCircuit => 24,
        }
    }

    /// Bits of this flag meaning "set".
    pub const fn set(self) -> Flags {
        Flags(0b01 << self.bit_position())
    }

    /// Bits of this flag meaning "cleared".
    pub const fn clear(self) -> Flags {
        Flags(0b10 << self.bit_position())
    }

    const fn preserve(self) -> Flags {
        Flags(0b11 << self.bit_position())
    }

    /// Returns true if this flag is known to be set in the given flags.
    pub const fn is_known(self, flags: Flags) -> bool {
        flags.0 & self.preserve().0 == self.set().0
    }

    /// Returns true if this flag is known to be cleared in the given flags.
    pub const fn is_cleared(self, flags: Flags) -> bool {
        flags.0 & self.preserve().0 == self.clear().0
    }

    /// Returns true if this flag is preserved (neither set nor cleared) in the
    /// given combined flags.
    pub const fn is_preserved(self, flags: Flags) -> bool {
        flags.0 & self.preserve().0 == self.preserve().0
    }
}

/// Packed two-bits-per-property flags of a stage, or of a whole pipeline once
/// combined.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u32);

const ALL_FLAGS: [StreamFlag; 5] = [
    StreamFlag::Distinct,
    StreamFlag::Sorted,
    StreamFlag::Ordered,
    StreamFlag::Sized,
    StreamFlag::ShortCircuit,
];

const FLAG_MASK: u32 = 0x0300_00ff;
const FLAG_MASK_IS: u32 = 0x0100_0055;
const FLAG_MASK_NOT: u32 = 0x0200_00aa;
const CHARACTERISTICS_MASK: u32 = 0x55;

impl Flags {
    /// No constraint on any property.
    pub const NONE: Self = Self(0);
    /// Initial combined value: every property is preserved.
    pub const INITIAL: Self = Self(FLAG_MASK);

    /// The elements are distinct.
    pub const IS_DISTINCT: Self = StreamFlag::Distinct.set();
    /// The elements may not be distinct.
    pub const NOT_DISTINCT: Self = StreamFlag::Distinct.clear();
    /// The elements are sorted by natural order.
    pub const IS_SORTED: Self = StreamFlag::Sorted.set();
    /// The elements may not be sorted.
    pub const NOT_SORTED: Self = StreamFlag::Sorted.clear();
    /// The elements have an encounter order.
    pub const IS_ORDERED: Self = StreamFlag::Ordered.set();
    /// The encounter order is not meaningful.
    pub const NOT_ORDERED: Self = StreamFlag::Ordered.clear();
    /// The number of elements is known.
    pub const IS_SIZED: Self = StreamFlag::Sized.set();
    /// The number of elements may not be known.
    pub const NOT_SIZED: Self = StreamFlag::Sized.clear();
    /// The operation may short-circuit.
    pub const IS_SHORT_CIRCUIT: Self = StreamFlag::ShortCircuit.set();

    /// Returns the raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    const fn mask(self) -> u32 {
        if self.0 == 0 {
            FLAG_MASK
        } else {
            !(self.0 | ((FLAG_MASK_IS & self.0) << 1) | ((FLAG_MASK_NOT & self.0) >> 1))
        }
    }

    /// Combines the flags of a new stage with the flags accumulated so far.
    ///
    /// Every property explicitly set or cleared by `self` overrides the
    /// accumulated value, other properties keep their accumulated value.
    pub const fn combine(self, previous: Flags) -> Flags {
        Flags((previous.0 & self.mask()) | self.0)
    }

    /// Returns the properties known to be set, as "set" bits only.
    pub const fn to_stream_flags(self) -> Flags {
        Flags(((!self.0) >> 1) & FLAG_MASK_IS & self.0)
    }

    /// Returns the characteristics corresponding to the known properties of
    /// these combined flags.
    pub const fn to_characteristics(self) -> Characteristics {
        Characteristics(self.to_stream_flags().0 & CHARACTERISTICS_MASK)
    }

    /// Returns the flags corresponding to the characteristics of a source.
    ///
    /// Sorting by a custom comparator isn't sorting by natural order, so the
    /// [`SORTED`](Characteristics::SORTED) characteristic is only propagated
    /// if `custom_comparator` is false.
    pub const fn from_characteristics(
        characteristics: Characteristics,
        custom_comparator: bool,
    ) -> Flags {
        let mut bits = characteristics.0 & CHARACTERISTICS_MASK;
        if custom_comparator {
            bits &= !Characteristics::SORTED.0;
        }
        Flags(bits)
    }

    /// Returns the initial combined flags of a head stage for the given
    /// source characteristics: properties of the source are set, and all
    /// other properties are left preserved, so that they never read as known.
    pub const fn from_source(characteristics: Characteristics, custom_comparator: bool) -> Flags {
        let source = Self::from_characteristics(characteristics, custom_comparator);
        Flags(!(source.0 << 1) & Self::INITIAL.0)
    }

    /// Returns true if the given flag is known to be set.
    pub const fn is_known(self, flag: StreamFlag) -> bool {
        flag.is_known(self)
    }

    /// Returns these flags without the bits of `other`.
    pub const fn without(self, other: Flags) -> Flags {
        Flags(self.0 & !other.0)
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for flag in ALL_FLAGS {
            let state = match (self.0 >> flag.bit_position()) & 0b11 {
                0b01 => "set",
                0b10 => "cleared",
                0b11 => "preserved",
                _ => continue,
            };
            map.entry(&flag, &state);
        }
        map.finish()
    }
}
