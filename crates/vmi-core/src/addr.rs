//! Address newtypes used throughout the introspection engine.

use serde::{Deserialize, Serialize};

macro_rules! impl_address_newtype {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            /// Creates a new address from a raw `u64`.
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw `u64` value.
            pub const fn value(self) -> u64 {
                self.0
            }

            /// Rounds the address down to the start of its containing page.
            pub const fn page_base(self, page_shift: u32) -> Self {
                Self(self.0 & !((1u64 << page_shift) - 1))
            }

            /// Returns the offset of this address within its containing page.
            pub const fn page_offset(self, page_shift: u32) -> u64 {
                self.0 & ((1u64 << page_shift) - 1)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}(0x{:x})", stringify!($name), self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "0x{:x}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl std::ops::Add<u64> for $name {
            type Output = Self;

            fn add(self, rhs: u64) -> Self {
                Self(self.0.wrapping_add(rhs))
            }
        }

        impl std::ops::Sub<u64> for $name {
            type Output = Self;

            fn sub(self, rhs: u64) -> Self {
                Self(self.0.wrapping_sub(rhs))
            }
        }

        impl std::ops::Sub for $name {
            type Output = u64;

            fn sub(self, rhs: Self) -> u64 {
                self.0.wrapping_sub(rhs.0)
            }
        }
    };
}

impl_address_newtype!(Va, "A guest virtual address.");
impl_address_newtype!(Pa, "A guest physical address.");

impl Va {
    /// Returns `true` if this is the null virtual address.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Checks whether this IA-32e virtual address is canonical, i.e. bits
    /// `[63:48]` are a sign-extension of bit 47.
    ///
    /// Non-canonical addresses must fail translation with
    /// [`VmiError::NonCanonical`](crate::VmiError::NonCanonical) rather than
    /// silently masking the high bits.
    pub const fn is_canonical(self) -> bool {
        let top17 = self.0 >> 47;
        top17 == 0 || top17 == 0x1_ffff
    }
}

impl Pa {
    /// Returns `true` if this is the null physical address.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}
