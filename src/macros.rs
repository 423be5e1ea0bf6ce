//! # Internal Macros
//!
//! ## zerocopy_accessors!
//!
//! Generates getters for big-endian zerocopy fields (`U32`, `U64`), and a
//! `set_` method for fields marked `mut`. On-disk headers are big-endian to
//! match the rest of the stream encoding.
//!
//! ```ignore
//! impl SpaceHeader {
//!     zerocopy_accessors! {
//!         version: u32,
//!         flags: mut u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn version(&self) -> u32
//! // pub fn flags(&self) -> u32
//! // pub fn set_flags(&mut self, val: u32)
//! ```

#[macro_export]
macro_rules! zerocopy_accessors {
    () => {};
    ($field:ident : mut $ty:ty $(, $($rest:tt)*)?) => {
        $crate::zerocopy_accessors!($field: $ty);

        ::paste::paste! {
            #[inline]
            pub fn [<set_ $field>](&mut self, val: $ty) {
                self.$field.set(val);
            }
        }

        $crate::zerocopy_accessors!($($($rest)*)?);
    };
    ($field:ident : $ty:ty $(, $($rest:tt)*)?) => {
        #[inline]
        pub fn $field(&self) -> $ty {
            self.$field.get()
        }

        $crate::zerocopy_accessors!($($($rest)*)?);
    };
}
