//! # Address Space Policies
//!
//! An `AddressSpace` decides which physical byte offsets of a file belong to
//! the caller's stream and which are reserved for someone else. It also maps
//! a virtual (gap-free) offset onto the physical offset where that byte lives.
//!
//! ## Run Arithmetic
//!
//! `next_unused_address` is deliberately asymmetric:
//!
//! ```text
//! p reserved  ──> first usable address after the reserved run
//! p usable    ──> LAST usable address of the current run (inclusive)
//! ```
//!
//! Readers and writers therefore compute a contiguous chunk as
//! `end - p + 1` and only consult the policy again once the chunk is
//! exhausted.
//!
//! ## Thread Safety
//!
//! Implementations are pure functions of their parameters and must be
//! `Send + Sync`; a single policy value may be shared by any number of
//! threads.

pub trait AddressSpace: Send + Sync {
    /// True when `physical` is reserved and must be skipped by this view.
    fn is_used(&self, physical: u64) -> bool;

    /// See the module documentation for the reserved/usable asymmetry.
    fn next_unused_address(&self, physical: u64) -> u64;

    /// Maps a virtual offset to its physical offset.
    fn translate(&self, virtual_addr: u64) -> u64;

    /// Upper bound of the virtual space, `u64::MAX` when unbounded.
    fn last_virtual_address(&self) -> u64;
}

impl<T: AddressSpace + ?Sized> AddressSpace for &T {
    fn is_used(&self, physical: u64) -> bool {
        (**self).is_used(physical)
    }

    fn next_unused_address(&self, physical: u64) -> u64 {
        (**self).next_unused_address(physical)
    }

    fn translate(&self, virtual_addr: u64) -> u64 {
        (**self).translate(virtual_addr)
    }

    fn last_virtual_address(&self) -> u64 {
        (**self).last_virtual_address()
    }
}

/// Identity mapping with nothing reserved.
///
/// Lets a `VirtualFile` act as a plain random access file, which is how
/// files without interleaved metadata are read and written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Contiguous;

impl AddressSpace for Contiguous {
    fn is_used(&self, _physical: u64) -> bool {
        false
    }

    fn next_unused_address(&self, _physical: u64) -> u64 {
        u64::MAX
    }

    fn translate(&self, virtual_addr: u64) -> u64 {
        virtual_addr
    }

    fn last_virtual_address(&self) -> u64 {
        u64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_translates_identity() {
        let space = Contiguous;

        for v in [0u64, 1, 4095, 1 << 40] {
            assert_eq!(space.translate(v), v);
            assert!(!space.is_used(v));
        }
    }

    #[test]
    fn contiguous_run_never_ends() {
        assert_eq!(Contiguous.next_unused_address(17), u64::MAX);
        assert_eq!(Contiguous.last_virtual_address(), u64::MAX);
    }

    #[test]
    fn reference_forwards_to_policy() {
        let space = Contiguous;
        let by_ref: &dyn AddressSpace = &space;

        assert_eq!(by_ref.translate(99), 99);
    }
}
