//! # MetaSpace Address Policy
//!
//! `MetaSpace` carves a small metadata block out of every fixed-size run of
//! data in a single physical file. Metadata that is rewritten often stays
//! physically close to the data it describes, and neither stream ever
//! overlaps the other.
//!
//! ## Physical Layout
//!
//! ```text
//! cycle = block_size + block_spacing
//!
//! +--------+-----------------------+--------+-----------------------+
//! | meta 0 |        data 0         | meta 1 |        data 1         | ...
//! +--------+-----------------------+--------+-----------------------+
//!  ^ header_size bytes of stream header at the start of meta 0
//! ```
//!
//! ## Views
//!
//! A `MetaSpace` presents one of two complementary views of the same file:
//!
//! | View             | Caller sees      | Reserved (skipped)            |
//! |------------------|------------------|-------------------------------|
//! | `View::Data`     | data runs        | metadata blocks               |
//! | `View::Metadata` | metadata blocks  | data runs + stream header     |
//!
//! The boundary arithmetic of both views (the inclusive run end and the
//! `+ block_size` / `+ cycle` jumps) is part of the on-disk contract and must
//! not be changed.
//!
//! ## Thread Safety
//!
//! `MetaSpace` is `Copy` and holds no mutable state.

use eyre::{ensure, Result};

use super::address_space::AddressSpace;
use crate::config::MetaSpaceConfig;

/// Selects which region of each cycle the caller addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    /// Metadata blocks are reserved; virtual offsets address data.
    Data,
    /// Data runs and the stream header are reserved; virtual offsets
    /// address metadata.
    Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaSpace {
    block_size: u64,
    block_spacing: u64,
    header_size: u64,
    view: View,
}

impl MetaSpace {
    pub fn new(block_size: u64, block_spacing: u64, header_size: u64, view: View) -> Result<Self> {
        ensure!(block_size > 0, "block size must be positive");
        ensure!(block_spacing > 0, "block spacing must be positive");
        ensure!(
            block_size.checked_add(block_spacing).is_some(),
            "block size {} plus spacing {} overflows a cycle",
            block_size,
            block_spacing
        );
        ensure!(
            header_size < block_size,
            "header size {} must be smaller than block size {}",
            header_size,
            block_size
        );

        Ok(Self {
            block_size,
            block_spacing,
            header_size,
            view,
        })
    }

    pub fn with_config(config: MetaSpaceConfig, header_size: u64, view: View) -> Result<Self> {
        Self::new(config.block_size, config.block_spacing, header_size, view)
    }

    /// Data view over the default geometry.
    pub fn data(header_size: u64) -> Result<Self> {
        Self::with_config(MetaSpaceConfig::default(), header_size, View::Data)
    }

    /// Metadata view over the default geometry.
    pub fn metadata(header_size: u64) -> Result<Self> {
        Self::with_config(MetaSpaceConfig::default(), header_size, View::Metadata)
    }

    /// The complementary view over the same physical layout.
    pub fn complement(&self) -> Self {
        let view = match self.view {
            View::Data => View::Metadata,
            View::Metadata => View::Data,
        };
        Self { view, ..*self }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn block_spacing(&self) -> u64 {
        self.block_spacing
    }

    pub fn header_size(&self) -> u64 {
        self.header_size
    }

    pub fn view(&self) -> View {
        self.view
    }

    #[inline]
    fn cycle(&self) -> u64 {
        self.block_size + self.block_spacing
    }

    /// Number of bytes this view owns in one full cycle.
    pub fn usable_per_cycle(&self) -> u64 {
        match self.view {
            View::Data => self.block_spacing,
            View::Metadata => self.block_size,
        }
    }
}

impl AddressSpace for MetaSpace {
    fn is_used(&self, physical: u64) -> bool {
        let offset = physical % self.cycle();
        match self.view {
            View::Data => offset < self.block_size,
            View::Metadata => physical < self.header_size || offset >= self.block_size,
        }
    }

    fn next_unused_address(&self, physical: u64) -> u64 {
        let offset = physical % self.cycle();
        let cycle_start = physical - offset;
        // Runs near the top of the u64 range are clamped instead of wrapping.
        match self.view {
            View::Data => {
                if offset < self.block_size {
                    cycle_start.saturating_add(self.block_size)
                } else {
                    cycle_start.saturating_add(self.cycle() - 1)
                }
            }
            View::Metadata => {
                if physical < self.header_size {
                    self.header_size
                } else if offset >= self.block_size {
                    cycle_start.saturating_add(self.cycle())
                } else {
                    cycle_start.saturating_add(self.block_size - 1)
                }
            }
        }
    }

    fn translate(&self, virtual_addr: u64) -> u64 {
        match self.view {
            View::Data => {
                let cycles = virtual_addr / self.block_spacing;
                cycles * self.cycle() + self.block_size + virtual_addr % self.block_spacing
            }
            View::Metadata => {
                let shifted = virtual_addr + self.header_size;
                let cycles = shifted / self.block_size;
                cycles * self.cycle() + shifted % self.block_size
            }
        }
    }

    /// Largest virtual address whose physical translation fits in a u64.
    fn last_virtual_address(&self) -> u64 {
        let cycle = self.cycle();
        match self.view {
            View::Data => {
                let top = u64::MAX - self.block_size;
                let cycles = top / cycle;
                let tail = (top % cycle).min(self.block_spacing - 1);
                cycles * self.block_spacing + tail
            }
            View::Metadata => {
                let cycles = u64::MAX / cycle;
                let tail = (u64::MAX % cycle).min(self.block_size - 1);
                cycles * self.block_size + tail - self.header_size
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(view: View, header: u64) -> MetaSpace {
        MetaSpace::new(16, 64, header, view).unwrap()
    }

    #[test]
    fn header_not_smaller_than_block_is_rejected() {
        assert!(MetaSpace::new(16, 64, 16, View::Data).is_err());
        assert!(MetaSpace::new(16, 64, 17, View::Metadata).is_err());
        assert!(MetaSpace::new(16, 64, 15, View::Metadata).is_ok());
    }

    #[test]
    fn zero_geometry_is_rejected() {
        assert!(MetaSpace::new(0, 64, 0, View::Data).is_err());
        assert!(MetaSpace::new(16, 0, 0, View::Data).is_err());
    }

    #[test]
    fn data_view_reserves_metadata_blocks() {
        let space = small(View::Data, 0);

        assert!(space.is_used(0));
        assert!(space.is_used(15));
        assert!(!space.is_used(16));
        assert!(!space.is_used(79));
        assert!(space.is_used(80));
        assert!(!space.is_used(96));
    }

    #[test]
    fn data_view_run_boundaries() {
        let space = small(View::Data, 0);

        assert_eq!(space.next_unused_address(0), 16);
        assert_eq!(space.next_unused_address(15), 16);
        assert_eq!(space.next_unused_address(16), 79);
        assert_eq!(space.next_unused_address(79), 79);
        assert_eq!(space.next_unused_address(80), 96);
    }

    #[test]
    fn data_view_translate_skips_blocks() {
        let space = small(View::Data, 0);

        assert_eq!(space.translate(0), 16);
        assert_eq!(space.translate(63), 79);
        assert_eq!(space.translate(64), 96);
        assert_eq!(space.translate(128), 176);
    }

    #[test]
    fn metadata_view_reserves_header_and_data() {
        let space = small(View::Metadata, 4);

        assert!(space.is_used(0));
        assert!(space.is_used(3));
        assert!(!space.is_used(4));
        assert!(!space.is_used(15));
        assert!(space.is_used(16));
        assert!(space.is_used(79));
        assert!(!space.is_used(80));
    }

    #[test]
    fn metadata_view_run_boundaries() {
        let space = small(View::Metadata, 4);

        assert_eq!(space.next_unused_address(0), 4);
        assert_eq!(space.next_unused_address(4), 15);
        assert_eq!(space.next_unused_address(16), 80);
        assert_eq!(space.next_unused_address(79), 80);
        assert_eq!(space.next_unused_address(80), 95);
    }

    #[test]
    fn metadata_view_translate_skips_header() {
        let space = small(View::Metadata, 4);

        assert_eq!(space.translate(0), 4);
        assert_eq!(space.translate(11), 15);
        assert_eq!(space.translate(12), 80);
        assert_eq!(space.translate(27), 95);
        assert_eq!(space.translate(28), 160);
    }

    #[test]
    fn translate_is_strictly_increasing_and_never_reserved() {
        for space in [
            small(View::Data, 0),
            small(View::Metadata, 0),
            small(View::Metadata, 9),
            MetaSpace::new(4096, 1024 * 1024, 64, View::Data).unwrap(),
            MetaSpace::new(4096, 1024 * 1024, 64, View::Metadata).unwrap(),
        ] {
            let mut previous = None;
            for v in 0..5_000u64 {
                let p = space.translate(v);
                assert!(!space.is_used(p), "{:?} translated {} into reserved {}", space, v, p);
                if let Some(prev) = previous {
                    assert!(p > prev, "{:?} not increasing at {}", space, v);
                }
                previous = Some(p);
            }
        }
    }

    #[test]
    fn run_length_matches_geometry() {
        let data = small(View::Data, 0);
        let p = data.translate(64);
        assert_eq!(data.next_unused_address(p) - p + 1, 64);

        let meta = small(View::Metadata, 0);
        let p = meta.translate(16);
        assert_eq!(meta.next_unused_address(p) - p + 1, 16);
    }

    #[test]
    fn views_partition_every_cycle() {
        let data = small(View::Metadata, 0).complement();
        let meta = data.complement();

        for p in 0..400u64 {
            assert_ne!(data.is_used(p), meta.is_used(p), "address {}", p);
        }
    }

    #[test]
    fn overflowing_cycle_is_rejected() {
        assert!(MetaSpace::new(u64::MAX, 1, 0, View::Data).is_err());
        assert!(MetaSpace::new(1 << 63, 1 << 63, 0, View::Metadata).is_err());
        assert!(MetaSpace::new(u64::MAX - 1, 1, 0, View::Data).is_ok());
    }

    #[test]
    fn last_virtual_address_translates_without_overflow() {
        for space in [
            small(View::Data, 0),
            small(View::Metadata, 4),
            MetaSpace::new(4096, 1024 * 1024, 64, View::Data).unwrap(),
            MetaSpace::new(4096, 1024 * 1024, 64, View::Metadata).unwrap(),
            MetaSpace::new(u64::MAX - 1, 1, 0, View::Data).unwrap(),
            MetaSpace::new(u64::MAX - 1, 1, 0, View::Metadata).unwrap(),
        ] {
            let last = space.last_virtual_address();
            let p = space.translate(last);
            assert!(!space.is_used(p), "{:?} last {} lands on reserved {}", space, last, p);
            if last > 0 {
                assert!(p > space.translate(last - 1));
            }
            assert!(space.next_unused_address(p) >= p);
        }
    }

    #[test]
    fn last_virtual_address_of_small_geometry() {
        // 2^64 = 0x1_0000_0000_0000_0000, cycle 80: u64::MAX % 80 == 15.
        let data = small(View::Data, 0);
        let last = data.last_virtual_address();
        assert_eq!(data.translate(last) % 80, 79);
        assert!(u64::MAX - data.translate(last) < 80);

        let meta = small(View::Metadata, 4);
        assert_eq!(meta.translate(meta.last_virtual_address()), u64::MAX);
    }

    #[test]
    fn usable_bytes_per_cycle() {
        assert_eq!(small(View::Data, 0).usable_per_cycle(), 64);
        assert_eq!(small(View::Metadata, 0).usable_per_cycle(), 16);
    }
}
