//! Zone and track geometry: pure arithmetic derived from a device's length
//! in sectors. No locks, no I/O — just the numbers from spec §3/§4.1.

use crate::error::ImrError;

/// Bytes per sector.
pub const SECTOR_BYTES: u64 = 512;
/// Sectors per block. A block is 4 KiB.
pub const BLOCK_SECTORS: u64 = 8;
/// Bytes per block (4 KiB).
pub const BLOCK_BYTES: u64 = BLOCK_SECTORS * SECTOR_BYTES;

/// Blocks per zone (256 MiB).
pub const ZONE_BLOCKS: u64 = 65_536;
/// Sectors per zone.
pub const ZONE_SECTORS: u64 = ZONE_BLOCKS * BLOCK_SECTORS;

/// Blocks in a top track. Top tracks are the narrower, non-destructive track
/// of a pair.
pub const TOP_TRACK_BLOCKS: u64 = 456;
/// Blocks in a bottom track. Writing a bottom track clobbers the overlapping
/// portion of both neighboring top tracks.
pub const BOTTOM_TRACK_BLOCKS: u64 = 568;
/// Top/bottom track pairs per zone.
pub const PAIRS_PER_ZONE: u64 = 64;
/// Blocks spanned by one top/bottom pair.
pub const BLOCKS_PER_PAIR: u64 = TOP_TRACK_BLOCKS + BOTTOM_TRACK_BLOCKS;

/// Total bottom-track capacity per zone (spec calls this `B`).
pub const BOTTOM_CAPACITY_PER_ZONE: u64 = BOTTOM_TRACK_BLOCKS * PAIRS_PER_ZONE;
/// Total top-track capacity per zone (spec calls this `T`).
pub const TOP_CAPACITY_PER_ZONE: u64 = TOP_TRACK_BLOCKS * PAIRS_PER_ZONE;

/// Device capacity ceiling: 10 TiB, expressed in sectors.
pub const MAX_DEVICE_SECTORS: u64 = (10u64 * 1024 * 1024 * 1024 * 1024) / SECTOR_BYTES;

const _: () = assert!(BLOCKS_PER_PAIR * PAIRS_PER_ZONE == ZONE_BLOCKS);

/// Device-wide geometry derived once at attach time from the backing
/// device's length in sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    num_zones: u64,
}

impl Geometry {
    /// Derives geometry from a device length in sectors. Rejects devices
    /// smaller than one zone or larger than the 10 TiB ceiling.
    pub fn new(device_sectors: u64) -> Result<Self, ImrError> {
        if device_sectors < ZONE_SECTORS || device_sectors > MAX_DEVICE_SECTORS {
            return Err(ImrError::OutRange);
        }
        let num_zones = device_sectors / ZONE_SECTORS;
        Ok(Geometry { num_zones })
    }

    /// Number of whole zones carved out of the device.
    pub fn num_zones(&self) -> u64 {
        self.num_zones
    }

    /// Index of the zone containing `lba`, or `None` if `lba` is beyond the
    /// last zone.
    pub fn zone_of(&self, lba: u64) -> Option<u64> {
        let zi = lba / ZONE_SECTORS;
        (zi < self.num_zones).then_some(zi)
    }

    /// Starting sector (LBA) of zone `zi`.
    pub fn zone_base_lba(&self, zi: u64) -> u64 {
        zi * ZONE_SECTORS
    }

    /// Offset, in blocks, of `lba` within its zone. `lba` must be block-
    /// aligned; callers check `WRITE_ALIGN` separately.
    pub fn block_offset_in_zone(&self, lba: u64) -> u64 {
        (lba % ZONE_SECTORS) / BLOCK_SECTORS
    }

    /// Track pair index (0..64) containing a zone-relative block offset.
    pub fn track_pair_of(block_offset: u64) -> u64 {
        (block_offset % ZONE_BLOCKS) / BLOCKS_PER_PAIR
    }

    /// Slot index within a pair's top or bottom track (whichever
    /// [`is_top_half`](Self::is_top_half) selects).
    pub fn slot_in_pair(block_offset: u64) -> u64 {
        let rem = block_offset % BLOCKS_PER_PAIR;
        if rem < TOP_TRACK_BLOCKS {
            rem
        } else {
            rem - TOP_TRACK_BLOCKS
        }
    }

    /// Whether a zone-relative block offset falls on the top track of its
    /// pair (top tracks occupy the first `TOP_TRACK_BLOCKS` of each pair).
    pub fn is_top_half(block_offset: u64) -> bool {
        (block_offset % BLOCKS_PER_PAIR) < TOP_TRACK_BLOCKS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_undersized_device() {
        assert_eq!(Geometry::new(ZONE_SECTORS - 1), Err(ImrError::OutRange));
    }

    #[test]
    fn rejects_oversized_device() {
        assert_eq!(
            Geometry::new(MAX_DEVICE_SECTORS + ZONE_SECTORS),
            Err(ImrError::OutRange)
        );
    }

    #[test]
    fn single_zone_device() {
        let g = Geometry::new(ZONE_SECTORS).unwrap();
        assert_eq!(g.num_zones(), 1);
        assert_eq!(g.zone_of(0), Some(0));
        assert_eq!(g.zone_of(ZONE_SECTORS), None);
    }

    #[test]
    fn multi_zone_device_truncates_partial_zone() {
        let g = Geometry::new(ZONE_SECTORS * 3 + 5).unwrap();
        assert_eq!(g.num_zones(), 3);
        assert_eq!(g.zone_base_lba(2), ZONE_SECTORS * 2);
        assert_eq!(g.zone_of(ZONE_SECTORS * 3), None);
    }

    #[test]
    fn pair_and_half_arithmetic() {
        assert!(Geometry::is_top_half(0));
        assert!(Geometry::is_top_half(TOP_TRACK_BLOCKS - 1));
        assert!(!Geometry::is_top_half(TOP_TRACK_BLOCKS));
        assert!(!Geometry::is_top_half(BLOCKS_PER_PAIR - 1));
        assert_eq!(Geometry::track_pair_of(0), 0);
        assert_eq!(Geometry::track_pair_of(BLOCKS_PER_PAIR), 1);
        assert_eq!(Geometry::slot_in_pair(TOP_TRACK_BLOCKS), 0);
        assert_eq!(Geometry::slot_in_pair(BLOCKS_PER_PAIR - 1), BOTTOM_TRACK_BLOCKS - 1);
    }
}
