//! The read-modify-write planner and executor (spec §4.4, C4).
//!
//! Writing a bottom track physically overlaps part of both neighboring top
//! tracks. Before such a write can proceed, any top-track data it would
//! clobber has to be backed up, the bottom-track write performed, and the
//! backup written back.

use crate::device::BlockDevice;
use crate::geometry::{BOTTOM_TRACK_BLOCKS, PAIRS_PER_ZONE, TOP_TRACK_BLOCKS};
use crate::zone::ZoneStatus;
use std::io;

/// Maps a bottom-track slot to the top-track slot it overlaps, using
/// integer rational arithmetic scaled by 10,000 as spec §4.4 prescribes:
/// `top_slot = (boff * 10_000) / trackrate`, `trackrate = 568 * 10_000 /
/// 456`. This is arithmetically identical to `(boff * 456) / 568` and that
/// simpler form is what's actually evaluated (spec §9 permits either).
pub fn top_slot_for(bottom_slot: u64) -> u64 {
    debug_assert!(bottom_slot < BOTTOM_TRACK_BLOCKS);
    (bottom_slot * TOP_TRACK_BLOCKS) / BOTTOM_TRACK_BLOCKS
}

/// One scheduled backup: which pair/slot of top-track data must be saved
/// and restored around the bottom-track write, and its physical block
/// offset within the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backup {
    pub pair: u64,
    pub top_slot: u64,
    pub pba_offset: u32,
}

/// The planner's verdict for one bottom-track write: zero, one, or two
/// neighboring top-track blocks that must be backed up.
#[derive(Debug, Clone, Default)]
pub struct RmwPlan {
    pub backups: Vec<Backup>,
}

impl RmwPlan {
    pub fn is_empty(&self) -> bool {
        self.backups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.backups.len()
    }
}

/// Plans the RMW work for a write landing at `pair`/`bottom_slot` on a
/// bottom track. Examines both neighboring pairs (`pair` and `pair + 1`, if
/// it exists) and schedules a backup for each that has the corresponding
/// top-track block in use.
pub fn plan_rmw(zone: &ZoneStatus, pair: u64, bottom_slot: u64) -> RmwPlan {
    let top_slot = top_slot_for(bottom_slot);
    let mut backups = Vec::with_capacity(2);
    for candidate in [Some(pair), pair.checked_add(1)] {
        let Some(p) = candidate else { continue };
        if p >= PAIRS_PER_ZONE {
            continue;
        }
        if zone.is_used(p, top_slot) {
            backups.push(Backup {
                pair: p,
                top_slot,
                pba_offset: (p * 1024 + top_slot) as u32,
            });
        }
    }
    RmwPlan { backups }
}

/// Executes the strict RMW sequence of spec §4.4:
/// 1. Read each backed-up top-track block into a buffer.
/// 2. Perform the original bottom-track write.
/// 3. Write each buffer back to its original location.
///
/// `block_bytes` is the size in bytes of one block (used to size the
/// backup buffers); `primary_write` is the incoming bottom-track write,
/// expressed as (physical block offset within the zone, payload).
pub fn execute_rmw(
    device: &dyn BlockDevice,
    zone_base_block: u64,
    plan: &RmwPlan,
    block_bytes: usize,
    primary_write: (u64, &[u8]),
) -> io::Result<()> {
    let mut saved: Vec<(u32, Vec<u8>)> = Vec::with_capacity(plan.backups.len());
    for backup in &plan.backups {
        let mut buf = vec![0u8; block_bytes];
        device.read_blocks(zone_base_block + backup.pba_offset as u64, &mut buf)?;
        saved.push((backup.pba_offset, buf));
    }

    let (primary_offset, primary_payload) = primary_write;
    device.write_blocks(zone_base_block + primary_offset, primary_payload)?;

    for (pba_offset, buf) in saved {
        device.write_blocks(zone_base_block + pba_offset as u64, &buf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;
    use crate::geometry::ZONE_SECTORS;

    fn fresh_zone() -> ZoneStatus {
        ZoneStatus::new(0, ZONE_SECTORS)
    }

    #[test]
    fn top_slot_mapping_matches_spec_example() {
        assert_eq!(top_slot_for(0), 0);
        // spec: (boff * 456) / 568, plain integer division
        assert_eq!(top_slot_for(567), (567 * 456) / 568);
    }

    /// S4: after filling bottoms and one top slot, updating logical block 0
    /// (bottom_slot 0 of pair 0) must schedule exactly one backup against
    /// pair 0's top slot 0.
    #[test]
    fn s4_single_neighbor_backup() {
        let mut z = fresh_zone();
        z.set_used(0, 0);
        let plan = plan_rmw(&z, 0, 0);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.backups[0].pair, 0);
        assert_eq!(plan.backups[0].top_slot, 0);
        assert_eq!(plan.backups[0].pba_offset, 0);
    }

    /// S5: updating the first block of pair 1's bottom track (bottom_slot
    /// 0) examines neighbors pair 0 and pair 1; only pair 0's top slot is
    /// in use, so exactly one backup is scheduled.
    #[test]
    fn s5_only_one_of_two_neighbors_set() {
        let mut z = fresh_zone();
        z.set_used(0, 0);
        let plan = plan_rmw(&z, 1, 0);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.backups[0].pair, 0);
    }

    #[test]
    fn both_neighbors_set_yields_two_backups() {
        let bottom_slot = (0..568).find(|&b| top_slot_for(b) == 10).unwrap();
        let mut z = fresh_zone();
        z.set_used(0, 10);
        z.set_used(1, 10);
        let plan = plan_rmw(&z, 0, bottom_slot);
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn no_neighbors_used_yields_no_backups() {
        let z = fresh_zone();
        let plan = plan_rmw(&z, 5, 3);
        assert!(plan.is_empty());
    }

    #[test]
    fn last_pair_has_no_pair_plus_one_neighbor() {
        let mut z = fresh_zone();
        z.set_used(63, 0);
        let plan = plan_rmw(&z, 63, 0);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.backups[0].pair, 63);
    }

    #[test]
    fn execute_rmw_backs_up_then_writes_then_restores() {
        let device = MemBlockDevice::new(4096, 2048);
        let block_bytes = 4096usize;
        // Seed the "old" top-track block with known contents.
        device.write_blocks(0, &vec![0xAAu8; block_bytes]).unwrap();

        let mut z = fresh_zone();
        z.set_used(0, 0);
        let plan = plan_rmw(&z, 0, 0);
        assert_eq!(plan.len(), 1);

        let payload = vec![0xCCu8; block_bytes];
        execute_rmw(&device, 0, &plan, block_bytes, (456, &payload)).unwrap();

        let mut readback_top = vec![0u8; block_bytes];
        device.read_blocks(0, &mut readback_top).unwrap();
        assert_eq!(readback_top, vec![0xAAu8; block_bytes]);

        let mut readback_bottom = vec![0u8; block_bytes];
        device.read_blocks(456, &mut readback_bottom).unwrap();
        assert_eq!(readback_bottom, payload);
    }
}
