//! The Block I/O Gateway (spec §4.5, C5): the single entry point every
//! incoming block request passes through. Translation, RMW scheduling, and
//! statistics accounting all happen here, under the zone lock; the lock is
//! released before any backing-device I/O begins (spec §5).
//!
//! The upstream block-device dispatcher and the RMW executor's completion
//! signal are both out-of-scope collaborators (spec §1). Since this crate
//! has to be a complete, independently testable unit, `Simulator` performs
//! the translated I/O directly against its injected [`crate::device::BlockDevice`]
//! rather than handing a rewritten request back to an external dispatcher —
//! see DESIGN.md for this call.

use crate::error::ImrError;
use crate::geometry::{BLOCK_SECTORS, SECTOR_BYTES, ZONE_SECTORS};
use crate::mapping;
use crate::rmw;
use crate::simulator::{Simulator, ALLOC_PHASE};
use crate::zone::ZoneCondition;

/// Direction of a block request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// An incoming block request, addressed in sectors.
#[derive(Debug, Clone)]
pub struct BlockRequest {
    pub direction: Direction,
    pub start_sector: u64,
    pub sector_count: u64,
    /// Payload for a write; ignored (and may be empty) for a read.
    pub write_payload: Vec<u8>,
}

/// What the Gateway did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The request's starting sector was rewritten to `physical_start_sector`
    /// and carried out directly (no RMW involved). `data` holds the payload
    /// for a completed read.
    Remapped { physical_start_sector: u64, data: Vec<u8> },
    /// The write required backing up and restoring overlapping top-track
    /// data; by the time this is returned, the RMW executor has already
    /// completed (the Gateway awaits it after releasing the zone lock, per
    /// spec's design notes).
    Submitted,
    Error(ImrError),
}

impl Simulator {
    /// Handles one block request end to end, per spec §4.5.
    pub fn handle_request(&self, req: BlockRequest) -> RequestOutcome {
        self.note_activity();

        let Some(zone_idx) = self.geometry.zone_of(req.start_sector) else {
            return self.fail(req.direction, ImrError::OutRange, None);
        };

        if req.direction == Direction::Write
            && (req.start_sector % BLOCK_SECTORS != 0 || req.sector_count % BLOCK_SECTORS != 0)
        {
            self.state.lock().unwrap().zone_stats[zone_idx as usize].unaligned_write += 1;
            return self.fail(req.direction, ImrError::WriteAlign, None);
        }

        if req.sector_count > 2 * ZONE_SECTORS {
            return self.fail(req.direction, ImrError::OutOfPolicy, Some(zone_idx));
        }

        let num_blocks = req.sector_count / BLOCK_SECTORS;
        let zone_base_lba = self.geometry.zone_base_lba(zone_idx);
        let zone_base_block = zone_idx * crate::geometry::ZONE_BLOCKS;

        match req.direction {
            Direction::Write => self.handle_write(zone_idx, zone_base_lba, zone_base_block, req, num_blocks),
            Direction::Read => self.handle_read(zone_idx, zone_base_lba, zone_base_block, req, num_blocks),
        }
    }

    fn fail(&self, direction: Direction, err: ImrError, zone_idx: Option<u64>) -> RequestOutcome {
        self.set_last_error(direction, err);
        if self.log_enabled() {
            log::warn!("imrsim: request failed: {err}");
        }
        if let Some(zi) = zone_idx {
            let config = self.config_snapshot();
            let overridden = match direction {
                Direction::Read => config.out_of_policy_read_override,
                Direction::Write => config.out_of_policy_write_override,
            };
            if overridden && err == ImrError::OutOfPolicy {
                let penalty = match direction {
                    Direction::Read => config.read_penalty,
                    Direction::Write => config.write_penalty,
                };
                std::thread::sleep(penalty);
                let mut store = self.state.lock().unwrap();
                if let Some(stats) = store.zone_stats.get_mut(zi as usize) {
                    match direction {
                        Direction::Read => stats.span_zones_read += 1,
                        Direction::Write => stats.span_zones_write += 1,
                    }
                }
                return RequestOutcome::Remapped {
                    physical_start_sector: 0,
                    data: Vec::new(),
                };
            }
        }
        RequestOutcome::Error(err)
    }

    pub(crate) fn set_last_error(&self, direction: Direction, err: ImrError) {
        let mut reg = match direction {
            Direction::Read => self.last_read_error.lock().unwrap(),
            Direction::Write => self.last_write_error.lock().unwrap(),
        };
        reg.set(err.code());
    }

    fn handle_write(
        &self,
        zone_idx: u64,
        zone_base_lba: u64,
        zone_base_block: u64,
        req: BlockRequest,
        num_blocks: u64,
    ) -> RequestOutcome {
        let block_bytes = self.device.block_size();
        let mut store = self.state.lock().unwrap();
        let zone_full_offline_or_ro = {
            let zone = &store.zones[zone_idx as usize];
            if zone.condition == ZoneCondition::Offline {
                Some(ImrError::ZoneOffline)
            } else if zone.condition == ZoneCondition::ReadOnly && !store.config.out_of_policy_write_override {
                Some(ImrError::WriteRo)
            } else if zone.condition == ZoneCondition::Full && req.start_sector != zone_base_lba {
                Some(ImrError::WriteFull)
            } else {
                None
            }
        };
        if let Some(err) = zone_full_offline_or_ro {
            drop(store);
            return self.fail(Direction::Write, err, Some(zone_idx));
        }

        // A request spanning past this zone's end (but within the 2-zone
        // ceiling already checked) is out-of-policy unless overridden.
        let end_sector = req.start_sector + req.sector_count;
        if end_sector > zone_base_lba + ZONE_SECTORS {
            store.zone_stats[zone_idx as usize].span_zones_write += 1;
            if !store.config.out_of_policy_write_override {
                drop(store);
                return self.fail(Direction::Write, ImrError::WriteBorder, None);
            }
            let penalty = store.config.write_penalty;
            drop(store);
            std::thread::sleep(penalty);
            store = self.state.lock().unwrap();
        }

        let mut any_submitted = false;
        for block_idx in 0..num_blocks {
            let lba = req.start_sector + block_idx * BLOCK_SECTORS;
            if self.geometry.zone_of(lba) != Some(zone_idx) {
                // Spilled into the next zone; out of scope for this simple
                // per-block translation loop, counted above already.
                continue;
            }
            let block_offset = self.geometry.block_offset_in_zone(lba);
            let payload_start = (block_idx * block_bytes as u64) as usize;
            let payload = &req.write_payload[payload_start..payload_start + block_bytes];

            let submitted = self.write_one_block(&mut store, zone_idx, zone_base_block, block_offset, payload, block_bytes);
            any_submitted |= submitted;
        }

        drop(store);
        self.notify_persistence(false, true, Some(zone_idx));

        if any_submitted {
            RequestOutcome::Submitted
        } else {
            RequestOutcome::Remapped {
                physical_start_sector: zone_base_lba,
                data: Vec::new(),
            }
        }
    }

    /// Translates, RMW-plans, and executes a single block write. Returns
    /// whether the write required the RMW path ("submitted").
    fn write_one_block(
        &self,
        store: &mut crate::state::ZoneStateStore,
        zone_idx: u64,
        zone_base_block: u64,
        block_offset: u64,
        payload: &[u8],
        block_bytes: usize,
    ) -> bool {
        let zone = &mut store.zones[zone_idx as usize];
        let translation = match mapping::translate_write(zone, ALLOC_PHASE, block_offset) {
            Ok(t) => t,
            Err(_) => return false,
        };

        let pba_offset = translation.pba_offset as u64;
        let is_top = crate::geometry::Geometry::is_top_half(pba_offset);
        let pair = crate::geometry::Geometry::track_pair_of(pba_offset);
        let slot = crate::geometry::Geometry::slot_in_pair(pba_offset);

        if is_top {
            if !translation.is_update {
                zone.set_used(pair, slot);
            }
            let _ = self.device.write_blocks(zone_base_block + pba_offset, payload);
            store.zone_stats[zone_idx as usize].write_total += 1;
            store.aggregate.total_writes += 1;
            false
        } else {
            let plan = rmw::plan_rmw(zone, pair, slot);
            let extra = plan.len() as u64;
            if extra > 0 {
                let _ = rmw::execute_rmw(self.device.as_ref(), zone_base_block, &plan, block_bytes, (pba_offset, payload));
            } else {
                let _ = self.device.write_blocks(zone_base_block + pba_offset, payload);
            }
            store.zone_stats[zone_idx as usize].write_total += 1 + extra;
            store.zone_stats[zone_idx as usize].extra_write_total += extra;
            store.aggregate.total_writes += 1 + extra;
            store.aggregate.total_extra_writes += extra;
            extra > 0
        }
    }

    fn handle_read(
        &self,
        zone_idx: u64,
        zone_base_lba: u64,
        zone_base_block: u64,
        req: BlockRequest,
        num_blocks: u64,
    ) -> RequestOutcome {
        let block_bytes = self.device.block_size();
        let mut store = self.state.lock().unwrap();
        if store.zones[zone_idx as usize].condition == ZoneCondition::Offline {
            drop(store);
            return self.fail(Direction::Read, ImrError::ZoneOffline, Some(zone_idx));
        }

        let end_sector = req.start_sector + req.sector_count;
        if end_sector > zone_base_lba + ZONE_SECTORS {
            store.zone_stats[zone_idx as usize].span_zones_read += 1;
            if !store.config.out_of_policy_read_override {
                drop(store);
                return self.fail(Direction::Read, ImrError::ReadBorder, None);
            }
        }

        let mut data = Vec::with_capacity(req.write_payload.len().max((num_blocks as usize) * block_bytes));
        for block_idx in 0..num_blocks {
            let lba = req.start_sector + block_idx * BLOCK_SECTORS;
            if self.geometry.zone_of(lba) != Some(zone_idx) {
                data.extend(std::iter::repeat(0u8).take(block_bytes));
                continue;
            }
            let block_offset = self.geometry.block_offset_in_zone(lba);
            let zone = &store.zones[zone_idx as usize];
            match mapping::translate_read(zone, block_offset) {
                Some(pba_offset) => {
                    let mut buf = vec![0u8; block_bytes];
                    let _ = self.device.read_blocks(zone_base_block + pba_offset as u64, &mut buf);
                    data.extend(buf);
                }
                None => {
                    if !store.config.out_of_policy_read_override {
                        drop(store);
                        return self.fail(Direction::Read, ImrError::ReadPointer, None);
                    }
                    let penalty = store.config.read_penalty;
                    std::thread::sleep(penalty);
                    data.extend(std::iter::repeat(0u8).take(block_bytes));
                }
            }
        }

        drop(store);
        RequestOutcome::Remapped {
            physical_start_sector: zone_base_lba,
            data,
        }
    }
}

/// Helper for tests/callers building a single-block write payload of the
/// device's native block size.
pub fn single_block_sectors() -> u64 {
    BLOCK_SECTORS
}

pub const fn sector_bytes() -> u64 {
    SECTOR_BYTES
}
