//! The owning `Simulator` value: geometry, zone state, device handle, and
//! the background persistence task, all held per-instance rather than in
//! any process-wide global (spec §9's "Global mutable state" redesign
//! flag). This is what an embedding block-device driver captures and calls
//! into for every request and every control-surface ioctl.

use crate::config::DeviceConfig;
use crate::device::BlockDevice;
use crate::error::ImrError;
use crate::geometry::{Geometry, BLOCK_BYTES, BLOCK_SECTORS, ZONE_BLOCKS};
use crate::mapping::AllocPhase;
use crate::persistence::{self, PersistenceEngine};
use crate::stats::{ActivityClock, LastErrorRegister};
use crate::state::ZoneStateStore;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The allocation phase this build uses. Phase 2 ("fill bottoms, then fill
/// tops") is the documented default; phase is a compile-time constant per
/// spec §4.3/§9, not a runtime choice.
pub const ALLOC_PHASE: AllocPhase = AllocPhase::Phase2;

/// How often the persistence task wakes to check for pending mutations.
pub const PERSISTENCE_WAKE_INTERVAL: Duration = Duration::from_secs(1);

pub struct Simulator {
    pub(crate) geometry: Geometry,
    pub(crate) device: Arc<dyn BlockDevice>,
    pub(crate) reserved_base_block: u64,
    pub(crate) state: Arc<Mutex<ZoneStateStore>>,
    pub(crate) ioctl_lock: Mutex<()>,
    pub(crate) activity: Mutex<ActivityClock>,
    pub(crate) last_read_error: Mutex<LastErrorRegister>,
    pub(crate) last_write_error: Mutex<LastErrorRegister>,
    pub(crate) log_enabled: AtomicBool,
    pub(crate) zone_size_override_blocks: AtomicU32,
    persistence: Option<PersistenceEngine>,
}

impl Simulator {
    /// Attaches to `device`, deriving geometry from its capacity and either
    /// loading persisted state (if the reserved region's header and CRC
    /// validate) or starting fresh. Spawns the background persistence task.
    pub fn attach(device: Arc<dyn BlockDevice>) -> Result<Self, ImrError> {
        if device.block_size() as u64 != BLOCK_BYTES {
            return Err(ImrError::OutRange);
        }
        let device_sectors = device.num_blocks() * BLOCK_SECTORS;
        let geometry = Geometry::new(device_sectors)?;
        let reserved_base_block = geometry.num_zones() * ZONE_BLOCKS;

        let initial = persistence::load(device.as_ref(), reserved_base_block, &geometry)
            .unwrap_or_else(|| ZoneStateStore::fresh(&geometry));
        let state = Arc::new(Mutex::new(initial));

        let persistence = PersistenceEngine::spawn(
            Arc::clone(&state),
            Arc::clone(&device),
            reserved_base_block,
            PERSISTENCE_WAKE_INTERVAL,
        );

        Ok(Simulator {
            geometry,
            device,
            reserved_base_block,
            state,
            ioctl_lock: Mutex::new(()),
            activity: Mutex::new(ActivityClock::default()),
            last_read_error: Mutex::new(LastErrorRegister::default()),
            last_write_error: Mutex::new(LastErrorRegister::default()),
            log_enabled: AtomicBool::new(true),
            zone_size_override_blocks: AtomicU32::new(ZONE_BLOCKS as u32),
            persistence: Some(persistence),
        })
    }

    /// Stops the background persistence task (forcing one last full save)
    /// and releases the device handle.
    pub fn shutdown(mut self) {
        if let Some(engine) = self.persistence.take() {
            // One last consistent snapshot before the task exits.
            let store = self.state.lock().unwrap();
            let _ = persistence::save_full(self.device.as_ref(), self.reserved_base_block, &store);
            drop(store);
            engine.shutdown();
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub(crate) fn note_activity(&self) {
        let idle = self.activity.lock().unwrap().tick(std::time::Instant::now());
        self.state.lock().unwrap().aggregate.note_activity(idle);
    }

    pub(crate) fn log_enabled(&self) -> bool {
        self.log_enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn notify_persistence(&self, config: bool, stats: bool, status: Option<u64>) {
        if let Some(engine) = &self.persistence {
            engine.notify(config, stats, status);
        }
    }

    pub(crate) fn config_snapshot(&self) -> DeviceConfig {
        self.state.lock().unwrap().config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;
    use crate::geometry::ZONE_SECTORS;

    fn reserved_pages(num_zones: u64) -> u64 {
        // Generous upper bound; exact sizing is exercised in persistence.rs.
        num_zones * 300_000 / BLOCK_BYTES + 8
    }

    fn test_device(num_zones: u64) -> Arc<dyn BlockDevice> {
        let zone_blocks = ZONE_BLOCKS * num_zones;
        let total_blocks = zone_blocks + reserved_pages(num_zones);
        Arc::new(MemBlockDevice::new(BLOCK_BYTES as usize, total_blocks))
    }

    #[test]
    fn attach_derives_geometry_and_shuts_down_cleanly() {
        let device = test_device(1);
        let sim = Simulator::attach(device).unwrap();
        assert_eq!(sim.geometry().num_zones(), 1);
        sim.shutdown();
    }

    #[test]
    fn attach_rejects_undersized_device() {
        let device: Arc<dyn BlockDevice> = Arc::new(MemBlockDevice::new(BLOCK_BYTES as usize, 10));
        assert_eq!(Simulator::attach(device).unwrap_err(), ImrError::OutRange);
    }

    #[test]
    fn attach_rejects_mismatched_block_size() {
        let device: Arc<dyn BlockDevice> = Arc::new(MemBlockDevice::new(512, ZONE_SECTORS));
        assert!(Simulator::attach(device).is_err());
    }
}
