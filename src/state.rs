//! The Zone State Store (C2): the contiguous in-memory structures of spec
//! §3, owned by a single [`crate::simulator::Simulator`] instance rather than
//! any process-wide global (see spec §9's "Global mutable state" redesign
//! flag).

use crate::config::DeviceConfig;
use crate::geometry::{Geometry, ZONE_SECTORS};
use crate::stats::{AggregateStats, ZoneStats};
use crate::zone::ZoneStatus;

/// All mutable state protected by the Gateway's `zone_lock` (spec §5):
/// configuration, aggregate statistics, and every zone's status and
/// counters.
pub struct ZoneStateStore {
    pub config: DeviceConfig,
    pub aggregate: AggregateStats,
    pub zones: Vec<ZoneStatus>,
    pub zone_stats: Vec<ZoneStats>,
}

impl ZoneStateStore {
    /// Builds fresh (all-empty) state for `geometry`'s zone count.
    pub fn fresh(geometry: &Geometry) -> Self {
        let zones = (0..geometry.num_zones())
            .map(|i| ZoneStatus::new(i, ZONE_SECTORS))
            .collect();
        let zone_stats = vec![ZoneStats::default(); geometry.num_zones() as usize];
        ZoneStateStore {
            config: DeviceConfig::default(),
            aggregate: AggregateStats::default(),
            zones,
            zone_stats,
        }
    }

    pub fn num_zones(&self) -> u64 {
        self.zones.len() as u64
    }

    /// Resets a single zone's mapping table, occupancy bitmap, and stats
    /// (`RESET_ZONE`, spec §4.7).
    pub fn reset_zone(&mut self, zi: u64) {
        if let Some(z) = self.zones.get_mut(zi as usize) {
            z.reset();
        }
        if let Some(s) = self.zone_stats.get_mut(zi as usize) {
            *s = ZoneStats::default();
        }
    }

    /// Resets every zone's statistics, leaving mapping tables intact
    /// (`RESET_ZONESTATS`, spec §4.7).
    pub fn reset_zone_stats(&mut self) {
        for s in &mut self.zone_stats {
            *s = ZoneStats::default();
        }
    }

    /// Resets the aggregate statistics only (`RESET_STATS`).
    pub fn reset_stats(&mut self) {
        self.aggregate.reset();
        self.reset_zone_stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_has_one_stats_entry_per_zone() {
        let g = Geometry::new(ZONE_SECTORS * 4).unwrap();
        let store = ZoneStateStore::fresh(&g);
        assert_eq!(store.zones.len(), 4);
        assert_eq!(store.zone_stats.len(), 4);
    }

    #[test]
    fn reset_zone_only_touches_that_zone() {
        let g = Geometry::new(ZONE_SECTORS * 2).unwrap();
        let mut store = ZoneStateStore::fresh(&g);
        store.zones[0].map_size = 5;
        store.zones[1].map_size = 9;
        store.reset_zone(0);
        assert_eq!(store.zones[0].map_size, 0);
        assert_eq!(store.zones[1].map_size, 9);
    }
}
