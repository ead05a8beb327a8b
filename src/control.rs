//! The Control Surface (spec §4.7/§6, C7): the ioctl-style opcode dispatch
//! used for configuration, queries, and diagnostics, serialized by
//! `ioctl_lock` rather than `zone_lock` (spec §5).

use crate::config::DeviceConfig;
use crate::error::ImrError;
use crate::gateway::Direction;
use crate::geometry::ZONE_BLOCKS;
use crate::simulator::Simulator;
use crate::stats::{AggregateStats, ZoneStats};
use crate::zone::ZoneCondition;

/// One control-surface operation, matching the opcode table of spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    GetLastRerror,
    GetLastWerror,
    SetLogEnable,
    SetLogDisable,
    GetNumZones,
    GetSizZoneDefault,
    SetSizZoneDefault(u32),
    ResetZone(u64),
    Query(QueryCriterion),
    GetStats,
    ResetStats,
    ResetZoneStats,
    ResetDefaultConfig,
    ResetZoneConfig,
    ResetDevConfig,
    GetDevConfig,
    SetDevRConfigDelay(u32),
    SetDevWConfigDelay(u32),
}

/// `QUERY`'s selector argument. Numeric encodings match `imrsim_query_data`
/// in the original kernel module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCriterion {
    All,
    Full,
    NotFull,
    Free,
    ReadOnly,
    Offline,
    /// From this zone index, up to `N` zones.
    FromZone { start: u64, count: u64 },
}

impl QueryCriterion {
    /// Decodes the selector the way the original ioctl argument was packed:
    /// 0 = all, -1 = full, -2 = not full, -3 = free, -4 = read-only,
    /// -5 = offline, positive N = "from `start`, up to N zones".
    pub fn decode(selector: i64, start: u64) -> Option<Self> {
        match selector {
            0 => Some(QueryCriterion::All),
            -1 => Some(QueryCriterion::Full),
            -2 => Some(QueryCriterion::NotFull),
            -3 => Some(QueryCriterion::Free),
            -4 => Some(QueryCriterion::ReadOnly),
            -5 => Some(QueryCriterion::Offline),
            n if n > 0 => Some(QueryCriterion::FromZone { start, count: n as u64 }),
            _ => None,
        }
    }

    fn matches(self, condition: ZoneCondition, map_size: u32) -> bool {
        match self {
            QueryCriterion::All => true,
            QueryCriterion::Full => condition == ZoneCondition::Full,
            QueryCriterion::NotFull => condition != ZoneCondition::Full,
            QueryCriterion::Free => map_size == 0,
            QueryCriterion::ReadOnly => condition == ZoneCondition::ReadOnly,
            QueryCriterion::Offline => condition == ZoneCondition::Offline,
            QueryCriterion::FromZone { .. } => true,
        }
    }
}

/// The result of a control-surface operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    Ack,
    ErrorCode(u32),
    NumZones(u64),
    ZoneSize(u32),
    MatchingZones(Vec<u64>),
    Stats { aggregate: AggregateStatsSnapshot, zones: Vec<ZoneStats> },
    DevConfig { read_override: bool, write_override: bool, read_penalty_us: u32, write_penalty_us: u32 },
    Error(ImrError),
}

/// A plain, persistence-independent snapshot of device-wide counters, for
/// handing back over the control surface (`AggregateStats` itself carries
/// no serialization concerns here, but this keeps the response type stable
/// even if that changes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateStatsSnapshot {
    pub idle_time_min_s: u64,
    pub idle_time_max_s: u64,
    pub total_writes: u64,
    pub total_extra_writes: u64,
}

impl From<AggregateStats> for AggregateStatsSnapshot {
    fn from(a: AggregateStats) -> Self {
        AggregateStatsSnapshot {
            idle_time_min_s: a.idle_time_min_s,
            idle_time_max_s: a.idle_time_max_s,
            total_writes: a.total_writes,
            total_extra_writes: a.total_extra_writes,
        }
    }
}

impl Simulator {
    /// Dispatches one control-surface opcode. Serialized by `ioctl_lock`;
    /// never contends with in-flight block requests' `zone_lock` for longer
    /// than the brief critical sections below need.
    pub fn ioctl(&self, op: Opcode) -> ControlResponse {
        let _guard = self.ioctl_lock.lock().unwrap();
        self.note_activity();

        match op {
            Opcode::GetLastRerror => {
                let code = self.last_read_error.lock().unwrap().take();
                ControlResponse::ErrorCode(code)
            }
            Opcode::GetLastWerror => {
                let code = self.last_write_error.lock().unwrap().take();
                ControlResponse::ErrorCode(code)
            }
            Opcode::SetLogEnable => {
                self.log_enabled.store(true, std::sync::atomic::Ordering::Relaxed);
                ControlResponse::Ack
            }
            Opcode::SetLogDisable => {
                self.log_enabled.store(false, std::sync::atomic::Ordering::Relaxed);
                ControlResponse::Ack
            }
            Opcode::GetNumZones => ControlResponse::NumZones(self.geometry.num_zones()),
            Opcode::GetSizZoneDefault => {
                ControlResponse::ZoneSize(self.zone_size_override_blocks.load(std::sync::atomic::Ordering::Relaxed))
            }
            Opcode::SetSizZoneDefault(blocks) => {
                let in_range = blocks != 0 && (blocks as u64) <= ZONE_BLOCKS;
                if !in_range || !blocks.is_power_of_two() {
                    return ControlResponse::Error(ImrError::OutOfPolicy);
                }
                // Advisory only: takes effect on the next attach, not
                // retroactively on any already-attached zone.
                self.zone_size_override_blocks.store(blocks, std::sync::atomic::Ordering::Relaxed);
                ControlResponse::Ack
            }
            Opcode::ResetZone(zi) => {
                if zi >= self.geometry.num_zones() {
                    return ControlResponse::Error(ImrError::OutRange);
                }
                let mut store = self.state.lock().unwrap();
                store.reset_zone(zi);
                drop(store);
                self.notify_persistence(false, true, Some(zi));
                ControlResponse::Ack
            }
            Opcode::Query(criterion) => {
                let store = self.state.lock().unwrap();
                let matches: Vec<u64> = match criterion {
                    QueryCriterion::FromZone { start, count } => (start..store.num_zones())
                        .take(count as usize)
                        .collect(),
                    other => store
                        .zones
                        .iter()
                        .filter(|z| other.matches(z.condition, z.map_size))
                        .map(|z| z.index)
                        .collect(),
                };
                ControlResponse::MatchingZones(matches)
            }
            Opcode::GetStats => {
                let store = self.state.lock().unwrap();
                ControlResponse::Stats {
                    aggregate: store.aggregate.into(),
                    zones: store.zone_stats.clone(),
                }
            }
            Opcode::ResetStats => {
                let mut store = self.state.lock().unwrap();
                store.reset_stats();
                drop(store);
                self.notify_persistence(false, true, None);
                ControlResponse::Ack
            }
            Opcode::ResetZoneStats => {
                let mut store = self.state.lock().unwrap();
                store.reset_zone_stats();
                drop(store);
                self.notify_persistence(false, true, None);
                ControlResponse::Ack
            }
            Opcode::ResetDefaultConfig => {
                let mut store = self.state.lock().unwrap();
                store.config = DeviceConfig::default();
                drop(store);
                self.notify_persistence(true, false, None);
                ControlResponse::Ack
            }
            Opcode::ResetZoneConfig => {
                // Zone condition/occupancy reset without touching device-wide
                // config; distinct from `ResetZone`, which also clears stats.
                let mut store = self.state.lock().unwrap();
                for zone in &mut store.zones {
                    zone.reset();
                }
                drop(store);
                self.notify_persistence(false, false, None);
                ControlResponse::Ack
            }
            Opcode::ResetDevConfig => {
                let mut store = self.state.lock().unwrap();
                store.config.reset();
                drop(store);
                self.notify_persistence(true, false, None);
                ControlResponse::Ack
            }
            Opcode::GetDevConfig => {
                let config = self.config_snapshot();
                ControlResponse::DevConfig {
                    read_override: config.out_of_policy_read_override,
                    write_override: config.out_of_policy_write_override,
                    read_penalty_us: config.read_penalty.as_micros() as u32,
                    write_penalty_us: config.write_penalty.as_micros() as u32,
                }
            }
            Opcode::SetDevRConfigDelay(us) => {
                let mut store = self.state.lock().unwrap();
                match store.config.set_read_penalty_us(us) {
                    Ok(()) => {
                        drop(store);
                        self.notify_persistence(true, false, None);
                        ControlResponse::Ack
                    }
                    Err(err) => {
                        drop(store);
                        self.set_last_error(Direction::Write, err);
                        ControlResponse::Error(err)
                    }
                }
            }
            Opcode::SetDevWConfigDelay(us) => {
                let mut store = self.state.lock().unwrap();
                match store.config.set_write_penalty_us(us) {
                    Ok(()) => {
                        drop(store);
                        self.notify_persistence(true, false, None);
                        ControlResponse::Ack
                    }
                    Err(err) => {
                        drop(store);
                        self.set_last_error(Direction::Write, err);
                        ControlResponse::Error(err)
                    }
                }
            }
        }
    }
}
