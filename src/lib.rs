//! Interlaced Magnetic Recording (IMR) disk simulator core.
//!
//! Models the block-addressed geometry, LBA→PBA translation and staged
//! allocation, read-modify-write amplification, and persistence of an IMR
//! zoned block device, without any particular host OS's dispatch layer or
//! device-mapper integration (those are out of scope; see [`simulator`]).
//!
//! A caller constructs a [`simulator::Simulator`] over anything implementing
//! [`device::BlockDevice`] via [`simulator::Simulator::attach`], then drives
//! it with [`simulator::Simulator::handle_request`] for data I/O and
//! [`simulator::Simulator::ioctl`] for the control surface.

pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod gateway;
pub mod geometry;
pub mod mapping;
pub mod persistence;
pub mod rmw;
pub mod simulator;
pub mod state;
pub mod stats;
pub mod zone;

pub use config::DeviceConfig;
pub use control::{ControlResponse, Opcode, QueryCriterion};
pub use device::BlockDevice;
#[cfg(any(test, feature = "test-util"))]
pub use device::MemBlockDevice;
pub use error::ImrError;
pub use gateway::{BlockRequest, Direction, RequestOutcome};
pub use geometry::Geometry;
pub use simulator::Simulator;
pub use stats::{AggregateStats, ZoneStats};
pub use zone::{ZoneCondition, ZoneStatus, ZoneType};
