//! Scatter World - bounded instance streaming plugin for Bevy.
//!
//! Streams a fixed pool of reusable instances (scatter props, terrain tiles)
//! around a moving anchor: noise-gated candidates activate nearby slots,
//! out-of-range slots deactivate, and a saturated pool evicts its farthest
//! resident first. Terrain tiles are generated off the main thread by a
//! priority-scheduled worker with advisory cancellation.

pub mod cache;
pub mod config;
pub mod field;
pub mod plugin;
pub mod pool;
pub mod sampler;
pub mod scatter;
pub mod schedule;
pub mod scheduler;
pub mod terrain;

pub use cache::{BoundSlot, CacheConfig, CacheDelta, SpatialCache};
pub use config::{JitterConfig, ScatterConfig, TerrainStreamConfig};
pub use field::{HeightField, NoiseField, NoiseHeightField, SimplexField, coordinate_noise};
pub use plugin::ScatterWorldPlugin;
pub use pool::{InstancePool, PARKED_Y, Slot, SlotIndex, SlotLifecycle};
pub use sampler::{Candidate, CandidateSampler, RankOrder, SampleRegion, ThresholdGate};
pub use scatter::{
  InstanceBound, InstanceReleased, InstanceSeeder, JitterSeeder, ScatterAnchor, ScatterInstance,
  ScatterLayer, ScatterSlotEntity,
};
pub use schedule::ScatterWorldSet;
pub use scheduler::{GenerationScheduler, RequestId, RequestStatus, SchedulerEvent, TileBuilder};
pub use terrain::{
  HeightFieldTileBuilder, TerrainStream, TerrainTile, TerrainTileEntity, TileFailed, TileReady,
  TileReleased,
};
