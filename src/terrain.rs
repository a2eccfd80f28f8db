//! Terrain tile streaming backed by the background generation scheduler.
//!
//! The deferred counterpart to the scatter layer: candidate acceptance binds
//! a Pending slot and enqueues a generation request instead of seeding in
//! place. Results arrive out of request order; a result whose slot has been
//! recycled in the meantime is discarded. Pending requests are re-prioritized
//! as the anchor moves and cancelled when their slot is culled first.

use std::collections::HashMap;
use std::sync::Arc;

use bevy::ecs::message::MessageWriter;
use bevy::log::{debug, warn};
use bevy::math::DVec2;
use bevy::prelude::*;

use crate::cache::SpatialCache;
use crate::config::TerrainStreamConfig;
use crate::field::{HeightField, NoiseField, SimplexField};
use crate::pool::{PARKED_Y, SlotIndex, SlotLifecycle};
use crate::sampler::CandidateSampler;
use crate::scheduler::{GenerationScheduler, RequestId, SchedulerEvent, TileBuilder};

/// A generated terrain tile: a square grid of surface heights.
#[derive(Clone, Debug, Default)]
pub struct TerrainTile {
  /// Samples along one edge.
  pub resolution: usize,
  /// Row-major heights, `resolution * resolution` entries.
  pub heights: Vec<f32>,
}

/// Tile builder that samples a height field over the tile's grid.
pub struct HeightFieldTileBuilder {
  heights: Arc<dyn HeightField>,
  resolution: usize,
}

impl HeightFieldTileBuilder {
  /// Creates a builder sampling `heights` at `resolution²` points per tile.
  pub fn new(heights: Arc<dyn HeightField>, resolution: usize) -> Self {
    Self { heights, resolution }
  }
}

impl TileBuilder for HeightFieldTileBuilder {
  type Output = TerrainTile;

  fn build(&self, coords: DVec2, size: f64) -> Result<TerrainTile, String> {
    if self.resolution < 2 {
      return Err(format!("tile resolution {} is below 2", self.resolution));
    }

    let step = size / (self.resolution - 1) as f64;
    let mut heights = Vec::with_capacity(self.resolution * self.resolution);
    for iz in 0..self.resolution {
      for ix in 0..self.resolution {
        let x = coords.x + ix as f64 * step;
        let z = coords.y + iz as f64 * step;
        heights.push(self.heights.height(x, z).unwrap_or(0.0) as f32);
      }
    }

    Ok(TerrainTile {
      resolution: self.resolution,
      heights,
    })
  }
}

/// Marker on entities that display a terrain tile slot.
#[derive(Component)]
pub struct TerrainTileEntity {
  /// The owning stream entity.
  pub stream: Entity,
  /// Pool slot this entity displays.
  pub slot: usize,
}

/// Message emitted when a tile's payload has been generated and applied.
#[derive(bevy::prelude::Message, Clone, Debug)]
pub struct TileReady {
  /// The owning stream entity.
  pub stream: Entity,
  /// Pool slot that became active.
  pub slot: usize,
  /// Display entity for the slot.
  pub entity: Entity,
  /// Tile origin on the XZ plane.
  pub coords: Vec2,
}

/// Message emitted when a tile slot is released.
#[derive(bevy::prelude::Message, Clone, Debug)]
pub struct TileReleased {
  /// The owning stream entity.
  pub stream: Entity,
  /// Pool slot that was released.
  pub slot: usize,
}

/// Message emitted when tile generation failed.
///
/// The stream itself stays usable; the cell may be retried on a later
/// resample.
#[derive(bevy::prelude::Message, Clone, Debug)]
pub struct TileFailed {
  /// The owning stream entity.
  pub stream: Entity,
  /// Tile origin on the XZ plane.
  pub coords: Vec2,
  /// Builder error message.
  pub message: String,
}

/// One streamed terrain layer.
#[derive(Component)]
pub struct TerrainStream {
  cache: SpatialCache<TerrainTile>,
  scheduler: GenerationScheduler<TerrainTile>,
  tile_size: f64,
  /// Request → slot for generation still outstanding.
  requests: HashMap<RequestId, SlotIndex>,
  /// Inverse mapping, for cancelling when a Pending slot is culled.
  by_slot: HashMap<SlotIndex, RequestId>,
  entities: Vec<Option<Entity>>,
}

impl TerrainStream {
  /// Creates a stream with the default simplex gate field.
  pub fn new(config: &TerrainStreamConfig, builder: Arc<dyn TileBuilder<Output = TerrainTile>>) -> Self {
    let field: Arc<dyn NoiseField> = Arc::new(SimplexField::new(config.seed, config.feature_scale));
    Self::with_collaborators(config, Some(field), builder)
  }

  /// Creates a stream with an explicit gate field.
  pub fn with_collaborators(
    config: &TerrainStreamConfig,
    field: Option<Arc<dyn NoiseField>>,
    builder: Arc<dyn TileBuilder<Output = TerrainTile>>,
  ) -> Self {
    let sampler = match field {
      Some(field) => CandidateSampler::new(field),
      None => CandidateSampler::without_field(config.seed as u32),
    };
    Self {
      cache: SpatialCache::new(
        config.capacity,
        TerrainTile::default,
        sampler,
        None,
        config.cache_config(),
      ),
      scheduler: GenerationScheduler::spawn(builder),
      tile_size: config.tile_size,
      requests: HashMap::new(),
      by_slot: HashMap::new(),
      entities: vec![None; config.capacity],
    }
  }

  /// Number of occupied slots (generated or awaiting generation).
  pub fn active_count(&self) -> usize {
    self.cache.pool().occupied_count()
  }

  /// Number of slots with a generated tile.
  pub fn ready_count(&self) -> usize {
    self
      .cache
      .pool()
      .iter_occupied()
      .filter(|(_, slot)| slot.lifecycle() == SlotLifecycle::Active)
      .count()
  }

  /// Display entity for a slot, if one has been spawned.
  pub fn entity(&self, slot: usize) -> Option<Entity> {
    self.entities.get(slot).copied().flatten()
  }

  /// The underlying cache.
  pub fn cache(&self) -> &SpatialCache<TerrainTile> {
    &self.cache
  }

  /// Nearer tiles outrank farther ones.
  fn priority_for(&self, planar: DVec2, anchor: DVec2) -> i32 {
    -(planar.distance(anchor) / self.tile_size) as i32
  }
}

/// System: polls the anchor, resamples ready streams, maintains requests.
#[cfg_attr(feature = "tracy", tracing::instrument(skip_all))]
pub(crate) fn update_terrain_streams(
  mut commands: Commands,
  anchors: Query<&GlobalTransform, With<crate::scatter::ScatterAnchor>>,
  mut streams: Query<(Entity, &mut TerrainStream)>,
  mut released_writer: MessageWriter<TileReleased>,
) {
  let Ok(anchor_transform) = anchors.single() else {
    return;
  };
  let translation = anchor_transform.translation();
  let anchor = DVec2::new(f64::from(translation.x), f64::from(translation.z));

  for (stream_entity, stream) in streams.iter_mut() {
    let stream = stream.into_inner();

    // Resampling waits for the worker's readiness signal; culling does not.
    let delta = if stream.scheduler.is_ready() {
      stream.cache.tick_deferred(anchor)
    } else {
      stream.cache.cull_tick(anchor)
    };

    for &slot in &delta.released {
      // A slot culled before its tile arrived cancels its request; the
      // worker may still deliver a result, which pump then discards.
      if let Some(id) = stream.by_slot.remove(&slot) {
        stream.requests.remove(&id);
        stream.scheduler.cancel(id);
        stream.scheduler.forget(id);
      }
      if let Some(entity) = stream.entities[slot.0] {
        commands.entity(entity).insert((
          Transform::from_xyz(0.0, PARKED_Y as f32, 0.0),
          Visibility::Hidden,
        ));
      }
      released_writer.write(TileReleased {
        stream: stream_entity,
        slot: slot.0,
      });
    }

    for bound in &delta.bound {
      let planar = bound.candidate.planar();
      let priority = stream.priority_for(planar, anchor);
      let id = stream.scheduler.enqueue(planar, stream.tile_size, priority);
      stream.requests.insert(id, bound.slot);
      stream.by_slot.insert(bound.slot, id);
    }

    // Live re-prioritization: keep the queue ordered by current distance as
    // the anchor moves. In-flight and completed requests are unaffected.
    let updates: Vec<(RequestId, i32)> = stream
      .requests
      .iter()
      .map(|(&id, &slot)| {
        let planar = stream.cache.pool().slot(slot).planar();
        (id, stream.priority_for(planar, anchor))
      })
      .collect();
    for (id, priority) in updates {
      stream.scheduler.reprioritize(id, priority);
    }
  }
}

/// System: pumps schedulers and applies generated tiles.
#[cfg_attr(feature = "tracy", tracing::instrument(skip_all))]
pub(crate) fn pump_terrain_generation(
  mut commands: Commands,
  mut streams: Query<(Entity, &mut TerrainStream)>,
  mut ready_writer: MessageWriter<TileReady>,
  mut failed_writer: MessageWriter<TileFailed>,
) {
  for (stream_entity, stream) in streams.iter_mut() {
    let stream = stream.into_inner();

    for event in stream.scheduler.pump() {
      match event {
        SchedulerEvent::Completed { id, coords, payload } => {
          let Some(slot) = stream.requests.remove(&id) else {
            debug!("result for untracked request {id:?}");
            stream.scheduler.forget(id);
            continue;
          };
          stream.by_slot.remove(&slot);
          stream.scheduler.forget(id);

          // The slot may have been recycled while the tile was in flight.
          // Both checks are needed: lifecycle and bound position must match.
          let pool = stream.cache.pool_mut();
          let recycled = pool.slot(slot).lifecycle() != SlotLifecycle::Pending
            || pool.slot(slot).planar() != coords;
          if recycled {
            debug!("discarding tile for recycled slot {slot:?}");
            continue;
          }

          pool.slot_mut(slot).payload = payload;
          pool.activate(slot);
          let position = pool.slot(slot).position();

          let entity = match stream.entities[slot.0] {
            Some(entity) => {
              commands
                .entity(entity)
                .insert((Transform::from_translation(position.as_vec3()), Visibility::Visible));
              entity
            }
            None => {
              let entity = commands
                .spawn((
                  TerrainTileEntity {
                    stream: stream_entity,
                    slot: slot.0,
                  },
                  Transform::from_translation(position.as_vec3()),
                  Visibility::Visible,
                ))
                .id();
              stream.entities[slot.0] = Some(entity);
              entity
            }
          };

          ready_writer.write(TileReady {
            stream: stream_entity,
            slot: slot.0,
            entity,
            coords: coords.as_vec2(),
          });
        }
        SchedulerEvent::Failed { id, message } => {
          warn!("tile generation failed: {message}");
          let coords = if let Some(slot) = stream.requests.remove(&id) {
            stream.by_slot.remove(&slot);
            let planar = stream.cache.pool().slot(slot).planar();
            // Free the slot so a later resample can retry the cell.
            stream.cache.pool_mut().release(slot);
            planar
          } else {
            DVec2::ZERO
          };
          stream.scheduler.forget(id);

          failed_writer.write(TileFailed {
            stream: stream_entity,
            coords: coords.as_vec2(),
            message,
          });
        }
      }
    }
  }
}
