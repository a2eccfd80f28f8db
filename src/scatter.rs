//! Scatter layers: bounded streaming of decorated instances (trees, rocks,
//! props) around the anchor.
//!
//! Each layer owns a [`SpatialCache`] and a fixed set of display entities,
//! one per pool slot. Binding a slot moves its entity into place and shows
//! it; releasing parks the entity out of view. Entities are never despawned
//! once created, so the scene cost of a layer is bounded by its capacity.

use std::f32::consts::TAU;
use std::sync::Arc;

use bevy::ecs::message::MessageWriter;
use bevy::math::{DVec2, DVec3};
use bevy::prelude::*;
use rand::Rng;

use crate::cache::SpatialCache;
use crate::config::{JitterConfig, ScatterConfig};
use crate::field::{HeightField, NoiseField, SimplexField};
use crate::pool::PARKED_Y;
use crate::sampler::{Candidate, CandidateSampler};

/// Marker component for the entity whose position drives streaming.
///
/// Exactly one entity should carry this; its `GlobalTransform` is polled
/// once per tick and projected onto the XZ plane.
#[derive(Component)]
pub struct ScatterAnchor;

/// Attributes of one placed instance.
///
/// Filled by an [`InstanceSeeder`] on bind. Randomized attributes are not
/// reproducible across resamples; only placement selection is deterministic
/// for a fixed noise seed.
#[derive(Clone, Copy, Debug)]
pub struct ScatterInstance {
  /// Yaw around the vertical axis, radians.
  pub rotation: f32,
  /// Uniform scale.
  pub scale: f32,
  /// RGB tint multiplier.
  pub tint: [f32; 3],
}

impl Default for ScatterInstance {
  fn default() -> Self {
    Self {
      rotation: 0.0,
      scale: 1.0,
      tint: [1.0, 1.0, 1.0],
    }
  }
}

/// Fills instance attributes when a slot is bound.
///
/// The `Send + Sync` bounds keep layers movable across threads with the rest
/// of the ECS world.
pub trait InstanceSeeder: Send + Sync {
  /// Writes attributes for a newly placed instance.
  fn seed(&self, candidate: &Candidate, elevation: f64, out: &mut ScatterInstance);
}

/// Default seeder: uniform random rotation, scale and tint within the
/// configured ranges.
pub struct JitterSeeder {
  config: JitterConfig,
}

impl JitterSeeder {
  /// Creates a seeder with the given jitter ranges.
  pub fn new(config: JitterConfig) -> Self {
    Self { config }
  }
}

impl InstanceSeeder for JitterSeeder {
  fn seed(&self, _candidate: &Candidate, _elevation: f64, out: &mut ScatterInstance) {
    let mut rng = rand::rng();
    out.rotation = rng.random_range(0.0..TAU);
    out.scale = rng.random_range(self.config.scale_min..=self.config.scale_max);

    let v = self.config.tint_variation;
    out.tint = [
      1.0 - rng.random_range(0.0..=v),
      1.0 - rng.random_range(0.0..=v),
      1.0 - rng.random_range(0.0..=v),
    ];
  }
}

/// Marker on entities that display a scatter slot.
#[derive(Component)]
pub struct ScatterSlotEntity {
  /// The owning layer entity.
  pub layer: Entity,
  /// Pool slot this entity displays.
  pub slot: usize,
}

/// Message emitted when a slot is bound and its entity placed.
#[derive(bevy::prelude::Message, Clone, Debug)]
pub struct InstanceBound {
  /// The owning layer entity.
  pub layer: Entity,
  /// Pool slot that was bound.
  pub slot: usize,
  /// Display entity for the slot.
  pub entity: Entity,
  /// World position of the placement.
  pub position: Vec3,
}

/// Message emitted when a slot is released and its entity parked.
#[derive(bevy::prelude::Message, Clone, Debug)]
pub struct InstanceReleased {
  /// The owning layer entity.
  pub layer: Entity,
  /// Pool slot that was released.
  pub slot: usize,
  /// Display entity for the slot.
  pub entity: Entity,
}

/// One streamed layer of scatter instances.
///
/// Spawn as a component; the plugin's systems drive it. Collaborators are
/// injected at construction, never looked up from ambient state.
#[derive(Component)]
pub struct ScatterLayer {
  cache: SpatialCache<ScatterInstance>,
  seeder: Arc<dyn InstanceSeeder>,
  entities: Vec<Option<Entity>>,
}

impl ScatterLayer {
  /// Creates a layer with the default simplex noise field and jitter seeder.
  pub fn new(config: &ScatterConfig) -> Self {
    let field: Arc<dyn NoiseField> = Arc::new(SimplexField::new(config.seed, config.feature_scale));
    Self::with_collaborators(
      config,
      Some(field),
      None,
      Arc::new(JitterSeeder::new(config.jitter)),
    )
  }

  /// Creates a layer with explicit collaborators.
  ///
  /// A `None` noise field falls back to coordinate-hash sampling; a `None`
  /// height field places everything at elevation zero.
  pub fn with_collaborators(
    config: &ScatterConfig,
    field: Option<Arc<dyn NoiseField>>,
    heights: Option<Arc<dyn HeightField>>,
    seeder: Arc<dyn InstanceSeeder>,
  ) -> Self {
    let sampler = match field {
      Some(field) => CandidateSampler::new(field),
      None => CandidateSampler::without_field(config.seed as u32),
    };
    Self {
      cache: SpatialCache::new(
        config.capacity,
        ScatterInstance::default,
        sampler,
        heights,
        config.cache_config(),
      ),
      seeder,
      entities: vec![None; config.capacity],
    }
  }

  /// Replaces the height collaborator.
  pub fn with_heights(mut self, heights: Arc<dyn HeightField>) -> Self {
    self.cache = self.cache.with_heights(heights);
    self
  }

  /// Number of occupied slots.
  pub fn active_count(&self) -> usize {
    self.cache.pool().occupied_count()
  }

  /// Display entity for a slot, if one has been spawned.
  pub fn entity(&self, slot: usize) -> Option<Entity> {
    self.entities.get(slot).copied().flatten()
  }

  /// The underlying cache.
  pub fn cache(&self) -> &SpatialCache<ScatterInstance> {
    &self.cache
  }
}

/// Transform for a placed instance.
fn instance_transform(position: DVec3, instance: &ScatterInstance) -> Transform {
  Transform {
    translation: position.as_vec3(),
    rotation: Quat::from_rotation_y(instance.rotation),
    scale: Vec3::splat(instance.scale),
  }
}

/// Transform parking a released entity out of view.
fn parked_transform() -> Transform {
  Transform::from_xyz(0.0, PARKED_Y as f32, 0.0)
}

/// System: polls the anchor and ticks every scatter layer.
#[cfg_attr(feature = "tracy", tracing::instrument(skip_all))]
pub(crate) fn update_scatter_layers(
  mut commands: Commands,
  anchors: Query<&GlobalTransform, With<ScatterAnchor>>,
  mut layers: Query<(Entity, &mut ScatterLayer)>,
  mut bound_writer: MessageWriter<InstanceBound>,
  mut released_writer: MessageWriter<InstanceReleased>,
) {
  let Ok(anchor_transform) = anchors.single() else {
    return;
  };
  let translation = anchor_transform.translation();
  let anchor = DVec2::new(f64::from(translation.x), f64::from(translation.z));

  for (layer_entity, layer) in layers.iter_mut() {
    let layer = layer.into_inner();
    let seeder = layer.seeder.clone();

    let delta = layer.cache.tick_with(anchor, |candidate, elevation, out| {
      seeder.seed(candidate, elevation, out);
    });
    if delta.is_empty() {
      continue;
    }

    // Park released entities first: an evicted-and-rebound slot appears in
    // both lists and must end the tick placed.
    for &slot in &delta.released {
      if let Some(entity) = layer.entities[slot.0] {
        commands
          .entity(entity)
          .insert((parked_transform(), Visibility::Hidden));
        released_writer.write(InstanceReleased {
          layer: layer_entity,
          slot: slot.0,
          entity,
        });
      }
    }

    for bound in &delta.bound {
      let instance = layer.cache.pool().slot(bound.slot).payload;
      let transform = instance_transform(bound.position, &instance);

      let entity = match layer.entities[bound.slot.0] {
        Some(entity) => {
          commands.entity(entity).insert((transform, Visibility::Visible));
          entity
        }
        None => {
          let entity = commands
            .spawn((
              ScatterSlotEntity {
                layer: layer_entity,
                slot: bound.slot.0,
              },
              transform,
              Visibility::Visible,
            ))
            .id();
          layer.entities[bound.slot.0] = Some(entity);
          entity
        }
      };

      bound_writer.write(InstanceBound {
        layer: layer_entity,
        slot: bound.slot.0,
        entity,
        position: bound.position.as_vec3(),
      });
    }
  }
}
