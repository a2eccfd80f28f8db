//! Full Bevy E2E scatter streaming test.
//!
//! Exercises the complete synchronous flow:
//! 1. Spawn an anchor and a scatter layer with a handful of qualifying cells
//! 2. Instances appear at the cells, elevated by the height collaborator
//! 3. Move the anchor away; instances park out of view
//! 4. Move back; the same pooled entities are placed again

use std::sync::Arc;

use bevy::prelude::*;
use bevy_scatter_world::{
  HeightField, NoiseField, ScatterAnchor, ScatterConfig, ScatterLayer, ScatterSlotEntity,
  ScatterWorldPlugin, JitterSeeder,
};

/// Field that is high exactly on the listed cells and low everywhere else.
struct SpotField {
  spots: Vec<(f64, f64)>,
}

impl NoiseField for SpotField {
  fn value(&self, x: f64, z: f64) -> f64 {
    if self.spots.iter().any(|&(sx, sz)| sx == x && sz == z) {
      1.0
    } else {
      -1.0
    }
  }
}

struct FixedHeight(f64);

impl HeightField for FixedHeight {
  fn height(&self, _x: f64, _z: f64) -> Option<f64> {
    Some(self.0)
  }
}

struct TestHarness {
  app: App,
  anchor: Entity,
}

impl TestHarness {
  fn new(layer: ScatterLayer) -> Self {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app.add_plugins(ScatterWorldPlugin);

    let anchor = app
      .world_mut()
      .spawn((Transform::default(), GlobalTransform::default(), ScatterAnchor))
      .id();
    app.world_mut().spawn(layer);

    Self { app, anchor }
  }

  fn move_anchor(&mut self, position: Vec3) {
    let mut transform = self
      .app
      .world_mut()
      .get_mut::<Transform>(self.anchor)
      .unwrap();
    transform.translation = position;
    drop(transform);
    // MinimalPlugins doesn't run transform propagation
    let mut global = self
      .app
      .world_mut()
      .get_mut::<GlobalTransform>(self.anchor)
      .unwrap();
    *global = GlobalTransform::from(Transform::from_translation(position));
  }

  fn run(&mut self, updates: usize) {
    for _ in 0..updates {
      self.app.update();
    }
  }

  fn layer(&mut self) -> &ScatterLayer {
    let mut q = self.app.world_mut().query::<&ScatterLayer>();
    q.single(self.app.world()).unwrap()
  }

  fn slot_entities(&mut self) -> Vec<(Entity, Transform, Visibility)> {
    let mut q = self
      .app
      .world_mut()
      .query::<(Entity, &Transform, &Visibility, &ScatterSlotEntity)>();
    q.iter(self.app.world())
      .map(|(e, t, v, _)| (e, *t, *v))
      .collect()
  }
}

fn test_config() -> ScatterConfig {
  ScatterConfig {
    capacity: 16,
    radius: 100.0,
    grid_step: 10.0,
    noise_scale: 1.0,
    threshold: 0.5,
    ..ScatterConfig::default()
  }
}

fn spot_layer(spots: Vec<(f64, f64)>, height: f64) -> ScatterLayer {
  let config = test_config();
  ScatterLayer::with_collaborators(
    &config,
    Some(Arc::new(SpotField { spots })),
    Some(Arc::new(FixedHeight(height))),
    Arc::new(JitterSeeder::new(config.jitter)),
  )
}

#[test]
fn instances_stream_in_around_the_anchor() {
  let mut harness = TestHarness::new(spot_layer(
    vec![(0.0, 0.0), (20.0, 0.0), (0.0, 30.0)],
    5.0,
  ));

  harness.run(2);

  assert_eq!(harness.layer().active_count(), 3);

  let entities = harness.slot_entities();
  assert_eq!(entities.len(), 3);
  for (_, transform, visibility) in &entities {
    assert_eq!(*visibility, Visibility::Visible);
    // Elevation comes from the height collaborator.
    assert_eq!(transform.translation.y, 5.0);
  }

  let mut positions: Vec<(f32, f32)> = entities
    .iter()
    .map(|(_, t, _)| (t.translation.x, t.translation.z))
    .collect();
  positions.sort_by(|a, b| a.partial_cmp(b).unwrap());
  assert_eq!(positions, vec![(0.0, 0.0), (0.0, 30.0), (20.0, 0.0)]);
}

#[test]
fn instances_park_when_the_anchor_leaves() {
  let mut harness = TestHarness::new(spot_layer(vec![(0.0, 0.0), (20.0, 0.0)], 0.0));

  harness.run(2);
  assert_eq!(harness.layer().active_count(), 2);

  // Far beyond the deactivation radius; no qualifying cells out there.
  harness.move_anchor(Vec3::new(2000.0, 0.0, 0.0));
  harness.run(2);

  assert_eq!(harness.layer().active_count(), 0);
  for (_, transform, visibility) in harness.slot_entities() {
    assert_eq!(visibility, Visibility::Hidden);
    assert!(transform.translation.y < -1000.0, "entity not parked");
  }
}

#[test]
fn pooled_entities_are_reused_after_return() {
  let mut harness = TestHarness::new(spot_layer(vec![(0.0, 0.0), (20.0, 0.0)], 0.0));

  harness.run(2);
  let before: Vec<Entity> = harness.slot_entities().iter().map(|(e, _, _)| *e).collect();
  assert_eq!(before.len(), 2);

  harness.move_anchor(Vec3::new(2000.0, 0.0, 0.0));
  harness.run(2);
  harness.move_anchor(Vec3::ZERO);
  harness.run(2);

  assert_eq!(harness.layer().active_count(), 2);
  let after = harness.slot_entities();
  // Same fixed entity set, no unbounded spawning.
  assert_eq!(after.len(), 2);
  for (entity, _, visibility) in &after {
    assert!(before.contains(entity));
    assert_eq!(*visibility, Visibility::Visible);
  }
}

#[test]
fn anchor_drift_below_hysteresis_changes_nothing() {
  let mut harness = TestHarness::new(spot_layer(vec![(0.0, 0.0)], 0.0));

  harness.run(2);
  assert_eq!(harness.layer().active_count(), 1);

  // Default hysteresis is a quarter of the radius; a ten unit drift must
  // neither resample nor cull.
  harness.move_anchor(Vec3::new(10.0, 0.0, 0.0));
  harness.run(3);

  assert_eq!(harness.layer().active_count(), 1);
  let entities = harness.slot_entities();
  assert_eq!(entities.len(), 1);
  assert_eq!(entities[0].2, Visibility::Visible);
}
