//! ECS plugin wiring for the streaming systems.

use bevy::prelude::*;

use crate::scatter::{InstanceBound, InstanceReleased, update_scatter_layers};
use crate::schedule::ScatterWorldSet;
use crate::terrain::{TileFailed, TileReady, TileReleased, pump_terrain_generation, update_terrain_streams};

/// Plugin driving every [`ScatterLayer`](crate::ScatterLayer) and
/// [`TerrainStream`](crate::TerrainStream) in the world.
///
/// Hosts spawn the layer/stream components and an entity carrying
/// [`ScatterAnchor`](crate::ScatterAnchor); the plugin does the rest. Visuals
/// are attached by the host in reaction to the bound/ready messages,
/// typically in a system after [`ScatterWorldSet::Apply`].
#[derive(Default)]
pub struct ScatterWorldPlugin;

impl Plugin for ScatterWorldPlugin {
  fn build(&self, app: &mut App) {
    app
      .add_message::<InstanceBound>()
      .add_message::<InstanceReleased>()
      .add_message::<TileReady>()
      .add_message::<TileReleased>()
      .add_message::<TileFailed>();

    app.configure_sets(
      Update,
      (
        ScatterWorldSet::Stream,
        ScatterWorldSet::Generate,
        ScatterWorldSet::Apply,
      )
        .chain(),
    );

    app.add_systems(
      Update,
      (
        update_scatter_layers.in_set(ScatterWorldSet::Stream),
        update_terrain_streams.in_set(ScatterWorldSet::Stream),
        pump_terrain_generation.in_set(ScatterWorldSet::Generate),
      ),
    );
  }
}
