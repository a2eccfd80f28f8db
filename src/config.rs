//! Host-facing configuration for the streaming layers.
//!
//! Both configs deserialize from TOML with per-field defaults, so hosts can
//! ship tunables as asset files and only override what they care about:
//!
//! ```toml
//! capacity = 512
//! radius = 120.0
//! threshold = 0.55
//! gate = "above"
//! ```

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::sampler::{RankOrder, ThresholdGate};

/// Jitter ranges for scatter instance attributes.
///
/// Applied per bind; deliberately not reproducible across resamples.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
  /// Minimum uniform scale.
  pub scale_min: f32,
  /// Maximum uniform scale.
  pub scale_max: f32,
  /// Per-channel tint variation around white, in `[0, 1]`.
  pub tint_variation: f32,
}

impl Default for JitterConfig {
  fn default() -> Self {
    Self {
      scale_min: 0.8,
      scale_max: 1.3,
      tint_variation: 0.15,
    }
  }
}

/// Configuration for a scatter layer (synchronously seeded instances).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ScatterConfig {
  /// Pool capacity. May exceed `max_active` to leave room for churn.
  pub capacity: usize,
  /// Activation radius around the anchor.
  pub radius: f64,
  /// Release radius; `None` defaults to `1.5 * radius`. Values at or below
  /// the activation radius cause boundary flicker.
  pub deactivation_radius: Option<f64>,
  /// Candidate grid cell size.
  pub grid_step: f64,
  /// Coordinate multiplier applied before noise sampling.
  pub noise_scale: f64,
  /// Noise threshold for admission.
  pub threshold: f64,
  /// Which side of the threshold admits a cell.
  pub gate: ThresholdGate,
  /// Ranking order of admitted candidates.
  pub order: RankOrder,
  /// Upper bound on candidates retained per resample.
  pub max_active: usize,
  /// Fraction of the radius the anchor must move before resampling.
  pub resample_hysteresis: f64,
  /// Eviction guard distance.
  pub min_churn_distance: f64,
  /// Seed for the default noise field.
  pub seed: i32,
  /// Feature scale of the default noise field.
  pub feature_scale: f32,
  /// Attribute jitter ranges.
  pub jitter: JitterConfig,
}

impl Default for ScatterConfig {
  fn default() -> Self {
    Self {
      capacity: 256,
      radius: 100.0,
      deactivation_radius: None,
      grid_step: 10.0,
      noise_scale: 0.05,
      threshold: 0.4,
      gate: ThresholdGate::Above,
      order: RankOrder::Descending,
      max_active: 128,
      resample_hysteresis: 0.25,
      min_churn_distance: 20.0,
      seed: 1337,
      feature_scale: 200.0,
      jitter: JitterConfig::default(),
    }
  }
}

impl ScatterConfig {
  /// Parses a config from TOML text.
  pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(text)
  }

  /// Lowers into the cache tuning struct.
  pub fn cache_config(&self) -> CacheConfig {
    CacheConfig {
      radius: self.radius,
      deactivation_radius: self.deactivation_radius.unwrap_or(self.radius * 1.5),
      grid_step: self.grid_step,
      noise_scale: self.noise_scale,
      threshold: self.threshold,
      gate: self.gate,
      order: self.order,
      max_active: self.max_active,
      resample_hysteresis: self.resample_hysteresis,
      min_churn_distance: self.min_churn_distance,
    }
  }
}

/// Configuration for a terrain stream (asynchronously generated tiles).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TerrainStreamConfig {
  /// Pool capacity.
  pub capacity: usize,
  /// Activation radius around the anchor, in world units.
  pub radius: f64,
  /// Release radius; `None` defaults to `1.5 * radius`.
  pub deactivation_radius: Option<f64>,
  /// Tile edge length; also the candidate grid step.
  pub tile_size: f64,
  /// Height samples along one tile edge.
  pub resolution: usize,
  /// Coordinate multiplier applied before noise sampling.
  pub noise_scale: f64,
  /// Noise threshold gating which cells get a detail tile.
  pub threshold: f64,
  /// Which side of the threshold admits a cell.
  pub gate: ThresholdGate,
  /// Ranking order of admitted candidates.
  pub order: RankOrder,
  /// Upper bound on candidates retained per resample.
  pub max_active: usize,
  /// Fraction of the radius the anchor must move before resampling.
  pub resample_hysteresis: f64,
  /// Eviction guard distance.
  pub min_churn_distance: f64,
  /// Seed for the default noise field.
  pub seed: i32,
  /// Feature scale of the default noise field.
  pub feature_scale: f32,
}

impl Default for TerrainStreamConfig {
  fn default() -> Self {
    Self {
      capacity: 128,
      radius: 256.0,
      deactivation_radius: None,
      tile_size: 32.0,
      resolution: 33,
      noise_scale: 0.01,
      threshold: 1.0,
      // Noise is in [-1, 1], so "below 1.0" admits every cell in range;
      // tighten the threshold to stream detail tiles selectively.
      gate: ThresholdGate::Below,
      order: RankOrder::Ascending,
      max_active: 64,
      resample_hysteresis: 0.25,
      min_churn_distance: 32.0,
      seed: 1337,
      feature_scale: 500.0,
    }
  }
}

impl TerrainStreamConfig {
  /// Parses a config from TOML text.
  pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(text)
  }

  /// Lowers into the cache tuning struct.
  pub fn cache_config(&self) -> CacheConfig {
    CacheConfig {
      radius: self.radius,
      deactivation_radius: self.deactivation_radius.unwrap_or(self.radius * 1.5),
      grid_step: self.tile_size,
      noise_scale: self.noise_scale,
      threshold: self.threshold,
      gate: self.gate,
      order: self.order,
      max_active: self.max_active,
      resample_hysteresis: self.resample_hysteresis,
      min_churn_distance: self.min_churn_distance,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scatter_config_parses_partial_toml() {
    let config = ScatterConfig::from_toml_str(
      r#"
        capacity = 64
        threshold = 0.7
        gate = "below"

        [jitter]
        scale_max = 2.0
      "#,
    )
    .unwrap();

    assert_eq!(config.capacity, 64);
    assert_eq!(config.threshold, 0.7);
    assert_eq!(config.gate, ThresholdGate::Below);
    assert_eq!(config.jitter.scale_max, 2.0);
    // Unspecified fields keep defaults.
    assert_eq!(config.radius, 100.0);
    assert_eq!(config.jitter.scale_min, 0.8);
  }

  #[test]
  fn deactivation_radius_defaults_past_activation() {
    let config = ScatterConfig::default();
    let cache = config.cache_config();
    assert!(cache.deactivation_radius > cache.radius);

    let explicit = ScatterConfig {
      deactivation_radius: Some(50.0),
      ..ScatterConfig::default()
    };
    assert_eq!(explicit.cache_config().deactivation_radius, 50.0);
  }

  #[test]
  fn terrain_config_round_trips_grid_step() {
    let config = TerrainStreamConfig {
      tile_size: 48.0,
      ..TerrainStreamConfig::default()
    };
    assert_eq!(config.cache_config().grid_step, 48.0);
  }
}
