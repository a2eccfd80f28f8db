//! Scalar field collaborators: noise and terrain height.
//!
//! Both are injected into the cache at construction. They are the only
//! external data sources the streaming core consults, and both are allowed
//! to be absent: a missing noise field degrades to a deterministic
//! coordinate hash, a missing height sample degrades to elevation zero.

use fastnoise2::SafeNode;
use fastnoise2::generator::prelude::{Generator, GeneratorWrapper};
use fastnoise2::generator::simplex::supersimplex_scaled;

/// Deterministic scalar field over planar world coordinates.
///
/// Values are in `[-1, 1]`. Implementations must be seeded at construction:
/// the same seed and coordinates always produce the same value, across runs.
///
/// The `Send + Sync` bounds allow sampling from background generation
/// workers.
pub trait NoiseField: Send + Sync {
  /// Samples the field at a planar coordinate.
  fn value(&self, x: f64, z: f64) -> f64;
}

/// Terrain elevation collaborator.
///
/// Returns `None` when no sample is available (provider not ready, point
/// outside its domain). Callers must treat `None` as elevation `0.0` and
/// proceed; a missing height never aborts placement.
pub trait HeightField: Send + Sync {
  /// Elevation of the terrain surface at a planar coordinate.
  fn height(&self, x: f64, z: f64) -> Option<f64>;
}

/// Coherent noise field backed by fastnoise2 SuperSimplex.
///
/// Same position always produces identical results for a fixed seed.
pub struct SimplexField {
  noise: GeneratorWrapper<SafeNode>,
  seed: i32,
}

impl SimplexField {
  /// Creates a new simplex field.
  ///
  /// - `seed`: deterministic seed for noise generation.
  /// - `feature_scale`: controls feature size (larger = larger features).
  pub fn new(seed: i32, feature_scale: f32) -> Self {
    let noise = supersimplex_scaled(feature_scale).build();
    Self { noise, seed }
  }
}

impl NoiseField for SimplexField {
  fn value(&self, x: f64, z: f64) -> f64 {
    f64::from(self.noise.gen_single_2d(x as f32, z as f32, self.seed))
  }
}

/// Height field derived from any noise field.
///
/// Elevation is `amplitude * noise(x * frequency, z * frequency)`.
pub struct NoiseHeightField<F> {
  field: F,
  amplitude: f64,
  frequency: f64,
}

impl<F: NoiseField> NoiseHeightField<F> {
  /// Creates a height field over `field`.
  pub fn new(field: F, amplitude: f64, frequency: f64) -> Self {
    Self {
      field,
      amplitude,
      frequency,
    }
  }
}

impl<F: NoiseField> HeightField for NoiseHeightField<F> {
  fn height(&self, x: f64, z: f64) -> Option<f64> {
    Some(self.amplitude * self.field.value(x * self.frequency, z * self.frequency))
  }
}

/// Fallback pseudo-noise used when no [`NoiseField`] is injected.
///
/// Hashes the coordinate quantized to 1/1024 units and maps the hash to
/// `[-1, 1]`, so sampling stays spatially varied and deterministic rather
/// than collapsing to a constant. This is a documented degradation, not a
/// substitute for coherent noise.
pub fn coordinate_noise(seed: u32, x: f64, z: f64) -> f64 {
  let xi = (x * 1024.0).round() as i64 as u64;
  let zi = (z * 1024.0).round() as i64 as u64;

  let mut h = u64::from(seed) ^ 0x9E37_79B9_7F4A_7C15;
  h = (h ^ xi).wrapping_mul(0xBF58_476D_1CE4_E5B9);
  h ^= h >> 27;
  h = (h ^ zi).wrapping_mul(0x94D0_49BB_1331_11EB);
  h ^= h >> 31;

  // Top 53 bits to a unit float, then to [-1, 1].
  let unit = (h >> 11) as f64 / (1u64 << 53) as f64;
  unit * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn coordinate_noise_is_deterministic() {
    for &(x, z) in &[(0.0, 0.0), (10.0, -30.0), (1234.5, 6789.0)] {
      assert_eq!(coordinate_noise(7, x, z), coordinate_noise(7, x, z));
    }
  }

  #[test]
  fn coordinate_noise_varies_with_position_and_seed() {
    let a = coordinate_noise(7, 10.0, 20.0);
    let b = coordinate_noise(7, 30.0, 20.0);
    let c = coordinate_noise(8, 10.0, 20.0);
    assert_ne!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn coordinate_noise_stays_in_range() {
    for i in -50..50 {
      for j in -50..50 {
        let v = coordinate_noise(42, f64::from(i) * 3.7, f64::from(j) * 9.1);
        assert!((-1.0..=1.0).contains(&v), "out of range: {v}");
      }
    }
  }

  #[test]
  fn noise_height_field_scales_amplitude() {
    struct Flat;
    impl NoiseField for Flat {
      fn value(&self, _x: f64, _z: f64) -> f64 {
        0.5
      }
    }

    let heights = NoiseHeightField::new(Flat, 40.0, 0.01);
    assert_eq!(heights.height(3.0, 4.0), Some(20.0));
  }
}
