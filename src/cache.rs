//! Spatial cache: decides what should be active around a moving anchor and
//! reconciles that against the bounded instance pool.
//!
//! One generic cache serves both streaming variants. The synchronous path
//! ([`SpatialCache::tick_with`]) seeds payloads in place; the deferred path
//! ([`SpatialCache::tick_deferred`]) leaves accepted slots Pending and
//! reports them so the caller can enqueue background generation.

use std::sync::Arc;

use bevy::math::{DVec2, DVec3};
use log::debug;

use crate::field::HeightField;
use crate::pool::{InstancePool, SlotIndex};
use crate::sampler::{Candidate, CandidateSampler, RankOrder, SampleRegion, ThresholdGate};

/// Tuning for one spatial cache.
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
  /// Activation radius: candidates are sampled within this disc.
  pub radius: f64,
  /// Release radius: occupied slots farther than this from the anchor are
  /// released. Must exceed `radius`, or instances placed near the activation
  /// boundary oscillate between bound and released.
  pub deactivation_radius: f64,
  /// Candidate grid cell size.
  pub grid_step: f64,
  /// Coordinate multiplier applied before sampling noise.
  pub noise_scale: f64,
  /// Noise threshold for candidate admission.
  pub threshold: f64,
  /// Which side of the threshold admits a candidate.
  pub gate: ThresholdGate,
  /// Ranking order for admitted candidates.
  pub order: RankOrder,
  /// Upper bound on candidates retained per resample. Independent of pool
  /// capacity; capacity may exceed it to leave room for churn.
  pub max_active: usize,
  /// Fraction of `radius` the anchor must move before resampling.
  pub resample_hysteresis: f64,
  /// Eviction guard: a saturated pool only evicts for a candidate when the
  /// farthest occupied slot is more than this distance from it.
  pub min_churn_distance: f64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    let radius = 100.0;
    Self {
      radius,
      deactivation_radius: radius * 1.5,
      grid_step: 10.0,
      noise_scale: 0.05,
      threshold: 0.4,
      gate: ThresholdGate::Above,
      order: RankOrder::Descending,
      max_active: 128,
      resample_hysteresis: 0.25,
      min_churn_distance: 20.0,
    }
  }
}

/// A slot the cache bound this tick.
#[derive(Clone, Copy, Debug)]
pub struct BoundSlot {
  /// Which slot was bound.
  pub slot: SlotIndex,
  /// World position it was bound at.
  pub position: DVec3,
  /// The admitting candidate.
  pub candidate: Candidate,
}

/// Pool mutations from one tick, for the rendering collaborator to apply.
///
/// `released` lists every slot released this tick, whether by eviction or by
/// distance culling; a slot index may appear in both lists when it was
/// evicted and immediately rebound.
#[derive(Debug, Default)]
pub struct CacheDelta {
  /// Slots bound this tick, in candidate rank order.
  pub bound: Vec<BoundSlot>,
  /// Slots released this tick.
  pub released: Vec<SlotIndex>,
}

impl CacheDelta {
  /// Returns true if the tick changed nothing.
  pub fn is_empty(&self) -> bool {
    self.bound.is_empty() && self.released.is_empty()
  }
}

/// Orchestrates sampler and pool around a moving anchor.
///
/// Collaborators are injected at construction; the cache never reaches for
/// ambient state. All methods run on the caller's thread and never suspend.
pub struct SpatialCache<T> {
  pool: InstancePool<T>,
  sampler: CandidateSampler,
  heights: Option<Arc<dyn HeightField>>,
  config: CacheConfig,
  last_sampled: Option<DVec2>,
}

impl<T> SpatialCache<T> {
  /// Creates a cache over a pool of `capacity` pre-allocated slots.
  pub fn new(
    capacity: usize,
    init: impl FnMut() -> T,
    sampler: CandidateSampler,
    heights: Option<Arc<dyn HeightField>>,
    config: CacheConfig,
  ) -> Self {
    Self {
      pool: InstancePool::new(capacity, init),
      sampler,
      heights,
      config,
      last_sampled: None,
    }
  }

  /// Replaces the height collaborator.
  pub fn with_heights(mut self, heights: Arc<dyn HeightField>) -> Self {
    self.heights = Some(heights);
    self
  }

  /// The underlying pool.
  pub fn pool(&self) -> &InstancePool<T> {
    &self.pool
  }

  /// Mutable access to the underlying pool.
  ///
  /// The deferred streaming path uses this to write generated payloads and
  /// activate their slots.
  pub fn pool_mut(&mut self) -> &mut InstancePool<T> {
    &mut self.pool
  }

  /// The cache configuration.
  pub fn config(&self) -> &CacheConfig {
    &self.config
  }

  /// Elevation at a planar coordinate, defaulting to `0.0` when the height
  /// collaborator is absent or has no sample. Placement never aborts on a
  /// missing height.
  fn elevation(&self, x: f64, z: f64) -> f64 {
    match &self.heights {
      Some(heights) => heights.height(x, z).unwrap_or(0.0),
      None => 0.0,
    }
  }

  fn resample_due(&self, anchor: DVec2) -> bool {
    match self.last_sampled {
      None => true,
      Some(last) => {
        anchor.distance(last) > self.config.resample_hysteresis * self.config.radius
      }
    }
  }

  fn sample_region(&self, anchor: DVec2) -> SampleRegion {
    SampleRegion {
      anchor,
      radius: self.config.radius,
      grid_step: self.config.grid_step,
      noise_scale: self.config.noise_scale,
      threshold: self.config.threshold,
      gate: self.config.gate,
      order: self.config.order,
    }
  }

  /// Synchronous tick: resample if due, reconcile, cull by distance.
  ///
  /// `seed` fills the payload of each newly bound slot in place; bound slots
  /// come out Active. Rotation/scale/color style attributes produced by the
  /// seeder are free to be random; only placement selection is deterministic
  /// for a fixed noise seed.
  pub fn tick_with(
    &mut self,
    anchor: DVec2,
    mut seed: impl FnMut(&Candidate, f64, &mut T),
  ) -> CacheDelta {
    let mut delta = CacheDelta::default();

    if self.resample_due(anchor) {
      self.reconcile(anchor, &mut delta, |pool, index, candidate, elevation| {
        seed(candidate, elevation, &mut pool.slot_mut(index).payload);
        pool.activate(index);
      });
      self.last_sampled = Some(anchor);
    }

    self.cull(anchor, &mut delta);
    delta
  }

  /// Deferred tick: like [`Self::tick_with`], but accepted slots stay
  /// Pending with their payload untouched. The caller enqueues generation
  /// for each entry in `delta.bound` and activates the slot when the result
  /// arrives (or finds it already released and drops the result).
  pub fn tick_deferred(&mut self, anchor: DVec2) -> CacheDelta {
    let mut delta = CacheDelta::default();

    if self.resample_due(anchor) {
      self.reconcile(anchor, &mut delta, |_, _, _, _| {});
      self.last_sampled = Some(anchor);
    }

    self.cull(anchor, &mut delta);
    delta
  }

  /// Distance culling only, skipping any resample this tick.
  ///
  /// Used while a deferred producer is not ready yet: stale instances still
  /// deactivate, but no new work is admitted.
  pub fn cull_tick(&mut self, anchor: DVec2) -> CacheDelta {
    let mut delta = CacheDelta::default();
    self.cull(anchor, &mut delta);
    delta
  }

  /// Reconciles ranked candidates against the pool in rank order.
  fn reconcile(
    &mut self,
    anchor: DVec2,
    delta: &mut CacheDelta,
    mut on_bind: impl FnMut(&mut InstancePool<T>, SlotIndex, &Candidate, f64),
  ) {
    let region = self.sample_region(anchor);
    let candidates = self.sampler.ranked(&region);
    let min_churn_sq = self.config.min_churn_distance * self.config.min_churn_distance;

    for candidate in candidates.into_iter().take(self.config.max_active) {
      let target = candidate.planar();

      // Already placed there; nothing to do for this cell.
      if self.pool.find(target).is_some() {
        continue;
      }

      let index = match self.pool.acquire_free() {
        Some(index) => index,
        None => {
          let Some(farthest) = self.pool.evict_farthest(target) else {
            break;
          };
          let distance_sq = self.pool.slot(farthest).planar().distance_squared(target);
          if distance_sq <= min_churn_sq {
            // The farthest resident is nearly as relevant as this candidate;
            // the pool is full enough for this region.
            debug!("pool exhausted, dropping remaining candidates");
            break;
          }
          self.pool.release(farthest);
          delta.released.push(farthest);
          farthest
        }
      };

      let elevation = self.elevation(candidate.x, candidate.z);
      let position = DVec3::new(candidate.x, elevation, candidate.z);
      self.pool.bind(index, position);
      on_bind(&mut self.pool, index, &candidate, elevation);

      delta.bound.push(BoundSlot {
        slot: index,
        position,
        candidate,
      });
    }
  }

  /// Releases every occupied slot beyond the deactivation radius.
  ///
  /// Runs every tick, independent of resampling, so instances left behind by
  /// a fast-moving anchor still deactivate between resamples.
  fn cull(&mut self, anchor: DVec2, delta: &mut CacheDelta) {
    let limit_sq = self.config.deactivation_radius * self.config.deactivation_radius;

    let stale: Vec<SlotIndex> = self
      .pool
      .iter_occupied()
      .filter(|(_, slot)| slot.planar().distance_squared(anchor) > limit_sq)
      .map(|(index, _)| index)
      .collect();

    for index in stale {
      self.pool.release(index);
      delta.released.push(index);
    }
  }
}
