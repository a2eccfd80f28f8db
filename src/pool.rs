//! Fixed-capacity instance pool with stable slot identity.
//!
//! The pool owns every slot's payload memory up front and reuses it across
//! binds, so activating an instance never allocates. A slot index is the
//! identity the rendering collaborator keys its scene resources on: the pool
//! never loses track of which physical resource a logical placement maps to.

use bevy::math::{DVec2, DVec3};

/// Index into the pool's fixed slot array.
///
/// Stable identity for a slot's storage, independent of whatever world
/// position is currently bound to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotIndex(pub usize);

/// Lifecycle state of a pool slot.
///
/// `Free → Pending → Active → Free`. The synchronous placement path moves
/// through `Pending` within a single call; the asynchronous path parks a
/// slot in `Pending` until its generated payload arrives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotLifecycle {
  /// Slot is available for binding.
  #[default]
  Free,
  /// Slot is bound to a position but its payload is not valid yet.
  Pending,
  /// Slot is bound and its payload is valid.
  Active,
}

/// Parked Y coordinate for released slots, far below any world floor.
///
/// A released slot's visual resource must not linger at its old location
/// before the next bind, so release moves the position out of view instead
/// of leaving it stale.
pub const PARKED_Y: f64 = -1.0e4;

/// One pool entry: lifecycle, bound world position, reusable payload.
pub struct Slot<T> {
  /// Pre-allocated payload memory, reused across binds.
  pub payload: T,
  lifecycle: SlotLifecycle,
  position: DVec3,
}

impl<T> Slot<T> {
  fn new(payload: T) -> Self {
    Self {
      payload,
      lifecycle: SlotLifecycle::Free,
      position: DVec3::new(0.0, PARKED_Y, 0.0),
    }
  }

  /// Current lifecycle state.
  pub fn lifecycle(&self) -> SlotLifecycle {
    self.lifecycle
  }

  /// Returns true if this slot is bound (Pending or Active).
  pub fn is_occupied(&self) -> bool {
    self.lifecycle != SlotLifecycle::Free
  }

  /// Bound world position, or the parked sentinel when free.
  pub fn position(&self) -> DVec3 {
    self.position
  }

  /// Planar projection of the bound position.
  pub fn planar(&self) -> DVec2 {
    DVec2::new(self.position.x, self.position.z)
  }
}

/// Fixed-capacity pool of instance slots.
///
/// Invariants:
/// - the number of occupied slots never exceeds capacity;
/// - no two occupied slots share a planar position (callers go through
///   [`InstancePool::find`] before binding a new position);
/// - a released slot is immediately re-acquirable.
pub struct InstancePool<T> {
  slots: Vec<Slot<T>>,
}

impl<T> InstancePool<T> {
  /// Creates a pool of `capacity` slots, pre-allocating each payload.
  pub fn new(capacity: usize, mut init: impl FnMut() -> T) -> Self {
    let slots = (0..capacity).map(|_| Slot::new(init())).collect();
    Self { slots }
  }

  /// Total number of slots.
  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  /// Number of occupied (Pending or Active) slots.
  pub fn occupied_count(&self) -> usize {
    self.slots.iter().filter(|s| s.is_occupied()).count()
  }

  /// Returns the lowest-index free slot, or `None` when saturated.
  ///
  /// Linear scan; capacities stay in the low thousands so this is fine.
  pub fn acquire_free(&self) -> Option<SlotIndex> {
    self
      .slots
      .iter()
      .position(|s| !s.is_occupied())
      .map(SlotIndex)
  }

  /// Returns the occupied slot with maximum squared planar distance to
  /// `reference`, breaking ties toward the lowest index.
  pub fn evict_farthest(&self, reference: DVec2) -> Option<SlotIndex> {
    let mut best: Option<(f64, usize)> = None;
    for (i, slot) in self.slots.iter().enumerate() {
      if !slot.is_occupied() {
        continue;
      }
      let d = slot.planar().distance_squared(reference);
      // Strict comparison keeps the earliest index on ties.
      if best.is_none_or(|(bd, _)| d > bd) {
        best = Some((d, i));
      }
    }
    best.map(|(_, i)| SlotIndex(i))
  }

  /// Returns the occupied slot bound exactly at `planar`, if any.
  ///
  /// Candidate positions are grid-snapped, so exact comparison is the
  /// correct duplicate check.
  pub fn find(&self, planar: DVec2) -> Option<SlotIndex> {
    self
      .slots
      .iter()
      .position(|s| s.is_occupied() && s.planar() == planar)
      .map(SlotIndex)
  }

  /// Binds a slot to a world position, marking it Pending.
  ///
  /// The caller writes the payload (directly for synchronous seeding, via a
  /// completed generation request otherwise) and then calls
  /// [`InstancePool::activate`].
  pub fn bind(&mut self, index: SlotIndex, position: DVec3) {
    let slot = &mut self.slots[index.0];
    slot.lifecycle = SlotLifecycle::Pending;
    slot.position = position;
  }

  /// Marks a Pending slot Active. No-op for Free slots.
  pub fn activate(&mut self, index: SlotIndex) {
    let slot = &mut self.slots[index.0];
    if slot.lifecycle == SlotLifecycle::Pending {
      slot.lifecycle = SlotLifecycle::Active;
    }
  }

  /// Releases a slot back to the pool and parks its position out of view.
  pub fn release(&mut self, index: SlotIndex) {
    let slot = &mut self.slots[index.0];
    slot.lifecycle = SlotLifecycle::Free;
    slot.position = DVec3::new(0.0, PARKED_Y, 0.0);
  }

  /// Gets a reference to a slot by index.
  #[inline]
  pub fn slot(&self, index: SlotIndex) -> &Slot<T> {
    &self.slots[index.0]
  }

  /// Gets a mutable reference to a slot by index.
  #[inline]
  pub fn slot_mut(&mut self, index: SlotIndex) -> &mut Slot<T> {
    &mut self.slots[index.0]
  }

  /// Iterates over occupied slots as `(index, slot)` pairs.
  pub fn iter_occupied(&self) -> impl Iterator<Item = (SlotIndex, &Slot<T>)> {
    self
      .slots
      .iter()
      .enumerate()
      .filter(|(_, s)| s.is_occupied())
      .map(|(i, s)| (SlotIndex(i), s))
  }
}
