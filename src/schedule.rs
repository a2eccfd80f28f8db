//! Shared schedule labels for the streaming systems.
//!
//! All streaming systems run in [`Update`](bevy::prelude::Update) within one
//! of the [`ScatterWorldSet`] phases. Hosts order their own systems relative
//! to these sets, typically attaching visuals after `Apply`.

use bevy::prelude::*;

/// System sets for the streaming update loop, chained in order:
///
/// ```text
/// Stream → Generate → Apply
/// ```
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScatterWorldSet {
  /// Anchor polling, resampling, reconciliation, distance culling.
  Stream,
  /// Scheduler pumping and generated payload application.
  Generate,
  /// Entity transform/visibility updates and outbound messages.
  Apply,
}
