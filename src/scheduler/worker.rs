//! Generation worker thread.
//!
//! One dedicated thread per scheduler, connected by a pair of unbounded
//! channels. The host sends at most one job at a time, so the loop body is
//! the entire concurrency story on this side of the boundary.

use std::sync::Arc;
use std::thread;

use async_channel::{Receiver, Sender};
use bevy::math::DVec2;

use super::RequestId;

/// Produces a generated payload for a requested region.
///
/// Implementations run on the worker thread. Failures are returned, not
/// panicked: an `Err` becomes a `Failed` event for that request and the
/// worker moves on to the next job.
pub trait TileBuilder: Send + Sync + 'static {
  /// Generated payload type.
  type Output: Send + 'static;

  /// Builds the payload for a tile of `size` world units at `coords`.
  fn build(&self, coords: DVec2, size: f64) -> Result<Self::Output, String>;
}

/// Jobs sent from the scheduler to the worker.
pub(super) enum WorkerJob {
  /// Generate one tile.
  Build {
    id: RequestId,
    coords: DVec2,
    size: f64,
  },
  /// Stop the worker loop.
  Shutdown,
}

/// Replies sent from the worker to the scheduler.
pub(super) enum WorkerReply<P> {
  /// Worker thread is up and ready for jobs.
  Initialized,
  /// A build finished, successfully or not.
  Done {
    id: RequestId,
    result: Result<P, String>,
  },
}

/// Spawns the worker thread and returns its channel endpoints.
pub(super) fn spawn_worker<P: Send + 'static>(
  builder: Arc<dyn TileBuilder<Output = P>>,
) -> (Sender<WorkerJob>, Receiver<WorkerReply<P>>) {
  let (job_tx, job_rx) = async_channel::unbounded::<WorkerJob>();
  let (reply_tx, reply_rx) = async_channel::unbounded::<WorkerReply<P>>();

  thread::spawn(move || {
    worker_loop(builder, job_rx, reply_tx);
  });

  (job_tx, reply_rx)
}

fn worker_loop<P: Send + 'static>(
  builder: Arc<dyn TileBuilder<Output = P>>,
  job_rx: Receiver<WorkerJob>,
  reply_tx: Sender<WorkerReply<P>>,
) {
  let _ = reply_tx.send_blocking(WorkerReply::Initialized);

  while let Ok(job) = job_rx.recv_blocking() {
    match job {
      WorkerJob::Build { id, coords, size } => {
        let result = builder.build(coords, size);
        if reply_tx.send_blocking(WorkerReply::Done { id, result }).is_err() {
          break;
        }
      }
      WorkerJob::Shutdown => break,
    }
  }
}
