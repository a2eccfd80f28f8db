//! Background generation scheduling.
//!
//! A priority-ordered queue of generation requests consumed by a single
//! worker thread. The host side owns the queue and all request state; the
//! worker only ever sees one job at a time, so exactly one request is in
//! flight and the worker naturally yields between jobs. Communication is
//! message passing over `async-channel` in both directions; no memory is
//! shared with the worker.
//!
//! Cancellation is advisory: an in-flight request is never interrupted, its
//! eventual result is discarded on arrival instead.

mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use async_channel::{Receiver, Sender, TryRecvError};
use bevy::math::DVec2;
use log::debug;

pub use worker::TileBuilder;
use worker::{WorkerJob, WorkerReply, spawn_worker};

/// Identity of a generation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

/// Lifecycle of a generation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
  /// Queued, not yet handed to the worker.
  Pending,
  /// Handed to the worker; at most one request is in this state.
  InFlight,
  /// Completed; its result was delivered (or failed with an error).
  Done,
  /// Cancelled. If it was in flight, the worker's result is discarded.
  Cancelled,
}

/// A queued request awaiting dispatch.
#[derive(Clone, Copy, Debug)]
struct QueuedRequest {
  id: RequestId,
  coords: DVec2,
  size: f64,
  priority: i32,
  /// Monotonic enqueue order; ties on priority dispatch FIFO.
  seq: u64,
}

/// Outcome delivered by [`GenerationScheduler::pump`].
#[derive(Debug)]
pub enum SchedulerEvent<P> {
  /// A request completed; the payload is ready to apply.
  Completed {
    /// The originating request.
    id: RequestId,
    /// Coordinates the request was enqueued with.
    coords: DVec2,
    /// The generated payload.
    payload: P,
  },
  /// Generation failed. The scheduler stays usable and keeps draining its
  /// queue; the failure is surfaced for the caller to report.
  Failed {
    /// The originating request.
    id: RequestId,
    /// Builder error message.
    message: String,
  },
}

/// Host-side handle to the generation worker.
///
/// Results arrive out of enqueue order; only priority order among requests
/// that were simultaneously pending is guaranteed. Callers must never block
/// waiting on a specific request: a request that never completes simply
/// stays in flight, and the cache keeps re-evaluating from current state.
pub struct GenerationScheduler<P> {
  job_tx: Sender<WorkerJob>,
  reply_rx: Receiver<WorkerReply<P>>,
  pending: Vec<QueuedRequest>,
  statuses: HashMap<RequestId, RequestStatus>,
  coords: HashMap<RequestId, DVec2>,
  in_flight: Option<RequestId>,
  ready: bool,
  next_id: u64,
  next_seq: u64,
}

impl<P: Send + 'static> GenerationScheduler<P> {
  /// Spawns the worker thread and returns the scheduler handle.
  pub fn spawn(builder: Arc<dyn TileBuilder<Output = P>>) -> Self {
    let (job_tx, reply_rx) = spawn_worker(builder);
    Self {
      job_tx,
      reply_rx,
      pending: Vec::new(),
      statuses: HashMap::new(),
      coords: HashMap::new(),
      in_flight: None,
      ready: false,
      next_id: 0,
      next_seq: 0,
    }
  }

  /// True once the worker has reported `Initialized`.
  ///
  /// Callers should not enqueue work derived from resampling before this;
  /// checking readiness replaces poll-and-retry loops against a generator
  /// that is not up yet.
  pub fn is_ready(&self) -> bool {
    self.ready
  }

  /// Number of requests waiting for dispatch.
  pub fn pending_len(&self) -> usize {
    self.pending.len()
  }

  /// Current status of a request, or `None` for an unknown id.
  pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
    self.statuses.get(&id).copied()
  }

  /// Queues a generation request. Higher priority dispatches first; equal
  /// priorities dispatch in enqueue order.
  pub fn enqueue(&mut self, coords: DVec2, size: f64, priority: i32) -> RequestId {
    let id = RequestId(self.next_id);
    self.next_id += 1;
    let seq = self.next_seq;
    self.next_seq += 1;

    self.pending.push(QueuedRequest {
      id,
      coords,
      size,
      priority,
      seq,
    });
    self.statuses.insert(id, RequestStatus::Pending);
    self.coords.insert(id, coords);
    id
  }

  /// Cancels a request.
  ///
  /// Pending requests are removed from the queue. An in-flight request is
  /// only marked: the worker is not interrupted, and its result is dropped
  /// when it arrives. Completed or unknown ids are a no-op.
  pub fn cancel(&mut self, id: RequestId) {
    match self.statuses.get(&id).copied() {
      Some(RequestStatus::Pending) => {
        self.pending.retain(|req| req.id != id);
        self.statuses.insert(id, RequestStatus::Cancelled);
      }
      Some(RequestStatus::InFlight) => {
        self.statuses.insert(id, RequestStatus::Cancelled);
      }
      _ => {}
    }
  }

  /// Drops all bookkeeping for a delivered request.
  ///
  /// Call after handling a `Completed` or `Failed` event so request state
  /// does not accumulate over a long-lived stream. Pending or in-flight
  /// requests are not forgotten.
  pub fn forget(&mut self, id: RequestId) {
    match self.statuses.get(&id).copied() {
      Some(RequestStatus::Done) | Some(RequestStatus::Cancelled) => {
        // A cancelled in-flight request stays tracked until its stale
        // result has been discarded.
        if self.in_flight != Some(id) {
          self.statuses.remove(&id);
          self.coords.remove(&id);
        }
      }
      _ => {}
    }
  }

  /// Updates the priority of a pending request.
  ///
  /// The original enqueue order is kept for tie-breaking. No-op once the
  /// request is in flight, completed, or cancelled.
  pub fn reprioritize(&mut self, id: RequestId, priority: i32) {
    if self.statuses.get(&id) != Some(&RequestStatus::Pending) {
      return;
    }
    if let Some(req) = self.pending.iter_mut().find(|req| req.id == id) {
      req.priority = priority;
    }
  }

  /// Drains worker replies and dispatches the next pending request.
  ///
  /// Returns the events produced by replies received this call. Results for
  /// cancelled requests are discarded here and never surface.
  pub fn pump(&mut self) -> Vec<SchedulerEvent<P>> {
    let mut events = Vec::new();

    loop {
      match self.reply_rx.try_recv() {
        Ok(WorkerReply::Initialized) => {
          self.ready = true;
        }
        Ok(WorkerReply::Done { id, result }) => {
          if self.in_flight == Some(id) {
            self.in_flight = None;
          }
          match self.statuses.get(&id).copied() {
            Some(RequestStatus::Cancelled) => {
              debug!("discarding result for cancelled request {id:?}");
              self.statuses.remove(&id);
              self.coords.remove(&id);
            }
            None => {
              debug!("discarding result for unknown request {id:?}");
            }
            _ => {
              self.statuses.insert(id, RequestStatus::Done);
              let coords = self.coords.get(&id).copied().unwrap_or(DVec2::ZERO);
              match result {
                Ok(payload) => events.push(SchedulerEvent::Completed { id, coords, payload }),
                Err(message) => events.push(SchedulerEvent::Failed { id, message }),
              }
            }
          }
        }
        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
      }
    }

    if self.in_flight.is_none() {
      self.dispatch_next();
    }

    events
  }

  /// Hands the highest-priority pending request to the worker.
  fn dispatch_next(&mut self) {
    let mut best: Option<usize> = None;
    for (i, req) in self.pending.iter().enumerate() {
      let better = match best {
        None => true,
        Some(b) => {
          let current = &self.pending[b];
          req.priority > current.priority
            || (req.priority == current.priority && req.seq < current.seq)
        }
      };
      if better {
        best = Some(i);
      }
    }

    let Some(index) = best else {
      return;
    };
    let req = self.pending.remove(index);

    self.statuses.insert(req.id, RequestStatus::InFlight);
    self.in_flight = Some(req.id);
    let _ = self.job_tx.send_blocking(WorkerJob::Build {
      id: req.id,
      coords: req.coords,
      size: req.size,
    });
  }
}

impl<P> Drop for GenerationScheduler<P> {
  fn drop(&mut self) {
    // Closing the job channel ends the worker loop; the explicit shutdown
    // job skips any queued work first.
    let _ = self.job_tx.send_blocking(WorkerJob::Shutdown);
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;
  use std::time::{Duration, Instant};

  use super::*;

  /// Builder that records the order coordinates were built in.
  struct RecordingBuilder {
    log: Mutex<Vec<f64>>,
  }

  impl TileBuilder for RecordingBuilder {
    type Output = f64;

    fn build(&self, coords: DVec2, _size: f64) -> Result<f64, String> {
      self.log.lock().unwrap().push(coords.x);
      Ok(coords.x)
    }
  }

  /// Builder gated on a channel, so tests control when a job finishes.
  struct GatedBuilder {
    gate: Receiver<()>,
  }

  impl TileBuilder for GatedBuilder {
    type Output = f64;

    fn build(&self, coords: DVec2, _size: f64) -> Result<f64, String> {
      let _ = self.gate.recv_blocking();
      Ok(coords.x)
    }
  }

  /// Builder that fails for negative x.
  struct FallibleBuilder;

  impl TileBuilder for FallibleBuilder {
    type Output = f64;

    fn build(&self, coords: DVec2, _size: f64) -> Result<f64, String> {
      if coords.x < 0.0 {
        Err(format!("no tile at x={}", coords.x))
      } else {
        Ok(coords.x)
      }
    }
  }

  fn pump_until<P: Send + 'static>(
    scheduler: &mut GenerationScheduler<P>,
    mut done: impl FnMut(&GenerationScheduler<P>, &[SchedulerEvent<P>]) -> bool,
  ) -> Vec<SchedulerEvent<P>> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut events = Vec::new();
    while !done(scheduler, &events) {
      assert!(Instant::now() < deadline, "scheduler did not converge");
      let drained = scheduler.pump();
      events.extend(drained);
      std::thread::sleep(Duration::from_millis(1));
    }
    events
  }

  #[test]
  fn dispatches_by_priority_then_fifo() {
    let builder = Arc::new(RecordingBuilder {
      log: Mutex::new(Vec::new()),
    });
    let mut scheduler = GenerationScheduler::spawn(builder.clone());

    // A and C share a priority; B outranks both.
    let a = scheduler.enqueue(DVec2::new(1.0, 0.0), 16.0, 1);
    let b = scheduler.enqueue(DVec2::new(2.0, 0.0), 16.0, 5);
    let c = scheduler.enqueue(DVec2::new(3.0, 0.0), 16.0, 1);

    let events = pump_until(&mut scheduler, |_, events| events.len() == 3);

    assert_eq!(*builder.log.lock().unwrap(), vec![2.0, 1.0, 3.0]);
    for id in [a, b, c] {
      assert_eq!(scheduler.status(id), Some(RequestStatus::Done));
    }
    assert!(matches!(events[0], SchedulerEvent::Completed { id, .. } if id == b));
  }

  #[test]
  fn cancelling_in_flight_discards_the_result() {
    let (gate_tx, gate_rx) = async_channel::unbounded();
    let mut scheduler = GenerationScheduler::spawn(Arc::new(GatedBuilder { gate: gate_rx }));

    let id = scheduler.enqueue(DVec2::new(4.0, 0.0), 16.0, 0);
    pump_until(&mut scheduler, |s, _| {
      s.status(id) == Some(RequestStatus::InFlight)
    });

    scheduler.cancel(id);
    assert_eq!(scheduler.status(id), Some(RequestStatus::Cancelled));

    // Let the worker finish; the result must be dropped, not delivered.
    gate_tx.send_blocking(()).unwrap();
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
      assert!(scheduler.pump().is_empty());
      std::thread::sleep(Duration::from_millis(1));
    }
    // Bookkeeping for the discarded result is gone as well.
    assert_eq!(scheduler.status(id), None);
  }

  #[test]
  fn cancelling_pending_removes_it_from_the_queue() {
    let (gate_tx, gate_rx) = async_channel::unbounded();
    let mut scheduler = GenerationScheduler::spawn(Arc::new(GatedBuilder { gate: gate_rx }));

    let first = scheduler.enqueue(DVec2::new(1.0, 0.0), 16.0, 0);
    let second = scheduler.enqueue(DVec2::new(2.0, 0.0), 16.0, 0);
    scheduler.pump(); // first goes in flight
    scheduler.cancel(second);
    assert_eq!(scheduler.pending_len(), 0);

    gate_tx.send_blocking(()).unwrap();
    let events = pump_until(&mut scheduler, |_, events| !events.is_empty());
    assert!(matches!(events[0], SchedulerEvent::Completed { id, .. } if id == first));
    assert_eq!(scheduler.status(second), Some(RequestStatus::Cancelled));
  }

  #[test]
  fn reprioritize_reorders_pending_only() {
    let (gate_tx, gate_rx) = async_channel::unbounded();
    let mut scheduler = GenerationScheduler::spawn(Arc::new(GatedBuilder { gate: gate_rx }));

    // Occupy the worker so the rest stay pending.
    let blocker = scheduler.enqueue(DVec2::new(0.0, 0.0), 16.0, 100);
    pump_until(&mut scheduler, |s, _| {
      s.status(blocker) == Some(RequestStatus::InFlight)
    });

    let low = scheduler.enqueue(DVec2::new(1.0, 0.0), 16.0, 1);
    let high = scheduler.enqueue(DVec2::new(2.0, 0.0), 16.0, 5);

    // In-flight reprioritization is a no-op.
    scheduler.reprioritize(blocker, -100);
    // Raise the low request above the high one.
    scheduler.reprioritize(low, 10);

    for _ in 0..3 {
      gate_tx.send_blocking(()).unwrap();
    }
    let events = pump_until(&mut scheduler, |_, events| events.len() == 3);

    let order: Vec<RequestId> = events
      .iter()
      .map(|e| match e {
        SchedulerEvent::Completed { id, .. } => *id,
        SchedulerEvent::Failed { id, .. } => *id,
      })
      .collect();
    assert_eq!(order, vec![blocker, low, high]);
  }

  #[test]
  fn worker_failure_surfaces_and_queue_continues() {
    let mut scheduler = GenerationScheduler::spawn(Arc::new(FallibleBuilder));

    let bad = scheduler.enqueue(DVec2::new(-1.0, 0.0), 16.0, 5);
    let good = scheduler.enqueue(DVec2::new(8.0, 0.0), 16.0, 1);

    let events = pump_until(&mut scheduler, |_, events| events.len() == 2);

    match &events[0] {
      SchedulerEvent::Failed { id, message } => {
        assert_eq!(*id, bad);
        assert!(message.contains("-1"));
      }
      other => panic!("expected failure first, got {other:?}"),
    }
    match &events[1] {
      SchedulerEvent::Completed { id, payload, .. } => {
        assert_eq!(*id, good);
        assert_eq!(*payload, 8.0);
      }
      other => panic!("expected completion second, got {other:?}"),
    }
  }

  #[test]
  fn reports_ready_after_worker_initializes() {
    let mut scheduler: GenerationScheduler<f64> =
      GenerationScheduler::spawn(Arc::new(FallibleBuilder));
    assert!(!scheduler.is_ready());
    pump_until(&mut scheduler, |s, _| s.is_ready());
  }
}
