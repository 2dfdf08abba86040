//! Per-manipulator proxy state.
//!
//! Each registered manipulator owns a write lease, an inside-brain flag,
//! and a movement slot. Movement admission is FIFO through a fair async
//! mutex; a stop bumps the proxy's epoch so every move still queued (or in
//! flight) settles as cancelled instead of proceeding against hardware
//! that was just halted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info};

use crate::error::LinkError;

/// Out-of-band notifications pushed to the connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A write lease expired; payload is the manipulator id.
    WriteDisabled(String),
}

#[derive(Default)]
struct LeaseState {
    granted: bool,
    /// Bumped on every lease change so a stale revocation task can tell it
    /// has been superseded.
    generation: u64,
    revoke_task: Option<JoinHandle<()>>,
}

pub struct Manipulator {
    id: String,
    inside_brain: AtomicBool,
    lease: Mutex<LeaseState>,
    /// Fair mutex: waiters acquire in arrival order, which is the FIFO
    /// move queue.
    move_slot: Mutex<()>,
    move_epoch: AtomicU64,
}

impl Manipulator {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            inside_brain: AtomicBool::new(false),
            lease: Mutex::new(LeaseState::default()),
            move_slot: Mutex::new(()),
            move_epoch: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn inside_brain(&self) -> bool {
        self.inside_brain.load(Ordering::SeqCst)
    }

    pub fn set_inside_brain(&self, inside: bool) {
        self.inside_brain.store(inside, Ordering::SeqCst);
    }

    // ── Write lease ───────────────────────────────────────────────────────────

    pub async fn can_write(&self) -> bool {
        self.lease.lock().await.granted
    }

    /// Grant or revoke the write lease. A grant with `hours > 0` schedules
    /// a revocation that clears the lease and notifies the client; the
    /// most recent call always wins, and the notification fires at most
    /// once per grant.
    pub async fn set_can_write(
        self: &Arc<Self>,
        granted: bool,
        hours: f64,
        events: UnboundedSender<ServerEvent>,
    ) {
        let mut lease = self.lease.lock().await;
        if let Some(task) = lease.revoke_task.take() {
            task.abort();
        }
        lease.generation = lease.generation.wrapping_add(1);
        lease.granted = granted;

        if granted && hours > 0.0 {
            let generation = lease.generation;
            let manipulator = Arc::clone(self);
            lease.revoke_task = Some(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs_f64(hours * 3600.0)).await;

                let mut lease = manipulator.lease.lock().await;
                if lease.generation != generation {
                    // Re-granted or cleared while we slept.
                    return;
                }
                lease.granted = false;
                lease.revoke_task = None;
                drop(lease);

                info!("Write lease expired for manipulator {}", manipulator.id);
                let _ = events.send(ServerEvent::WriteDisabled(manipulator.id.clone()));
            }));
        }
    }

    /// Revoke the lease without notifying the client. Used by stop,
    /// unregister, and session teardown.
    pub async fn clear_lease(&self) {
        let mut lease = self.lease.lock().await;
        if let Some(task) = lease.revoke_task.take() {
            task.abort();
        }
        lease.generation = lease.generation.wrapping_add(1);
        lease.granted = false;
    }

    // ── Movement ──────────────────────────────────────────────────────────────

    /// Wait for this manipulator's movement slot in FIFO order. Fails with
    /// `MovementCancelled` when a stop arrived while the move was queued.
    pub async fn admit_move(&self) -> Result<MoveGuard<'_>, LinkError> {
        let epoch = self.move_epoch.load(Ordering::SeqCst);
        let slot = self.move_slot.lock().await;
        if self.move_epoch.load(Ordering::SeqCst) != epoch {
            debug!("Manipulator {}: queued move cancelled by stop", self.id);
            return Err(LinkError::MovementCancelled);
        }
        Ok(MoveGuard {
            _slot: slot,
            manipulator: self,
            epoch,
        })
    }

    /// Invalidate the in-flight move and everything queued behind it.
    pub fn cancel_moves(&self) {
        self.move_epoch.fetch_add(1, Ordering::SeqCst);
    }
}

/// Exclusive occupancy of a manipulator's movement slot. At most one guard
/// exists per manipulator at any instant.
pub struct MoveGuard<'a> {
    _slot: MutexGuard<'a, ()>,
    manipulator: &'a Manipulator,
    epoch: u64,
}

impl MoveGuard<'_> {
    pub fn cancelled(&self) -> bool {
        self.manipulator.move_epoch.load(Ordering::SeqCst) != self.epoch
    }

    /// Fold a stop that raced the move into its result: whatever the
    /// binding reported, a move that was stopped settles as cancelled.
    pub fn settle<T>(&self, result: Result<T, LinkError>) -> Result<T, LinkError> {
        if self.cancelled() {
            return Err(LinkError::MovementCancelled);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::{advance, Duration};

    #[tokio::test(start_paused = true)]
    async fn lease_expires_once_and_notifies() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manipulator = Manipulator::new("1");

        manipulator.set_can_write(true, 0.001, tx).await; // 3.6 s
        assert!(manipulator.can_write().await);

        advance(Duration::from_secs_f64(4.0)).await;
        tokio::task::yield_now().await;

        assert!(!manipulator.can_write().await);
        assert_eq!(rx.recv().await, Some(ServerEvent::WriteDisabled("1".into())));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn indefinite_grant_never_expires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manipulator = Manipulator::new("1");

        manipulator.set_can_write(true, 0.0, tx).await;
        advance(Duration::from_secs(24 * 3600)).await;
        tokio::task::yield_now().await;

        assert!(manipulator.can_write().await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn regrant_replaces_the_revocation_deadline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manipulator = Manipulator::new("1");

        manipulator.set_can_write(true, 0.001, tx.clone()).await; // 3.6 s
        advance(Duration::from_secs(2)).await;
        manipulator.set_can_write(true, 0.002, tx).await; // fresh 7.2 s

        // The original deadline passes without effect.
        advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert!(manipulator.can_write().await);
        assert!(rx.try_recv().is_err());

        // The replacement deadline fires exactly once.
        advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(!manipulator.can_write().await);
        assert_eq!(rx.recv().await, Some(ServerEvent::WriteDisabled("1".into())));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_lease_is_silent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manipulator = Manipulator::new("1");

        manipulator.set_can_write(true, 0.001, tx).await;
        manipulator.clear_lease().await;
        assert!(!manipulator.can_write().await);

        advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_drains_queued_moves_but_not_later_ones() {
        let manipulator = Manipulator::new("1");

        let first = manipulator.admit_move().await.unwrap();
        assert!(!first.cancelled());

        // A second move queues behind the first.
        let queued = {
            let manipulator = Arc::clone(&manipulator);
            tokio::spawn(async move {
                manipulator.admit_move().await.map(|guard| drop(guard))
            })
        };
        tokio::task::yield_now().await;

        manipulator.cancel_moves();
        assert!(first.cancelled());
        assert!(matches!(
            first.settle(Ok(())),
            Err(LinkError::MovementCancelled)
        ));
        drop(first);

        // The queued move observed the stop and settled cancelled.
        assert!(matches!(
            queued.await.unwrap(),
            Err(LinkError::MovementCancelled)
        ));

        // A move submitted after the stop starts normally.
        let next = manipulator.admit_move().await.unwrap();
        assert!(!next.cancelled());
    }
}
