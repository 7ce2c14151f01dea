// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proactive refresh timer.
//!
//! Owns at most one pending timer. Arming cancels any existing timer
//! before creating a new one, and `cancel()` is synchronous: a late-firing
//! callback re-checks both its cancellation token and the generation
//! counter, so a stale timer recognizes its own obsolescence instead of
//! firing against a torn-down session.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Armed {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Single-slot timer that fires a refresh ahead of token expiry.
pub struct RefreshScheduler {
    safety_window_secs: u64,
    generation: AtomicU64,
    armed: Mutex<Option<Armed>>,
}

impl RefreshScheduler {
    pub fn new(safety_window: Duration) -> Arc<Self> {
        Arc::new(Self {
            safety_window_secs: safety_window.as_secs(),
            generation: AtomicU64::new(0),
            armed: Mutex::new(None),
        })
    }

    pub fn safety_window_secs(&self) -> u64 {
        self.safety_window_secs
    }

    /// Delay until the timer should fire for a token expiring at `expiry`.
    ///
    /// Zero when the token is already within (or past) the safety window —
    /// the refresh runs immediately rather than being silently skipped.
    pub fn fire_delay(&self, expiry: u64, now: u64) -> Duration {
        Duration::from_secs(expiry.saturating_sub(now).saturating_sub(self.safety_window_secs))
    }

    /// Arm the timer for a token expiring at `expiry` (epoch seconds).
    ///
    /// Any previously armed timer is cancelled first — two overlapping
    /// timers for the same session are never allowed.
    pub fn arm<F, Fut>(self: &Arc<Self>, expiry: u64, now: u64, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let delay = self.fire_delay(expiry, now);
        let mut slot = self.slot();
        Self::disarm_slot(&mut slot);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let scheduler = Arc::clone(self);

        // Created here, not in the task, so the deadline is pinned to the
        // arming instant rather than the task's first poll.
        let sleep = tokio::time::sleep(delay);

        let handle = tokio::spawn(async move {
            tokio::select! {
                () = task_cancel.cancelled() => return,
                () = sleep => {}
            }
            // Generation check: a timer armed (or cancelled) after this one
            // was created makes this callback a no-op.
            if task_cancel.is_cancelled()
                || scheduler.generation.load(Ordering::SeqCst) != generation
            {
                return;
            }
            tracing::debug!(expiry, delay_secs = delay.as_secs(), "refresh timer fired");
            on_fire().await;
        });

        *slot = Some(Armed { cancel, handle });
    }

    /// Cancel any pending timer. Synchronous and unconditional; safe to
    /// call when nothing is armed.
    pub fn cancel(&self) {
        // Bump first so an already-sleeping callback fails its generation
        // check even if it races past the token cancellation.
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut slot = self.slot();
        Self::disarm_slot(&mut slot);
    }

    pub fn is_armed(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Armed>> {
        match self.armed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn disarm_slot(slot: &mut Option<Armed>) {
        if let Some(prev) = slot.take() {
            prev.cancel.cancel();
            prev.handle.abort();
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
