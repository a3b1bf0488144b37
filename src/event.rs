//! `AsyncEvent` is a level-triggered flag that any number of tasks can
//! await, explicitly set and cleared by whoever owns it.
//!
//! The whole crate runs its cooperating loops on a single-threaded
//! [`tokio::task::LocalSet`] (see `main.rs`): only one task ever runs at a
//! time, and it yields only at an explicit `.await`. `AsyncEvent` is
//! therefore built on a plain `Rc`+`Cell`, not an `Arc`+atomic — there is no
//! other thread that could race with it. It is cheap to `clone()` (an `Rc`
//! bump), which lets callers pull a handle out of a `RefCell`-guarded
//! structure and await it *after* releasing the borrow, rather than holding
//! the borrow across a suspension point.
//!
//! `WakeEvent` reuses the same type for the single-shot per-stop wake-up:
//! cloned into the cabin's arrival map and into the waiting controller task,
//! set exactly once when the cabin services the stop, and simply dropped —
//! never set — on cancellation.

use std::cell::Cell;
use std::rc::Rc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    flag: Cell<bool>,
    notify: Notify,
}

#[derive(Debug, Clone, Default)]
pub struct AsyncEvent(Rc<Inner>);

impl AsyncEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.flag.set(true);
        self.0.notify.notify_waiters();
    }

    pub fn clear(&self) {
        self.0.flag.set(false);
    }

    pub fn is_set(&self) -> bool {
        self.0.flag.get()
    }

    /// Wait until the flag is set. Safe against the set-before-await race:
    /// the `Notified` future is created and polled before the condition is
    /// checked the second time.
    pub async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.0.notify.notified();
            tokio::pin!(notified);
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// A single-shot, clonable, never-fires-on-cancel wake signal for a
/// committed `DirectedFloor`.
pub type WakeEvent = AsyncEvent;

pub fn new_wake_event() -> WakeEvent {
    AsyncEvent::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_immediately_if_already_set() {
        let e = AsyncEvent::new();
        e.set();
        tokio::time::timeout(Duration::from_millis(50), e.wait())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn wait_blocks_until_set() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let e = AsyncEvent::new();
                let e2 = e.clone();
                let handle = tokio::task::spawn_local(async move {
                    e2.wait().await;
                });
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert!(!handle.is_finished());
                e.set();
                tokio::time::timeout(Duration::from_millis(50), handle)
                    .await
                    .expect("should complete after set")
                    .unwrap();
            })
            .await;
    }

    #[test]
    fn clone_shares_state_like_a_wake_event() {
        let w = new_wake_event();
        let w2 = w.clone();
        assert!(!w.is_set());
        w2.set();
        assert!(w.is_set());
    }
}
