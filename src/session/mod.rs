//! Live session: state, push-to-talk gate and the orchestrator

mod orchestrator;

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Notify, watch};

pub use orchestrator::{Session, SessionOptions};

/// Lifecycle of one provider session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    ToolDispatch,
    AudioPlayback,
    Closing,
    Terminated,
}

/// Move `state` to `to` if it is currently one of `from`
///
/// Returns whether the state changed.
pub(crate) fn transition(
    state: &watch::Sender<SessionState>,
    from: &[SessionState],
    to: SessionState,
) -> bool {
    state.send_if_modified(|current| {
        if *current == to || !from.contains(current) {
            return false;
        }
        tracing::debug!(from = ?*current, to = ?to, "session state");
        *current = to;
        true
    })
}

/// Push-to-talk gate shared with the key listener
///
/// The capture task waits on [`RecordingState::changed`] so a toggle is
/// observed without waiting for the next microphone frame.
#[derive(Debug, Default)]
pub struct RecordingState {
    armed: AtomicBool,
    changed: Notify,
}

impl RecordingState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Arm or disarm
    pub fn set(&self, armed: bool) {
        if self.armed.swap(armed, Ordering::SeqCst) != armed {
            self.changed.notify_one();
        }
    }

    /// Flip the gate; returns the new value
    pub fn toggle(&self) -> bool {
        let armed = !self.armed.fetch_xor(true, Ordering::SeqCst);
        self.changed.notify_one();
        armed
    }

    /// Resolves after the next change
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn toggle_flips_gate() {
        let recording = RecordingState::new();
        assert!(!recording.is_armed());
        assert!(recording.toggle());
        assert!(recording.is_armed());
        assert!(!recording.toggle());
    }

    #[tokio::test]
    async fn change_is_observed_without_waiter() {
        let recording = Arc::new(RecordingState::new());
        recording.set(true);

        tokio::time::timeout(Duration::from_secs(1), recording.changed())
            .await
            .expect("stored permit wakes the next waiter");
    }

    #[test]
    fn transition_respects_source_states() {
        let (tx, rx) = watch::channel(SessionState::Active);

        assert!(transition(&tx, &[SessionState::Active], SessionState::AudioPlayback));
        assert!(!transition(&tx, &[SessionState::Active], SessionState::ToolDispatch));
        assert_eq!(*rx.borrow(), SessionState::AudioPlayback);
    }
}
