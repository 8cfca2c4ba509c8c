//! Cooldown-gated alert dispatch for unknown faces.
//!
//! Two states: Ready and Cooling. Only a successful delivery moves the
//! coordinator into Cooling; a failed delivery leaves it Ready so the next
//! qualifying frame retries immediately.

use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const ALERT_SUBJECT: &str = "Security Alert: Unknown person detected";
pub const ALERT_BODY: &str = "An unknown person was detected by the webcam. See attached image.";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notifier not configured")]
    NotConfigured,
    #[error("failed to build notification: {0}")]
    Message(String),
    #[error("delivery failed: {0}")]
    Transport(String),
}

/// Outbound alert message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    /// Image to attach; delivery degrades to text-only when absent or unreadable.
    pub attachment: Option<PathBuf>,
}

/// External delivery channel for alerts (e-mail in the daemon).
pub trait Notifier: Send {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Alert cooldown state machine.
pub struct AlertCoordinator {
    notifier: Box<dyn Notifier>,
    cooldown: Duration,
    last_alert: Option<Instant>,
}

impl AlertCoordinator {
    pub fn new(notifier: Box<dyn Notifier>, cooldown: Duration) -> Self {
        Self {
            notifier,
            cooldown,
            last_alert: None,
        }
    }

    /// Whether an alert may be attempted at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        match self.last_alert {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.cooldown,
        }
    }

    /// Timestamp of the last successful delivery.
    pub fn last_alert(&self) -> Option<Instant> {
        self.last_alert
    }

    /// Attempt to dispatch an unknown-person alert.
    ///
    /// While cooling down this returns `false` without calling `snapshot`
    /// or the notifier. Returns `true` only when delivery succeeded.
    pub fn try_alert<F>(&mut self, now: Instant, snapshot: F) -> bool
    where
        F: FnOnce() -> Option<PathBuf>,
    {
        if !self.is_ready(now) {
            tracing::debug!("alert suppressed: cooldown active");
            return false;
        }

        let notification = Notification {
            subject: ALERT_SUBJECT.to_string(),
            body: ALERT_BODY.to_string(),
            attachment: snapshot(),
        };

        match self.notifier.notify(&notification) {
            Ok(()) => {
                self.last_alert = Some(now);
                tracing::info!(
                    cooldown_secs = self.cooldown.as_secs(),
                    attachment = ?notification.attachment,
                    "unknown-person alert sent"
                );
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "unknown-person alert failed; will retry on next frame");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Notifier fake that records every call and answers from a script.
    #[derive(Clone, Default)]
    pub(crate) struct FakeNotifier {
        pub calls: Arc<Mutex<Vec<Notification>>>,
        pub fail: Arc<Mutex<bool>>,
    }

    impl FakeNotifier {
        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }
    }

    impl Notifier for FakeNotifier {
        fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.calls.lock().unwrap().push(notification.clone());
            if *self.fail.lock().unwrap() {
                Err(NotifyError::Transport("smtp down".into()))
            } else {
                Ok(())
            }
        }
    }

    fn coordinator(cooldown_secs: u64) -> (AlertCoordinator, FakeNotifier) {
        let fake = FakeNotifier::default();
        let c = AlertCoordinator::new(Box::new(fake.clone()), Duration::from_secs(cooldown_secs));
        (c, fake)
    }

    #[test]
    fn test_cooldown_scenario() {
        let (mut c, fake) = coordinator(60);
        let t0 = Instant::now();

        assert!(c.try_alert(t0, || None));
        assert!(!c.try_alert(t0 + Duration::from_secs(30), || None));
        assert_eq!(fake.call_count(), 1);
        assert!(c.try_alert(t0 + Duration::from_secs(61), || None));
        assert_eq!(fake.call_count(), 2);
    }

    #[test]
    fn test_cooling_skips_snapshot_and_notifier() {
        let (mut c, fake) = coordinator(60);
        let t0 = Instant::now();
        assert!(c.try_alert(t0, || None));

        let mut snapshot_taken = false;
        let sent = c.try_alert(t0 + Duration::from_secs(1), || {
            snapshot_taken = true;
            None
        });
        assert!(!sent);
        assert!(!snapshot_taken);
        assert_eq!(fake.call_count(), 1);
    }

    #[test]
    fn test_exact_cooldown_boundary_still_cooling() {
        let (mut c, _fake) = coordinator(60);
        let t0 = Instant::now();
        assert!(c.try_alert(t0, || None));
        assert!(!c.try_alert(t0 + Duration::from_secs(60), || None));
    }

    #[test]
    fn test_failure_applies_no_cooldown() {
        let (mut c, fake) = coordinator(60);
        let t0 = Instant::now();

        fake.set_failing(true);
        assert!(!c.try_alert(t0, || None));
        assert!(c.is_ready(t0));
        assert_eq!(c.last_alert(), None);

        fake.set_failing(false);
        assert!(c.try_alert(t0, || None));
        assert_eq!(fake.call_count(), 2);
        assert_eq!(c.last_alert(), Some(t0));
    }

    #[test]
    fn test_snapshot_is_attached() {
        let (mut c, fake) = coordinator(60);
        let path = PathBuf::from("/tmp/unknown_20260101_000000.jpg");
        let expected = path.clone();
        assert!(c.try_alert(Instant::now(), move || Some(path)));

        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls[0].attachment, Some(expected));
        assert_eq!(calls[0].subject, ALERT_SUBJECT);
    }
}
