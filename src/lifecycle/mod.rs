//! Host lifecycle signals driving a session.
//!
//! The host exposes two independent boolean signals: whether the
//! application is foregrounded and whether the conversation's screen is
//! focused. This module turns changes of those signals into
//! `resume`/`background` calls through a pure policy function, so the
//! policy itself is testable without any host environment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::session::SessionControl;
use crate::snapshot::Subscription;

/// A boolean signal owned by the host (application foreground state,
/// screen focus). Observers receive the new value after each change.
pub trait HostSignal: Send + Sync {
    fn current(&self) -> bool;

    fn subscribe(&self, observer: Arc<dyn Fn(bool) + Send + Sync>) -> Subscription;
}

/// What the binder should do in response to one signal change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Resume,
    Background,
}

/// One host signal changing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalChange {
    ScreenFocus(bool),
    AppForeground(bool),
}

/// Map one signal change to a session action.
///
/// Losing screen focus backgrounds unconditionally, even while the app
/// reports foreground. Foreground changes only matter while the screen is
/// focused; an unfocused conversation must not churn its session when the
/// app flips between foreground and background.
pub fn policy_action(change: SignalChange, screen_focused: bool) -> Option<LifecycleAction> {
    match change {
        SignalChange::ScreenFocus(true) => Some(LifecycleAction::Resume),
        SignalChange::ScreenFocus(false) => Some(LifecycleAction::Background),
        SignalChange::AppForeground(foreground) if screen_focused => Some(if foreground {
            LifecycleAction::Resume
        } else {
            LifecycleAction::Background
        }),
        SignalChange::AppForeground(_) => None,
    }
}

/// Binds the two host signals to one session for as long as it exists.
/// Dropping the binder unsubscribes from both signals and stops driving
/// the session.
pub struct LifecycleBinder {
    _focus_subscription: Subscription,
    _foreground_subscription: Subscription,
}

impl LifecycleBinder {
    /// Subscribe to both signals and immediately synchronize the session
    /// with their current values: resumed only when the screen is focused
    /// and the app is foregrounded.
    pub fn bind(
        session: Arc<dyn SessionControl>,
        screen_focus: &dyn HostSignal,
        app_foreground: &dyn HostSignal,
    ) -> Self {
        let focused = Arc::new(AtomicBool::new(screen_focus.current()));

        let initial = if focused.load(Ordering::SeqCst) && app_foreground.current() {
            LifecycleAction::Resume
        } else {
            LifecycleAction::Background
        };
        apply(session.as_ref(), initial);

        let focus_subscription = {
            let session = session.clone();
            let focused = focused.clone();
            screen_focus.subscribe(Arc::new(move |value| {
                focused.store(value, Ordering::SeqCst);
                if let Some(action) = policy_action(SignalChange::ScreenFocus(value), value) {
                    apply(session.as_ref(), action);
                }
            }))
        };

        let foreground_subscription = {
            let session = session.clone();
            app_foreground.subscribe(Arc::new(move |value| {
                let screen_focused = focused.load(Ordering::SeqCst);
                if let Some(action) =
                    policy_action(SignalChange::AppForeground(value), screen_focused)
                {
                    apply(session.as_ref(), action);
                }
            }))
        };

        Self {
            _focus_subscription: focus_subscription,
            _foreground_subscription: foreground_subscription,
        }
    }
}

fn apply(session: &dyn SessionControl, action: LifecycleAction) {
    let result = match action {
        LifecycleAction::Resume => session.resume(),
        LifecycleAction::Background => session.background(),
    };
    if let Err(err) = result {
        // A disposed session has nothing left to drive.
        debug!(error = %err, "lifecycle action rejected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionError;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU64;

    #[derive(Default)]
    struct RecordingSession {
        calls: Mutex<Vec<&'static str>>,
    }

    impl RecordingSession {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }
    }

    impl SessionControl for RecordingSession {
        fn resume(&self) -> Result<(), SessionError> {
            self.calls.lock().push("resume");
            Ok(())
        }

        fn background(&self) -> Result<(), SessionError> {
            self.calls.lock().push("background");
            Ok(())
        }
    }

    type SignalObserver = Arc<dyn Fn(bool) + Send + Sync>;

    struct TestSignal {
        value: Mutex<bool>,
        observers: Arc<Mutex<Vec<(u64, SignalObserver)>>>,
        next_id: AtomicU64,
    }

    impl TestSignal {
        fn new(value: bool) -> Self {
            Self {
                value: Mutex::new(value),
                observers: Arc::new(Mutex::new(Vec::new())),
                next_id: AtomicU64::new(0),
            }
        }

        fn set(&self, value: bool) {
            *self.value.lock() = value;
            let observers: Vec<SignalObserver> = self
                .observers
                .lock()
                .iter()
                .map(|(_, observer)| observer.clone())
                .collect();
            for observer in observers {
                observer(value);
            }
        }
    }

    impl HostSignal for TestSignal {
        fn current(&self) -> bool {
            *self.value.lock()
        }

        fn subscribe(&self, observer: SignalObserver) -> Subscription {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.observers.lock().push((id, observer));
            let observers = self.observers.clone();
            Subscription::new(Box::new(move || {
                observers.lock().retain(|(entry_id, _)| *entry_id != id);
            }))
        }
    }

    fn bind_with(
        focused: bool,
        foreground: bool,
    ) -> (Arc<RecordingSession>, TestSignal, TestSignal, LifecycleBinder) {
        let session = Arc::new(RecordingSession::default());
        let focus = TestSignal::new(focused);
        let app = TestSignal::new(foreground);
        let binder = LifecycleBinder::bind(session.clone(), &focus, &app);
        (session, focus, app, binder)
    }

    #[test]
    fn policy_backgrounds_on_focus_loss_even_while_foregrounded() {
        assert_eq!(
            policy_action(SignalChange::ScreenFocus(false), false),
            Some(LifecycleAction::Background)
        );
        assert_eq!(
            policy_action(SignalChange::ScreenFocus(true), true),
            Some(LifecycleAction::Resume)
        );
    }

    #[test]
    fn policy_ignores_foreground_changes_while_unfocused() {
        assert_eq!(policy_action(SignalChange::AppForeground(true), false), None);
        assert_eq!(policy_action(SignalChange::AppForeground(false), false), None);
        assert_eq!(
            policy_action(SignalChange::AppForeground(true), true),
            Some(LifecycleAction::Resume)
        );
        assert_eq!(
            policy_action(SignalChange::AppForeground(false), true),
            Some(LifecycleAction::Background)
        );
    }

    #[test]
    fn bind_synchronizes_with_the_initial_signal_values() {
        let (session, _focus, _app, _binder) = bind_with(true, true);
        assert_eq!(session.calls(), vec!["resume"]);

        let (session, _focus, _app, _binder) = bind_with(true, false);
        assert_eq!(session.calls(), vec!["background"]);

        let (session, _focus, _app, _binder) = bind_with(false, true);
        assert_eq!(session.calls(), vec!["background"]);
    }

    #[test]
    fn focus_changes_drive_resume_and_background() {
        let (session, focus, _app, _binder) = bind_with(false, true);

        focus.set(true);
        focus.set(false);
        assert_eq!(session.calls(), vec!["background", "resume", "background"]);
    }

    #[test]
    fn losing_focus_backgrounds_even_while_app_is_foregrounded() {
        let (session, focus, app, _binder) = bind_with(true, true);

        focus.set(false);
        assert_eq!(session.calls(), vec!["resume", "background"]);

        // Foreground churn while unfocused issues no calls at all.
        app.set(false);
        app.set(true);
        assert_eq!(session.calls(), vec!["resume", "background"]);
    }

    #[test]
    fn foreground_toggle_while_focused_drives_the_session() {
        let (session, _focus, app, _binder) = bind_with(true, true);

        app.set(false);
        app.set(true);
        assert_eq!(session.calls(), vec!["resume", "background", "resume"]);
    }

    #[test]
    fn dropping_the_binder_stops_driving_the_session() {
        let (session, focus, _app, binder) = bind_with(true, true);
        assert_eq!(session.calls(), vec!["resume"]);

        drop(binder);
        focus.set(false);
        focus.set(true);
        assert_eq!(session.calls(), vec!["resume"]);
    }
}
