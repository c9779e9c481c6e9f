use crate::core::key_codes;
use crate::core::macos_event_tap::{self, TapHandle};
use crate::core::macos_permissions;
use crate::core::stats_db::StatsStore;
use crate::error::{Error, Result};
use crate::models::{KeyCode, KeyEvent, RawKeyEvent};
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Power, brightness down/up and F13–F15. Never counted.
pub const RESERVED_KEY_CODES: [KeyCode; 6] = [0x7F, 0x91, 0x90, 0x6F, 0x70, 0x71];

const MASK_ALPHA_SHIFT: u64 = 1 << 16;
const MASK_SHIFT: u64 = 1 << 17;
const MASK_CTRL: u64 = 1 << 18;
const MASK_ALT: u64 = 1 << 19;
const MASK_META: u64 = 1 << 20;
const MASK_SECONDARY_FN: u64 = 1 << 23;
const MODIFIER_FLAGS: u64 =
    MASK_ALPHA_SHIFT | MASK_SHIFT | MASK_CTRL | MASK_ALT | MASK_META | MASK_SECONDARY_FN;

pub fn is_reserved(keycode: KeyCode) -> bool {
    RESERVED_KEY_CODES.contains(&keycode)
}

/// Decides whether a raw tap signal is a countable key press.
///
/// A flags-changed signal with no modifier bit set is a release, not a press.
pub fn accept(raw: RawKeyEvent, timestamp: DateTime<Local>) -> Option<KeyEvent> {
    let key_code = raw.keycode();
    if is_reserved(key_code) {
        return None;
    }

    let is_modifier = match raw {
        RawKeyEvent::KeyDown { .. } => key_codes::is_modifier(key_code),
        RawKeyEvent::FlagsChanged { flags, .. } => {
            if flags & MODIFIER_FLAGS == 0 {
                return None;
            }
            true
        }
    };

    Some(KeyEvent {
        key_code,
        is_modifier,
        timestamp,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputListenerErrorCode {
    PermissionDenied,
    ListenerCreationFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputListenerError {
    pub code: InputListenerErrorCode,
    pub message: String,
}

struct Running {
    handle: TapHandle,
    listener: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

/// Asks the OS whether global keyboard events may be observed.
pub type PermissionCheck = Box<dyn Fn() -> bool + Send + Sync>;

/// Global keyboard listener feeding a [`StatsStore`].
///
/// The OS callback only enqueues raw signals on a bounded queue; a single consumer thread
/// filters them and applies increments in delivery order.
pub struct EventTap {
    store: StatsStore,
    queue_capacity: usize,
    permission: PermissionCheck,
    // Serializes `start()` without blocking `is_running()`/`stop()` during the prompt.
    starting: Mutex<()>,
    running: Mutex<Option<Running>>,
    last_error: RwLock<Option<InputListenerError>>,
    dropped: Arc<AtomicU64>,
}

impl EventTap {
    pub fn new(store: StatsStore, queue_capacity: usize) -> Self {
        Self {
            store,
            queue_capacity: queue_capacity.max(1),
            permission: Box::new(macos_permissions::ensure_input_monitoring_permission),
            starting: Mutex::new(()),
            running: Mutex::new(None),
            last_error: RwLock::new(None),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replaces the Input Monitoring check run by every `start()`.
    pub fn with_permission_check(
        mut self,
        check: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        self.permission = Box::new(check);
        self
    }

    /// Installs the listener. A no-op when already running; after a failure it can be
    /// called again (e.g. once the user granted Input Monitoring).
    pub fn start(&self) -> Result<()> {
        let _starting = self.starting.lock();
        if self.is_running() {
            return Ok(());
        }

        if !(self.permission)() {
            self.record_error(
                InputListenerErrorCode::PermissionDenied,
                "Input Monitoring permission is required: System Settings → Privacy & Security → Input Monitoring. Grant it and start again.".to_string(),
            );
            return Err(Error::PermissionDenied);
        }

        let (tx, rx) = mpsc::sync_channel::<RawKeyEvent>(self.queue_capacity);
        let consumer = match spawn_consumer(rx, self.store.clone()) {
            Ok(consumer) => consumer,
            Err(e) => {
                return Err(self.creation_failed(format!("spawn key counter thread: {e}")));
            }
        };

        let (ready_tx, ready_rx) = mpsc::channel();
        let dropped = Arc::clone(&self.dropped);
        let listener = match thread::Builder::new()
            .name("keycount-event-tap".to_string())
            .spawn(move || macos_event_tap::run(tx, dropped, ready_tx))
        {
            Ok(listener) => listener,
            Err(e) => {
                // The sender went down with the unspawned closure.
                if consumer.join().is_err() {
                    tracing::error!("key counter thread panicked");
                }
                return Err(self.creation_failed(format!("spawn event tap thread: {e}")));
            }
        };

        let outcome = ready_rx
            .recv()
            .unwrap_or_else(|_| Err("event tap thread exited before reporting".to_string()));

        match outcome {
            Ok(handle) => {
                *self.running.lock() = Some(Running {
                    handle,
                    listener,
                    consumer,
                });
                *self.last_error.write() = None;
                tracing::info!("keyboard monitoring started");
                Ok(())
            }
            Err(message) => {
                // The listener dropped its sender, so the consumer drains and exits.
                let _ = listener.join();
                let _ = consumer.join();
                Err(self.creation_failed(message))
            }
        }
    }

    /// Disables the listener and waits for queued presses to be applied. Safe to call
    /// when not started.
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        running.handle.stop();
        if running.listener.join().is_err() {
            tracing::error!("event tap thread panicked");
        }
        if running.consumer.join().is_err() {
            tracing::error!("key counter thread panicked");
        }
        tracing::info!(dropped = self.dropped_events(), "keyboard monitoring stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn last_error(&self) -> Option<InputListenerError> {
        self.last_error.read().clone()
    }

    /// Signals discarded because the queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn creation_failed(&self, message: String) -> Error {
        self.record_error(InputListenerErrorCode::ListenerCreationFailed, message.clone());
        Error::ListenerCreationFailed(message)
    }

    fn record_error(&self, code: InputListenerErrorCode, message: String) {
        tracing::warn!(?code, %message, "keyboard monitoring unavailable");
        *self.last_error.write() = Some(InputListenerError { code, message });
    }
}

impl Drop for EventTap {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_consumer(rx: Receiver<RawKeyEvent>, store: StatsStore) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("keycount-counter".to_string())
        .spawn(move || {
            for raw in rx {
                let Some(event) = accept(raw, Local::now()) else {
                    continue;
                };
                tracing::trace!(
                    key_code = event.key_code,
                    is_modifier = event.is_modifier,
                    "key press"
                );
                store.increment(event.key_code);
            }
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeRange;
    use std::collections::HashMap;

    fn feed(store: &StatsStore, events: &[RawKeyEvent]) {
        let (tx, rx) = mpsc::sync_channel(4);
        let consumer = spawn_consumer(rx, store.clone()).expect("spawn");
        for ev in events {
            tx.send(*ev).expect("send");
        }
        drop(tx);
        consumer.join().expect("join");
    }

    #[test]
    fn key_down_is_accepted() {
        let ev = accept(RawKeyEvent::KeyDown { keycode: 0 }, Local::now()).expect("accepted");
        assert_eq!(ev.key_code, 0);
        assert!(!ev.is_modifier);
    }

    #[test]
    fn reserved_keys_are_dropped_for_both_signal_kinds() {
        for code in RESERVED_KEY_CODES {
            assert!(accept(RawKeyEvent::KeyDown { keycode: code }, Local::now()).is_none());
            assert!(accept(
                RawKeyEvent::FlagsChanged {
                    keycode: code,
                    flags: MASK_SHIFT
                },
                Local::now()
            )
            .is_none());
        }
    }

    #[test]
    fn flags_cleared_is_not_a_press() {
        let released = RawKeyEvent::FlagsChanged {
            keycode: 56,
            flags: 0,
        };
        assert!(accept(released, Local::now()).is_none());

        // non-coalesced bit alone carries no modifier
        let released = RawKeyEvent::FlagsChanged {
            keycode: 56,
            flags: 0x100,
        };
        assert!(accept(released, Local::now()).is_none());

        let pressed = RawKeyEvent::FlagsChanged {
            keycode: 56,
            flags: MASK_SHIFT | 0x100,
        };
        let ev = accept(pressed, Local::now()).expect("accepted");
        assert!(ev.is_modifier);
    }

    #[test]
    fn consumer_counts_modifier_press_once() {
        let store = StatsStore::open_in_memory().expect("open");
        feed(
            &store,
            &[
                RawKeyEvent::FlagsChanged {
                    keycode: 56,
                    flags: MASK_SHIFT,
                },
                RawKeyEvent::FlagsChanged {
                    keycode: 56,
                    flags: 0,
                },
            ],
        );
        assert_eq!(store.query(TimeRange::AllTime), HashMap::from([(56, 1)]));
    }

    #[test]
    fn consumer_never_stores_reserved_keys() {
        let store = StatsStore::open_in_memory().expect("open");
        let mut events = Vec::new();
        for _ in 0..10 {
            events.push(RawKeyEvent::KeyDown { keycode: 0x7F });
            events.push(RawKeyEvent::KeyDown { keycode: 0x6F });
        }
        events.push(RawKeyEvent::KeyDown { keycode: 1 });
        feed(&store, &events);

        let counts = store.query(TimeRange::AllTime);
        assert_eq!(counts, HashMap::from([(1, 1)]));
        assert!(store
            .records()
            .expect("records")
            .iter()
            .all(|r| !is_reserved(r.key_code)));
    }

    #[test]
    fn consumer_applies_presses_in_order() {
        let store = StatsStore::open_in_memory().expect("open");
        let mut events = vec![RawKeyEvent::KeyDown { keycode: 0 }; 3];
        events.push(RawKeyEvent::KeyDown { keycode: 1 });
        feed(&store, &events);

        assert_eq!(store.query(TimeRange::Today), HashMap::from([(0, 3), (1, 1)]));
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let store = StatsStore::open_in_memory().expect("open");
        store.increment(4);
        let tap = EventTap::new(store.clone(), 16);

        tap.stop();
        tap.stop();

        assert!(!tap.is_running());
        assert_eq!(store.query(TimeRange::AllTime), HashMap::from([(4, 1)]));
    }

    #[test]
    fn denied_permission_installs_nothing_and_is_rechecked() {
        use std::sync::atomic::AtomicUsize;

        let store = StatsStore::open_in_memory().expect("open");
        let checks = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&checks);
        let tap = EventTap::new(store.clone(), 16).with_permission_check(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            false
        });

        let err = tap.start().expect_err("denied");
        assert!(matches!(err, Error::PermissionDenied));
        assert!(!tap.is_running());
        assert_eq!(
            tap.last_error().map(|e| e.code),
            Some(InputListenerErrorCode::PermissionDenied)
        );

        assert!(matches!(tap.start(), Err(Error::PermissionDenied)));
        assert_eq!(checks.load(Ordering::SeqCst), 2);

        tap.stop();
        assert!(store.records().expect("records").is_empty());
        assert_eq!(tap.dropped_events(), 0);
    }

    #[test]
    fn creation_failure_is_recorded_for_last_error() {
        let store = StatsStore::open_in_memory().expect("open");
        let tap = EventTap::new(store, 16);

        let err = tap.creation_failed("spawn event tap thread: out of threads".to_string());
        assert!(matches!(err, Error::ListenerCreationFailed(ref m) if m.contains("out of threads")));
        let last = tap.last_error().expect("recorded");
        assert_eq!(last.code, InputListenerErrorCode::ListenerCreationFailed);
        assert!(last.message.starts_with("spawn event tap thread"));
    }

    #[test]
    fn state_stays_readable_while_permission_prompt_is_open() {
        use std::sync::Barrier;

        let prompt_open = Arc::new(Barrier::new(2));
        let answer = Arc::new(Barrier::new(2));
        let (open, ans) = (Arc::clone(&prompt_open), Arc::clone(&answer));
        let store = StatsStore::open_in_memory().expect("open");
        let tap = Arc::new(EventTap::new(store, 16).with_permission_check(move || {
            open.wait();
            ans.wait();
            false
        }));

        let starter = {
            let tap = Arc::clone(&tap);
            thread::spawn(move || tap.start())
        };
        prompt_open.wait();
        assert!(!tap.is_running());
        tap.stop();
        answer.wait();

        let result = starter.join().expect("join");
        assert!(matches!(result, Err(Error::PermissionDenied)));
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn start_fails_softly_without_an_event_tap() {
        let store = StatsStore::open_in_memory().expect("open");
        let tap = EventTap::new(store, 16).with_permission_check(|| true);

        let err = tap.start().expect_err("no tap on this platform");
        assert!(matches!(err, Error::ListenerCreationFailed(_)));
        assert!(!tap.is_running());
        assert_eq!(
            tap.last_error().map(|e| e.code),
            Some(InputListenerErrorCode::ListenerCreationFailed)
        );

        // retry is allowed and stop stays harmless
        assert!(tap.start().is_err());
        tap.stop();
    }
}
