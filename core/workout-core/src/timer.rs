//! Single-slot rest timer.
//!
//! Starting a timer replaces any running one. Remaining time is published to
//! subscribers on every tick; threshold and completion events go to the
//! [`NotificationSink`]. The timer is never persisted.
//!
//! The background ticker is one thread per controller at most. It exits when the
//! countdown reaches zero, on [`RestTimerController::stop`], or when a newer
//! ticker supersedes it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use chrono::Utc;

use crate::config::RestTimerConfig;
use crate::notify::{NotificationSink, TimerEvent};
use crate::types::RestTimerState;

static NEXT_TICKER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub struct RestTimerController {
    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<Inner>,
    sink: Arc<dyn NotificationSink>,
    config: RestTimerConfig,
    auto_tick: bool,
}

#[derive(Default)]
struct Inner {
    state: RestTimerState,
    ticker: Option<Ticker>,
    listeners: Vec<Sender<u32>>,
}

struct Ticker {
    id: u64,
    // Dropping the sender wakes and ends the loop.
    _cancel: Sender<()>,
}

impl Inner {
    fn publish(&mut self, remaining: u32) {
        self.listeners.retain(|tx| tx.send(remaining).is_ok());
    }

    fn advance(&mut self, warning_threshold: u32) -> Option<TimerEvent> {
        if !self.state.is_active {
            return None;
        }
        self.state.remaining_time = self.state.remaining_time.saturating_sub(1);
        let remaining = self.state.remaining_time;
        self.publish(remaining);

        if remaining == 0 {
            self.state.is_active = false;
            self.ticker = None;
            return Some(TimerEvent::Completed {
                exercise_id: self.state.exercise_id.clone(),
            });
        }
        (remaining == warning_threshold).then_some(TimerEvent::Warning {
            remaining_secs: remaining,
        })
    }
}

impl RestTimerController {
    /// Controller with a background ticker at the configured interval.
    pub fn new(config: RestTimerConfig, sink: Arc<dyn NotificationSink>) -> Self {
        Self::build(config, sink, true)
    }

    /// Controller driven only by explicit [`tick`](Self::tick) calls.
    pub fn manual(config: RestTimerConfig, sink: Arc<dyn NotificationSink>) -> Self {
        Self::build(config, sink, false)
    }

    fn build(config: RestTimerConfig, sink: Arc<dyn NotificationSink>, auto_tick: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                sink,
                config,
                auto_tick,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &RestTimerConfig {
        &self.shared.config
    }

    pub fn state(&self) -> RestTimerState {
        self.lock().state.clone()
    }

    pub fn is_active(&self) -> bool {
        self.lock().state.is_active
    }

    /// Stream of remaining seconds, one value per tick plus the starting value.
    pub fn subscribe(&self) -> Receiver<u32> {
        let (tx, rx) = mpsc::channel();
        self.lock().listeners.push(tx);
        rx
    }

    /// Starts a countdown, replacing any existing one.
    pub fn start(&self, duration_secs: u32, exercise_id: Option<String>) {
        {
            let mut inner = self.lock();
            inner.state = RestTimerState {
                is_active: true,
                remaining_time: duration_secs,
                exercise_id: exercise_id.clone(),
                start_time: Some(Utc::now()),
            };
            inner.publish(duration_secs);
            if self.shared.auto_tick {
                // Fresh ticker so the first decrement lands a full interval after start
                inner.ticker = None;
                self.spawn_ticker(&mut inner);
            }
        }
        tracing::debug!(duration_secs, exercise_id = ?exercise_id, "Rest timer started");
        self.shared.sink.timer_event(&TimerEvent::Started {
            exercise_id,
            duration_secs,
        });
    }

    /// Advances the countdown by one second.
    pub fn tick(&self) {
        let event = self.lock().advance(self.shared.config.warning_threshold_secs);
        if let Some(event) = event {
            self.shared.sink.timer_event(&event);
        }
    }

    /// Clears the timer immediately.
    pub fn stop(&self) {
        let was_active = {
            let mut inner = self.lock();
            let was_active = inner.state.is_active;
            inner.state = RestTimerState::default();
            inner.ticker = None;
            was_active
        };
        if was_active {
            tracing::debug!("Rest timer stopped");
            self.shared.sink.timer_event(&TimerEvent::Stopped);
        }
    }

    fn spawn_ticker(&self, inner: &mut Inner) {
        if inner.ticker.is_some() {
            return;
        }
        let id = NEXT_TICKER_ID.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let interval = self.shared.config.tick_interval();
        // Weak so dropping the last controller also ends the loop
        let shared = Arc::downgrade(&self.shared);

        thread::spawn(move || loop {
            match cancel_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
            let Some(shared) = shared.upgrade() else {
                return;
            };
            if !(RestTimerController { shared }).tick_from_loop(id) {
                return;
            }
        });

        inner.ticker = Some(Ticker {
            id,
            _cancel: cancel_tx,
        });
    }

    /// Returns false once this loop should exit.
    fn tick_from_loop(&self, id: u64) -> bool {
        let (event, keep_running) = {
            let mut inner = self.lock();
            if inner.ticker.as_ref().map(|t| t.id) != Some(id) {
                return false;
            }
            let event = inner.advance(self.shared.config.warning_threshold_secs);
            (event, inner.state.is_active)
        };
        if let Some(event) = event {
            self.shared.sink.timer_event(&event);
        }
        keep_running
    }
}
