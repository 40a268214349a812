//! Typed messages and the queues that carry them between the controller
//! and the engine thread.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::engine::State;
use crate::settings::SinkSettings;

/// Payload passed between threads. Ownership moves to whichever side pops it.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Replace the active configuration.
    ConfigureSink(SinkSettings),
    /// Ask the engine for the emitted-sample counter.
    RequestStreamTiming,
    /// Response to `RequestStreamTiming`.
    ReportStreamTiming(u64),
    /// Engine state transition; `message` carries the error text for `Error`.
    ReportState {
        state: State,
        message: Option<String>,
    },
}

type Notifier = Box<dyn Fn() + Send + Sync>;

/// Thread-safe FIFO with a non-blocking pop.
///
/// The registered notifier fires on the empty→non-empty transition only, so
/// a receiver that fully drains on each wake-up never misses a message and
/// is never woken redundantly while the queue stays non-empty.
pub struct MessageQueue {
    queue: Mutex<VecDeque<Message>>,
    notifier: Mutex<Option<Notifier>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        MessageQueue {
            queue: Mutex::new(VecDeque::new()),
            notifier: Mutex::new(None),
        }
    }

    pub fn set_notifier<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.notifier.lock().unwrap() = Some(Box::new(f));
    }

    pub fn push(&self, msg: Message) {
        let was_empty = {
            let mut queue = self.queue.lock().unwrap();
            let was_empty = queue.is_empty();
            queue.push_back(msg);
            was_empty
        };

        if was_empty {
            if let Some(notify) = self.notifier.lock().unwrap().as_ref() {
                notify();
            }
        }
    }

    pub fn pop(&self) -> Option<Message> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Condvar-backed wake event for threads that park between queue drains.
pub struct Waker {
    woken: Mutex<bool>,
    cond: Condvar,
}

impl Waker {
    pub fn new() -> Self {
        Waker {
            woken: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn wake(&self) {
        *self.woken.lock().unwrap() = true;
        self.cond.notify_all();
    }

    /// Park until woken or the timeout elapses. Returns whether a wake
    /// arrived; the pending-wake flag is consumed either way.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut woken = self.woken.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while !*woken {
            let now = std::time::Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self.cond.wait_timeout(woken, deadline - now).unwrap();
            woken = guard;
        }
        let was_woken = *woken;
        *woken = false;
        was_woken
    }
}

impl Default for Waker {
    fn default() -> Self {
        Self::new()
    }
}
