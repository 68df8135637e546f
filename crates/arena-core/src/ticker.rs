//! Fixed-interval callback runner on a dedicated thread.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use crate::lock;

type Callback = dyn Fn() + Send + Sync;

#[derive(Debug, Default)]
struct Shared {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Invokes a callback every `interval` until stopped.
///
/// The first invocation happens one interval after [`start`](Self::start).
/// [`stop`](Self::stop) wakes the thread and joins it, so once it returns the
/// callback is not running and will not run again. A ticker can be
/// restarted after being stopped.
pub struct Ticker {
    interval: Duration,
    callback: Arc<Callback>,
    running: Option<(Arc<Shared>, JoinHandle<()>)>,
}

impl fmt::Debug for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticker")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Ticker {
    pub fn new(interval: Duration, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            interval,
            callback: Arc::new(callback),
            running: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start ticking. Does nothing if already running.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let shared = Arc::new(Shared::default());
        let interval = self.interval;
        let callback = Arc::clone(&self.callback);
        let state = Arc::clone(&shared);

        let handle = thread::Builder::new()
            .name("ticker".to_owned())
            .spawn(move || {
                loop {
                    let stopped = lock(&state.stopped);
                    let (stopped, _) = state
                        .wake
                        .wait_timeout_while(stopped, interval, |stopped| !*stopped)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    callback();
                }
            })?;

        debug!(?interval, "ticker started");
        self.running = Some((shared, handle));
        Ok(())
    }

    /// Stop ticking and wait for an in-flight callback to finish.
    pub fn stop(&mut self) {
        let Some((shared, handle)) = self.running.take() else {
            return;
        };
        *lock(&shared.stopped) = true;
        shared.wake.notify_all();
        if handle.join().is_err() {
            error!("ticker callback panicked");
        }
        debug!("ticker stopped");
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
