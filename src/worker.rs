//! Small helpers shared by every background loop in the controller: a
//! cooperative stop flag, bounded joins, and the rule that a loop is never
//! joined from its own thread.

use log::{debug, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// How often a bounded join checks whether the worker has finished.
const JOIN_POLL: Duration = Duration::from_millis(10);

/// A shared, cloneable boolean used for cooperative cancellation.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// A flag that has not been raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask whoever watches this flag to stop.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Lower the flag so that it can be reused for the next run.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// `true` once [`StopFlag::raise`] has been called.
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short slices, returning early (with `true`)
    /// if the flag is raised in the meantime.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_raised() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(JOIN_POLL));
        }
    }
}

/// Lock a mutex, recovering the data if another thread panicked while
/// holding it. None of our critical sections leave data half-written.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Wait up to `timeout` for `handle` to finish.
///
/// Returns `true` if the thread finished (and was joined). If the deadline
/// passes the handle is dropped, which detaches the thread; it will still
/// observe its stop flag and exit on its own.
///
/// Calling this with the handle of the current thread never blocks: the
/// handle is detached immediately, since a thread cannot join itself.
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    if handle.thread().id() == thread::current().id() {
        debug!("{name} : stop requested from its own thread, not joining.");
        return false;
    }

    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{name} : did not stop within {timeout:?}, detaching.");
            return false;
        }
        thread::sleep(JOIN_POLL);
    }

    if handle.join().is_err() {
        warn!("{name} : worker thread panicked.");
    }
    true
}

/// Run `f` on a short-lived detached thread.
///
/// Callbacks that need to stop the loop that is currently invoking them
/// must go through this: the stopper joins the loop from the outside, so the
/// loop is never asked to join itself.
pub fn spawn_detached<F>(name: &str, f: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(e) = thread::Builder::new().name(name.to_owned()).spawn(f) {
        warn!("{name} : could not spawn helper thread: {e}");
    }
}
