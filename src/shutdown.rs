//! Process-wide shutdown request, raised by SIGINT or SIGTERM.

use libc::c_int;
use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

static REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signal: c_int) {
    // Only async-signal-safe work in here.
    REQUESTED.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the shutdown flag.
pub fn install() -> io::Result<()> {
    for signal in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: `on_signal` only touches an atomic.
        let previous = unsafe { libc::signal(signal, on_signal as extern "C" fn(c_int) as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Ask the controller to shut down, as a signal would.
pub fn request() {
    REQUESTED.store(true, Ordering::SeqCst);
}

/// Whether a shutdown was requested.
pub fn requested() -> bool {
    REQUESTED.load(Ordering::SeqCst)
}

/// Block until shutdown is requested, checking every `poll`.
pub fn wait(poll: Duration) {
    while !requested() {
        std::thread::sleep(poll);
    }
}
