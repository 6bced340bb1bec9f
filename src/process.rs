//! Running external helper programs with a deadline.

use crate::config::CommandSpec;

use log::{debug, warn};
use std::{
    io::{self, Read},
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// How often a running child is checked for exit.
const WAIT_POLL: Duration = Duration::from_millis(10);

/// What a finished helper printed.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// How the program exited.
    pub status: ExitStatus,
    /// Everything printed on stdout, lossily decoded.
    pub stdout: String,
    /// Everything printed on stderr, lossily decoded.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the program exited with status zero.
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Some(mut pipe) = pipe {
            // A read error just truncates what we report.
            let _ = pipe.read_to_end(&mut bytes);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

fn collect(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Kill `child` and reap it so it does not linger as a zombie.
pub fn terminate(child: &mut Child, name: &str) {
    if let Err(e) = child.kill() {
        // Already exited.
        debug!("{name} : kill failed: {e}");
    }
    if let Err(e) = child.wait() {
        warn!("{name} : could not reap child: {e}");
    }
}

/// Run `spec` with `extra` appended to its arguments.
///
/// Returns `Ok(None)` if the program did not finish within `timeout`, in
/// which case it has been killed. A program that cannot be started at all is
/// an `Err`; callers tell a missing tool apart by
/// [`io::ErrorKind::NotFound`].
pub fn run_with_timeout(
    spec: &CommandSpec,
    extra: &[&str],
    timeout: Duration,
) -> io::Result<Option<CommandOutput>> {
    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .args(extra)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(CommandOutput {
                status,
                stdout: collect(stdout),
                stderr: collect(stderr),
            }));
        }
        if Instant::now() >= deadline {
            debug!("{} : timed out after {:?}", spec.program, timeout);
            terminate(&mut child, &spec.program);
            return Ok(None);
        }
        thread::sleep(WAIT_POLL);
    }
}
