//! Ownership of the serial link to the touch display.
//!
//! Writes may come from any thread and are serialised by a dedicated lock;
//! the background listener is the only reader. Reads use a short timeout so
//! the listener can notice its stop flag, and every chunk goes through a
//! [`FrameDecoder`] so partial and glued frames are handled.

use crate::{
    display::Screen,
    protocol::{encode_display_command, FrameDecoder},
    worker::{join_with_timeout, lock, StopFlag},
};

use log::{debug, error, info, warn};
use serial2::SerialPort;
use std::{
    borrow::Cow,
    fmt, io,
    path::PathBuf,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

/// Size of a single read from the port.
const READ_CHUNK: usize = 256;

/// Consecutive hard read errors after which the listener gives up.
const MAX_READ_ERRORS: u32 = 10;

/// Bound on joining the listener thread.
const LISTENER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A byte pipe to the display. Implemented for [`SerialPort`]; tests use an
/// in-memory version.
pub trait Link: Send + Sync {
    /// Read whatever is available. A timeout is reported as an
    /// [`io::ErrorKind::TimedOut`] error.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `data` and flush it.
    fn write_all(&self, data: &[u8]) -> io::Result<()>;
}

impl Link for SerialPort {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        SerialPort::read(self, buf)
    }

    fn write_all(&self, data: &[u8]) -> io::Result<()> {
        SerialPort::write_all(self, data)?;
        SerialPort::flush(self)
    }
}

/// Errors from opening the serial port.
#[derive(Debug)]
pub enum TransportError {
    /// The operating system refused to open or configure the port.
    IoError(io::Error),
    /// `open` was called on a transport built around an existing link.
    NoPath,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            TransportError::IoError(error) => Cow::from(format!("io error: {}", error)),
            TransportError::NoPath => Cow::from("no serial device path configured"),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}

struct Listener {
    stop: StopFlag,
    handle: JoinHandle<()>,
}

/// The serial connection to the display.
pub struct SerialTransport {
    path: Option<PathBuf>,
    baud_rate: u32,
    poll_interval: Duration,
    link: Mutex<Option<Arc<dyn Link>>>,
    write_lock: Mutex<()>,
    listener: Mutex<Option<Listener>>,
}

impl SerialTransport {
    /// A transport for the device at `path`. Nothing is opened until
    /// [`SerialTransport::open`].
    pub fn new(path: impl Into<PathBuf>, baud_rate: u32, poll_interval: Duration) -> Self {
        Self {
            path: Some(path.into()),
            baud_rate,
            poll_interval,
            link: Mutex::new(None),
            write_lock: Mutex::new(()),
            listener: Mutex::new(None),
        }
    }

    /// A transport that is already connected through `link`.
    pub fn with_link(link: Arc<dyn Link>, poll_interval: Duration) -> Self {
        Self {
            path: None,
            baud_rate: 0,
            poll_interval,
            link: Mutex::new(Some(link)),
            write_lock: Mutex::new(()),
            listener: Mutex::new(None),
        }
    }

    /// The serial devices the operating system knows about.
    pub fn available_ports() -> Vec<PathBuf> {
        SerialPort::available_ports().unwrap_or_else(|e| {
            warn!("Could not enumerate serial ports: {}", e);
            Vec::new()
        })
    }

    fn try_open(&self) -> Result<Arc<dyn Link>, TransportError> {
        let path = self.path.as_ref().ok_or(TransportError::NoPath)?;
        let mut port = SerialPort::open(path, self.baud_rate)?;
        port.set_read_timeout(self.poll_interval)?;
        port.set_write_timeout(Duration::from_secs(2))?;
        Ok(Arc::new(port))
    }

    /// Open the port. Returns `true` if the port is open afterwards.
    pub fn open(&self) -> bool {
        if self.is_open() {
            return true;
        }
        match self.try_open() {
            Ok(link) => {
                *lock(&self.link) = Some(link);
                info!(
                    "Serial port open: {} ({} bps)",
                    self.describe(),
                    self.baud_rate
                );
                true
            }
            Err(e) => {
                error!("Failed to open serial port {}: {}", self.describe(), e);
                false
            }
        }
    }

    /// Stop listening and release the port. Safe to call repeatedly.
    pub fn close(&self) {
        self.stop_listening();
        if lock(&self.link).take().is_some() {
            info!("Serial port closed: {}", self.describe());
        }
    }

    /// Whether the port is open.
    pub fn is_open(&self) -> bool {
        lock(&self.link).is_some()
    }

    /// Whether the background listener is running.
    pub fn is_listening(&self) -> bool {
        lock(&self.listener)
            .as_ref()
            .is_some_and(|l| !l.handle.is_finished())
    }

    fn describe(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<link>".to_owned())
    }

    /// Write raw bytes. Writes from different threads never interleave.
    pub fn send(&self, data: &[u8]) -> bool {
        let Some(link) = lock(&self.link).clone() else {
            warn!("Serial port not open, dropping {} bytes", data.len());
            return false;
        };

        let _guard = lock(&self.write_lock);
        match link.write_all(data) {
            Ok(()) => {
                debug!("Sent {} bytes: {:02X?}", data.len(), data);
                true
            }
            Err(e) => {
                warn!("Serial write failed: {}", e);
                false
            }
        }
    }

    /// Send one display command followed by the `FF FF FF` terminator.
    pub fn send_display_command(&self, command: &str) -> bool {
        debug!("Display command: {}", command);
        self.send(&encode_display_command(command))
    }

    /// Start the background reader. `on_frame` is called on the reader
    /// thread with the command byte of every complete inbound frame.
    ///
    /// Returns `false` if the port is not open or a listener is already
    /// running.
    pub fn start_listening<F>(&self, mut on_frame: F) -> bool
    where
        F: FnMut(u8) + Send + 'static,
    {
        let Some(link) = lock(&self.link).clone() else {
            warn!("Serial port not open, cannot start listening");
            return false;
        };

        let mut listener = lock(&self.listener);
        if listener.as_ref().is_some_and(|l| !l.handle.is_finished()) {
            warn!("Serial listener already running");
            return false;
        }

        let stop = StopFlag::new();
        let th_stop = stop.clone();
        let poll_interval = self.poll_interval;
        let spawned = thread::Builder::new()
            .name("serial-listener".to_owned())
            .spawn(move || {
                listen_loop(link.as_ref(), &th_stop, poll_interval, &mut on_frame);
            });

        match spawned {
            Ok(handle) => {
                *listener = Some(Listener { stop, handle });
                info!("Serial listener started");
                true
            }
            Err(e) => {
                error!("Could not spawn serial listener: {}", e);
                false
            }
        }
    }

    /// Stop the background reader. Idempotent, and safe to call from the
    /// `on_frame` callback itself: the listener is then left to exit on its
    /// own instead of being joined.
    pub fn stop_listening(&self) {
        let Some(Listener { stop, handle }) = lock(&self.listener).take() else {
            return;
        };
        stop.raise();
        join_with_timeout(handle, LISTENER_JOIN_TIMEOUT, "serial-listener");
        info!("Serial listener stopped");
    }
}

impl Screen for SerialTransport {
    fn send_command(&self, command: &str) -> bool {
        self.send_display_command(command)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn listen_loop(
    link: &dyn Link,
    stop: &StopFlag,
    poll_interval: Duration,
    on_frame: &mut dyn FnMut(u8),
) {
    let mut decoder = FrameDecoder::new();
    let mut buffer = [0u8; READ_CHUNK];
    let mut errors = 0;

    while !stop.is_raised() {
        match link.read(&mut buffer) {
            Ok(0) => {}
            Ok(n) => {
                errors = 0;
                debug!("Received {} bytes: {:02X?}", n, &buffer[..n]);
                for code in decoder.feed(&buffer[..n]) {
                    on_frame(code);
                    if stop.is_raised() {
                        return;
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                errors += 1;
                if errors >= MAX_READ_ERRORS {
                    error!("Serial listener giving up after repeated errors: {}", e);
                    return;
                }
                warn!("Serial read error: {}", e);
                stop.sleep(poll_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeLink;
    use crate::protocol::encode_frame;
    use std::{sync::mpsc::channel, time::Instant};

    fn transport(link: &Arc<FakeLink>) -> SerialTransport {
        SerialTransport::with_link(link.clone(), Duration::from_millis(5))
    }

    #[test]
    fn send_appends_terminator() {
        let link = Arc::new(FakeLink::new());
        let transport = transport(&link);

        assert!(transport.send_display_command("page menu"));
        assert_eq!(link.written(), b"page menu\xFF\xFF\xFF".to_vec());
    }

    #[test]
    fn send_on_closed_port_fails() {
        let link = Arc::new(FakeLink::new());
        let transport = transport(&link);
        transport.close();

        assert!(!transport.is_open());
        assert!(!transport.send(b"x"));
        assert!(!transport.start_listening(|_| {}));
    }

    #[test]
    fn open_without_path_fails() {
        let link = Arc::new(FakeLink::new());
        let transport = transport(&link);
        transport.close();
        assert!(!transport.open());
    }

    #[test]
    fn concurrent_writes_do_not_interleave() {
        let link = Arc::new(FakeLink::new());
        let transport = Arc::new(transport(&link));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let transport = transport.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        transport.send_display_command(&format!("t{i}.txt=\"{i}{i}{i}\""));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let written = link.written();
        let commands: Vec<&[u8]> = written
            .split(|&b| b == 0xFF)
            .filter(|c| !c.is_empty())
            .collect();
        assert_eq!(commands.len(), 100);
        for c in commands {
            let s = std::str::from_utf8(c).unwrap();
            let i = &s[1..2];
            assert_eq!(s, format!("t{i}.txt=\"{i}{i}{i}\""));
        }
    }

    #[test]
    fn listener_dispatches_frames_split_across_reads() {
        let link = Arc::new(FakeLink::new());
        let transport = transport(&link);
        let (tx, rx) = channel();
        assert!(transport.start_listening(move |code| tx.send(code).unwrap()));
        assert!(transport.is_listening());

        let frame = encode_frame(0x05);
        link.push_inbound(&[0x00, frame[0], frame[1]]);
        thread::sleep(Duration::from_millis(30));
        link.push_inbound(&[frame[2], frame[3], 0x55]);

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(0x05));
        transport.stop_listening();
        assert!(!transport.is_listening());
    }

    #[test]
    fn second_start_is_rejected() {
        let link = Arc::new(FakeLink::new());
        let transport = transport(&link);
        assert!(transport.start_listening(|_| {}));
        assert!(!transport.start_listening(|_| {}));
        transport.stop_listening();
    }

    #[test]
    fn stop_is_idempotent() {
        let link = Arc::new(FakeLink::new());
        let transport = transport(&link);
        transport.stop_listening();
        assert!(transport.start_listening(|_| {}));
        transport.stop_listening();
        transport.stop_listening();
        transport.close();
        transport.close();
    }

    #[test]
    fn stop_from_inside_callback() {
        let link = Arc::new(FakeLink::new());
        let transport = Arc::new(transport(&link));
        let (tx, rx) = channel();

        let th_transport = transport.clone();
        assert!(transport.start_listening(move |code| {
            th_transport.stop_listening();
            tx.send(code).unwrap();
        }));
        link.push_inbound(&encode_frame(0x02));

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(0x02));
        let start = Instant::now();
        while transport.is_listening() && start.elapsed() < Duration::from_secs(1) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!transport.is_listening());
    }
}
