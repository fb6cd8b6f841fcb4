mod event_codes;
mod sys;

use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::ready;
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace, warn};

use crate::error::IrDaemonError;
use crate::IrDaemonResult;
use event_codes::*;

/// An input device opened for reading, not yet registered with the runtime.
///
/// Opening happens before the process detaches, registration afterwards.
#[derive(Debug)]
pub struct InputDevice {
    path: PathBuf,
    name: Option<String>,
    file: File,
}

impl InputDevice {
    /// Open `path` read-only and non-blocking.
    pub fn open(path: impl Into<PathBuf>) -> IrDaemonResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| IrDaemonError::DeviceOpen {
                path: path.clone(),
                source,
            })?;

        Self::from_file(file, path)
    }

    /// Wrap an already open file, e.g. one end of a pipe.
    pub fn from_file(file: File, path: impl Into<PathBuf>) -> IrDaemonResult<Self> {
        let path = path.into();
        sys::set_nonblocking(&file).map_err(|source| IrDaemonError::DeviceOpen {
            path: path.clone(),
            source,
        })?;

        // Only evdev nodes answer EVIOCGNAME.
        let name = sys::read_name(&file).ok();

        Ok(Self { path, name, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// A key event (EV_KEY).
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEvent {
    /// The timestamp of the event.
    pub ts: DateTime<Utc>,
    /// The transition that triggered the event.
    pub cause: KeyEventCause,
    /// The key code of the key that triggered the event.
    pub code: u16,
}

impl KeyEvent {
    /// Whether the key is down, i.e. the event value is non-zero.
    pub fn is_pressed(&self) -> bool {
        self.cause != KeyEventCause::Release
    }
}

/// The reason a `KeyEvent` fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventCause {
    /// The key was pressed.
    Press,
    /// The key is held down and the device repeated it.
    Repeat,
    /// The key was released.
    Release,
}

impl TryFrom<&libc::input_event> for KeyEvent {
    type Error = IrDaemonError;

    fn try_from(ev: &libc::input_event) -> Result<Self, Self::Error> {
        if ev.type_ != EV_KEY {
            return Err(IrDaemonError::UnsupportedEventType(ev.type_));
        }

        let cause = match ev.value {
            EV_KEY_RELEASE => KeyEventCause::Release,
            EV_KEY_PRESS => KeyEventCause::Press,
            EV_KEY_REPEAT => KeyEventCause::Repeat,
            // Some drivers report other non-zero values for a key that is down.
            _ => KeyEventCause::Press,
        };

        let ts = u32::try_from(ev.time.tv_usec * 1000)
            .ok()
            .and_then(|nsec| DateTime::<Utc>::from_timestamp(ev.time.tv_sec as i64, nsec))
            .unwrap_or_else(|| {
                debug!(
                    sec = ev.time.tv_sec,
                    usec = ev.time.tv_usec,
                    "invalid event timestamp, using the current time"
                );
                Utc::now()
            });

        Ok(Self {
            ts,
            cause,
            code: ev.code,
        })
    }
}

/// Turns raw input events into key events, discarding everything that arrives while the
/// reader is resynchronizing after the kernel dropped events.
#[derive(Debug, Default)]
pub(crate) struct EventDecoder {
    syncing: bool,
}

impl EventDecoder {
    #[cfg(test)]
    pub(crate) fn is_syncing(&self) -> bool {
        self.syncing
    }

    pub(crate) fn decode(&mut self, ev: &libc::input_event) -> Option<KeyEvent> {
        if self.syncing {
            // Everything up to and including the next SYN_REPORT is stale.
            if ev.type_ == EV_SYN && ev.code == SYN_REPORT {
                debug!("input device resynchronized");
                self.syncing = false;
            }
            return None;
        }

        match ev.type_ {
            EV_SYN if ev.code == SYN_DROPPED => {
                debug!("input events dropped, resynchronizing");
                self.syncing = true;
                None
            }
            EV_KEY => match KeyEvent::try_from(ev) {
                Ok(key) => Some(key),
                Err(e) => {
                    debug!(error = %e, "ignoring key event");
                    None
                }
            },
            _ => None,
        }
    }

    pub(crate) fn decode_all(&mut self, events: &[libc::input_event]) -> Vec<KeyEvent> {
        events.iter().filter_map(|ev| self.decode(ev)).collect()
    }
}

/// Owns the open input device and yields the key events it reports.
#[derive(Debug)]
pub struct DeviceReader {
    path: PathBuf,
    name: Option<String>,
    async_fd: AsyncFd<File>,
    decoder: EventDecoder,
}

impl DeviceReader {
    /// Register `device` with the runtime. Must be called from within a Tokio runtime.
    pub fn new(device: InputDevice) -> IrDaemonResult<Self> {
        let InputDevice { path, name, file } = device;

        Ok(Self {
            path,
            name,
            async_fd: AsyncFd::new(file)?,
            decoder: EventDecoder::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Wait until the device is readable, then read every event it has buffered.
    ///
    /// The returned key events are in the order the device reported them. The result may be
    /// empty, e.g. when the read only contained sync or resynchronization events.
    pub fn drain(&mut self) -> DrainFuture<'_> {
        DrainFuture(self)
    }
}

/// A future that resolves once a batch of key events has been read from the device.
pub struct DrainFuture<'a>(&'a mut DeviceReader);

impl Future for DrainFuture<'_> {
    type Output = IrDaemonResult<Vec<KeyEvent>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let reader = &mut *self.get_mut().0;

        loop {
            let mut guard =
                ready!(reader.async_fd.poll_read_ready(cx)).map_err(IrDaemonError::DeviceRead)?;

            match guard.try_io(|inner| sys::read_available_events(inner.as_raw_fd())) {
                Ok(Ok(raw)) => {
                    trace!(count = raw.len(), "read input events");
                    return Poll::Ready(Ok(reader.decoder.decode_all(&raw)));
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Poll::Ready(Err(IrDaemonError::DeviceClosed))
                }
                Ok(Err(e)) => return Poll::Ready(Err(IrDaemonError::DeviceRead(e))),
                // Woken up without data: readiness was cleared, wait again.
                Err(_would_block) => {
                    warn!(device = %reader.path.display(), "poll returned without data");
                    continue;
                }
            }
        }
    }
}
