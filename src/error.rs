use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IrDaemonError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("can't open input {}: {source}", .path.display())]
    DeviceOpen { path: PathBuf, source: io::Error },
    #[error("reading input events failed: {0}")]
    DeviceRead(io::Error),
    #[error("input device was closed")]
    DeviceClosed,
    #[error("unsupported event type: {0}")]
    UnsupportedEventType(u16),
    #[error("can't start, PID file {} exists already", .0.display())]
    AlreadyRunning(PathBuf),
    #[error("can't create PID file {}: {source}", .path.display())]
    PidFileCreate { path: PathBuf, source: io::Error },
    #[error("error writing PID to {}: {source}", .path.display())]
    PidFileWrite { path: PathBuf, source: io::Error },
    #[error("error becoming a daemon: {0}")]
    Daemonize(String),
    #[error("can't install signal handlers: {0}")]
    Signal(io::Error),
    #[error("can't set up logging: {0}")]
    Logging(String),
}
