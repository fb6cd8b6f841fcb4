//! This crate turns button presses on an input device, typically an infrared remote control,
//! into invocations of an external command.
//!
//! The [`Daemon`] waits for the device to become readable, reads every buffered event through
//! a [`DeviceReader`], looks up pressed keys in the [`KeyMapping`] and runs the command once
//! per recognized press with the key's name (e.g. `KEY_PLAY`) as its only argument. Commands
//! run one at a time; the device is not read while a command runs.
//!
//! Only one instance runs at a time: the [`PidFile`] is created exclusively at startup and
//! removed on every exit path, including termination signals (see [`signal`]).
//!
//! # Example
//!
//! ```no_run
//! use ir_daemon::{CommandRunner, Daemon, DeviceReader, InputDevice, IrDaemonResult};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> IrDaemonResult<()> {
//!     let device = DeviceReader::new(InputDevice::open("/dev/input/ir")?)?;
//!     let mut daemon = Daemon::new(device, CommandRunner::new("/tmp/ir.sh"));
//!
//!     let err = daemon.serve().await;
//!     eprintln!("stopped: {err}");
//!     Ok(())
//! }
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("This crate only works on Linux");

mod command;
pub mod config;
mod daemon;
mod device;
mod error;
mod keymap;
pub mod logging;
mod pid_file;
pub mod signal;

pub use command::{CommandOutcome, CommandRunner};
pub use config::{Args, Config};
pub use daemon::{Daemon, Shutdown};
pub use device::{DeviceReader, DrainFuture, InputDevice, KeyEvent, KeyEventCause};
pub use error::IrDaemonError;
pub use keymap::{KeyBinding, KeyMapping};
pub use pid_file::PidFile;
pub use signal::{SignalGuard, TermSignal};

pub type IrDaemonResult<T> = Result<T, IrDaemonError>;
