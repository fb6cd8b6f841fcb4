//! Termination signal handling.
//!
//! Hangup, quit, interrupt and terminate are delivered through Tokio signal streams, so the
//! OS-level handler only records the delivery and the daemon cleans up on its own task once
//! [`SignalGuard::recv`] returns. Abort, bus error and segmentation fault cannot wait for the
//! event loop: the faulting instruction would run again, or `abort()` would kill the process
//! as soon as the handler returns. For those a small `SA_RESETHAND` handler removes the PID
//! file with async-signal-safe calls only and re-raises the signal.
//!
//! Both paths share one [`CleanupState`], so cleanup runs at most once per process.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::error::IrDaemonError;
use crate::IrDaemonResult;

/// The signals that terminate the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSignal {
    Hangup,
    Quit,
    Interrupt,
    Terminate,
    Abort,
    Bus,
    Segv,
}

impl TermSignal {
    pub const ALL: [TermSignal; 7] = [
        TermSignal::Hangup,
        TermSignal::Quit,
        TermSignal::Interrupt,
        TermSignal::Terminate,
        TermSignal::Abort,
        TermSignal::Bus,
        TermSignal::Segv,
    ];

    pub fn as_raw(self) -> libc::c_int {
        match self {
            TermSignal::Hangup => libc::SIGHUP,
            TermSignal::Quit => libc::SIGQUIT,
            TermSignal::Interrupt => libc::SIGINT,
            TermSignal::Terminate => libc::SIGTERM,
            TermSignal::Abort => libc::SIGABRT,
            TermSignal::Bus => libc::SIGBUS,
            TermSignal::Segv => libc::SIGSEGV,
        }
    }

    pub fn from_raw(sig: libc::c_int) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_raw() == sig)
    }

    pub fn name(self) -> &'static str {
        match self {
            TermSignal::Hangup => "SIGHUP",
            TermSignal::Quit => "SIGQUIT",
            TermSignal::Interrupt => "SIGINT",
            TermSignal::Terminate => "SIGTERM",
            TermSignal::Abort => "SIGABRT",
            TermSignal::Bus => "SIGBUS",
            TermSignal::Segv => "SIGSEGV",
        }
    }

    /// Human readable description, as `strsignal(3)` would print it.
    pub fn description(self) -> &'static str {
        match self {
            TermSignal::Hangup => "Hangup",
            TermSignal::Quit => "Quit",
            TermSignal::Interrupt => "Interrupt",
            TermSignal::Terminate => "Terminated",
            TermSignal::Abort => "Aborted",
            TermSignal::Bus => "Bus error",
            TermSignal::Segv => "Segmentation fault",
        }
    }

    /// Whether the signal is handled synchronously, in signal context.
    fn is_fault(self) -> bool {
        matches!(
            self,
            TermSignal::Abort | TermSignal::Bus | TermSignal::Segv
        )
    }
}

const ARMED: u8 = 0;
const CLEANING: u8 = 1;
const TERMINATED: u8 = 2;

/// Where the one-shot signal cleanup stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPhase {
    Armed,
    Cleaning,
    Terminated,
}

/// ARMED -> CLEANING -> TERMINATED. Only the caller that wins the first transition cleans up.
#[derive(Debug)]
pub struct CleanupState(AtomicU8);

impl CleanupState {
    pub const fn new() -> Self {
        Self(AtomicU8::new(ARMED))
    }

    /// Try to start cleaning up. Returns `false` if cleanup already started, in which case
    /// the caller must skip it and go straight to re-raising.
    pub fn begin(&self) -> bool {
        self.0
            .compare_exchange(ARMED, CLEANING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish(&self) {
        self.0.store(TERMINATED, Ordering::Release);
    }

    pub fn phase(&self) -> CleanupPhase {
        match self.0.load(Ordering::Acquire) {
            ARMED => CleanupPhase::Armed,
            CLEANING => CleanupPhase::Cleaning,
            _ => CleanupPhase::Terminated,
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        self.phase() != CleanupPhase::Armed
    }
}

impl Default for CleanupState {
    fn default() -> Self {
        Self::new()
    }
}

/// Signal handlers can only reach process-wide state.
static CLEANUP: CleanupState = CleanupState::new();
/// NUL-terminated PID file path for the fault handler, null while no PID file is owned.
static FAULT_PID_PATH: AtomicPtr<libc::c_char> = AtomicPtr::new(ptr::null_mut());

/// The cleanup state shared by every termination path of this process.
pub fn cleanup_state() -> &'static CleanupState {
    &CLEANUP
}

/// Receives termination signals for the event loop.
pub struct SignalGuard {
    hangup: Signal,
    quit: Signal,
    interrupt: Signal,
    terminate: Signal,
}

impl SignalGuard {
    /// Install handlers for every [`TermSignal`]. Must be called from within a Tokio runtime.
    pub fn install() -> IrDaemonResult<Self> {
        for sig in TermSignal::ALL.into_iter().filter(|s| s.is_fault()) {
            install_fault_handler(sig.as_raw()).map_err(IrDaemonError::Signal)?;
        }

        Ok(Self {
            hangup: signal(SignalKind::hangup()).map_err(IrDaemonError::Signal)?,
            quit: signal(SignalKind::quit()).map_err(IrDaemonError::Signal)?,
            interrupt: signal(SignalKind::interrupt()).map_err(IrDaemonError::Signal)?,
            terminate: signal(SignalKind::terminate()).map_err(IrDaemonError::Signal)?,
        })
    }

    /// Wait for the next termination signal.
    pub async fn recv(&mut self) -> TermSignal {
        tokio::select! {
            _ = self.hangup.recv() => TermSignal::Hangup,
            _ = self.quit.recv() => TermSignal::Quit,
            _ = self.interrupt.recv() => TermSignal::Interrupt,
            _ = self.terminate.recv() => TermSignal::Terminate,
        }
    }
}

/// Let the fault handler remove `path` if the process dies from a fault signal.
pub fn arm_pid_file_cleanup(path: &Path) {
    let Ok(path) = CString::new(path.as_os_str().as_bytes()) else {
        return;
    };
    let old = FAULT_PID_PATH.swap(path.into_raw(), Ordering::AcqRel);
    free_path(old);
}

/// Stop the fault handler from touching the PID file, e.g. because it is being removed.
pub fn disarm_pid_file_cleanup() {
    let old = FAULT_PID_PATH.swap(ptr::null_mut(), Ordering::AcqRel);
    free_path(old);
}

fn free_path(path: *mut libc::c_char) {
    if !path.is_null() {
        // Only ever set from `CString::into_raw` above.
        drop(unsafe { CString::from_raw(path) });
    }
}

/// Put back the default disposition of `sig`.
pub fn restore_default(sig: TermSignal) {
    unsafe {
        libc::signal(sig.as_raw(), libc::SIG_DFL);
    }
}

/// Deliver `sig` to this process with its default disposition, so the process ends the way
/// that signal conventionally ends it.
pub fn reraise(sig: TermSignal) -> ! {
    restore_default(sig);
    unsafe {
        libc::raise(sig.as_raw());
    }

    // Only reachable if the signal is blocked or ignored by default, which none of ours are.
    std::process::exit(128 + sig.as_raw())
}

extern "C" fn handle_fault(sig: libc::c_int) {
    if CLEANUP.begin() {
        let path = FAULT_PID_PATH.load(Ordering::Acquire);
        if !path.is_null() {
            unsafe {
                libc::unlink(path);
            }
        }
        CLEANUP.finish();
    }

    // SA_RESETHAND already restored the default disposition. The signal stays blocked until
    // the handler returns, then kills the process.
    unsafe {
        libc::raise(sig);
    }
}

fn install_fault_handler(sig: libc::c_int) -> io::Result<()> {
    let handler: extern "C" fn(libc::c_int) = handle_fault;

    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_flags = libc::SA_RESETHAND;
        libc::sigemptyset(&mut action.sa_mask);

        if libc::sigaction(sig, &action, ptr::null_mut()) < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}
