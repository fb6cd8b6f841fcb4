use tracing::{debug, error, info, warn};

use crate::command::{CommandOutcome, CommandRunner};
use crate::device::{DeviceReader, KeyEvent};
use crate::error::IrDaemonError;
use crate::keymap::KeyMapping;
use crate::pid_file::PidFile;
use crate::signal::{self, SignalGuard, TermSignal};

/// Why the event loop stopped.
#[derive(Debug)]
pub enum Shutdown {
    /// Reading the device failed; resources should be released and the process exit normally.
    Fatal(IrDaemonError),
    /// A termination signal arrived; the process must die by that signal.
    Signal(TermSignal),
}

/// The running daemon: owns the device and the PID file and dispatches key presses.
#[derive(Debug)]
pub struct Daemon {
    device: Option<DeviceReader>,
    pid_file: Option<PidFile>,
    keymap: KeyMapping,
    runner: CommandRunner,
}

impl Daemon {
    pub fn new(device: DeviceReader, runner: CommandRunner) -> Self {
        Self {
            device: Some(device),
            pid_file: None,
            keymap: KeyMapping,
            runner,
        }
    }

    /// Take ownership of the PID file; it is removed on shutdown.
    pub fn adopt_pid_file(&mut self, pid_file: PidFile) {
        signal::arm_pid_file_cleanup(pid_file.path());
        self.pid_file = Some(pid_file);
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    pub fn owns_pid_file(&self) -> bool {
        self.pid_file.as_ref().is_some_and(PidFile::is_owned)
    }

    /// Run the event loop until a fatal error or a termination signal.
    pub async fn run(&mut self, signals: &mut SignalGuard) -> Shutdown {
        info!(
            device = %self.device_path(),
            command = %self.runner.program().display(),
            "ir_daemon started successfully"
        );

        tokio::select! {
            sig = signals.recv() => Shutdown::Signal(sig),
            err = self.serve() => Shutdown::Fatal(err),
        }
    }

    /// Wait for key events and dispatch them until reading the device fails.
    pub async fn serve(&mut self) -> IrDaemonError {
        loop {
            let Some(device) = self.device.as_mut() else {
                return IrDaemonError::DeviceClosed;
            };

            let events = match device.drain().await {
                Ok(events) => events,
                Err(e) => return e,
            };

            for event in events.iter().filter(|e| e.is_pressed()) {
                self.dispatch(event).await;
            }
        }
    }

    /// Run the command for `event` if its key is mapped. Returns `None` for unmapped keys.
    pub async fn dispatch(&self, event: &KeyEvent) -> Option<CommandOutcome> {
        let Some(action) = self.keymap.lookup(event.code) else {
            debug!(code = event.code, "no command associated to keycode");
            return None;
        };

        debug!(code = event.code, action, ts = %event.ts, "key pressed");
        Some(self.runner.run(action).await)
    }

    pub fn release_device(&mut self) {
        if let Some(device) = self.device.take() {
            debug!(device = %device.path().display(), "releasing input device");
        }
    }

    pub fn remove_pid_file(&mut self) {
        signal::disarm_pid_file_cleanup();
        if let Some(mut pid_file) = self.pid_file.take() {
            pid_file.remove();
        }
    }

    /// Release every resource the daemon holds. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.release_device();
        self.remove_pid_file();
    }

    /// Handle the outcome of [`Daemon::run`]. Returns after a fatal error; never returns for
    /// a signal.
    pub fn finish(mut self, shutdown: Shutdown) {
        match shutdown {
            Shutdown::Fatal(e) => {
                error!(error = %e, "stopping");
                self.shutdown();
            }
            Shutdown::Signal(sig) => self.terminate(sig),
        }
    }

    /// Clean up once, then die by `sig`.
    pub fn terminate(mut self, sig: TermSignal) -> ! {
        let cleanup = signal::cleanup_state();

        if cleanup.begin() {
            warn!(signal = sig.name(), "caught signal {}, exiting ..", sig.description());
            self.release_device();
            signal::restore_default(sig);
            self.remove_pid_file();
            cleanup.finish();
        }

        signal::reraise(sig)
    }

    fn device_path(&self) -> String {
        self.device
            .as_ref()
            .map(|d| match d.name() {
                Some(name) => format!("{} ({name})", d.path().display()),
                None => d.path().display().to_string(),
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::path::{Path, PathBuf};

    use crate::command::tests::{recording_script, write_script};
    use crate::device::tests::{pipe_reader, press, release, syn_dropped, syn_report, write_events};
    use crate::keymap::{KEY_BACK, KEY_NEXT, KEY_PAUSE, KEY_PLAY, KEY_STOP};

    fn recording_daemon(dir: &Path) -> (Daemon, File, PathBuf) {
        let log = dir.join("calls.log");
        let script = recording_script(dir, &log);
        let (reader, w) = pipe_reader();
        (Daemon::new(reader, CommandRunner::new(script)), w, log)
    }

    fn calls(log: &Path) -> Vec<String> {
        fs::read_to_string(log)
            .map(|s| s.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// Feed `events` to the daemon, then close the device and let the loop finish.
    async fn feed(daemon: &mut Daemon, mut w: File, events: &[libc::input_event]) {
        write_events(&mut w, events);
        drop(w);
        assert!(matches!(daemon.serve().await, IrDaemonError::DeviceClosed));
    }

    #[tokio::test]
    async fn press_runs_command_release_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let (mut daemon, w, log) = recording_daemon(dir.path());

        feed(
            &mut daemon,
            w,
            &[press(KEY_NEXT), syn_report(), release(KEY_NEXT), syn_report()],
        )
        .await;

        assert_eq!(calls(&log), vec!["KEY_NEXT"]);
    }

    #[tokio::test]
    async fn release_alone_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut daemon, w, log) = recording_daemon(dir.path());

        feed(&mut daemon, w, &[release(KEY_NEXT), syn_report()]).await;

        assert!(calls(&log).is_empty());
    }

    #[tokio::test]
    async fn commands_run_one_after_another_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let script = write_script(
            dir.path(),
            "slow.sh",
            &format!(
                "echo \"start $1\" >> '{log}'; sleep 0.05; echo \"end $1\" >> '{log}'",
                log = log.display()
            ),
        );
        let (reader, w) = pipe_reader();
        let mut daemon = Daemon::new(reader, CommandRunner::new(script));

        feed(
            &mut daemon,
            w,
            &[
                press(KEY_PLAY),
                syn_report(),
                press(KEY_PAUSE),
                syn_report(),
                press(KEY_STOP),
                syn_report(),
            ],
        )
        .await;

        assert_eq!(
            calls(&log),
            vec![
                "start KEY_PLAY",
                "end KEY_PLAY",
                "start KEY_PAUSE",
                "end KEY_PAUSE",
                "start KEY_STOP",
                "end KEY_STOP",
            ]
        );
    }

    #[tokio::test]
    async fn unmapped_keys_run_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut daemon, w, log) = recording_daemon(dir.path());

        // KEY_ESC, KEY_A, KEY_VOLUMEUP
        feed(
            &mut daemon,
            w,
            &[press(1), syn_report(), press(30), syn_report(), press(115), syn_report()],
        )
        .await;

        assert!(calls(&log).is_empty());
    }

    #[tokio::test]
    async fn resync_burst_is_never_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        let (mut daemon, w, log) = recording_daemon(dir.path());

        feed(
            &mut daemon,
            w,
            &[
                syn_dropped(),
                press(KEY_STOP),
                press(KEY_BACK),
                release(KEY_STOP),
                syn_report(),
                press(KEY_PLAY),
                syn_report(),
                press(KEY_NEXT),
                syn_report(),
            ],
        )
        .await;

        assert_eq!(calls(&log), vec!["KEY_PLAY", "KEY_NEXT"]);
    }

    #[tokio::test]
    async fn failing_command_does_not_stop_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let script = write_script(
            dir.path(),
            "fail.sh",
            &format!("echo \"$1\" >> '{}'; exit 1", log.display()),
        );
        let (reader, w) = pipe_reader();
        let mut daemon = Daemon::new(reader, CommandRunner::new(script));

        feed(
            &mut daemon,
            w,
            &[press(KEY_PLAY), syn_report(), press(KEY_STOP), syn_report()],
        )
        .await;

        assert_eq!(calls(&log), vec!["KEY_PLAY", "KEY_STOP"]);
    }

    #[tokio::test]
    async fn dispatch_reports_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _w, log) = recording_daemon(dir.path());
        let key = |code| KeyEvent::try_from(&press(code)).unwrap();

        assert!(daemon.dispatch(&key(30)).await.is_none());
        assert!(daemon
            .dispatch(&key(KEY_PAUSE))
            .await
            .is_some_and(|o| o.is_success()));
        assert_eq!(calls(&log), vec!["KEY_PAUSE"]);
    }

    #[tokio::test]
    async fn shutdown_releases_everything_once() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("ir_daemon.pid");
        let (mut daemon, _w, _log) = recording_daemon(dir.path());
        daemon.adopt_pid_file(PidFile::create(&pid_path, std::process::id()).unwrap());
        assert!(daemon.owns_pid_file());

        daemon.shutdown();

        assert!(!daemon.has_device());
        assert!(!daemon.owns_pid_file());
        assert!(!pid_path.exists());

        // A second shutdown must not touch a PID file that now belongs to someone else.
        fs::write(&pid_path, "1\n").unwrap();
        daemon.shutdown();
        assert!(pid_path.exists());
    }

    #[tokio::test]
    async fn fatal_error_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("ir_daemon.pid");
        let (mut daemon, w, _log) = recording_daemon(dir.path());
        daemon.adopt_pid_file(PidFile::create(&pid_path, std::process::id()).unwrap());
        drop(w);

        let err = daemon.serve().await;
        daemon.finish(Shutdown::Fatal(err));

        assert!(!pid_path.exists());
    }
}
