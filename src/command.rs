use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use tokio::process::Command;
use tracing::{debug, error, warn};

/// How a single command invocation ended. None of these stop the daemon.
#[derive(Debug)]
pub enum CommandOutcome {
    Success,
    NonzeroExit(ExitStatus),
    SpawnFailed(io::Error),
    WaitFailed(io::Error),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success)
    }
}

/// Runs the external command once per recognized button press.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: PathBuf,
}

impl CommandRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run the command with `action` as its only argument and wait for it to exit.
    ///
    /// The outcome is logged here; callers only need it to decide what to do next.
    pub async fn run(&self, action: &str) -> CommandOutcome {
        let outcome = self.spawn_and_wait(action).await;

        match &outcome {
            CommandOutcome::Success => {
                debug!(command = %self.program.display(), action, "command finished")
            }
            CommandOutcome::NonzeroExit(status) => warn!(
                command = %self.program.display(),
                action,
                %status,
                "command returned with retcode != 0"
            ),
            CommandOutcome::SpawnFailed(e) => warn!(
                command = %self.program.display(),
                action,
                error = %e,
                "error executing command"
            ),
            CommandOutcome::WaitFailed(e) => error!(
                command = %self.program.display(),
                action,
                error = %e,
                "error waiting for command to be finished"
            ),
        }

        outcome
    }

    async fn spawn_and_wait(&self, action: &str) -> CommandOutcome {
        let mut child = match Command::new(&self.program).arg(action).spawn() {
            Ok(child) => child,
            Err(e) => return CommandOutcome::SpawnFailed(e),
        };

        match child.wait().await {
            Ok(status) if status.success() => CommandOutcome::Success,
            Ok(status) => CommandOutcome::NonzeroExit(status),
            Err(e) => CommandOutcome::WaitFailed(e),
        }
    }
}
