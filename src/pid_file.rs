use std::fs::{self, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::IrDaemonError;
use crate::IrDaemonResult;

/// `rw-r--r--`
const PID_FILE_MODE: u32 = 0o644;

/// The PID file marking the running instance.
///
/// Creation is exclusive, so at most one daemon can own a given path. The file is removed
/// when the owner calls [`PidFile::remove`] or is dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    owned: bool,
}

impl PidFile {
    /// Create `path` exclusively and write `pid` followed by a newline into it.
    ///
    /// Fails with [`IrDaemonError::AlreadyRunning`] if the file already exists, in which case
    /// it is left untouched.
    pub fn create(path: impl Into<PathBuf>, pid: u32) -> IrDaemonResult<Self> {
        let path = path.into();

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(PID_FILE_MODE)
            .open(&path)
            .map_err(|source| match source.kind() {
                io::ErrorKind::AlreadyExists => IrDaemonError::AlreadyRunning(path.clone()),
                _ => IrDaemonError::PidFileCreate {
                    path: path.clone(),
                    source,
                },
            })?;

        // From here on the file is ours and must be cleaned up on failure.
        let mut pid_file = Self { path, owned: true };

        // The umask may have taken away the read bits.
        let written = file
            .set_permissions(Permissions::from_mode(PID_FILE_MODE))
            .and_then(|_| writeln!(file, "{pid}"))
            .and_then(|_| file.sync_all());

        if let Err(source) = written {
            pid_file.remove();
            return Err(IrDaemonError::PidFileWrite {
                path: pid_file.path.clone(),
                source,
            });
        }

        Ok(pid_file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Remove the file if this instance still owns it. Safe to call more than once.
    pub fn remove(&mut self) {
        if !self.owned {
            return;
        }
        self.owned = false;

        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "can't remove PID file");
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_pid_and_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir_daemon.pid");

        let pid_file = PidFile::create(&path, 4242).unwrap();

        assert!(pid_file.is_owned());
        assert_eq!(fs::read_to_string(&path).unwrap(), "4242\n");
    }

    #[test]
    fn is_readable_by_all_writable_by_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir_daemon.pid");

        let _pid_file = PidFile::create(&path, 1).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn second_instance_is_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir_daemon.pid");
        let _first = PidFile::create(&path, 100).unwrap();

        match PidFile::create(&path, 200) {
            Err(IrDaemonError::AlreadyRunning(p)) => assert_eq!(p, path),
            other => panic!("unexpected result: {other:?}"),
        }

        // The running instance's file is left alone.
        assert_eq!(fs::read_to_string(&path).unwrap(), "100\n");
    }

    #[test]
    fn other_create_failures_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("ir_daemon.pid");

        assert!(matches!(
            PidFile::create(&path, 1),
            Err(IrDaemonError::PidFileCreate { .. })
        ));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir_daemon.pid");
        let mut pid_file = PidFile::create(&path, 1).unwrap();

        pid_file.remove();
        assert!(!path.exists());
        assert!(!pid_file.is_owned());

        // Someone else's file at the same path must survive.
        fs::write(&path, "7\n").unwrap();
        pid_file.remove();
        drop(pid_file);
        assert_eq!(fs::read_to_string(&path).unwrap(), "7\n");
    }

    #[test]
    fn dropping_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir_daemon.pid");

        drop(PidFile::create(&path, 1).unwrap());

        assert!(!path.exists());
    }
}
