//! Runtime configuration: the `-d` flag plus a few environment overrides.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{CommandFactory, FromArgMatches, Parser};

pub const INPUT_DIR: &str = "/dev/input";
pub const DEFAULT_DEVICE: &str = "ir";
pub const DEFAULT_PID_FILE: &str = "/var/run/ir_daemon.pid";
pub const DEFAULT_COMMAND: &str = "/tmp/ir.sh";

/// Overrides the directory device suffixes are resolved against.
pub const INPUT_DIR_ENV: &str = "IR_DAEMON_INPUT_DIR";
/// Overrides the PID file location.
pub const PID_FILE_ENV: &str = "IR_DAEMON_PID_FILE";
/// Overrides the command run for each key press.
pub const COMMAND_ENV: &str = "IR_DAEMON_COMMAND";
/// Set to `1` to stay in the foreground, e.g. under a service manager.
pub const FOREGROUND_ENV: &str = "IR_DAEMON_FOREGROUND";

/// Run a command for every button pressed on a remote control.
#[derive(Parser, Debug, Default, Clone, PartialEq, Eq)]
#[command(name = "ir_daemon", version, about)]
pub struct Args {
    /// Input device to listen on, relative to /dev/input
    #[arg(short = 'd', value_name = "SUFFIX")]
    pub device: Option<String>,
}

impl Args {
    /// Parse the command line without giving up on bad options.
    ///
    /// Unknown arguments are dropped and reported in the returned warnings, the way `getopt`
    /// skips them. Only `--help` and `--version` produce an error, which the caller should
    /// `exit()` with.
    pub fn parse_lenient<I, T>(args: I) -> Result<(Self, Vec<String>), clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let mut args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let mut warnings = Vec::new();

        loop {
            let e = match Self::try_parse_from(&args) {
                Ok(parsed) => return Ok((parsed, warnings)),
                Err(e) => e,
            };

            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                return Err(e);
            }

            warnings.push(summary(&e));

            let offending = match e.get(ContextKind::InvalidArg) {
                Some(ContextValue::String(arg)) => args
                    .iter()
                    .skip(1)
                    .position(|a| a.to_str() == Some(arg.as_str()))
                    .map(|i| i + 1),
                _ => None,
            };

            match offending {
                Some(i) => {
                    args.remove(i);
                }
                None => return Ok((Self::parse_ignoring_errors(&args), warnings)),
            }
        }
    }

    fn parse_ignoring_errors(args: &[OsString]) -> Self {
        Self::command()
            .ignore_errors(true)
            .try_get_matches_from(args)
            .ok()
            .and_then(|matches| Self::from_arg_matches(&matches).ok())
            .unwrap_or_default()
    }
}

fn summary(e: &clap::Error) -> String {
    let rendered = e.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    first.strip_prefix("error: ").unwrap_or(first).to_owned()
}

/// Everything the daemon needs to know to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub device: PathBuf,
    pub pid_file: PathBuf,
    pub command: PathBuf,
    pub foreground: bool,
}

impl Config {
    /// Combine the parsed command line with the process environment.
    pub fn from_args(args: &Args) -> Self {
        Self::resolve(args, |key| env::var_os(key))
    }

    fn resolve(args: &Args, var: impl Fn(&str) -> Option<OsString>) -> Self {
        let lookup = |key: &str| var(key).filter(|v| !v.is_empty());

        Self {
            device: device_path(
                &lookup(INPUT_DIR_ENV)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| INPUT_DIR.into()),
                args.device.as_deref(),
            ),
            pid_file: lookup(PID_FILE_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| DEFAULT_PID_FILE.into()),
            command: lookup(COMMAND_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| DEFAULT_COMMAND.into()),
            foreground: lookup(FOREGROUND_ENV).is_some_and(|v| v == "1"),
        }
    }
}

/// `<dir>/<suffix>`, with `ir` as the default suffix.
pub fn device_path(dir: &Path, suffix: Option<&str>) -> PathBuf {
    format!("{}/{}", dir.display(), suffix.unwrap_or(DEFAULT_DEVICE)).into()
}
