//! `ir_daemon [-d <suffix>]`
//!
//! Listens on `/dev/input/<suffix>` (default `ir`) and runs the configured command for every
//! recognized button press. Exits with 1 if startup fails, with 0 after a fatal device error,
//! and by the received signal otherwise.

use std::env;
use std::process::ExitCode;

use tracing::{error, warn};

use ir_daemon::{
    logging, Args, CommandRunner, Config, Daemon, DeviceReader, InputDevice, IrDaemonError,
    IrDaemonResult, PidFile, SignalGuard,
};

fn main() -> ExitCode {
    let (args, warnings) = match Args::parse_lenient(env::args_os()) {
        Ok(parsed) => parsed,
        Err(e) => e.exit(),
    };

    if let Err(e) = logging::init() {
        eprintln!("{e}");
    }

    for warning in warnings {
        warn!("{warning}");
    }

    match run(Config::from_args(&args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Open the device while still attached to the terminal, then detach and run the event loop.
fn run(config: Config) -> IrDaemonResult<()> {
    let device = InputDevice::open(&config.device)?;

    if !config.foreground {
        daemonize()?;
    }

    // Built after forking: the runtime's threads and file descriptors must not be inherited.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(serve(config, device))
}

async fn serve(config: Config, device: InputDevice) -> IrDaemonResult<()> {
    let mut signals = SignalGuard::install()?;
    let reader = DeviceReader::new(device)?;
    let pid_file = PidFile::create(&config.pid_file, std::process::id())?;

    let mut daemon = Daemon::new(reader, CommandRunner::new(&config.command));
    daemon.adopt_pid_file(pid_file);

    let shutdown = daemon.run(&mut signals).await;
    daemon.finish(shutdown);

    Ok(())
}

fn daemonize() -> IrDaemonResult<()> {
    use daemonize::Daemonize;

    Daemonize::new()
        .working_directory("/")
        .start()
        .map_err(|e| IrDaemonError::Daemonize(e.to_string()))
}
