//! Logging setup: every event goes to syslog under the daemon facility, and to stderr while
//! there still is one.

use std::ffi::CString;
use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Layer};

use crate::error::IrDaemonError;
use crate::IrDaemonResult;

const IDENT: &[u8] = b"ir_daemon\0";
const FORMAT: &[u8] = b"%s\0";

/// Default filter when `RUST_LOG` is not set. Syslog does its own filtering by priority.
const DEFAULT_FILTER: &str = "ir_daemon=debug";

/// Install the global subscriber.
pub fn init() -> IrDaemonResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console_layer = tracing_fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(SyslogLayer::open())
        .with(console_layer)
        .try_init()
        .map_err(|e| IrDaemonError::Logging(e.to_string()))
}

/// A [`Layer`] writing each event as one syslog message.
pub struct SyslogLayer(());

impl SyslogLayer {
    /// Connect to syslog as `ir_daemon` with the daemon facility.
    pub fn open() -> Self {
        // IDENT is static, openlog keeps the pointer.
        unsafe {
            libc::openlog(
                IDENT.as_ptr() as *const libc::c_char,
                libc::LOG_PID,
                libc::LOG_DAEMON,
            );
        }
        Self(())
    }
}

impl<S: Subscriber> Layer<S> for SyslogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let (priority, line) = format_event(event);
        let Ok(line) = CString::new(line.replace('\0', "\\0")) else {
            return;
        };

        unsafe {
            libc::syslog(
                libc::LOG_DAEMON | priority,
                FORMAT.as_ptr() as *const libc::c_char,
                line.as_ptr(),
            );
        }
    }
}

pub(crate) fn priority(level: &Level) -> libc::c_int {
    match *level {
        Level::ERROR => libc::LOG_ERR,
        Level::WARN => libc::LOG_WARNING,
        Level::INFO => libc::LOG_INFO,
        Level::DEBUG | Level::TRACE => libc::LOG_DEBUG,
    }
}

/// Render `event` as `message key=value ...` together with its syslog priority.
pub(crate) fn format_event(event: &Event<'_>) -> (libc::c_int, String) {
    let mut visitor = MessageVisitor::default();
    event.record(&mut visitor);

    (priority(event.metadata().level()), visitor.finish())
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        self.message + &self.fields
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
