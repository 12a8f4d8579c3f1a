use std::fmt;
use std::panic::{self, PanicHookInfo};
use std::sync::{Mutex, OnceLock};

use crate::logging;

/// Failure kinds a lane can hit while driving a transfer. A lane never
/// unwinds across a tick; it records one of these and aborts to the
/// free path, so the next tick observes an idle lane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskError {
    ResourceCreate(String),
    Transport(String),
    DecodeIncomplete(String),
    Decode(String),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::ResourceCreate(detail) => write!(f, "resource creation failed: {}", detail),
            TaskError::Transport(detail) => write!(f, "transport failed: {}", detail),
            TaskError::DecodeIncomplete(detail) => write!(f, "decode incomplete: {}", detail),
            TaskError::Decode(detail) => write!(f, "decode failed: {}", detail),
        }
    }
}

impl std::error::Error for TaskError {}

/// The most recent lane failure, kept with the engine state the lanes
/// already mutate each tick. User-facing surfacing stays with the
/// completion sinks; this is what the host polls for diagnostics.
#[derive(Debug, Default)]
pub struct Diagnostics {
    last_error: Option<TaskError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, error: TaskError) {
        logging::error(error.to_string());
        self.last_error = Some(error);
    }

    pub fn last_error(&self) -> Option<&TaskError> {
        self.last_error.as_ref()
    }

    pub fn take_last_error(&mut self) -> Option<TaskError> {
        self.last_error.take()
    }
}

// A data-thread panic unwinds off the host's call stack and would only
// surface as a failed join. The hook parks the message here so teardown
// can report what killed the thread.
fn panic_cell() -> &'static Mutex<Option<String>> {
    static CELL: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    CELL.get_or_init(|| Mutex::new(None))
}

pub fn take_panic() -> Option<String> {
    lock_unpoisoned(panic_cell()).take()
}

pub fn install_panic_hook() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    if INSTALLED.set(()).is_err() {
        return;
    }
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let message = describe_panic(info);
        *lock_unpoisoned(panic_cell()) = Some(message.clone());
        logging::error(message);
        previous(info);
    }));
}

// The hook runs mid-unwind; the cell must stay writable even when a
// previous panic poisoned it.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn describe_panic(info: &PanicHookInfo<'_>) -> String {
    let thread = std::thread::current();
    let name = thread.name().unwrap_or("<unnamed>").to_string();
    let payload = if let Some(text) = info.payload().downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = info.payload().downcast_ref::<String>() {
        text.clone()
    } else {
        "opaque panic payload".to_string()
    };
    match info.location() {
        Some(location) => format!(
            "thread '{}' panicked at {}:{}: {}",
            name,
            location.file(),
            location.line(),
            payload
        ),
        None => format!("thread '{}' panicked: {}", name, payload),
    }
}
