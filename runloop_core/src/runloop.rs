use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{RunloopConfig, RunloopMode};
use crate::drivers::{self, DbIndexWriter, OverlayDriver};
use crate::file_task::{FileLaneDeps, FileTask};
use crate::http::HttpTransport;
use crate::http_task::{HttpSinks, HttpTask};
use crate::image_task::WallpaperSink;
use crate::logging;
use crate::nbio::{FileOpener, StdFileOpener};
use crate::observability::{self, Diagnostics, TaskError};
use crate::png_stream::{DecoderFactory, PngStreamFactory};
use crate::queue::MsgQueue;

// How long the data thread dozes between passes once every lane is at
// rest; a post or teardown wakes it sooner.
const REST_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    None,
    File,
    Image,
    Http,
    Overlay,
}

/// The collaborator seams the runloop drives. `native()` wires the
/// bundled file streamer and PNG decoder; HTTP stays absent until the
/// host injects its client, in which case the HTTP lane simply never
/// materializes a queue.
pub struct RunloopIo {
    pub files: Box<dyn FileOpener>,
    pub decoders: Box<dyn DecoderFactory>,
    pub http: Option<Box<dyn HttpTransport>>,
}

impl RunloopIo {
    pub fn native() -> Self {
        Self {
            files: Box::new(StdFileOpener::new()),
            decoders: Box::new(PngStreamFactory),
            http: None,
        }
    }

    pub fn with_files(mut self, opener: impl FileOpener + 'static) -> Self {
        self.files = Box::new(opener);
        self
    }

    pub fn with_http(mut self, transport: impl HttpTransport + 'static) -> Self {
        self.http = Some(Box::new(transport));
        self
    }
}

pub struct RunloopSinks {
    pub menu_wallpaper: Option<WallpaperSink>,
    pub http: HttpSinks,
}

impl RunloopSinks {
    pub fn none() -> Self {
        Self {
            menu_wallpaper: None,
            http: HttpSinks::none(),
        }
    }

    pub fn with_menu_wallpaper(
        mut self,
        sink: impl FnMut(crate::png_stream::TextureBuffer) + Send + 'static,
    ) -> Self {
        self.menu_wallpaper = Some(Box::new(sink));
        self
    }

    pub fn with_core_updater_download(mut self, sink: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.http.core_updater_download = Some(Box::new(sink));
        self
    }

    pub fn with_core_updater_list(mut self, sink: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.http.core_updater_list = Some(Box::new(sink));
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunloopTelemetry {
    pub file_active: bool,
    pub image_active: bool,
    pub http_connecting: bool,
    pub http_transferring: bool,
    pub file_queue_depth: usize,
    pub image_queue_depth: usize,
    pub http_queue_depth: usize,
}

impl RunloopTelemetry {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

struct State {
    file: FileTask,
    http: HttpTask,
    io: RunloopIo,
    sinks: RunloopSinks,
    overlay: Option<Box<dyn OverlayDriver>>,
    db: Option<Box<dyn DbIndexWriter>>,
    diagnostics: Diagnostics,
}

impl State {
    // Nothing to advance: no live handles, no queued commands, no
    // attached drivers. The data thread may doze on the wake condvar.
    fn at_rest(&self) -> bool {
        !self.file.is_active()
            && !self.file.image().is_active()
            && !self.http.is_connecting()
            && !self.http.is_transferring()
            && self.file.queue_depth() == 0
            && self.file.image().queue_depth() == 0
            && self.http.queue_depth() == 0
            && self.overlay.is_none()
            && self.db.is_none()
    }
}

struct Shared {
    state: Mutex<State>,
    quit: Mutex<bool>,
    wake: Condvar,
    idle: AtomicBool,
}

pub struct DataRunloop {
    config: RunloopConfig,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
    inited: bool,
}

impl DataRunloop {
    pub fn new(config: RunloopConfig, io: RunloopIo, sinks: RunloopSinks) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    file: FileTask::new(),
                    http: HttpTask::new(),
                    io,
                    sinks,
                    overlay: None,
                    db: None,
                    diagnostics: Diagnostics::new(),
                }),
                quit: Mutex::new(false),
                wake: Condvar::new(),
                idle: AtomicBool::new(false),
            }),
            thread: None,
            inited: false,
        }
    }

    pub fn init(&mut self) {
        if self.inited {
            return;
        }
        observability::install_panic_hook();
        {
            let mut state = self.lock_state();
            state.file = FileTask::new();
            state.http = HttpTask::new();
            state.diagnostics = Diagnostics::new();
        }
        if self.config.mode == RunloopMode::Threaded {
            {
                let mut quit = self.shared.quit.lock().expect("quit lock poisoned");
                *quit = false;
            }
            let shared = Arc::clone(&self.shared);
            let config = self.config;
            let spawned = thread::Builder::new()
                .name("data-runloop".to_string())
                .spawn(move || data_thread_loop(&shared, &config));
            match spawned {
                Ok(handle) => self.thread = Some(handle),
                Err(err) => {
                    // Fall back to inline ticking.
                    logging::error(format!("could not spawn data thread: {}", err));
                }
            }
        }
        self.inited = true;
    }

    pub fn deinit(&mut self) {
        if !self.inited {
            return;
        }
        if let Some(handle) = self.thread.take() {
            {
                let mut quit = self.shared.quit.lock().expect("quit lock poisoned");
                *quit = true;
            }
            self.shared.wake.notify_all();
            if handle.join().is_err() {
                let detail = observability::take_panic()
                    .unwrap_or_else(|| "no panic message captured".to_string());
                logging::error(format!("data thread died during teardown: {}", detail));
            }
        }
        self.inited = false;
    }

    pub fn clear_state(&mut self) {
        self.deinit();
        self.init();
    }

    pub fn thread_running(&self) -> bool {
        self.thread.is_some()
    }

    /// One cooperative pass over every lane. A no-op while the owned
    /// worker thread is ticking on its own.
    pub fn tick(&self) {
        if self.thread.is_some() {
            return;
        }
        let mut state = self.lock_state();
        iterate_once(&mut state, &self.config, self.shared.idle.load(Ordering::Relaxed));
    }

    pub fn post(
        &self,
        kind: DataType,
        msg: &str,
        msg2: &str,
        priority: u32,
        duration: u32,
        flush: bool,
    ) {
        let mut state = self.lock_state();
        let capacity = self.config.queue_capacity;
        let has_http = state.io.http.is_some();
        let queue = match kind {
            DataType::None | DataType::Overlay => None,
            DataType::File => Some(
                state
                    .file
                    .queue
                    .get_or_insert_with(|| MsgQueue::new(capacity)),
            ),
            DataType::Image => {
                // The image lane re-posts to the file lane, which must
                // therefore have a queue too.
                state
                    .file
                    .queue
                    .get_or_insert_with(|| MsgQueue::new(capacity));
                Some(
                    state
                        .file
                        .image
                        .queue
                        .get_or_insert_with(|| MsgQueue::new(capacity)),
                )
            }
            DataType::Http => {
                if has_http {
                    Some(
                        state
                            .http
                            .queue
                            .get_or_insert_with(|| MsgQueue::new(capacity)),
                    )
                } else {
                    None
                }
            }
        };
        let Some(queue) = queue else {
            return;
        };
        if flush {
            queue.clear();
        }
        let command = format!("{}|{}", msg, msg2);
        if let Err(err) = queue.push(command, priority, duration) {
            logging::warn(err.to_string());
        }
        drop(state);
        // A dozing data thread picks the command up immediately.
        self.shared.wake.notify_all();
    }

    pub fn init_queues(&self) {
        let mut state = self.lock_state();
        let capacity = self.config.queue_capacity;
        state
            .file
            .queue
            .get_or_insert_with(|| MsgQueue::new(capacity));
        state
            .file
            .image
            .queue
            .get_or_insert_with(|| MsgQueue::new(capacity));
        if state.io.http.is_some() {
            state
                .http
                .queue
                .get_or_insert_with(|| MsgQueue::new(capacity));
        }
    }

    pub fn set_idle(&self, idle: bool) {
        self.shared.idle.store(idle, Ordering::Relaxed);
    }

    pub fn attach_overlay(&self, driver: impl OverlayDriver + 'static) {
        self.lock_state().overlay = Some(Box::new(driver));
        self.shared.wake.notify_all();
    }

    pub fn detach_overlay(&self) {
        self.lock_state().overlay = None;
    }

    pub fn attach_db_writer(&self, writer: impl DbIndexWriter + 'static) {
        self.lock_state().db = Some(Box::new(writer));
        self.shared.wake.notify_all();
    }

    pub fn db_writer_attached(&self) -> bool {
        self.lock_state().db.is_some()
    }

    pub fn last_error(&self) -> Option<TaskError> {
        self.lock_state().diagnostics.last_error().cloned()
    }

    pub fn take_last_error(&self) -> Option<TaskError> {
        self.lock_state().diagnostics.take_last_error()
    }

    pub fn telemetry(&self) -> RunloopTelemetry {
        let state = self.lock_state();
        RunloopTelemetry {
            file_active: state.file.is_active(),
            image_active: state.file.image().is_active(),
            http_connecting: state.http.is_connecting(),
            http_transferring: state.http.is_transferring(),
            file_queue_depth: state.file.queue_depth(),
            image_queue_depth: state.file.image().queue_depth(),
            http_queue_depth: state.http.queue_depth(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().expect("runloop state lock poisoned")
    }
}

impl Drop for DataRunloop {
    fn drop(&mut self) {
        self.deinit();
    }
}

fn iterate_once(state: &mut State, config: &RunloopConfig, idle: bool) {
    if !idle {
        if let Some(overlay) = state.overlay.as_mut() {
            drivers::overlay_iterate(overlay.as_mut());
        }
    }

    let deps = FileLaneDeps {
        opener: &*state.io.files,
        decoders: &*state.io.decoders,
        wallpaper: &mut state.sinks.menu_wallpaper,
        diagnostics: &mut state.diagnostics,
    };
    state.file.iterate(config, deps);

    state.http.iterate(
        state.io.http.as_deref(),
        &mut state.sinks.http,
        &mut state.diagnostics,
    );

    drivers::db_iterate(&mut state.db);
}

// Spins with a yield while any lane has work, dozes on the wake condvar
// once everything is at rest. Posts and teardown notify; the timeout
// catches driver status changes nobody signals.
fn data_thread_loop(shared: &Shared, config: &RunloopConfig) {
    loop {
        let at_rest = {
            let mut state = shared.state.lock().expect("runloop state lock poisoned");
            iterate_once(&mut state, config, shared.idle.load(Ordering::Relaxed));
            state.at_rest()
        };
        let quit = shared.quit.lock().expect("quit lock poisoned");
        if *quit {
            break;
        }
        if at_rest {
            let (quit, _timed_out) = shared
                .wake
                .wait_timeout(quit, REST_POLL_INTERVAL)
                .expect("quit lock poisoned");
            if *quit {
                break;
            }
        } else {
            drop(quit);
            thread::yield_now();
        }
    }
}
