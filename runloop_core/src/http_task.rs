use crate::http::{HttpConnection, HttpSession, HttpTransport};
use crate::logging;
use crate::observability::{Diagnostics, TaskError};
use crate::queue::{split_tag, MsgQueue};

/// Closed set of body sinks, selected by the URL tag. Unknown or empty
/// tags fetch the body and drop it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpSink {
    Drop,
    CoreUpdaterDownload,
    CoreUpdaterList,
}

impl HttpSink {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "cb_core_updater_download" => HttpSink::CoreUpdaterDownload,
            "cb_core_updater_list" => HttpSink::CoreUpdaterList,
            _ => HttpSink::Drop,
        }
    }
}

pub type BodySink = Box<dyn FnMut(&[u8]) + Send>;

pub struct HttpSinks {
    pub core_updater_download: Option<BodySink>,
    pub core_updater_list: Option<BodySink>,
}

impl HttpSinks {
    pub fn none() -> Self {
        Self {
            core_updater_download: None,
            core_updater_list: None,
        }
    }

    fn dispatch(&mut self, sink: HttpSink, body: &[u8]) {
        let slot = match sink {
            HttpSink::Drop => return,
            HttpSink::CoreUpdaterDownload => &mut self.core_updater_download,
            HttpSink::CoreUpdaterList => &mut self.core_updater_list,
        };
        if let Some(sink) = slot.as_mut() {
            sink(body);
        }
    }
}

struct PendingConnection {
    handle: Box<dyn HttpConnection>,
    tag: String,
}

struct ActiveSession {
    handle: Box<dyn HttpSession>,
    sink: HttpSink,
}

pub struct HttpTask {
    pub(crate) queue: Option<MsgQueue>,
    connection: Option<PendingConnection>,
    session: Option<ActiveSession>,
}

impl HttpTask {
    pub fn new() -> Self {
        Self {
            queue: None,
            connection: None,
            session: None,
        }
    }

    pub fn is_connecting(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_transferring(&self) -> bool {
        self.session.is_some()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.as_ref().map_or(0, MsgQueue::len)
    }

    pub fn iterate(
        &mut self,
        transport: Option<&dyn HttpTransport>,
        sinks: &mut HttpSinks,
        diagnostics: &mut Diagnostics,
    ) {
        if self.connection.is_some() && self.advance_connection() {
            self.finish_connection(diagnostics);
        }

        if self.session.is_some() {
            if self.advance_session() {
                self.finish_session(sinks, diagnostics);
            }
        } else if self.connection.is_none() {
            self.poll(transport, diagnostics);
        }
    }

    // One transfer at a time: a live connection or session refuses the
    // poll and the command stays queued.
    fn poll(&mut self, transport: Option<&dyn HttpTransport>, diagnostics: &mut Diagnostics) {
        if self.connection.is_some() || self.session.is_some() {
            return;
        }
        let Some(transport) = transport else {
            return;
        };
        let Some(queue) = self.queue.as_mut() else {
            return;
        };
        let Some(command) = queue.pull() else {
            return;
        };
        let (url, tag) = split_tag(&command);
        match transport.connect(url) {
            Some(handle) => {
                self.connection = Some(PendingConnection {
                    handle,
                    tag: tag.to_string(),
                });
            }
            None => {
                diagnostics.record(TaskError::ResourceCreate(format!(
                    "could not open connection to '{}'",
                    url
                )));
            }
        }
    }

    fn advance_connection(&mut self) -> bool {
        match self.connection.as_mut() {
            Some(connection) => connection.handle.iterate(),
            None => false,
        }
    }

    fn finish_connection(&mut self, diagnostics: &mut Diagnostics) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        if !connection.handle.done() {
            diagnostics.record(TaskError::Transport("http connection failed".to_string()));
            self.shed_queue();
            return;
        }
        match connection.handle.open_session() {
            Some(handle) => {
                self.session = Some(ActiveSession {
                    handle,
                    sink: HttpSink::parse(&connection.tag),
                });
            }
            None => {
                diagnostics.record(TaskError::ResourceCreate(
                    "could not create http session".to_string(),
                ));
                self.shed_queue();
            }
        }
    }

    fn advance_session(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let mut pos = 0usize;
        let mut total = 0usize;
        if !session.handle.update(&mut pos, &mut total) {
            logging::debug(format!("{:09} / {:09}", pos, total));
            return false;
        }
        true
    }

    fn finish_session(&mut self, sinks: &mut HttpSinks, diagnostics: &mut Diagnostics) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        match session.handle.take_body() {
            Some(body) => sinks.dispatch(session.sink, &body),
            None => diagnostics.record(TaskError::Transport("http transfer failed".to_string())),
        }
        self.shed_queue();
    }

    // Stale enqueued duplicates are flushed whenever a transfer ends.
    fn shed_queue(&mut self) {
        if let Some(queue) = self.queue.as_mut() {
            queue.clear();
        }
    }
}

impl Default for HttpTask {
    fn default() -> Self {
        Self::new()
    }
}
