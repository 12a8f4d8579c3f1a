use std::sync::Arc;

use crate::config::{increment_for, RunloopConfig};
use crate::logging;
use crate::observability::{Diagnostics, TaskError};
use crate::png_stream::{DecoderFactory, PixelDecoder, ProcessStep, TextureBuffer};
use crate::queue::MsgQueue;

pub type WallpaperSink = Box<dyn FnMut(TextureBuffer) + Send>;

/// The image sub-lane. It never reads files itself: a command posted to
/// its queue is re-routed to the file lane, and the file lane's
/// completion bridge hands the bytes back via `begin_decode`.
pub struct ImageTask {
    pub(crate) queue: Option<MsgQueue>,
    handle: Option<Box<dyn PixelDecoder>>,
    is_blocking: bool,
    is_finished: bool,
    is_blocking_on_processing: bool,
    is_finished_with_processing: bool,
    pos_increment: usize,
    processing_pos_increment: usize,
    frame_count: u64,
    processing_frame_count: u64,
    final_state: ProcessStep,
}

impl ImageTask {
    pub fn new() -> Self {
        Self {
            queue: None,
            handle: None,
            is_blocking: false,
            is_finished: false,
            is_blocking_on_processing: false,
            is_finished_with_processing: false,
            pos_increment: 1,
            processing_pos_increment: 1,
            frame_count: 0,
            processing_frame_count: 0,
            final_state: ProcessStep::Next,
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.as_ref().map_or(0, MsgQueue::len)
    }

    /// Bridge entry point, called by the file lane once the transfer has
    /// delivered the whole byte buffer. The increments derive from the
    /// delivered length, not from anything the producer claimed.
    pub fn begin_decode(
        &mut self,
        bytes: Arc<Vec<u8>>,
        config: &RunloopConfig,
        decoders: &dyn DecoderFactory,
    ) -> bool {
        if self.handle.is_some() {
            return false;
        }
        let len = bytes.len();
        let mut handle = decoders.create(bytes);
        if !handle.start() {
            return false;
        }
        self.pos_increment = increment_for(len, config.image_chunk_divisor);
        self.processing_pos_increment = increment_for(len, config.image_process_divisor);
        self.handle = Some(handle);
        self.is_blocking = false;
        self.is_finished = false;
        self.is_blocking_on_processing = false;
        self.is_finished_with_processing = false;
        self.final_state = ProcessStep::Next;
        true
    }

    pub fn iterate(
        &mut self,
        wallpaper: &mut Option<WallpaperSink>,
        file_queue: &mut Option<MsgQueue>,
        diagnostics: &mut Diagnostics,
    ) {
        if self.handle.is_some() {
            if self.is_blocking_on_processing {
                if self.advance_processing() {
                    self.finish_processing(wallpaper, diagnostics);
                }
            } else if !self.is_blocking {
                if self.advance_transfer() {
                    self.finish_transfer(diagnostics);
                }
            } else if self.is_finished {
                self.release();
            }
        } else {
            self.poll(file_queue);
        }
    }

    // A queued image command needs the file lane to produce the bytes
    // first, so it is re-posted there; the bridge takes over afterwards.
    // The file queue is checked before the pull so the command is never
    // lost to a missing destination.
    fn poll(&mut self, file_queue: &mut Option<MsgQueue>) {
        let Some(file_queue) = file_queue.as_mut() else {
            return;
        };
        let Some(queue) = self.queue.as_mut() else {
            return;
        };
        let Some(command) = queue.pull() else {
            return;
        };
        file_queue.clear();
        if let Err(err) = file_queue.push(command, 0, 1) {
            logging::warn(err.to_string());
        }
    }

    fn advance_transfer(&mut self) -> bool {
        if self.is_finished {
            return false;
        }
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };
        for _ in 0..self.pos_increment {
            if !handle.iterate() {
                return true;
            }
        }
        self.frame_count += 1;
        false
    }

    fn finish_transfer(&mut self, diagnostics: &mut Diagnostics) {
        logging::debug(format!("image chunk walk took {} frames", self.frame_count));
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        if !handle.has_required_chunks() {
            diagnostics.record(TaskError::DecodeIncomplete(
                "png missing critical chunk".to_string(),
            ));
            self.release();
            return;
        }
        match handle.process() {
            ProcessStep::Error | ProcessStep::ErrorEnd => {
                diagnostics.record(TaskError::Decode("image decode failed".to_string()));
                self.release();
            }
            _ => {
                self.is_blocking_on_processing = true;
                self.is_finished_with_processing = false;
                self.is_finished = false;
            }
        }
    }

    fn advance_processing(&mut self) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };
        let mut last = ProcessStep::Next;
        for _ in 0..self.processing_pos_increment {
            last = handle.process();
            if last != ProcessStep::Next {
                break;
            }
        }
        self.processing_frame_count += 1;
        if last == ProcessStep::Next {
            return false;
        }
        self.final_state = last;
        true
    }

    fn finish_processing(
        &mut self,
        wallpaper: &mut Option<WallpaperSink>,
        diagnostics: &mut Diagnostics,
    ) {
        logging::debug(format!(
            "image processing took {} frames",
            self.processing_frame_count
        ));
        if matches!(self.final_state, ProcessStep::Error | ProcessStep::ErrorEnd) {
            diagnostics.record(TaskError::Decode("image processing failed".to_string()));
            self.release();
            return;
        }
        let texture = self.handle.as_mut().and_then(|handle| handle.take_texture());
        let Some(texture) = texture else {
            diagnostics.record(TaskError::Decode(
                "image processing produced no pixels".to_string(),
            ));
            self.release();
            return;
        };
        if let Some(sink) = wallpaper.as_mut() {
            sink(texture);
        }
        self.is_blocking_on_processing = false;
        self.is_finished_with_processing = true;
        self.is_blocking = true;
        self.is_finished = true;
    }

    fn release(&mut self) {
        self.handle = None;
        self.frame_count = 0;
        self.processing_frame_count = 0;
        self.is_blocking = false;
        self.is_finished = false;
        self.is_blocking_on_processing = false;
        self.is_finished_with_processing = false;
        self.final_state = ProcessStep::Next;
        if let Some(queue) = self.queue.as_mut() {
            queue.clear();
        }
    }
}

impl Default for ImageTask {
    fn default() -> Self {
        Self::new()
    }
}
