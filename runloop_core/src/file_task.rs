use std::path::Path;

use crate::config::RunloopConfig;
use crate::image_task::{ImageTask, WallpaperSink};
use crate::logging;
use crate::nbio::{FileOpener, FileStream};
use crate::observability::{Diagnostics, TaskError};
use crate::png_stream::DecoderFactory;
use crate::queue::{split_tag, MsgQueue};

/// Closed set of file-lane completions, selected by the command tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileCompletion {
    Default,
    MenuWallpaper,
}

impl FileCompletion {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "cb_menu_wallpaper" => FileCompletion::MenuWallpaper,
            _ => FileCompletion::Default,
        }
    }
}

pub struct FileLaneDeps<'a> {
    pub opener: &'a dyn FileOpener,
    pub decoders: &'a dyn DecoderFactory,
    pub wallpaper: &'a mut Option<WallpaperSink>,
    pub diagnostics: &'a mut Diagnostics,
}

pub struct FileTask {
    pub(crate) queue: Option<MsgQueue>,
    handle: Option<Box<dyn FileStream>>,
    is_blocking: bool,
    is_finished: bool,
    completion: FileCompletion,
    frame_count: u64,
    pub(crate) image: ImageTask,
}

impl FileTask {
    pub fn new() -> Self {
        Self {
            queue: None,
            handle: None,
            is_blocking: false,
            is_finished: false,
            completion: FileCompletion::Default,
            frame_count: 0,
            image: ImageTask::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.as_ref().map_or(0, MsgQueue::len)
    }

    pub fn image(&self) -> &ImageTask {
        &self.image
    }

    pub fn iterate(&mut self, config: &RunloopConfig, deps: FileLaneDeps<'_>) {
        if self.handle.is_some() {
            if !self.is_blocking {
                if self.advance_transfer(config, deps.diagnostics) {
                    self.finish_transfer(config, deps.decoders, deps.diagnostics);
                }
            } else if self.is_finished {
                self.release();
            }
        } else {
            self.poll(deps.opener, deps.diagnostics);
        }

        self.image.iterate(deps.wallpaper, &mut self.queue, deps.diagnostics);
    }

    // The live handle is checked before the queue so a refused command
    // stays queued until the current transfer frees.
    fn poll(&mut self, opener: &dyn FileOpener, diagnostics: &mut Diagnostics) {
        if self.handle.is_some() {
            return;
        }
        let Some(queue) = self.queue.as_mut() else {
            return;
        };
        let Some(command) = queue.pull() else {
            return;
        };
        let (path, tag) = split_tag(&command);
        let Some(mut handle) = opener.open(Path::new(path)) else {
            diagnostics.record(TaskError::ResourceCreate(format!(
                "could not open '{}' for streaming",
                path
            )));
            return;
        };
        handle.begin_read();
        self.handle = Some(handle);
        self.is_blocking = false;
        self.is_finished = false;
        self.completion = FileCompletion::parse(tag);
    }

    fn advance_transfer(&mut self, config: &RunloopConfig, diagnostics: &mut Diagnostics) -> bool {
        if self.is_finished {
            return false;
        }
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };
        let mut outcome = Ok(false);
        for _ in 0..config.file_steps_per_tick {
            outcome = handle.iterate();
            if !matches!(outcome, Ok(false)) {
                break;
            }
        }
        match outcome {
            Ok(false) => {
                self.frame_count += 1;
                false
            }
            Ok(true) => true,
            Err(err) => {
                diagnostics.record(TaskError::Transport(format!("file read failed: {}", err)));
                self.abort();
                false
            }
        }
    }

    fn finish_transfer(
        &mut self,
        config: &RunloopConfig,
        decoders: &dyn DecoderFactory,
        diagnostics: &mut Diagnostics,
    ) {
        logging::info(format!("file transfer took {} frames", self.frame_count));
        match self.completion {
            FileCompletion::Default => {}
            FileCompletion::MenuWallpaper => {
                let bytes = self.handle.as_ref().and_then(|handle| handle.data());
                let started = match bytes {
                    Some(bytes) => self.image.begin_decode(bytes, config, decoders),
                    None => false,
                };
                if !started {
                    diagnostics.record(TaskError::Decode(
                        "wallpaper decode could not start".to_string(),
                    ));
                }
            }
        }
        // Finished and blocking: the free path runs on the next tick.
        self.is_blocking = true;
        self.is_finished = true;
    }

    fn release(&mut self) {
        if !self.is_finished {
            return;
        }
        self.handle = None;
        self.is_blocking = false;
        self.is_finished = false;
        self.frame_count = 0;
    }

    fn abort(&mut self) {
        self.handle = None;
        self.is_blocking = false;
        self.is_finished = false;
        self.frame_count = 0;
        if let Some(queue) = self.queue.as_mut() {
            queue.clear();
        }
    }
}

impl Default for FileTask {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nbio::tests::temp_file;
    use crate::nbio::StdFileOpener;
    use crate::png_stream::PngStreamFactory;

    fn deps<'a>(
        opener: &'a StdFileOpener,
        wallpaper: &'a mut Option<WallpaperSink>,
        diagnostics: &'a mut Diagnostics,
    ) -> FileLaneDeps<'a> {
        FileLaneDeps {
            opener,
            decoders: &PngStreamFactory,
            wallpaper,
            diagnostics,
        }
    }

    #[test]
    fn completion_tags_parse_to_the_closed_set() {
        assert_eq!(FileCompletion::parse(""), FileCompletion::Default);
        assert_eq!(
            FileCompletion::parse("cb_menu_wallpaper"),
            FileCompletion::MenuWallpaper
        );
        assert_eq!(FileCompletion::parse("unknown"), FileCompletion::Default);
    }

    #[test]
    fn default_completion_reads_and_frees() {
        let contents = vec![0xABu8; 4096];
        let path = temp_file(&contents);
        let opener = StdFileOpener::with_chunk_size(512);
        let mut wallpaper = None;
        let mut diagnostics = Diagnostics::new();

        let mut task = FileTask::new();
        task.queue = Some(MsgQueue::new(8));
        task.queue
            .as_mut()
            .expect("queue")
            .push(format!("{}|", path.display()), 0, 0)
            .expect("push");

        let mut ticks = 0;
        loop {
            task.iterate(
                &RunloopConfig::inline(),
                deps(&opener, &mut wallpaper, &mut diagnostics),
            );
            ticks += 1;
            assert!(ticks < 32, "file task never freed");
            if ticks > 1 && !task.is_active() {
                break;
            }
        }
        assert!(!task.image.is_active());
        assert!(diagnostics.last_error().is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn refused_poll_keeps_command_queued() {
        let first = temp_file(&[1u8; 8192]);
        let second = temp_file(&[2u8; 64]);
        let opener = StdFileOpener::with_chunk_size(256);
        let mut wallpaper = None;
        let mut diagnostics = Diagnostics::new();

        let mut task = FileTask::new();
        task.queue = Some(MsgQueue::new(8));
        task.queue
            .as_mut()
            .expect("queue")
            .push(first.display().to_string(), 0, 0)
            .expect("push");

        // Start the first transfer.
        task.iterate(
            &RunloopConfig::inline(),
            deps(&opener, &mut wallpaper, &mut diagnostics),
        );
        assert!(task.is_active());

        // A second command posted mid-transfer must survive the refusal.
        task.queue
            .as_mut()
            .expect("queue")
            .push(second.display().to_string(), 0, 0)
            .expect("push");
        task.iterate(
            &RunloopConfig::inline(),
            deps(&opener, &mut wallpaper, &mut diagnostics),
        );
        assert_eq!(task.queue_depth(), 1);

        // Drain the first transfer, then the second must start.
        let mut ticks = 0;
        while task.queue_depth() == 1 {
            task.iterate(
                &RunloopConfig::inline(),
                deps(&opener, &mut wallpaper, &mut diagnostics),
            );
            ticks += 1;
            assert!(ticks < 64, "second command never consumed");
        }
        assert!(task.is_active());

        std::fs::remove_file(&first).ok();
        std::fs::remove_file(&second).ok();
    }

    #[test]
    fn missing_file_records_and_returns_to_idle() {
        let opener = StdFileOpener::new();
        let mut wallpaper = None;
        let mut diagnostics = Diagnostics::new();
        let mut task = FileTask::new();
        task.queue = Some(MsgQueue::new(8));
        task.queue
            .as_mut()
            .expect("queue")
            .push("/definitely/not/here.bin", 0, 0)
            .expect("push");

        task.iterate(
            &RunloopConfig::inline(),
            deps(&opener, &mut wallpaper, &mut diagnostics),
        );
        assert!(!task.is_active());
        assert_eq!(task.queue_depth(), 0);
        assert!(matches!(
            diagnostics.last_error(),
            Some(TaskError::ResourceCreate(_))
        ));
    }
}
