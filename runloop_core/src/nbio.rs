use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::logging;

pub const DEFAULT_READ_CHUNK: usize = 8 * 1024;

/// Streamed file read advanced one bounded step at a time. `iterate`
/// returns `Ok(true)` once the whole file is buffered; `data` hands the
/// buffer out shared so a downstream stage can outlive the stream.
pub trait FileStream: Send {
    fn begin_read(&mut self);
    fn iterate(&mut self) -> io::Result<bool>;
    fn data(&self) -> Option<Arc<Vec<u8>>>;
}

pub trait FileOpener: Send {
    fn open(&self, path: &Path) -> Option<Box<dyn FileStream>>;
}

pub struct StdFileOpener {
    chunk_size: usize,
}

impl StdFileOpener {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_READ_CHUNK,
        }
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Default for StdFileOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl FileOpener for StdFileOpener {
    fn open(&self, path: &Path) -> Option<Box<dyn FileStream>> {
        match File::open(path) {
            Ok(file) => {
                // The known size lets a read that lands exactly on the end
                // finish without an extra empty read; when the size is
                // unknown the EOF read signals completion instead.
                let expected = file.metadata().map(|metadata| metadata.len()).ok();
                Some(Box::new(StdFileStream {
                    path: path.to_path_buf(),
                    file,
                    chunk_size: self.chunk_size,
                    expected,
                    buffer: Vec::new(),
                    finished: None,
                    reading: false,
                }))
            }
            Err(err) => {
                logging::error(format!("open failed for {}: {}", path.display(), err));
                None
            }
        }
    }
}

pub struct StdFileStream {
    path: PathBuf,
    file: File,
    chunk_size: usize,
    expected: Option<u64>,
    buffer: Vec<u8>,
    finished: Option<Arc<Vec<u8>>>,
    reading: bool,
}

impl StdFileStream {
    fn finalize(&mut self) {
        let bytes = std::mem::take(&mut self.buffer);
        logging::debug(format!(
            "read {} bytes from {}",
            bytes.len(),
            self.path.display()
        ));
        self.finished = Some(Arc::new(bytes));
    }
}

impl FileStream for StdFileStream {
    fn begin_read(&mut self) {
        if let Some(expected) = self.expected {
            self.buffer.reserve(expected as usize);
        }
        self.reading = true;
    }

    fn iterate(&mut self) -> io::Result<bool> {
        if self.finished.is_some() {
            return Ok(true);
        }
        if !self.reading {
            return Ok(false);
        }
        let mut chunk = vec![0u8; self.chunk_size];
        let read = self.file.read(&mut chunk)?;
        if read == 0 {
            self.finalize();
            return Ok(true);
        }
        self.buffer.extend_from_slice(&chunk[..read]);
        if let Some(expected) = self.expected {
            if self.buffer.len() as u64 >= expected {
                self.finalize();
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn data(&self) -> Option<Arc<Vec<u8>>> {
        self.finished.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn temp_file(contents: &[u8]) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "runloop-core-{}-{}.bin",
            std::process::id(),
            unique
        ));
        std::fs::write(&path, contents).expect("write temp file");
        path
    }

    #[test]
    fn streams_whole_file_in_bounded_steps() {
        let contents: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let path = temp_file(&contents);

        let opener = StdFileOpener::with_chunk_size(1024);
        let mut stream = opener.open(&path).expect("open");
        stream.begin_read();

        let mut steps = 0;
        loop {
            steps += 1;
            assert!(steps < 64, "stream never finished");
            if stream.iterate().expect("iterate") {
                break;
            }
        }

        // The tenth chunk reaches the known size, no trailing EOF read.
        assert_eq!(steps, 10);
        let data = stream.data().expect("data after completion");
        assert_eq!(*data, contents);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn open_missing_file_returns_none() {
        let opener = StdFileOpener::new();
        let path = std::env::temp_dir().join("runloop-core-definitely-missing.bin");
        assert!(opener.open(&path).is_none());
    }

    #[test]
    fn data_unavailable_until_done() {
        let path = temp_file(&[1, 2, 3]);
        let opener = StdFileOpener::with_chunk_size(2);
        let mut stream = opener.open(&path).expect("open");
        stream.begin_read();
        assert!(!stream.iterate().expect("iterate"));
        assert!(stream.data().is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn iterate_before_begin_read_is_a_no_op() {
        let path = temp_file(&[9; 16]);
        let opener = StdFileOpener::new();
        let mut stream = opener.open(&path).expect("open");
        assert!(!stream.iterate().expect("iterate"));
        assert!(stream.data().is_none());
        std::fs::remove_file(&path).ok();
    }
}
