use std::io::Cursor;
use std::sync::Arc;

use crate::logging;

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const CHUNK_IHDR: &[u8; 4] = b"IHDR";
const CHUNK_IDAT: &[u8; 4] = b"IDAT";
const CHUNK_IEND: &[u8; 4] = b"IEND";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessStep {
    Next,
    Done,
    Error,
    ErrorEnd,
}

#[derive(Clone, Debug)]
pub struct TextureBuffer {
    pub width: u32,
    pub height: u32,
    pub rgba: Arc<Vec<u8>>,
}

/// Progressive image decode driven by the image lane: a chunk-walk phase
/// (`iterate`, one chunk per call) followed by a pixel phase (`process`,
/// one bounded step per call). The decoder owns a shared view of the
/// file bytes, so the file stream that produced them can be freed first.
pub trait PixelDecoder: Send {
    fn start(&mut self) -> bool;
    fn iterate(&mut self) -> bool;
    fn has_required_chunks(&self) -> bool;
    fn process(&mut self) -> ProcessStep;
    fn take_texture(&mut self) -> Option<TextureBuffer>;
}

pub trait DecoderFactory: Send {
    fn create(&self, bytes: Arc<Vec<u8>>) -> Box<dyn PixelDecoder>;
}

pub struct PngStreamFactory;

impl DecoderFactory for PngStreamFactory {
    fn create(&self, bytes: Arc<Vec<u8>>) -> Box<dyn PixelDecoder> {
        Box::new(PngStream::new(bytes))
    }
}

struct ArcBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

enum PixelPhase {
    NotStarted,
    Decoding {
        reader: png::Reader<Cursor<ArcBytes>>,
        rgba: Vec<u8>,
        width: u32,
        height: u32,
    },
    Finished(TextureBuffer),
    Failed,
}

pub struct PngStream {
    bytes: Arc<Vec<u8>>,
    cursor: usize,
    has_ihdr: bool,
    has_idat: bool,
    has_iend: bool,
    phase: PixelPhase,
}

impl PngStream {
    pub fn new(bytes: Arc<Vec<u8>>) -> Self {
        Self {
            bytes,
            cursor: 0,
            has_ihdr: false,
            has_idat: false,
            has_iend: false,
            phase: PixelPhase::NotStarted,
        }
    }

    fn begin_pixel_phase(&mut self) -> ProcessStep {
        let decoder = png::Decoder::new(Cursor::new(ArcBytes(Arc::clone(&self.bytes))));
        let reader = match decoder.read_info() {
            Ok(reader) => reader,
            Err(err) => {
                logging::error(format!("png read_info failed: {}", err));
                self.phase = PixelPhase::Failed;
                return ProcessStep::Error;
            }
        };
        let info = reader.info();
        if info.bit_depth != png::BitDepth::Eight {
            logging::error("png bit depth must be 8");
            self.phase = PixelPhase::Failed;
            return ProcessStep::Error;
        }
        if info.interlaced {
            // Row-at-a-time stepping assumes scanline order.
            logging::error("interlaced png not supported");
            self.phase = PixelPhase::Failed;
            return ProcessStep::Error;
        }
        let width = info.width;
        let height = info.height;
        let rgba = Vec::with_capacity(width as usize * height as usize * 4);
        self.phase = PixelPhase::Decoding {
            reader,
            rgba,
            width,
            height,
        };
        ProcessStep::Next
    }
}

impl PixelDecoder for PngStream {
    fn start(&mut self) -> bool {
        if self.bytes.len() < PNG_SIGNATURE.len() || self.bytes[..8] != PNG_SIGNATURE {
            return false;
        }
        self.cursor = PNG_SIGNATURE.len();
        true
    }

    fn iterate(&mut self) -> bool {
        let bytes = &self.bytes;
        if self.cursor + 8 > bytes.len() {
            return false;
        }
        let size = u32::from_be_bytes([
            bytes[self.cursor],
            bytes[self.cursor + 1],
            bytes[self.cursor + 2],
            bytes[self.cursor + 3],
        ]) as usize;
        let kind: &[u8] = &bytes[self.cursor + 4..self.cursor + 8];
        if kind == CHUNK_IHDR {
            self.has_ihdr = true;
        } else if kind == CHUNK_IDAT {
            self.has_idat = true;
        } else if kind == CHUNK_IEND {
            self.has_iend = true;
            return false;
        }
        // Length + type + payload + CRC.
        let advance = 4 + 4 + size + 4;
        if self.cursor + advance > bytes.len() {
            return false;
        }
        self.cursor += advance;
        true
    }

    fn has_required_chunks(&self) -> bool {
        self.has_ihdr && self.has_idat && self.has_iend
    }

    fn process(&mut self) -> ProcessStep {
        let phase = std::mem::replace(&mut self.phase, PixelPhase::Failed);
        let (next_phase, step) = match phase {
            PixelPhase::NotStarted => return self.begin_pixel_phase(),
            PixelPhase::Decoding {
                mut reader,
                mut rgba,
                width,
                height,
            } => {
                let color = reader.output_color_type().0;
                let row_result = match reader.next_row() {
                    Ok(Some(row)) => expand_row_rgba(color, row.data(), &mut rgba).map(|_| true),
                    Ok(None) => Ok(false),
                    Err(err) => Err(format!("png row decode failed: {}", err)),
                };
                match row_result {
                    Ok(true) => (
                        PixelPhase::Decoding {
                            reader,
                            rgba,
                            width,
                            height,
                        },
                        ProcessStep::Next,
                    ),
                    Ok(false) => {
                        let texture = TextureBuffer {
                            width,
                            height,
                            rgba: Arc::new(rgba),
                        };
                        (PixelPhase::Finished(texture), ProcessStep::Done)
                    }
                    Err(message) => {
                        logging::error(message);
                        (PixelPhase::Failed, ProcessStep::Error)
                    }
                }
            }
            PixelPhase::Finished(texture) => (PixelPhase::Finished(texture), ProcessStep::Done),
            PixelPhase::Failed => (PixelPhase::Failed, ProcessStep::Error),
        };
        self.phase = next_phase;
        step
    }

    fn take_texture(&mut self) -> Option<TextureBuffer> {
        match &self.phase {
            PixelPhase::Finished(texture) => Some(texture.clone()),
            _ => None,
        }
    }
}

fn expand_row_rgba(
    color: png::ColorType,
    row: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), String> {
    match color {
        png::ColorType::Rgba => out.extend_from_slice(row),
        png::ColorType::Rgb => {
            for chunk in row.chunks_exact(3) {
                out.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
            }
        }
        png::ColorType::Grayscale => {
            for value in row {
                out.extend_from_slice(&[*value, *value, *value, 255]);
            }
        }
        png::ColorType::GrayscaleAlpha => {
            for chunk in row.chunks_exact(2) {
                out.extend_from_slice(&[chunk[0], chunk[0], chunk[0], chunk[1]]);
            }
        }
        _ => return Err("unsupported png color type".to_string()),
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn encode_png(width: u32, height: u32, color: png::ColorType, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(color);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().expect("png header");
            writer.write_image_data(data).expect("png data");
        }
        out
    }

    fn decode_all(stream: &mut PngStream) -> ProcessStep {
        loop {
            match stream.process() {
                ProcessStep::Next => continue,
                terminal => return terminal,
            }
        }
    }

    #[test]
    fn full_decode_of_rgb_png() {
        let data: Vec<u8> = (0..4 * 3 * 3).map(|i| i as u8).collect();
        let bytes = Arc::new(encode_png(4, 3, png::ColorType::Rgb, &data));
        let mut stream = PngStream::new(bytes);

        assert!(stream.start());
        while stream.iterate() {}
        assert!(stream.has_required_chunks());

        assert_eq!(decode_all(&mut stream), ProcessStep::Done);
        let texture = stream.take_texture().expect("texture");
        assert_eq!(texture.width, 4);
        assert_eq!(texture.height, 3);
        assert_eq!(texture.rgba.len(), 4 * 3 * 4);
        assert_eq!(texture.rgba[0..4], [0, 1, 2, 255]);
    }

    #[test]
    fn grayscale_rows_expand_to_rgba() {
        let data = [10u8, 20, 30, 40];
        let bytes = Arc::new(encode_png(2, 2, png::ColorType::Grayscale, &data));
        let mut stream = PngStream::new(bytes);
        assert!(stream.start());
        while stream.iterate() {}
        assert_eq!(decode_all(&mut stream), ProcessStep::Done);
        let texture = stream.take_texture().expect("texture");
        assert_eq!(texture.rgba[0..4], [10, 10, 10, 255]);
        assert_eq!(texture.rgba[12..16], [40, 40, 40, 255]);
    }

    #[test]
    fn truncated_png_misses_iend() {
        let data = [0u8; 4];
        let mut bytes = encode_png(1, 1, png::ColorType::Rgba, &data);
        // Drop the IEND chunk (4 length + 4 type + 4 crc).
        bytes.truncate(bytes.len() - 12);
        let mut stream = PngStream::new(Arc::new(bytes));
        assert!(stream.start());
        while stream.iterate() {}
        assert!(!stream.has_required_chunks());
    }

    #[test]
    fn bad_signature_refuses_to_start() {
        let mut stream = PngStream::new(Arc::new(vec![0u8; 32]));
        assert!(!stream.start());
        let mut stream = PngStream::new(Arc::new(Vec::new()));
        assert!(!stream.start());
    }

    #[test]
    fn chunk_walk_advances_one_chunk_per_call() {
        let data = [0u8; 4];
        let bytes = Arc::new(encode_png(1, 1, png::ColorType::Rgba, &data));
        let mut stream = PngStream::new(Arc::clone(&bytes));
        assert!(stream.start());

        let mut calls = 0;
        while stream.iterate() {
            calls += 1;
            assert!(calls < 64, "walk never terminated");
        }
        // At least IHDR and one IDAT advanced; IEND terminates the walk.
        assert!(calls >= 2);
        assert!(stream.has_required_chunks());
    }

    #[test]
    fn take_texture_before_done_is_none() {
        let data = [0u8; 4];
        let bytes = Arc::new(encode_png(1, 1, png::ColorType::Rgba, &data));
        let mut stream = PngStream::new(bytes);
        assert!(stream.start());
        assert!(stream.take_texture().is_none());
    }
}
