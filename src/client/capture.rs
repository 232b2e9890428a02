//! The video-source boundary (SPEC_FULL.md §1: "webcam capture... provides an RGB
//! image puller"; "media-file demux/decode... wrapped behind an opaque decoder
//! trait"). Both are out-of-scope external collaborators; this module owns only the
//! trait seam and a pair of dependency-light stand-ins so the client builds and runs
//! end to end without a platform capture backend or an FFmpeg binding, mirroring the
//! `codec::OpusCodec` pattern (a pluggable trait, a real binding behind a feature, a
//! deterministic default otherwise).

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::media::Frame;

/// Pulls one RGB frame at a time. Implementations may block (hardware capture,
/// file I/O); callers run them on a dedicated thread, never on an async task.
pub trait VideoSource: Send {
    fn next_frame(&mut self) -> Option<Frame>;
}

/// Stands in for a webcam: emits a deterministic, slowly color-cycling frame at
/// whatever cadence the caller pulls it. A real capture backend (platform camera
/// API) would implement the same trait and be selected by `--video-source webcam`
/// once one is wired in; until then this keeps `webcam` a legal, testable choice.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    tick: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, tick: 0 }
    }
}

impl VideoSource for SyntheticSource {
    fn next_frame(&mut self) -> Option<Frame> {
        let phase = (self.tick % 256) as u8;
        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for _ in 0..(self.width * self.height) {
            rgb.push(phase);
            rgb.push(phase.wrapping_add(85));
            rgb.push(phase.wrapping_add(170));
        }
        self.tick += 1;
        Some(Frame::new(self.width, self.height, rgb, self.tick))
    }
}

/// `--video-source file:path`: a minimal headerless format, sequential
/// `width * height * 3`-byte RGB24 frames, looping at end of file. Real container
/// demux/decode (the FFmpeg adapter SPEC_FULL.md §1 calls an external collaborator)
/// is out of scope; this gives the CLI surface a working implementation that obeys
/// the same `VideoSource` seam a real decoder would.
pub struct FileSource {
    file: File,
    width: u32,
    height: u32,
    frame_bytes: usize,
    tick: u64,
}

impl FileSource {
    pub fn open(path: PathBuf, width: u32, height: u32) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file,
            width,
            height,
            frame_bytes: width as usize * height as usize * 3,
            tick: 0,
        })
    }
}

impl VideoSource for FileSource {
    fn next_frame(&mut self) -> Option<Frame> {
        use std::io::{Seek, SeekFrom};
        let mut rgb = vec![0u8; self.frame_bytes];
        match self.file.read_exact(&mut rgb) {
            Ok(()) => {}
            Err(_) => {
                self.file.seek(SeekFrom::Start(0)).ok()?;
                self.file.read_exact(&mut rgb).ok()?;
            }
        }
        self.tick += 1;
        Some(Frame::new(self.width, self.height, rgb, self.tick))
    }
}

/// The `--video-source` CLI choice, resolved into a concrete `VideoSource`.
pub enum VideoSourceKind {
    Webcam,
    File(PathBuf),
}

pub fn open_source(kind: &VideoSourceKind, width: u32, height: u32) -> std::io::Result<Box<dyn VideoSource>> {
    match kind {
        VideoSourceKind::Webcam => Ok(Box::new(SyntheticSource::new(width, height))),
        VideoSourceKind::File(path) => Ok(Box::new(FileSource::open(path.clone(), width, height)?)),
    }
}

/// Runs `source` on a dedicated blocking thread, forwarding frames over a bounded
/// channel so the async upload loop never shares a blocking capture call with the
/// executor (SPEC_FULL.md §5: capture is an external collaborator, not a task the
/// runtime schedules cooperatively).
pub fn spawn_capture_thread(mut source: Box<dyn VideoSource>, period: std::time::Duration) -> crossbeam_channel::Receiver<Frame> {
    let (tx, rx) = crossbeam_channel::bounded(4);
    std::thread::spawn(move || {
        while let Some(frame) = source.next_frame() {
            if tx.send(frame).is_err() {
                return;
            }
            std::thread::sleep(period);
        }
    });
    rx
}

/// Bridges a blocking `crossbeam_channel::Receiver` into async code by parking the
/// receive on the blocking thread pool. Returns `None` once the capture thread has
/// exited and the channel is drained.
pub async fn recv_frame(rx: &crossbeam_channel::Receiver<Frame>) -> Option<Frame> {
    let rx = rx.clone();
    tokio::task::spawn_blocking(move || rx.recv().ok()).await.unwrap_or(None)
}

/// Pulls one 20ms chunk of 48 kHz mono float PCM at a time (SPEC_FULL.md §3 "audio
/// chunk"). Mirrors `VideoSource`'s blocking-capture-thread contract.
pub trait AudioSource: Send {
    fn next_chunk(&mut self) -> Option<Vec<f32>>;
}

/// Stands in for a microphone: emits silence at the chunk cadence the caller pulls
/// it. Keeps `--no-audio`'s negation (uploading audio) a legal, testable default
/// without a PortAudio-style capture binding.
pub struct SilenceSource {
    samples_per_chunk: usize,
}

impl SilenceSource {
    pub fn new(samples_per_chunk: usize) -> Self {
        Self { samples_per_chunk }
    }
}

impl AudioSource for SilenceSource {
    fn next_chunk(&mut self) -> Option<Vec<f32>> {
        Some(vec![0.0; self.samples_per_chunk])
    }
}

pub fn spawn_audio_capture_thread(mut source: Box<dyn AudioSource>, period: std::time::Duration) -> crossbeam_channel::Receiver<Vec<f32>> {
    let (tx, rx) = crossbeam_channel::bounded(8);
    std::thread::spawn(move || {
        while let Some(chunk) = source.next_chunk() {
            if tx.send(chunk).is_err() {
                return;
            }
            std::thread::sleep(period);
        }
    });
    rx
}

pub async fn recv_chunk(rx: &crossbeam_channel::Receiver<Vec<f32>>) -> Option<Vec<f32>> {
    let rx = rx.clone();
    tokio::task::spawn_blocking(move || rx.recv().ok()).await.unwrap_or(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_source_yields_chunks_of_the_requested_size() {
        let mut source = SilenceSource::new(960);
        let chunk = source.next_chunk().unwrap();
        assert_eq!(chunk.len(), 960);
        assert!(chunk.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn synthetic_source_yields_frames_of_the_requested_size() {
        let mut source = SyntheticSource::new(4, 2);
        let frame = source.next_frame().unwrap();
        assert_eq!(frame.rgb.len(), 4 * 2 * 3);
    }

    #[test]
    fn synthetic_source_advances_its_capture_timestamp() {
        let mut source = SyntheticSource::new(2, 2);
        let first = source.next_frame().unwrap();
        let second = source.next_frame().unwrap();
        assert!(second.captured_at_micros > first.captured_at_micros);
    }

    #[tokio::test]
    async fn capture_thread_delivers_frames_through_the_channel() {
        let source = Box::new(SyntheticSource::new(2, 2));
        let rx = spawn_capture_thread(source, std::time::Duration::from_millis(1));
        let frame = recv_frame(&rx).await.expect("a frame should arrive");
        assert_eq!(frame.width, 2);
    }
}
