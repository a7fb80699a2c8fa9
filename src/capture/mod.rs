//! Capture pipeline core types
//!
//! A stream is one audio or video capture session: an immutable
//! [`CaptureMode`] descriptor, a worker thread that owns the peripheral
//! for its lifetime, and the Start/Data/Stop [`StreamEvent`]s it fans out
//! over the bus.

pub mod audio;
pub mod synthetic;
pub mod video;

use crate::error::DeviceError;
use crate::sync::{ClaimGuard, DrainBarrier};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Media kind; doubles as the bus topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Audio,
    Video,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Video => write!(f, "video"),
        }
    }
}

/// Audio stream descriptor, fixed for the stream lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioMode {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Bytes per sample per channel
    pub sample_bytes: u16,
}

impl AudioMode {
    /// Bytes per second of PCM payload.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * self.sample_bytes as u32
    }

    /// Bytes per multi-channel sample (WAV block align).
    pub fn block_align(&self) -> u16 {
        self.channels * self.sample_bytes
    }
}

/// Video stream descriptor, fixed for the stream lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMode {
    /// Target frames per second
    pub fps: u16,
    /// Frame width in pixels
    pub width: u16,
    /// Frame height in pixels
    pub height: u16,
    /// Frame depth in bytes per pixel
    pub depth: u16,
    /// Four-character codec tag
    pub fourcc: [u8; 4],
}

/// Immutable descriptor created once per stream start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Audio(AudioMode),
    Video(VideoMode),
}

impl CaptureMode {
    pub fn kind(&self) -> StreamKind {
        match self {
            CaptureMode::Audio(_) => StreamKind::Audio,
            CaptureMode::Video(_) => StreamKind::Video,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioMode> {
        match self {
            CaptureMode::Audio(mode) => Some(mode),
            CaptureMode::Video(_) => None,
        }
    }

    pub fn as_video(&self) -> Option<&VideoMode> {
        match self {
            CaptureMode::Video(mode) => Some(mode),
            CaptureMode::Audio(_) => None,
        }
    }
}

/// Lifecycle position of an event within its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Payload is the container header
    Start,
    /// Payload is one captured unit (PCM slice or encoded frame)
    Data,
    /// Payload is the container trailer (empty in this design)
    Stop,
}

/// Payload shared beyond the dispatch window.
///
/// Holding one of these delays slot reclamation but can never race the
/// producer: the worker only rewrites a slot it solely owns.
#[derive(Clone)]
pub struct SharedPayload {
    buf: Arc<Vec<u8>>,
    len: usize,
}

impl AsRef<[u8]> for SharedPayload {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// One Start/Data/Stop occurrence delivered synchronously to sinks.
///
/// The payload slice is guaranteed valid only for the dispatch call; a
/// sink that processes asynchronously must take [`StreamEvent::share`]
/// and [`StreamEvent::claim`] before returning.
pub struct StreamEvent {
    pub sequence_id: u64,
    pub kind: EventKind,
    pub mode: Arc<CaptureMode>,
    payload: Arc<Vec<u8>>,
    len: usize,
    barrier: Arc<DrainBarrier>,
}

impl StreamEvent {
    pub(crate) fn new(
        sequence_id: u64,
        kind: EventKind,
        mode: Arc<CaptureMode>,
        payload: Arc<Vec<u8>>,
        len: usize,
        barrier: Arc<DrainBarrier>,
    ) -> Self {
        Self {
            sequence_id,
            kind,
            mode,
            payload,
            len,
            barrier,
        }
    }

    /// The payload bytes for this occurrence (possibly empty).
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len]
    }

    /// Share the payload past the dispatch window.
    pub fn share(&self) -> SharedPayload {
        SharedPayload {
            buf: Arc::clone(&self.payload),
            len: self.len,
        }
    }

    /// Take a drain-barrier claim on this stream's producer.
    pub fn claim(&self) -> ClaimGuard {
        self.barrier.claim()
    }
}

/// JPEG passthrough or raw formats the transcoder accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Jpeg,
    Rgb888,
    Grayscale,
}

/// One grabbed frame, owned by the worker until published.
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub format: PixelFormat,
}

/// Audio capture peripheral. The worker owns it exclusively while the
/// stream is active; reads carry their own bounded timeout so a hung
/// device cannot block cancellation.
pub trait AudioSource: Send {
    /// Fill `buf` with PCM bytes. `Ok(0)` ends the stream.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, DeviceError>;
}

/// Video capture peripheral.
pub trait VideoSource: Send {
    /// The mode this source will produce, resolved at stream start.
    fn mode(&self) -> VideoMode;

    /// Grab one frame with a bounded timeout.
    fn grab(&mut self, timeout: Duration) -> Result<VideoFrame, DeviceError>;
}

struct Terminated {
    flag: Mutex<bool>,
    signal: Condvar,
}

/// Handle to a running capture worker, owned by the mode controller.
///
/// The worker signals termination through the handle so a stop request
/// can observe completion deterministically instead of polling by name.
#[derive(Clone)]
pub struct WorkerHandle {
    running: Arc<AtomicBool>,
    terminated: Arc<Terminated>,
}

impl WorkerHandle {
    pub(crate) fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            terminated: Arc::new(Terminated {
                flag: Mutex::new(false),
                signal: Condvar::new(),
            }),
        }
    }

    /// Cooperative cancellation: the worker checks this once per loop
    /// iteration.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub(crate) fn keep_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn mark_terminated(&self) {
        let mut done = self.terminated.flag.lock().unwrap();
        *done = true;
        self.terminated.signal.notify_all();
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminated.flag.lock().unwrap()
    }

    /// Bounded wait for the worker to reach its terminal state.
    pub fn wait_terminated(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.terminated.flag.lock().unwrap();
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self
                .terminated
                .signal
                .wait_timeout(done, deadline - now)
                .unwrap();
            done = guard;
            if result.timed_out() && !*done {
                return false;
            }
        }
        true
    }
}
