//! Video capture worker
//!
//! Mirrors the audio worker's lifecycle with an AVI header for Start
//! and one JPEG frame per Data event. Frames arriving in a raw pixel
//! format are transcoded to JPEG before publish; a transcode failure
//! ends the stream early through the normal Stop path.

use super::{
    CaptureMode, EventKind, PixelFormat, StreamEvent, StreamKind, VideoFrame, VideoMode,
    VideoSource, WorkerHandle,
};
use crate::bus::EventBus;
use crate::config::TimeoutConfig;
use crate::container;
use crate::error::{BusError, DeviceError};
use crate::sync::{DrainBarrier, RendezvousGate};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CONTROL_PUBLISH: Duration = Duration::from_secs(1);

pub struct VideoWorkerSpec {
    pub source: Box<dyn VideoSource>,
    pub bus: Arc<EventBus>,
    pub gate: Arc<RendezvousGate>,
    pub timeouts: TimeoutConfig,
    pub jpeg_quality: u8,
    /// Stream length bound in milliseconds, 0 for unbounded.
    pub budget_ms: u64,
}

pub fn spawn(spec: VideoWorkerSpec) -> std::io::Result<WorkerHandle> {
    let handle = WorkerHandle::new();
    let thread_handle = handle.clone();
    std::thread::Builder::new()
        .name("avc-video".to_string())
        .spawn(move || {
            run(spec, &thread_handle);
            thread_handle.mark_terminated();
        })?;
    Ok(handle)
}

/// Encode a grabbed frame into `out`. JPEG frames pass through.
fn transcode(
    frame: &VideoFrame,
    mode: &VideoMode,
    quality: u8,
    out: &mut Vec<u8>,
) -> Result<(), DeviceError> {
    let color = match frame.format {
        PixelFormat::Jpeg => {
            out.extend_from_slice(&frame.data);
            return Ok(());
        }
        PixelFormat::Rgb888 => ExtendedColorType::Rgb8,
        PixelFormat::Grayscale => ExtendedColorType::L8,
    };
    let expected = mode.width as usize
        * mode.height as usize
        * if color == ExtendedColorType::Rgb8 { 3 } else { 1 };
    if frame.data.len() != expected {
        return Err(DeviceError::Transcode(format!(
            "Frame is {} bytes, expected {}",
            frame.data.len(),
            expected
        )));
    }
    JpegEncoder::new_with_quality(&mut *out, quality)
        .encode(&frame.data, mode.width as u32, mode.height as u32, color)
        .map_err(|e| DeviceError::Transcode(e.to_string()))
}

fn run(mut spec: VideoWorkerSpec, handle: &WorkerHandle) {
    let video_mode = spec.source.mode();
    let mode = Arc::new(CaptureMode::Video(video_mode));
    let barrier = DrainBarrier::new();
    let mut slots = [Arc::new(Vec::new()), Arc::new(Vec::new())];

    let budget_frames = if spec.budget_ms == 0 {
        u64::MAX
    } else {
        (video_mode.fps as u64 * spec.budget_ms / 1000).max(1)
    };

    info!(
        "Video stream started: {}x{} @ {} fps, budget {} ms",
        video_mode.width, video_mode.height, video_mode.fps, spec.budget_ms
    );

    let mut sequence_id: u64 = 0;
    let header = container::avi_header(&video_mode, spec.budget_ms);
    let header_len = header.len();
    let start = StreamEvent::new(
        sequence_id,
        EventKind::Start,
        Arc::clone(&mode),
        Arc::new(header),
        header_len,
        Arc::clone(&barrier),
    );
    if let Err(e) = spec.bus.publish(StreamKind::Video, start, CONTROL_PUBLISH) {
        warn!("Video start event not delivered: {}", e);
    }
    barrier.drain(Duration::from_millis(spec.timeouts.drain_ms));

    let grab_timeout = Duration::from_millis(spec.timeouts.read_ms.max(1000 / video_mode.fps.max(1) as u64));
    let gate_timeout = Duration::from_millis(spec.timeouts.gate_ms);
    let drain_timeout = Duration::from_millis(spec.timeouts.drain_ms);
    let publish_timeout = Duration::from_millis(spec.timeouts.publish_ms);

    let mut frames: u64 = 0;
    let mut slot_index = 0usize;

    while handle.keep_running() && frames < budget_frames {
        let frame = match spec.source.grab(grab_timeout) {
            Ok(frame) => frame,
            Err(DeviceError::ReadTimeout(ms)) => {
                warn!("Frame grab timed out after {} ms, stopping stream", ms);
                break;
            }
            Err(e) => {
                warn!("Video grab failed, stopping stream: {}", e);
                break;
            }
        };

        let slot = &mut slots[slot_index];
        let buf = match Arc::get_mut(slot) {
            Some(buf) => buf,
            None => {
                debug!("Video slot {} still shared, allocating", slot_index);
                *slot = Arc::new(Vec::new());
                Arc::get_mut(slot).unwrap()
            }
        };
        buf.clear();
        if let Err(e) = transcode(&frame, &video_mode, spec.jpeg_quality, buf) {
            warn!("Frame transcode failed, stopping stream: {}", e);
            break;
        }
        let len = buf.len();

        sequence_id += 1;
        frames += 1;

        // A gate timeout drops the frame; it still counts against the
        // budget, leaving a sequence-id gap as the drop signal.
        if !spec.gate.wait_ready(gate_timeout) {
            debug!("Gate wait expired, dropping frame {}", sequence_id);
            continue;
        }
        let event = StreamEvent::new(
            sequence_id,
            EventKind::Data,
            Arc::clone(&mode),
            Arc::clone(&slots[slot_index]),
            len,
            Arc::clone(&barrier),
        );
        match spec.bus.publish(StreamKind::Video, event, publish_timeout) {
            Ok(()) => {}
            Err(BusError::Timeout(_)) => {
                debug!("Frame {} dropped, bus busy", sequence_id);
            }
            Err(BusError::Closed) => break,
        }
        barrier.drain(drain_timeout);
        slot_index = (slot_index + 1) % slots.len();
    }

    sequence_id += 1;
    let trailer = container::avi_trailer(frames);
    let trailer_len = trailer.len();
    let stop = StreamEvent::new(
        sequence_id,
        EventKind::Stop,
        Arc::clone(&mode),
        Arc::new(trailer),
        trailer_len,
        Arc::clone(&barrier),
    );
    if let Err(e) = spec.bus.publish(StreamKind::Video, stop, CONTROL_PUBLISH) {
        warn!("Video stop event not delivered: {}", e);
    }
    barrier.drain(drain_timeout);

    info!("Video stream finished: {} frames", frames);
}
