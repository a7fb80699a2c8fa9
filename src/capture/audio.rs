//! Audio capture worker
//!
//! One dedicated thread per active audio stream. The worker publishes a
//! WAV header as its Start event, then 20ms PCM slices as Data events,
//! and finally an empty Stop event before reporting terminated. Sinks
//! own their detachment; a stopping worker never touches the registry,
//! so a late teardown cannot strip sinks from a newer stream.
//!
//! Payloads cycle through a two-slot ring so a slice stays readable
//! while its successor is being filled. A slot is rewritten only once
//! the worker holds it exclusively again; if a sink still shares it
//! after the drain wait, the worker allocates a fresh slot instead of
//! waiting longer.

use super::{AudioMode, AudioSource, CaptureMode, EventKind, StreamEvent, StreamKind, WorkerHandle};
use crate::bus::EventBus;
use crate::config::TimeoutConfig;
use crate::container;
use crate::error::{BusError, DeviceError};
use crate::sync::{DrainBarrier, RendezvousGate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Acceptance timeout for Start and Stop publishes. Lifecycle events
/// are worth waiting for; only Data events get the short budget.
const CONTROL_PUBLISH: Duration = Duration::from_secs(1);

/// Slices per second in the slot ring (20ms each).
const SLICES_PER_SEC: u32 = 50;

pub struct AudioWorkerSpec {
    pub source: Box<dyn AudioSource>,
    pub mode: AudioMode,
    pub bus: Arc<EventBus>,
    pub gate: Arc<RendezvousGate>,
    pub timeouts: TimeoutConfig,
    /// Stream length bound in milliseconds, 0 for unbounded.
    pub budget_ms: u64,
}

/// Spawn the audio worker thread. The returned handle is the only way
/// to stop it; dropping the handle leaves the stream running.
pub fn spawn(spec: AudioWorkerSpec) -> std::io::Result<WorkerHandle> {
    let handle = WorkerHandle::new();
    let thread_handle = handle.clone();
    std::thread::Builder::new()
        .name("avc-audio".to_string())
        .spawn(move || {
            run(spec, &thread_handle);
            thread_handle.mark_terminated();
        })?;
    Ok(handle)
}

fn run(mut spec: AudioWorkerSpec, handle: &WorkerHandle) {
    let mode = Arc::new(CaptureMode::Audio(spec.mode));
    let barrier = DrainBarrier::new();
    let chunk = (spec.mode.bytes_per_second() / SLICES_PER_SEC)
        .max(spec.mode.block_align() as u32) as usize;
    let mut slots = [
        Arc::new(vec![0u8; chunk]),
        Arc::new(vec![0u8; chunk]),
    ];

    let budget_bytes = if spec.budget_ms == 0 {
        u64::MAX
    } else {
        spec.mode.bytes_per_second() as u64 * spec.budget_ms / 1000
    };

    info!(
        "Audio stream started: {} Hz, {} ch, budget {} ms",
        spec.mode.sample_rate, spec.mode.channels, spec.budget_ms
    );

    let mut sequence_id: u64 = 0;
    let header = container::wav_header(&spec.mode, spec.budget_ms);
    let header_len = header.len();
    let start = StreamEvent::new(
        sequence_id,
        EventKind::Start,
        Arc::clone(&mode),
        Arc::new(header),
        header_len,
        Arc::clone(&barrier),
    );
    if let Err(e) = spec.bus.publish(StreamKind::Audio, start, CONTROL_PUBLISH) {
        warn!("Audio start event not delivered: {}", e);
    }
    barrier.drain(Duration::from_millis(spec.timeouts.drain_ms));

    let read_timeout = Duration::from_millis(spec.timeouts.read_ms);
    let gate_timeout = Duration::from_millis(spec.timeouts.gate_ms);
    let drain_timeout = Duration::from_millis(spec.timeouts.drain_ms);
    let publish_timeout = Duration::from_millis(spec.timeouts.publish_ms);

    let mut emitted: u64 = 0;
    let mut slot_index = 0usize;

    while handle.keep_running() && emitted < budget_bytes {
        let slot = &mut slots[slot_index];
        let buf = match Arc::get_mut(slot) {
            Some(buf) => buf,
            None => {
                // A sink still shares the slot past its drain window;
                // leave it alone and start a fresh one.
                debug!("Audio slot {} still shared, allocating", slot_index);
                *slot = Arc::new(vec![0u8; chunk]);
                Arc::get_mut(slot).unwrap()
            }
        };

        let n = match spec.source.read(buf, read_timeout) {
            Ok(0) => {
                info!("Audio source reported end of stream");
                break;
            }
            Ok(n) => n,
            Err(DeviceError::ReadTimeout(ms)) => {
                warn!("Audio read timed out after {} ms, stopping stream", ms);
                break;
            }
            Err(e) => {
                warn!("Audio read failed, stopping stream: {}", e);
                break;
            }
        };

        sequence_id += 1;
        emitted = emitted.saturating_add(n as u64);

        // Hold here while a primary sink is mid-write, then deliver.
        // A gate timeout drops the slice; the budget and sequence id
        // already account for it, so the gap is the drop signal.
        if !spec.gate.wait_ready(gate_timeout) {
            debug!("Gate wait expired, dropping slice {}", sequence_id);
            continue;
        }
        let event = StreamEvent::new(
            sequence_id,
            EventKind::Data,
            Arc::clone(&mode),
            Arc::clone(&slots[slot_index]),
            n,
            Arc::clone(&barrier),
        );
        match spec.bus.publish(StreamKind::Audio, event, publish_timeout) {
            Ok(()) => {}
            Err(BusError::Timeout(_)) => {
                debug!("Audio slice {} dropped, bus busy", sequence_id);
            }
            Err(BusError::Closed) => break,
        }
        barrier.drain(drain_timeout);
        slot_index = (slot_index + 1) % slots.len();
    }

    sequence_id += 1;
    let trailer = container::wav_trailer(emitted);
    let trailer_len = trailer.len();
    let stop = StreamEvent::new(
        sequence_id,
        EventKind::Stop,
        Arc::clone(&mode),
        Arc::new(trailer),
        trailer_len,
        Arc::clone(&barrier),
    );
    if let Err(e) = spec.bus.publish(StreamKind::Audio, stop, CONTROL_PUBLISH) {
        warn!("Audio stop event not delivered: {}", e);
    }
    barrier.drain(drain_timeout);

    info!("Audio stream finished: {} bytes in {} slices", emitted, sequence_id - 1);
}
