//! Forwarding sink
//!
//! Streams one capture session to a byte sink: WAV bytes verbatim for
//! audio, a multipart MJPEG body for video. The bus handler only queues
//! shared payloads; a dedicated writer thread does the actual IO and
//! paces the producer through the rendezvous gate, one permit per unit
//! written.
//!
//! The sink is single-stream: the writer exits when it has written the
//! Stop unit, detaches itself from the bus, and reports terminated.

use crate::bus::EventBus;
use crate::capture::{EventKind, SharedPayload, StreamKind, WorkerHandle};
use crate::container;
use crate::sync::{ClaimGuard, RendezvousGate};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Queued units between dispatch and the writer thread.
const QUEUE_DEPTH: usize = 4;

struct Unit {
    kind: EventKind,
    payload: SharedPayload,
    // Holds the producer's drain barrier until the unit is written.
    _claim: ClaimGuard,
}

pub struct ForwardSpec {
    pub topic: StreamKind,
    pub writer: Box<dyn Write + Send>,
    /// Write exactly one Data payload, raw, then detach. Container
    /// headers and multipart framing are skipped.
    pub single_shot: bool,
}

/// Attach a forwarding sink for one stream. The returned handle
/// terminates once the Stop unit has been written (or the stream's
/// sinks are detached).
pub fn attach_forward(
    bus: &Arc<EventBus>,
    gate: &Arc<RendezvousGate>,
    spec: ForwardSpec,
) -> std::io::Result<WorkerHandle> {
    let (tx, rx) = bounded::<Unit>(QUEUE_DEPTH);
    let sink_handle = bus.register(spec.topic, "forward", move |event| {
        let unit = Unit {
            kind: event.kind,
            payload: event.share(),
            _claim: event.claim(),
        };
        // A full queue means the writer is behind its own pacing;
        // dropping here keeps dispatch moving.
        if tx.try_send(unit).is_err() {
            debug!("Forward queue full, unit {} dropped", event.sequence_id);
        }
    });

    let handle = WorkerHandle::new();
    let thread_handle = handle.clone();
    let bus = Arc::clone(bus);
    let gate = Arc::clone(gate);
    let topic = spec.topic;
    let single_shot = spec.single_shot;
    let mut writer = spec.writer;
    std::thread::Builder::new()
        .name("avc-forward".to_string())
        .spawn(move || {
            let engaged = gate.engage();
            // One permit up front so the first unit is not delayed by a
            // full gate wait.
            gate.signal();

            let mut written: u64 = 0;
            while thread_handle.keep_running() {
                let unit = match rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(unit) => unit,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                let kind = unit.kind;
                let payload = unit.payload.as_ref();
                let result = match (single_shot, topic, kind) {
                    (true, _, EventKind::Start | EventKind::Stop) => Ok(()),
                    (true, _, EventKind::Data) => writer.write_all(payload),
                    (false, StreamKind::Video, EventKind::Data) => writer
                        .write_all(&container::mjpeg_part_header(payload.len()))
                        .and_then(|_| writer.write_all(payload))
                        .and_then(|_| writer.write_all(b"\r\n")),
                    (false, ..) => writer.write_all(payload),
                };
                let len = payload.len();
                drop(unit);
                gate.signal();
                match result {
                    Ok(()) => {
                        written += len as u64;
                        let _ = writer.flush();
                    }
                    Err(e) => {
                        warn!("Forward write failed: {}", e);
                        break;
                    }
                }
                if kind == EventKind::Stop || (single_shot && kind == EventKind::Data) {
                    break;
                }
            }
            let _ = writer.flush();
            drop(engaged);
            bus.unregister(sink_handle);
            info!("Forward sink done: {} payload bytes", written);
            thread_handle.mark_terminated();
        })?;
    Ok(handle)
}
