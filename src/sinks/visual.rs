//! Console meters
//!
//! Lightweight diagnostic sinks that render directly on the dispatch
//! thread. The audio meter redraws a VU bar in place with a carriage
//! return; the video meter prints a stats line every tenth frame.

use crate::bus::{EventBus, SinkHandle};
use crate::capture::{EventKind, StreamKind};
use std::io::Write;
use std::sync::Mutex;
use std::time::Instant;

const BAR_WIDTH: usize = 48;

/// Peak amplitude of a 16-bit little-endian PCM slice, 0.0 to 1.0.
fn peak(payload: &[u8]) -> f32 {
    payload
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]).unsigned_abs())
        .max()
        .map_or(0.0, |p| p as f32 / i16::MAX as f32)
}

/// Attach a VU meter to the audio topic.
pub fn attach_audio_meter(bus: &EventBus) -> SinkHandle {
    bus.register(StreamKind::Audio, "meter", move |event| match event.kind {
        EventKind::Start => {
            if let Some(mode) = event.mode.as_audio() {
                println!(
                    "audio [{}]: {} Hz, {} ch, {} bit",
                    chrono::Local::now().format("%H:%M:%S"),
                    mode.sample_rate,
                    mode.channels,
                    mode.sample_bytes * 8
                );
            }
        }
        EventKind::Data => {
            // One redraw per 10 slices, a 200ms cadence.
            if event.sequence_id % 10 == 0 {
                let filled = (peak(event.payload()) * BAR_WIDTH as f32) as usize;
                print!(
                    "\r[{:<width$}] {:>6}",
                    "#".repeat(filled.min(BAR_WIDTH)),
                    event.sequence_id,
                    width = BAR_WIDTH
                );
                let _ = std::io::stdout().flush();
            }
        }
        EventKind::Stop => println!("\naudio: done"),
    })
}

struct VideoStats {
    frames: u64,
    bytes: u64,
    since: Instant,
}

/// Attach a frame statistics line to the video topic.
pub fn attach_video_meter(bus: &EventBus) -> SinkHandle {
    let stats = Mutex::new(VideoStats {
        frames: 0,
        bytes: 0,
        since: Instant::now(),
    });
    bus.register(StreamKind::Video, "meter", move |event| match event.kind {
        EventKind::Start => {
            if let Some(mode) = event.mode.as_video() {
                println!(
                    "video [{}]: {}x{} @ {} fps",
                    chrono::Local::now().format("%H:%M:%S"),
                    mode.width,
                    mode.height,
                    mode.fps
                );
            }
            let mut stats = stats.lock().unwrap();
            stats.frames = 0;
            stats.bytes = 0;
            stats.since = Instant::now();
        }
        EventKind::Data => {
            let mut stats = stats.lock().unwrap();
            stats.frames += 1;
            stats.bytes += event.payload().len() as u64;
            if stats.frames % 10 == 0 {
                let elapsed = stats.since.elapsed().as_secs_f32().max(0.001);
                println!(
                    "video: {} frames, {:.1} fps, {:.1} KiB/frame",
                    stats.frames,
                    stats.frames as f32 / elapsed,
                    stats.bytes as f32 / stats.frames as f32 / 1024.0
                );
            }
        }
        EventKind::Stop => {
            let stats = stats.lock().unwrap();
            println!("video: done, {} frames, {} bytes", stats.frames, stats.bytes);
        }
    })
}
