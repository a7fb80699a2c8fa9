//! Streamable container headers
//!
//! WAV and AVI headers are emitted before the first payload byte, so
//! their length fields can only ever be a best-effort declaration derived
//! from the duration budget: the payload is streamed forward-only and can
//! never be seeked back into. Length fields saturate at the maximum
//! representable value for unbounded streams and are never corrected
//! retroactively.
//!
//! Neither format gets a trailer or index in this design; players treat
//! the stream as truncated at whatever point it ends. That is a known
//! limitation, not a bug to quietly fix.

use crate::capture::{AudioMode, VideoMode};

/// Canonical RIFF/WAVE/fmt/data header size.
pub const WAV_HEADER_LEN: usize = 44;

/// Fixed RIFF/AVI/hdrl(avih+strl(strh+strf))/movi-open header size.
pub const AVI_HEADER_LEN: usize = 224;

const AVI_HDRL_LEN: u32 = 192;
const AVI_AVIH_LEN: u32 = 56;
const AVI_STRL_LEN: u32 = 116;
const AVI_STRH_LEN: u32 = 56;
const AVI_STRF_LEN: u32 = 40;

fn put_fourcc(buf: &mut Vec<u8>, tag: &[u8; 4]) {
    buf.extend_from_slice(tag);
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Estimated payload byte count for an audio budget, saturated.
pub fn wav_data_len(mode: &AudioMode, budget_ms: u64) -> u32 {
    let bps = mode.bytes_per_second() as u64;
    if budget_ms == 0 {
        return u32::MAX;
    }
    (bps * budget_ms / 1000).min(u32::MAX as u64) as u32
}

/// Estimated frame count for a video budget, saturated.
pub fn avi_frame_count(mode: &VideoMode, budget_ms: u64) -> u32 {
    if budget_ms == 0 {
        return u32::MAX;
    }
    (mode.fps as u64 * budget_ms / 1000).min(u32::MAX as u64) as u32
}

/// Build the 44-byte WAV header for a stream with the given budget.
pub fn wav_header(mode: &AudioMode, budget_ms: u64) -> Vec<u8> {
    let data_len = wav_data_len(mode, budget_ms);
    let mut buf = Vec::with_capacity(WAV_HEADER_LEN);

    put_fourcc(&mut buf, b"RIFF");
    put_u32(&mut buf, data_len.saturating_add(WAV_HEADER_LEN as u32 - 8));
    put_fourcc(&mut buf, b"WAVE");

    put_fourcc(&mut buf, b"fmt ");
    put_u32(&mut buf, 16);
    put_u16(&mut buf, 1); // PCM
    put_u16(&mut buf, mode.channels);
    put_u32(&mut buf, mode.sample_rate);
    put_u32(&mut buf, mode.bytes_per_second());
    put_u16(&mut buf, mode.block_align());
    put_u16(&mut buf, mode.sample_bytes * 8);

    put_fourcc(&mut buf, b"data");
    put_u32(&mut buf, data_len);

    debug_assert_eq!(buf.len(), WAV_HEADER_LEN);
    buf
}

/// Build the fixed AVI leading structure: stream headers plus one open,
/// unterminated `movi` list the Data frames are appended into.
pub fn avi_header(mode: &VideoMode, budget_ms: u64) -> Vec<u8> {
    let frames = avi_frame_count(mode, budget_ms);
    let fps = mode.fps.max(1) as u32;
    // Rough per-frame ceiling used by players to size buffers.
    let bytes_per_frame = mode.width as u32 * mode.height as u32 * mode.depth as u32 / 10;
    let mut buf = Vec::with_capacity(AVI_HEADER_LEN);

    put_fourcc(&mut buf, b"RIFF");
    put_u32(&mut buf, u32::MAX); // total size unknown, forward-only
    put_fourcc(&mut buf, b"AVI ");

    put_fourcc(&mut buf, b"LIST");
    put_u32(&mut buf, AVI_HDRL_LEN);
    put_fourcc(&mut buf, b"hdrl");

    put_fourcc(&mut buf, b"avih");
    put_u32(&mut buf, AVI_AVIH_LEN);
    put_u32(&mut buf, 1_000_000 / fps); // microseconds per frame
    put_u32(&mut buf, fps.saturating_mul(bytes_per_frame)); // max bytes/sec
    put_u32(&mut buf, 0); // padding granularity
    put_u32(&mut buf, 0x910); // HASINDEX | ISINTERLEAVED | TRUSTCKTYPE
    put_u32(&mut buf, frames);
    put_u32(&mut buf, 0); // initial frames
    put_u32(&mut buf, 1); // streams
    put_u32(&mut buf, 0x10_0000); // suggested buffer size
    put_u32(&mut buf, mode.width as u32);
    put_u32(&mut buf, mode.height as u32);
    for _ in 0..4 {
        put_u32(&mut buf, 0); // reserved
    }

    put_fourcc(&mut buf, b"LIST");
    put_u32(&mut buf, AVI_STRL_LEN);
    put_fourcc(&mut buf, b"strl");

    put_fourcc(&mut buf, b"strh");
    put_u32(&mut buf, AVI_STRH_LEN);
    put_fourcc(&mut buf, b"vids");
    put_fourcc(&mut buf, &mode.fourcc);
    put_u32(&mut buf, 0); // flags
    put_u16(&mut buf, 0); // priority
    put_u16(&mut buf, 0); // language
    put_u32(&mut buf, 0); // initial frames
    put_u32(&mut buf, 1); // scale
    put_u32(&mut buf, fps); // rate (rate/scale = fps)
    put_u32(&mut buf, 0); // start
    put_u32(&mut buf, frames); // length, in frames
    put_u32(&mut buf, bytes_per_frame); // suggested buffer size
    put_u32(&mut buf, u32::MAX); // quality: default
    put_u32(&mut buf, 0); // sample size: varies
    put_u16(&mut buf, 0); // rcFrame left
    put_u16(&mut buf, 0); // rcFrame top
    put_u16(&mut buf, mode.width); // rcFrame right
    put_u16(&mut buf, mode.height); // rcFrame bottom

    put_fourcc(&mut buf, b"strf");
    put_u32(&mut buf, AVI_STRF_LEN);
    put_u32(&mut buf, AVI_STRF_LEN); // BITMAPINFOHEADER biSize
    put_u32(&mut buf, mode.width as u32);
    put_u32(&mut buf, mode.height as u32);
    put_u16(&mut buf, 1); // planes
    put_u16(&mut buf, mode.depth * 8); // bits per pixel
    put_fourcc(&mut buf, &mode.fourcc);
    put_u32(&mut buf, bytes_per_frame); // image size estimate
    put_u32(&mut buf, 0); // horizontal ppm
    put_u32(&mut buf, 0); // vertical ppm
    put_u32(&mut buf, 0); // colors used
    put_u32(&mut buf, 0); // colors important

    put_fourcc(&mut buf, b"LIST");
    put_u32(&mut buf, u32::MAX); // movi length unknown, left open
    put_fourcc(&mut buf, b"movi");

    debug_assert_eq!(buf.len(), AVI_HEADER_LEN);
    buf
}

/// WAV trailer: nothing to emit, the header already declared the length.
pub fn wav_trailer(_bytes_emitted: u64) -> Vec<u8> {
    Vec::new()
}

/// AVI trailer: no idx1 index is produced in this design.
pub fn avi_trailer(_frames_emitted: u64) -> Vec<u8> {
    Vec::new()
}

/// Multipart part header preceding each MJPEG frame on the wire.
pub fn mjpeg_part_header(frame_len: usize) -> Vec<u8> {
    format!(
        "--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame_len
    )
    .into_bytes()
}
