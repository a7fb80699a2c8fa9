//! Synthetic capture sources
//!
//! Deterministic stand-ins for the audio and video peripherals, used by
//! the default build and by the pipeline tests. The tone source emits a
//! fixed sine; the pattern source renders a moving-bar RGB gradient so
//! the transcode path gets exercised on every frame.

use super::{AudioMode, AudioSource, PixelFormat, VideoFrame, VideoMode, VideoSource};
use crate::error::DeviceError;
use std::f32::consts::TAU;
use std::time::Duration;

const TONE_HZ: f32 = 440.0;

/// Sine-wave PCM source. With pacing enabled each read sleeps for the
/// wall-clock duration of the chunk it produces, approximating a real
/// microphone's delivery rate.
pub struct ToneSource {
    mode: AudioMode,
    phase: f32,
    pace: bool,
}

impl ToneSource {
    pub fn new(mode: AudioMode, pace: bool) -> Self {
        Self {
            mode,
            phase: 0.0,
            pace,
        }
    }
}

impl AudioSource for ToneSource {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, DeviceError> {
        let block = self.mode.block_align() as usize;
        let samples = buf.len() / block;
        let step = TAU * TONE_HZ / self.mode.sample_rate as f32;
        for i in 0..samples {
            let value = ((self.phase.sin() * 12000.0) as i16).to_le_bytes();
            for ch in 0..self.mode.channels as usize {
                let at = i * block + ch * self.mode.sample_bytes as usize;
                buf[at..at + 2].copy_from_slice(&value);
            }
            self.phase = (self.phase + step) % TAU;
        }
        if self.pace {
            let chunk = Duration::from_secs_f32(samples as f32 / self.mode.sample_rate as f32);
            std::thread::sleep(chunk.min(timeout));
        }
        Ok(samples * block)
    }
}

/// RGB test-pattern source: a horizontal gradient with a vertical bar
/// sweeping one column per frame. Frames come out as raw RGB so the
/// worker's JPEG transcoder runs on every one of them.
pub struct PatternSource {
    mode: VideoMode,
    frame_index: u32,
    pace: bool,
}

impl PatternSource {
    pub fn new(mode: VideoMode, pace: bool) -> Self {
        Self {
            mode,
            frame_index: 0,
            pace,
        }
    }
}

impl VideoSource for PatternSource {
    fn mode(&self) -> VideoMode {
        self.mode
    }

    fn grab(&mut self, timeout: Duration) -> Result<VideoFrame, DeviceError> {
        let width = self.mode.width as usize;
        let height = self.mode.height as usize;
        let bar = (self.frame_index as usize) % width.max(1);
        let mut data = vec![0u8; width * height * 3];
        for y in 0..height {
            for x in 0..width {
                let at = (y * width + x) * 3;
                if x == bar {
                    data[at] = 255;
                    data[at + 1] = 255;
                    data[at + 2] = 255;
                } else {
                    data[at] = (x * 255 / width.max(1)) as u8;
                    data[at + 1] = (y * 255 / height.max(1)) as u8;
                    data[at + 2] = 64;
                }
            }
        }
        self.frame_index = self.frame_index.wrapping_add(1);
        if self.pace && self.mode.fps > 0 {
            let interval = Duration::from_secs_f32(1.0 / self.mode.fps as f32);
            std::thread::sleep(interval.min(timeout));
        }
        Ok(VideoFrame {
            data,
            format: PixelFormat::Rgb888,
        })
    }
}
