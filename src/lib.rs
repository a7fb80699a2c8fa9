//! Avcast: live audio/video capture and streaming pipeline
//!
//! This library provides the core functionality for:
//! - Publishing capture events over a synchronous single-thread dispatch bus
//! - Pacing producers to their primary consumer with a rendezvous gate
//! - Building streamable WAV and AVI headers with best-effort lengths
//! - Running audio and video capture workers on dedicated threads
//! - Driving the sensor through a table of symbolic attributes
//!
//! # Architecture
//!
//! ```text
//!          ┌──────────────┐                    ┌──────────────┐
//!          │ Audio worker │                    │ Video worker │
//!          │ (PCM slices) │                    │ (JPEG frames)│
//!          └──────┬───────┘                    └──────┬───────┘
//!                 │ Start/Data/Stop                   │
//!                 ▼                                   ▼
//!          ┌─────────────────────────────────────────────────┐
//!          │                   Event bus                     │
//!          │        (one dispatch thread, per-topic)         │
//!          └──────┬──────────────────┬───────────────┬───────┘
//!                 │                  │               │
//!                 ▼                  ▼               ▼
//!          ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//!          │ Forward sink │  │ Console meter│  │  (your sink) │
//!          │ (WAV/MJPEG)  │  │  (VU, stats) │  └──────────────┘
//!          └──────┬───────┘  └──────────────┘
//!                 │ permits
//!                 ▼
//!          ┌──────────────┐
//!          │Rendezvous    │──▶ paces the workers
//!          │gate          │
//!          └──────────────┘
//! ```
//!
//! The mode controller owns worker lifecycle and the sensor; the
//! console and CLI are thin layers over [`ModeController::execute`].

pub mod bus;
pub mod capture;
pub mod cli;
pub mod config;
pub mod console;
pub mod container;
pub mod controller;
pub mod error;
pub mod sensor;
pub mod sinks;
pub mod sync;

pub use bus::EventBus;
pub use capture::{AudioMode, CaptureMode, EventKind, StreamEvent, StreamKind, VideoMode};
pub use cli::{Cli, Commands, SensorAction};
pub use config::Config;
pub use controller::{Action, ControlReply, ControlRequest, ModeController, TargetMask};
pub use error::{AvcastError, Result};
