//! Error types for avcast
//!
//! Uses thiserror for ergonomic error definitions. Only control-surface
//! errors propagate to callers; device and bus timeouts are internal
//! signals that shorten a stream or drop an event.

use thiserror::Error;

/// Top-level error type for the avcast application
#[derive(Error, Debug)]
pub enum AvcastError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to the mode controller's caller.
///
/// A start request against an already-running stream is not an error at
/// all: the controller answers `Ok` and spawns nothing.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Failed to spawn capture worker: {0}")]
    ResourceExhausted(String),

    #[error("{0} capture is not available on this build")]
    NotSupported(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors from the capture peripheral or the transcode path.
///
/// Never propagated past the worker: any of these ends the stream early
/// through the normal Stop path.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Read timed out after {0} ms")]
    ReadTimeout(u64),

    #[error("Device read failed: {0}")]
    Read(String),

    #[error("Device disconnected: {0}")]
    Disconnected(String),

    #[error("JPEG transcode failed: {0}")]
    Transcode(String),

    #[error("Unknown sensor attribute: '{0}'")]
    UnknownAttribute(String),

    #[error("Sensor register write failed: {0:#06x}")]
    Register(u16),
}

/// Bus publish failure: the dispatch thread did not accept (or finish
/// delivering) the event in time. The occurrence is dropped for all
/// handlers; there is no partial or retried delivery.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BusError {
    #[error("Publish timed out after {0} ms")]
    Timeout(u64),

    #[error("Dispatch thread has shut down")]
    Closed,
}

/// Result type alias using AvcastError
pub type Result<T> = std::result::Result<T, AvcastError>;
