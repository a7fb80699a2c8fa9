//! Event sinks
//!
//! Sinks are bus handlers attached per stream. The visual sinks render
//! console meters inline on the dispatch thread; the forward sink hands
//! payloads to its own writer thread so a slow byte stream never stalls
//! dispatch.

pub mod forward;
pub mod visual;

pub use forward::{attach_forward, ForwardSpec};
pub use visual::{attach_audio_meter, attach_video_meter};
