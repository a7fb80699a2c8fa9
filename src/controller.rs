//! Mode controller
//!
//! Single owner of stream lifecycle: it spawns capture workers, stops
//! them with a bounded wait, attaches diagnostic sinks and applies
//! sensor configuration. Every control surface (console, CLI) funnels
//! through [`ModeController::execute`].

use crate::bus::EventBus;
use crate::capture::{audio, video, AudioMode, StreamKind, VideoMode, WorkerHandle};
use crate::capture::synthetic::{PatternSource, ToneSource};
use crate::config::Config;
use crate::error::ControlError;
use crate::sensor::{self, SensorDriver, SimSensor};
use crate::sinks;
use crate::sync::RendezvousGate;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Which stream kinds a request addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetMask {
    pub audio: bool,
    pub video: bool,
}

impl TargetMask {
    pub const AUDIO: TargetMask = TargetMask {
        audio: true,
        video: false,
    };
    pub const VIDEO: TargetMask = TargetMask {
        audio: false,
        video: true,
    };
    pub const BOTH: TargetMask = TargetMask {
        audio: true,
        video: true,
    };

    pub fn parse(word: &str) -> Option<TargetMask> {
        match word {
            "audio" | "aud" => Some(TargetMask::AUDIO),
            "video" | "vid" => Some(TargetMask::VIDEO),
            "both" | "av" => Some(TargetMask::BOTH),
            _ => None,
        }
    }

    fn kinds(&self) -> impl Iterator<Item = StreamKind> + '_ {
        [
            self.audio.then_some(StreamKind::Audio),
            self.video.then_some(StreamKind::Video),
        ]
        .into_iter()
        .flatten()
    }
}

/// A control operation. Sensor actions ignore the target mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start streaming, bounded to `budget_ms` (0 for unbounded).
    Start { budget_ms: u64 },
    /// Stop streaming, waiting briefly for worker termination.
    Stop,
    /// Report whether the targeted streams are running.
    Query,
    /// Attach the console meter sinks for the targeted kinds.
    Meter,
    /// Dump the sensor attribute table.
    SensorDump { json: bool },
    /// Apply a flat JSON sensor settings document.
    SensorLoad { json: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub target: TargetMask,
    pub action: Action,
}

/// Outcome of a control request.
#[derive(Debug, PartialEq, Eq)]
pub enum ControlReply {
    Done,
    Status { audio: bool, video: bool },
    Text(String),
}

pub struct ModeController {
    bus: Arc<EventBus>,
    config: Config,
    audio_gate: Arc<RendezvousGate>,
    video_gate: Arc<RendezvousGate>,
    audio_worker: Mutex<Option<WorkerHandle>>,
    video_worker: Mutex<Option<WorkerHandle>>,
    sensor: Mutex<Box<dyn SensorDriver>>,
}

impl ModeController {
    /// Build a controller around the simulated sensor, restoring any
    /// persisted sensor settings.
    pub fn new(bus: Arc<EventBus>, config: Config) -> Self {
        let mut driver: Box<dyn SensorDriver> = Box::new(SimSensor::new());
        if let Some(path) = config.resolve_sensor_file() {
            if let Err(e) = sensor::load_from_file(driver.as_mut(), &path) {
                warn!("Persisted sensor settings not applied: {}", e);
            }
        }
        Self {
            bus,
            config,
            audio_gate: RendezvousGate::new(),
            video_gate: RendezvousGate::new(),
            audio_worker: Mutex::new(None),
            video_worker: Mutex::new(None),
            sensor: Mutex::new(driver),
        }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// The pacing gate a forwarding sink for `kind` must engage.
    pub fn gate(&self, kind: StreamKind) -> Arc<RendezvousGate> {
        match kind {
            StreamKind::Audio => Arc::clone(&self.audio_gate),
            StreamKind::Video => Arc::clone(&self.video_gate),
        }
    }

    fn audio_mode(&self) -> AudioMode {
        AudioMode {
            sample_rate: self.config.audio.sample_rate,
            channels: self.config.audio.channels,
            sample_bytes: self.config.audio.sample_bytes,
        }
    }

    /// Video geometry and rate come from the sensor's current state.
    fn video_mode(&self) -> VideoMode {
        let mut driver = self.sensor.lock().unwrap();
        let (width, height) = driver.frame_size();
        let fps = sensor::framerate(driver.as_mut())
            .map(|f| f.round() as u16)
            .unwrap_or(1)
            .max(1);
        VideoMode {
            fps,
            width,
            height,
            depth: 3,
            fourcc: *b"MJPG",
        }
    }

    fn running(&self, kind: StreamKind) -> bool {
        let slot = match kind {
            StreamKind::Audio => self.audio_worker.lock().unwrap(),
            StreamKind::Video => self.video_worker.lock().unwrap(),
        };
        slot.as_ref().is_some_and(|h| !h.is_terminated())
    }

    fn start(&self, kind: StreamKind, budget_ms: u64) -> Result<(), ControlError> {
        let mut slot = match kind {
            StreamKind::Audio => self.audio_worker.lock().unwrap(),
            StreamKind::Video => self.video_worker.lock().unwrap(),
        };
        if slot.as_ref().is_some_and(|h| !h.is_terminated()) {
            info!("{} stream already running", kind);
            return Ok(());
        }
        let enabled = match kind {
            StreamKind::Audio => self.config.audio.enabled,
            StreamKind::Video => self.config.video.enabled,
        };
        if !enabled {
            return Err(ControlError::NotSupported(match kind {
                StreamKind::Audio => "audio",
                StreamKind::Video => "video",
            }));
        }

        let spawned = match kind {
            StreamKind::Audio => {
                self.audio_gate.reset();
                audio::spawn(audio::AudioWorkerSpec {
                    source: Box::new(ToneSource::new(self.audio_mode(), self.config.audio.pace)),
                    mode: self.audio_mode(),
                    bus: Arc::clone(&self.bus),
                    gate: Arc::clone(&self.audio_gate),
                    timeouts: self.config.timeouts.clone(),
                    budget_ms,
                })
            }
            StreamKind::Video => {
                self.video_gate.reset();
                video::spawn(video::VideoWorkerSpec {
                    source: Box::new(PatternSource::new(
                        self.video_mode(),
                        self.config.video.pace,
                    )),
                    bus: Arc::clone(&self.bus),
                    gate: Arc::clone(&self.video_gate),
                    timeouts: self.config.timeouts.clone(),
                    jpeg_quality: self.config.video.jpeg_quality,
                    budget_ms,
                })
            }
        };
        let handle =
            spawned.map_err(|e| ControlError::ResourceExhausted(format!("{}: {}", kind, e)))?;
        *slot = Some(handle);
        Ok(())
    }

    fn stop(&self, kind: StreamKind) {
        // The slot stays locked through the wait so a concurrent start
        // cannot slip in while the worker is still draining.
        let mut slot = match kind {
            StreamKind::Audio => self.audio_worker.lock().unwrap(),
            StreamKind::Video => self.video_worker.lock().unwrap(),
        };
        let Some(handle) = slot.take() else {
            return;
        };
        handle.request_stop();
        let wait = Duration::from_millis(self.config.timeouts.stop_wait_ms);
        if !handle.wait_terminated(wait) {
            warn!("{} worker still draining after stop wait, keeping its slot", kind);
            *slot = Some(handle);
        }
    }

    fn attach_meters(&self, target: TargetMask) {
        // Registration is idempotent per tag, so repeated requests are
        // harmless.
        if target.audio {
            sinks::attach_audio_meter(&self.bus);
        }
        if target.video {
            sinks::attach_video_meter(&self.bus);
        }
    }

    fn configure_sensor(&self, json: &str) -> Result<(), ControlError> {
        let mut driver = self.sensor.lock().unwrap();
        sensor::load(driver.as_mut(), json)?;
        if let Some(path) = self.config.resolve_sensor_file() {
            if let Err(e) = sensor::save_to_file(driver.as_mut(), &path) {
                warn!("Sensor settings not persisted: {}", e);
            }
        }
        Ok(())
    }

    fn dump_sensor(&self, json: bool) -> String {
        let mut driver = self.sensor.lock().unwrap();
        if json {
            sensor::dump_json(driver.as_mut()).to_string()
        } else {
            sensor::dump_text(driver.as_mut())
        }
    }

    pub fn execute(&self, request: ControlRequest) -> Result<ControlReply, ControlError> {
        match request.action {
            Action::Start { budget_ms } => {
                for kind in request.target.kinds() {
                    self.start(kind, budget_ms)?;
                }
                Ok(ControlReply::Done)
            }
            Action::Stop => {
                for kind in request.target.kinds() {
                    self.stop(kind);
                }
                Ok(ControlReply::Done)
            }
            Action::Query => Ok(ControlReply::Status {
                audio: self.running(StreamKind::Audio),
                video: self.running(StreamKind::Video),
            }),
            Action::Meter => {
                self.attach_meters(request.target);
                Ok(ControlReply::Done)
            }
            Action::SensorDump { json } => Ok(ControlReply::Text(self.dump_sensor(json))),
            Action::SensorLoad { json } => {
                self.configure_sensor(&json)?;
                Ok(ControlReply::Done)
            }
        }
    }

    /// Stop everything and detach all sinks. Called on daemon shutdown.
    pub fn shutdown(&self) {
        self.stop(StreamKind::Audio);
        self.stop(StreamKind::Video);
        self.bus.unregister_topic(StreamKind::Audio);
        self.bus.unregister_topic(StreamKind::Video);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutConfig;

    fn quick_config() -> Config {
        let mut config = Config::default();
        config.sensor.persist_file = "disabled".to_string();
        config.audio.pace = false;
        config.video.pace = false;
        config.timeouts = TimeoutConfig {
            read_ms: 25,
            gate_ms: 100,
            drain_ms: 100,
            publish_ms: 50,
            stop_wait_ms: 1000,
        };
        config
    }

    fn controller() -> ModeController {
        ModeController::new(EventBus::new(), quick_config())
    }

    #[test]
    fn test_query_idle() {
        let ctl = controller();
        let reply = ctl
            .execute(ControlRequest {
                target: TargetMask::BOTH,
                action: Action::Query,
            })
            .unwrap();
        assert_eq!(
            reply,
            ControlReply::Status {
                audio: false,
                video: false
            }
        );
    }

    #[test]
    fn test_start_stop_audio() {
        let ctl = controller();
        ctl.execute(ControlRequest {
            target: TargetMask::AUDIO,
            action: Action::Start { budget_ms: 0 },
        })
        .unwrap();
        assert!(ctl.running(StreamKind::Audio));
        assert!(!ctl.running(StreamKind::Video));

        ctl.execute(ControlRequest {
            target: TargetMask::AUDIO,
            action: Action::Stop,
        })
        .unwrap();
        assert!(!ctl.running(StreamKind::Audio));
    }

    #[test]
    fn test_start_is_idempotent() {
        let ctl = controller();
        for _ in 0..3 {
            ctl.execute(ControlRequest {
                target: TargetMask::AUDIO,
                action: Action::Start { budget_ms: 0 },
            })
            .unwrap();
        }
        assert!(ctl.running(StreamKind::Audio));
        ctl.shutdown();
    }

    #[test]
    fn test_bounded_stream_finishes_alone() {
        let ctl = controller();
        ctl.execute(ControlRequest {
            target: TargetMask::AUDIO,
            action: Action::Start { budget_ms: 40 },
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(500));
        assert!(!ctl.running(StreamKind::Audio));
        // A finished stream can be started again.
        ctl.execute(ControlRequest {
            target: TargetMask::AUDIO,
            action: Action::Start { budget_ms: 40 },
        })
        .unwrap();
        ctl.shutdown();
    }

    #[test]
    fn test_stop_timeout_keeps_the_worker_slot() {
        use crate::capture::EventKind;
        use std::sync::Mutex;

        let mut config = quick_config();
        config.timeouts.stop_wait_ms = 50;
        let bus = EventBus::new();
        let kinds: Arc<Mutex<Vec<EventKind>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_kinds = Arc::clone(&kinds);
        // A slow sink keeps the worker draining well past the stop wait.
        bus.register(StreamKind::Audio, "probe", move |event| {
            sink_kinds.lock().unwrap().push(event.kind);
            if event.kind == EventKind::Data {
                std::thread::sleep(Duration::from_millis(400));
            }
        });
        let ctl = ModeController::new(bus, config);

        ctl.execute(ControlRequest {
            target: TargetMask::AUDIO,
            action: Action::Start { budget_ms: 0 },
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(100));
        ctl.execute(ControlRequest {
            target: TargetMask::AUDIO,
            action: Action::Stop,
        })
        .unwrap();

        // The wait expired while the worker was still draining; the
        // slot must keep the live handle so a restart cannot spawn a
        // second worker over it.
        assert!(ctl.running(StreamKind::Audio));
        ctl.execute(ControlRequest {
            target: TargetMask::AUDIO,
            action: Action::Start { budget_ms: 0 },
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(1500));
        assert!(!ctl.running(StreamKind::Audio));

        // One stream only: a single Start/Stop pair, nothing after Stop.
        let kinds = kinds.lock().unwrap();
        assert_eq!(kinds.iter().filter(|k| **k == EventKind::Start).count(), 1);
        assert_eq!(kinds.iter().filter(|k| **k == EventKind::Stop).count(), 1);
        assert_eq!(kinds.last(), Some(&EventKind::Stop));
    }

    #[test]
    fn test_disabled_kind_is_not_supported() {
        let mut config = quick_config();
        config.video.enabled = false;
        let ctl = ModeController::new(EventBus::new(), config);
        let result = ctl.execute(ControlRequest {
            target: TargetMask::VIDEO,
            action: Action::Start { budget_ms: 0 },
        });
        assert!(matches!(result, Err(ControlError::NotSupported("video"))));
    }

    #[test]
    fn test_stop_when_idle_is_ok() {
        let ctl = controller();
        ctl.execute(ControlRequest {
            target: TargetMask::BOTH,
            action: Action::Stop,
        })
        .unwrap();
    }

    #[test]
    fn test_sensor_configure_and_dump() {
        let ctl = controller();
        ctl.execute(ControlRequest {
            target: TargetMask::default(),
            action: Action::SensorLoad {
                json: r#"{"vflip": 1}"#.to_string(),
            },
        })
        .unwrap();
        let reply = ctl
            .execute(ControlRequest {
                target: TargetMask::default(),
                action: Action::SensorDump { json: true },
            })
            .unwrap();
        let ControlReply::Text(text) = reply else {
            panic!("expected text reply");
        };
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["vflip"], 1);
    }

    #[test]
    fn test_sensor_configure_error_propagates() {
        let ctl = controller();
        let result = ctl.execute(ControlRequest {
            target: TargetMask::default(),
            action: Action::SensorLoad {
                json: "not json".to_string(),
            },
        });
        assert!(matches!(result, Err(ControlError::InvalidArgument(_))));
    }

    #[test]
    fn test_video_mode_tracks_sensor() {
        let ctl = controller();
        ctl.execute(ControlRequest {
            target: TargetMask::default(),
            action: Action::SensorLoad {
                json: r#"{"framesize": 5}"#.to_string(),
            },
        })
        .unwrap();
        let mode = ctl.video_mode();
        assert_eq!((mode.width, mode.height), (320, 240));
    }
}
