//! Avcast - live audio/video capture and streaming pipeline
//!
//! Run with `avcast` or `avcast console` for the interactive console.
//! Use `avcast stream audio --duration 5000` for a one-shot capture.
//! Use `avcast sensor dump` to inspect the sensor attribute table.

use avcast::capture::StreamKind;
use avcast::cli::{Cli, Commands, SensorAction};
use avcast::config::{self, Config};
use avcast::console::{self, ConsoleCommand};
use avcast::controller::{Action, ControlReply, ControlRequest, ModeController, TargetMask};
use avcast::sinks::{attach_forward, ForwardSpec};
use avcast::EventBus;
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("avcast={},warn", log_level))),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let mut config = config::load_config(cli.config.as_deref())?;

    // Apply CLI overrides
    if let Some(quality) = cli.jpeg_quality {
        config.video.jpeg_quality = quality;
    }
    if let Some(rate) = cli.sample_rate {
        config.audio.sample_rate = rate;
    }

    // Run the appropriate command
    match cli.command.unwrap_or(Commands::Console) {
        Commands::Console => {
            run_console(config).await?;
        }

        Commands::Stream {
            target,
            duration,
            output,
            snapshot,
        } => {
            run_stream(config, &target, duration, output.as_deref(), snapshot).await?;
        }

        Commands::Config => {
            show_config(&config);
        }

        Commands::Sensor { action } => {
            run_sensor(config, action)?;
        }
    }

    Ok(())
}

/// Interactive control console over stdin
async fn run_console(config: Config) -> anyhow::Result<()> {
    let controller = Arc::new(ModeController::new(EventBus::new(), config));
    println!("avcast console, type 'help' for commands");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match console::parse(&line) {
                    Ok(ConsoleCommand::Control(request)) => {
                        let ctl = Arc::clone(&controller);
                        // Worker spawn and stop waits block; keep them
                        // off the async runtime.
                        match tokio::task::spawn_blocking(move || ctl.execute(request)).await? {
                            Ok(ControlReply::Done) => {}
                            Ok(ControlReply::Status { audio, video }) => {
                                println!(
                                    "audio: {}  video: {}",
                                    if audio { "running" } else { "idle" },
                                    if video { "running" } else { "idle" }
                                );
                            }
                            Ok(ControlReply::Text(text)) => print!("{}", ensure_newline(text)),
                            Err(e) => eprintln!("error: {}", e),
                        }
                    }
                    Ok(ConsoleCommand::Help) => print!("{}", console::HELP),
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(ConsoleCommand::Empty) => {}
                    Err(e) => eprintln!("error: {}", e),
                }
            }
        }
    }

    let ctl = Arc::clone(&controller);
    tokio::task::spawn_blocking(move || ctl.shutdown()).await?;
    Ok(())
}

fn ensure_newline(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

/// One-shot bounded capture to a file or stdout
async fn run_stream(
    config: Config,
    target: &str,
    duration: u64,
    output: Option<&std::path::Path>,
    snapshot: bool,
) -> anyhow::Result<()> {
    let (kind, mask) = match target {
        "audio" | "aud" => (StreamKind::Audio, TargetMask::AUDIO),
        "video" | "vid" => (StreamKind::Video, TargetMask::VIDEO),
        other => anyhow::bail!("Unknown stream target '{}', expected audio or video", other),
    };

    let controller = Arc::new(ModeController::new(EventBus::new(), config));
    let writer: Box<dyn Write + Send> = match output {
        Some(path) => Box::new(std::fs::File::create(path)?),
        None => Box::new(std::io::stdout()),
    };
    let sink = attach_forward(
        &controller.bus(),
        &controller.gate(kind),
        ForwardSpec {
            topic: kind,
            writer,
            single_shot: snapshot,
        },
    )?;

    let ctl = Arc::clone(&controller);
    tokio::task::spawn_blocking(move || {
        ctl.execute(ControlRequest {
            target: mask,
            action: Action::Start {
                budget_ms: duration,
            },
        })
    })
    .await??;

    // The sink terminates once it has written the stream's Stop unit.
    let waiter = sink.clone();
    let mut done =
        tokio::task::spawn_blocking(
            move || {
                while !waiter.wait_terminated(Duration::from_millis(500)) {}
            },
        );
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping stream");
            let ctl = Arc::clone(&controller);
            tokio::task::spawn_blocking(move || {
                ctl.execute(ControlRequest { target: mask, action: Action::Stop })
            })
            .await??;
            let _ = (&mut done).await;
        }
        result = &mut done => {
            result?;
        }
    }

    let ctl = Arc::clone(&controller);
    tokio::task::spawn_blocking(move || ctl.shutdown()).await?;
    Ok(())
}

/// Print the effective configuration
fn show_config(config: &Config) {
    println!("Current Configuration\n");

    if let Some(path) = Config::default_path() {
        println!("config file: {:?}", path);
    }

    println!("\n[audio]");
    println!("  enabled = {}", config.audio.enabled);
    println!("  sample_rate = {}", config.audio.sample_rate);
    println!("  channels = {}", config.audio.channels);
    println!("  sample_bytes = {}", config.audio.sample_bytes);
    println!("  pace = {}", config.audio.pace);

    println!("\n[video]");
    println!("  enabled = {}", config.video.enabled);
    println!("  jpeg_quality = {}", config.video.jpeg_quality);
    println!("  pace = {}", config.video.pace);

    println!("\n[sensor]");
    println!("  persist_file = {:?}", config.sensor.persist_file);
    if let Some(path) = config.resolve_sensor_file() {
        println!("  resolved = {:?}", path);
    }

    println!("\n[timeouts]");
    println!("  read_ms = {}", config.timeouts.read_ms);
    println!("  gate_ms = {}", config.timeouts.gate_ms);
    println!("  drain_ms = {}", config.timeouts.drain_ms);
    println!("  publish_ms = {}", config.timeouts.publish_ms);
    println!("  stop_wait_ms = {}", config.timeouts.stop_wait_ms);
}

/// Sensor dump/load without starting any stream
fn run_sensor(config: Config, action: SensorAction) -> anyhow::Result<()> {
    let controller = ModeController::new(EventBus::new(), config);
    match action {
        SensorAction::Dump { json } => {
            let reply = controller.execute(ControlRequest {
                target: TargetMask::default(),
                action: Action::SensorDump { json },
            })?;
            if let ControlReply::Text(text) = reply {
                print!("{}", ensure_newline(text));
            }
        }
        SensorAction::Load { document } => {
            let json = match document.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)?,
                None => document,
            };
            controller.execute(ControlRequest {
                target: TargetMask::default(),
                action: Action::SensorLoad { json },
            })?;
            println!("sensor settings applied");
        }
    }
    Ok(())
}
