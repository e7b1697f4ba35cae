use anyhow::{Context, Result, bail};
use callscribe::cli::{Cli, Commands};
use callscribe::config::Config;
use callscribe::device::DeviceRegistry;
use callscribe::pipeline::{EventKind, PipelineController, PipelineState};
use callscribe::recognize::RecognizerEngine;
use clap::{CommandFactory, Parser};
use crossbeam_channel::RecvTimeoutError;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Devices => {
            let config = load_config(cli.config.as_deref())?;
            list_devices(&config)
        }
        Commands::Run {
            mic,
            loopback,
            model,
            language,
            duration,
            json,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if mic.is_some() {
                config.audio.microphone_device = mic;
            }
            if loopback.is_some() {
                config.audio.loopback_device = loopback;
            }
            if model.is_some() {
                config.recognizer.model_path = model;
            }
            if let Some(language) = language {
                config.recognizer.language = language;
            }
            run(config, duration, json, cli.verbose)
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "callscribe",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(level)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/callscribe/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides apply on top in every case.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path).with_context(|| format!("loading config from {}", path.display()))?
    } else if let Some(path) = Config::default_path() {
        Config::load_or_default(&path)
            .with_context(|| format!("loading config from {}", path.display()))?
    } else {
        Config::default()
    };
    Ok(config.with_env_overrides())
}

#[cfg(feature = "cpal-audio")]
fn registry() -> Result<DeviceRegistry> {
    Ok(DeviceRegistry::new(Arc::new(
        callscribe::device::CpalBackend::new(),
    )))
}

#[cfg(not(feature = "cpal-audio"))]
fn registry() -> Result<DeviceRegistry> {
    bail!("this build has no audio backend (rebuild with --features cpal-audio)")
}

#[cfg(feature = "whisper")]
fn engine(config: &Config) -> Result<Arc<dyn RecognizerEngine>> {
    let model_path = resolve_model_path(config)?;
    let engine = callscribe::recognize::whisper::WhisperEngine::new(
        callscribe::recognize::whisper::WhisperEngineConfig {
            model_path,
            language: config.recognizer.language.clone(),
            threads: (config.recognizer.threads > 0).then_some(config.recognizer.threads),
        },
    )?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "whisper"))]
fn engine(_config: &Config) -> Result<Arc<dyn RecognizerEngine>> {
    bail!("this build has no recognizer (rebuild with --features whisper)")
}

#[cfg(feature = "whisper")]
fn resolve_model_path(config: &Config) -> Result<std::path::PathBuf> {
    match &config.recognizer.model_path {
        Some(path) => Ok(path.clone()),
        None => bail!(
            "no model configured; set recognizer.model_path or pass --model"
        ),
    }
}

fn list_devices(config: &Config) -> Result<()> {
    let registry = registry()?;
    let devices = registry.list_devices();
    if devices.is_empty() {
        println!("No capture devices found.");
        return Ok(());
    }

    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        let preferred = config
            .audio
            .preferred_device(match device.role {
                callscribe::device::DeviceRole::Input => callscribe::ChannelId::Microphone,
                callscribe::device::DeviceRole::Loopback => callscribe::ChannelId::Loopback,
            })
            .is_some_and(|id| id == device.id);
        let chosen = if preferred { " (configured)" } else { "" };
        println!(
            "{} [{}] {} — {}Hz {}ch {:?}{}",
            marker,
            device.role,
            device.id,
            device.native_sample_rate,
            device.native_channel_count,
            device.native_sample_format,
            chosen
        );
    }
    Ok(())
}

fn run(config: Config, duration_secs: u64, json: bool, verbose: u8) -> Result<()> {
    config.validate()?;
    let registry = registry()?;
    let engine = engine(&config)?;

    let mut controller = PipelineController::new(registry, engine, config);
    let transcripts = controller.subscribe_transcripts();
    let levels = controller.subscribe_levels();

    controller.start()?;
    eprintln!("Recording both channels. Press Ctrl+C to stop.");

    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));

    loop {
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            break;
        }
        if matches!(controller.state(), PipelineState::Failed(_)) {
            break;
        }

        match transcripts.recv_timeout(Duration::from_millis(100)) {
            Ok(event) if json => {
                let line = serde_json::json!({
                    "channel": event.channel,
                    "kind": event.kind,
                    "text": event.text,
                    "confidence": event.confidence,
                    "sequence": event.sequence,
                });
                println!("{}", line);
            }
            Ok(event) => match event.kind {
                EventKind::Final => {
                    println!("[{}] {}", event.channel, event.text);
                }
                EventKind::Partial if verbose > 0 => {
                    eprintln!("[{}] … {}", event.channel, event.text);
                }
                EventKind::Partial => {}
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if verbose > 1 {
            while let Ok(level) = levels.try_recv() {
                eprintln!(
                    "[{}] level {:5.1} peak {:5.1}",
                    level.channel, level.level, level.peak
                );
            }
        }
    }

    controller.stop()?;

    for problem in controller.problems() {
        eprintln!("warning: {}: {:?}: {}", problem.channel, problem.kind, problem.detail);
    }
    if verbose > 0 {
        let metrics = controller.metrics();
        eprintln!(
            "mic: {} dropped chunks, {} clipped samples, {:.2}ms avg latency",
            metrics.microphone.dropped_chunks,
            metrics.microphone.clipped_samples,
            metrics.microphone.average_chunk_latency_ms
        );
        eprintln!(
            "loopback: {} dropped chunks, {} clipped samples, {:.2}ms avg latency",
            metrics.loopback.dropped_chunks,
            metrics.loopback.clipped_samples,
            metrics.loopback.average_chunk_latency_ms
        );
    }
    Ok(())
}
