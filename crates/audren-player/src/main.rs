//! Audren Player - headless demo driver for the audio renderer
//!
//! Loads the renderer configuration, submits a demo scene through the binary
//! update protocol, and drives frames into the configured sink. Halfway
//! through, a second update stops the tone so the reverb tail can be heard.
//!
//! ## Command line flags
//!
//! - `--config <path>`: configuration file (default: user config directory)
//! - `--seconds <n>`: how long to render (default: 4)
//! - `--write-config`: save the effective configuration and exit

mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use audren_core::config::{default_config_path, load_config, save_config, RendererConfig};
use audren_core::driver::{FrameDriver, ThreadTimer};
use audren_core::protocol::UpdateResponse;
use audren_core::sink::create_sink;
use audren_core::AudioRenderer;

use demo::DemoScene;

const CONFIG_FILE: &str = "renderer.yaml";
const DEFAULT_SECONDS: u64 = 4;

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Submit one update and log anything the renderer flagged
fn submit(renderer: &AudioRenderer, blob: &[u8]) -> Result<()> {
    let response = renderer.update(blob).context("Renderer rejected the update")?;
    let response = UpdateResponse::decode(&response).context("Malformed update response")?;
    for code in response.error_codes() {
        log::warn!("Renderer reported error {:#x}", code);
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = flag_value(&args, "--config")
        .map(PathBuf::from)
        .unwrap_or_else(|| default_config_path(CONFIG_FILE));
    let seconds = match flag_value(&args, "--seconds") {
        Some(value) => value.parse().context("--seconds expects a whole number")?,
        None => DEFAULT_SECONDS,
    };

    let config: RendererConfig = load_config(&config_path);
    if args.iter().any(|arg| arg == "--write-config") {
        save_config(&config, &config_path)?;
        log::info!("Configuration written to {:?}", config_path);
        return Ok(());
    }
    config.renderer.validate()?;
    if config.renderer.voice_count == 0 || config.renderer.effect_count == 0 || config.renderer.sink_count == 0 {
        bail!("The demo scene needs at least one voice, one effect and one sink");
    }
    if config.renderer.submix_count == 0 {
        bail!("The demo scene needs at least one sub-mix");
    }

    log::info!("audren-player starting up ({:?})", config.output.backend);

    let mut scene = DemoScene::new(&config.renderer);
    let renderer = Arc::new(AudioRenderer::new(config.renderer.clone(), scene.memory())?);
    renderer.set_trace_commands(config.trace_commands);
    submit(&renderer, &scene.start_update())?;

    let sink = create_sink(&config.output.backend)?;
    let mut driver = FrameDriver::new(
        Arc::clone(&renderer),
        sink,
        config.output.channels,
        Box::new(ThreadTimer::new()),
    );
    driver.start()?;

    let frames_per_second = (config.renderer.sample_rate / config.renderer.sample_count) as u64;
    let total_frames = seconds * frames_per_second;
    let stop_at = total_frames / 2;
    let mut stopped_tone = false;

    let ticker = crossbeam::channel::tick(Duration::from_millis(20));
    while renderer.elapsed_frame_count() < total_frames {
        if ticker.recv().is_err() {
            break;
        }
        if !stopped_tone && renderer.elapsed_frame_count() >= stop_at {
            submit(&renderer, &scene.stop_update())?;
            stopped_tone = true;
            log::info!("Tone stopped at frame {}", renderer.elapsed_frame_count());
        }
    }

    driver.stop();
    log::info!("Rendered {} frames", renderer.elapsed_frame_count());
    Ok(())
}
