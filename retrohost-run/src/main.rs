//! Headless runner: host one core, run a number of frames, optionally save the last frame.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Context, bail};
use clap::Parser;
use retrohost_core::{Core, CoreEvent, CoreOptions, FrameBuffer, Game};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Run a libretro core headlessly")]
struct Args {
    /// Path to the core shared library.
    core: PathBuf,

    /// Content to load. Omit for cores that run without content.
    content: Option<PathBuf>,

    /// Number of frames to run.
    #[arg(long, default_value_t = 60)]
    frames: u64,

    /// Firmware/BIOS directory.
    #[arg(long)]
    system_dir: Option<PathBuf>,

    /// Save data directory.
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Core assets directory.
    #[arg(long)]
    content_dir: Option<PathBuf>,

    /// Tell the core overscan should be shown.
    #[arg(long)]
    overscan: bool,

    /// Core option override, as `key=value`. May be repeated.
    #[arg(long = "set", value_parser = parse_key_value)]
    options: Vec<(String, String)>,

    /// Write the last frame to this PNG file.
    #[arg(long)]
    screenshot: Option<PathBuf>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("empty option key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

impl Args {
    fn core_options(&self) -> CoreOptions {
        let mut options = CoreOptions::new().overscan(self.overscan);
        if let Some(dir) = &self.system_dir {
            options = options.system_directory(dir);
        }
        if let Some(dir) = &self.save_dir {
            options = options.save_directory(dir);
        }
        if let Some(dir) = &self.content_dir {
            options = options.content_directory(dir);
        }
        for (key, value) in &self.options {
            options = options.option(key, value);
        }
        options
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let core = Core::open(&args.core, args.core_options())
        .with_context(|| format!("failed to host core {}", args.core.display()))?;
    let info = core.system_info()?;

    let game = args
        .content
        .as_ref()
        .map(|path| Game::load(path, &info))
        .transpose()
        .context("failed to read content")?;
    if game.is_none() && !core.supports_no_game() {
        bail!("{} needs content to run", info.library_name);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let samples = Arc::new(AtomicU64::new(0));
    {
        let shutdown = Arc::clone(&shutdown);
        let samples = Arc::clone(&samples);
        core.subscribe_all(move |event| match event {
            CoreEvent::Message { text, frames } => info!(frames, "core message: {text}"),
            CoreEvent::Shutdown => shutdown.store(true, Ordering::SeqCst),
            CoreEvent::AudioOutput { samples: data, .. } => {
                samples.fetch_add(data.len() as u64, Ordering::Relaxed);
            }
            CoreEvent::RumbleStateChanged {
                port,
                effect,
                strength,
            } => debug!(port, ?effect, strength, "rumble"),
            CoreEvent::VariablesChanged => debug!("core options changed"),
            // Logs are already traced by the host.
            CoreEvent::Log { .. } | CoreEvent::FrameReady => {}
        });
    }

    let av = core.boot(game.as_ref()).context("failed to start the core")?;
    info!(
        core = %info.library_name,
        version = %info.library_version,
        width = av.geometry.base_width,
        height = av.geometry.base_height,
        fps = av.fps,
        sample_rate = av.sample_rate,
        "core started"
    );
    for option in core.options() {
        debug!(key = %option.key, current = %option.current, "option");
    }

    let mut ran = 0;
    while ran < args.frames {
        if shutdown.load(Ordering::SeqCst) {
            info!("core requested shutdown");
            break;
        }
        core.run()?;
        ran += 1;
    }
    info!(
        frames = ran,
        audio_samples = samples.load(Ordering::Relaxed),
        "run finished"
    );

    if let Some(path) = &args.screenshot {
        match core.acquire_frame() {
            Some(frame) => {
                write_png(path, &frame)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), "screenshot saved");
            }
            None => warn!("core produced no frame, no screenshot written"),
        }
    }

    core.deinit()?;
    Ok(())
}

fn write_png(path: &Path, frame: &FrameBuffer) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), frame.width(), frame.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&frame.to_rgba8888())?;
    Ok(())
}
