use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use mic_visualiser_core::{
    audio::tone::ToneBackend, AppConfig, AudioContext, CaptureConstraints, ControlSurface,
    FrameClock, GainSetting, LevelMeter, LogicalSize, MicVizError, RenderLoop, Scheduler,
    SignalChainManager, SpectrumView, Surface,
};
use tracing_subscriber::EnvFilter;

fn main() -> mic_visualiser_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Live(args) => run_live(args),
        Commands::Devices => list_devices(),
    }
}

fn run_live(args: LiveArgs) -> mic_visualiser_core::Result<()> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(gain) = args.gain {
        config.audio.initial_gain = GainSetting::snapped(gain).value();
    }
    if let Some(fps) = args.fps {
        config.display.refresh_rate = fps;
    }
    if args.device.is_some() {
        config.audio.device = args.device.clone();
    }
    config.validate()?;

    tracing::info!(source = ?args.source, seconds = args.seconds, "starting live mode");

    let context = build_context(&args, &config)?;
    let chain = SignalChainManager::new(context)
        .with_constraints(CaptureConstraints::from(&config.audio))
        .with_analyser_config(config.analyser)
        .with_gain(config.audio.initial_gain);
    let mut controls = ControlSurface::new(chain);

    if let Err(err) = controls.start() {
        // Keep running so the idle placeholders are still rendered.
        tracing::error!(%err, "{}", controls.error_message().unwrap_or_default());
    }

    let display = &config.display;
    let dpr = display.device_pixel_ratio;
    let mut scheduler = Scheduler::new();
    let mut meter = RenderLoop::mount(
        &mut scheduler,
        LevelMeter::new(),
        LogicalSize::new(display.meter_size[0], display.meter_size[1]),
        dpr,
    );
    let mut spectrum = RenderLoop::mount(
        &mut scheduler,
        SpectrumView::new(),
        LogicalSize::new(display.spectrum_size[0], display.spectrum_size[1]),
        dpr,
    );

    let mut clock = FrameClock::new(display.refresh_rate);
    let frames = u64::from(display.refresh_rate) * args.seconds;
    while clock.frames() < frames {
        clock.wait_next();

        for token in scheduler.take_due() {
            let analyser = controls.analyser();
            let drawn = if meter.owns(&token) {
                meter.run_frame(&mut scheduler, token, analyser)
            } else if spectrum.owns(&token) {
                spectrum.run_frame(&mut scheduler, token, analyser)
            } else {
                Ok(())
            };
            if let Err(err) = drawn {
                tracing::warn!(%err, "frame skipped");
            }
        }

        if clock.frames() % u64::from(display.refresh_rate) == 0 {
            report(&controls, meter.renderer());
        }
    }

    meter.unmount(&mut scheduler);
    spectrum.unmount(&mut scheduler);

    if let Some(dir) = &args.snapshot_dir {
        std::fs::create_dir_all(dir)?;
        write_png(meter.surface(), &dir.join("level-meter.png"))?;
        write_png(spectrum.surface(), &dir.join("spectrum.png"))?;
        tracing::info!(dir = %dir.display(), "wrote surface snapshots");
    }

    controls.stop();
    Ok(())
}

fn build_context(args: &LiveArgs, config: &AppConfig) -> mic_visualiser_core::Result<AudioContext> {
    match args.source {
        Source::Tone => Ok(AudioContext::new(ToneBackend::new(
            args.tone_frequency,
            args.tone_amplitude,
        ))),
        Source::Mic => mic_context(config),
    }
}

#[cfg(feature = "cpal")]
fn mic_context(config: &AppConfig) -> mic_visualiser_core::Result<AudioContext> {
    use mic_visualiser_core::audio::cpal_backend::CpalBackend;

    Ok(AudioContext::new(CpalBackend::new(config.audio.device.clone())))
}

#[cfg(not(feature = "cpal"))]
fn mic_context(_config: &AppConfig) -> mic_visualiser_core::Result<AudioContext> {
    Err(MicVizError::msg(
        "microphone capture needs the `cpal` feature; rebuild with --features cpal or use --source tone",
    ))
}

#[cfg(feature = "cpal")]
fn list_devices() -> mic_visualiser_core::Result<()> {
    for name in mic_visualiser_core::audio::cpal_backend::input_device_names()? {
        println!("{name}");
    }
    Ok(())
}

#[cfg(not(feature = "cpal"))]
fn list_devices() -> mic_visualiser_core::Result<()> {
    Err(MicVizError::msg("device listing needs the `cpal` feature"))
}

fn report(controls: &ControlSurface, meter: &LevelMeter) {
    match meter.last_reading() {
        Some(reading) => tracing::info!(
            rms = reading.rms,
            peak = reading.peak,
            clipping = reading.clipping,
            gain = %controls.gain(),
            "levels"
        ),
        None => tracing::info!(status = ?controls.status(), "idle"),
    }
}

fn write_png(surface: &Surface, path: &Path) -> mic_visualiser_core::Result<()> {
    let image = image::RgbaImage::from_raw(
        surface.width(),
        surface.height(),
        surface.as_rgba().to_vec(),
    )
    .ok_or_else(|| MicVizError::msg("surface buffer does not match its dimensions"))?;
    image
        .save(path)
        .map_err(|err| MicVizError::msg(format!("failed to write {}: {err}", path.display())))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time microphone level meter and spectrum", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture audio and drive both visualisations for a while.
    Live(LiveArgs),
    /// List capture devices.
    Devices,
}

#[derive(clap::Args, Debug)]
struct LiveArgs {
    /// Where the audio comes from.
    #[arg(long, value_enum, default_value_t = Source::Tone)]
    source: Source,
    /// Input gain, snapped to 0.05 steps and clamped to 0.25..=4.0.
    #[arg(short, long)]
    gain: Option<f32>,
    /// How long to run before exiting.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Refresh rate of the render loops.
    #[arg(long)]
    fps: Option<u32>,
    /// Optional JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory to write the final frame of each surface as PNG.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
    /// Capture device name (microphone source only).
    #[arg(long)]
    device: Option<String>,
    #[arg(long, default_value_t = 440.0)]
    tone_frequency: f32,
    #[arg(long, default_value_t = 0.5)]
    tone_amplitude: f32,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Source {
    /// Synthetic sine wave.
    Tone,
    /// Default (or `--device`) microphone.
    Mic,
}
