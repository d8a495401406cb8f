use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use crtprefs::{CrtConfig, CrtPreferences, PreferenceStore, Validate};
use image::RgbaImage;
use renderer::{
    write_jpeg, CrtMode, CrtSequencer, GpuDevice, GpuPowerPreference, RenderDevice,
    ScreenshotSequencer, SessionPhase, ShaderEnvironment, SoftwareDevice,
};
use tracing_subscriber::EnvFilter;

use crate::cli::{Backend, CaptureArgs, PipelineArgs, RenderArgs};
use crate::paths::AppPaths;

/// Upper bound on `process` calls spent waiting for the background composite.
const MAX_COMPOSITE_POLLS: usize = 10_000;
const COMPOSITE_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn capture(args: CaptureArgs) -> Result<()> {
    let config = load_config(&args.pipeline)?;
    let mut settings = config.capture.clone();
    if let Some(dir) = args.output_dir {
        settings.output_dir = Some(dir);
    }
    if let Some(warmup) = args.warmup {
        settings.warmup_frames = warmup;
    }
    settings.validate()?;
    fs::create_dir_all(settings.output_dir()).with_context(|| {
        format!(
            "failed to create output directory {}",
            settings.output_dir().display()
        )
    })?;

    let frames = load_frames(&args.frames)?;
    let (width, height) = frames[0].dimensions();
    let cartridge = match args.cartridge {
        Some(name) => name,
        None => file_stem(&args.frames[0]),
    };

    let preferences = Arc::new(preference_store(config.crt)?);
    let mut device = open_device(args.pipeline.backend, args.pipeline.gpu_power)?;
    let sources = frames
        .iter()
        .map(|frame| device.upload(frame))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to upload video frames")?;
    drop(frames);

    let frame_budget = settings.exposures_for(args.mode) as usize
        + settings.warmup_frames as usize
        + MAX_COMPOSITE_POLLS;
    let mut sequencer = ScreenshotSequencer::new(preferences, settings);
    if !sequencer.start_process(args.mode, &cartridge, args.suffix.as_deref()) {
        bail!("a screenshot session is already in progress");
    }

    let mut finished = false;
    for source in sources.iter().cycle().take(frame_budget) {
        let env = ShaderEnvironment::new(width, height, *source);
        match sequencer.process(device.as_mut(), &env) {
            SessionPhase::Saving => {
                finished = true;
                break;
            }
            SessionPhase::Idle => bail!("screenshot session aborted; see log for details"),
            SessionPhase::Compositing => thread::sleep(COMPOSITE_POLL_INTERVAL),
            SessionPhase::Warming | SessionPhase::Accumulating => {}
        }
    }
    if !finished {
        bail!("screenshot session did not finish within {frame_budget} frames");
    }

    for saved in sequencer.wait_for_saves() {
        let path = saved.context("failed to write screenshot")?;
        println!("{}", path.display());
    }
    Ok(())
}

pub fn render(args: RenderArgs) -> Result<()> {
    let config = load_config(&args.pipeline)?;
    let frame = load_frame(&args.input)?;
    let (width, height) = frame.dimensions();

    let mut device = open_device(args.pipeline.backend, args.pipeline.gpu_power)?;
    let source = device.upload(&frame)?;
    let env = ShaderEnvironment::new(width, height, source);
    let mut crt = CrtSequencer::new();
    let output = crt.process(device.as_mut(), &env, &config.crt, CrtMode::Display)?;
    let image = device.read_pixels(output)?;

    let is_jpeg = args
        .output
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
    if is_jpeg {
        write_jpeg(&image, &args.output)?;
    } else {
        image
            .save(&args.output)
            .with_context(|| format!("failed to save {}", args.output.display()))?;
    }
    println!("{}", args.output.display());
    Ok(())
}

pub fn defaults_where() -> Result<()> {
    let paths = AppPaths::discover()?;
    println!("Configuration:");
    println!("  config dir:  {}", paths.config_dir().display());
    println!("  config file: {}", paths.config_file().display());
    Ok(())
}

pub fn defaults_dump() -> Result<()> {
    print!("{}", CrtConfig::default().to_toml_string()?);
    Ok(())
}

fn load_config(args: &PipelineArgs) -> Result<CrtConfig> {
    let path = match &args.config {
        Some(path) => {
            if !path.exists() {
                bail!("config file {} does not exist", path.display());
            }
            path.clone()
        }
        None => AppPaths::discover()?.config_file(),
    };
    let config = CrtConfig::load_or_default(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

fn preference_store(initial: CrtPreferences) -> Result<PreferenceStore<CrtPreferences>> {
    PreferenceStore::builder()
        .listener(|previous: &CrtPreferences, current: &CrtPreferences| {
            tracing::debug!(
                enabled = current.enabled,
                was_enabled = previous.enabled,
                "CRT preferences changed"
            );
        })
        .build(initial)
        .context("invalid CRT preferences")
}

fn open_device(backend: Backend, power: GpuPowerPreference) -> Result<Box<dyn RenderDevice>> {
    match backend {
        Backend::Software => Ok(Box::new(SoftwareDevice::new())),
        Backend::Gpu => Ok(Box::new(
            GpuDevice::new(power).context("failed to initialise GPU backend")?,
        )),
        Backend::Auto => match GpuDevice::new(power) {
            Ok(device) => Ok(Box::new(device)),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "GPU unavailable; using software backend");
                Ok(Box::new(SoftwareDevice::new()))
            }
        },
    }
}

fn load_frame(path: &Path) -> Result<RgbaImage> {
    Ok(image::open(path)
        .with_context(|| format!("failed to load frame {}", path.display()))?
        .into_rgba8())
}

fn load_frames(paths: &[PathBuf]) -> Result<Vec<RgbaImage>> {
    let mut frames = Vec::with_capacity(paths.len());
    for path in paths {
        let frame = load_frame(path)?;
        if let Some(first) = frames.first().map(RgbaImage::dimensions) {
            if frame.dimensions() != first {
                return Err(anyhow!(
                    "frame {} is {}x{}, expected {}x{}",
                    path.display(),
                    frame.width(),
                    frame.height(),
                    first.0,
                    first.1
                ));
            }
        }
        frames.push(frame);
    }
    if frames.is_empty() {
        bail!("no frames supplied");
    }
    Ok(frames)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::TempDir;

    #[test]
    fn mismatched_frames_are_rejected() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]))
            .save(&a)
            .unwrap();
        RgbaImage::from_pixel(4, 2, Rgba([0, 0, 0, 255]))
            .save(&b)
            .unwrap();

        let err = load_frames(&[a, b]).unwrap_err();
        assert!(err.to_string().contains("expected 4x4"), "{err}");
    }

    #[test]
    fn cartridge_name_falls_back_to_frame_stem() {
        assert_eq!(file_stem(Path::new("/tmp/pitfall.png")), "pitfall");
    }
}
