use std::fmt;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use crtprefs::ExposureMode;
use renderer::GpuPowerPreference;

#[derive(Parser, Debug)]
#[command(
    name = "crtshot",
    author,
    version,
    about = "CRT post-processing and multi-frame screenshot capture"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accumulate video frames into one CRT screenshot.
    Capture(CaptureArgs),
    /// Run a single frame through the display pipeline.
    Render(RenderArgs),
    /// Inspect configuration paths and defaults.
    Defaults(DefaultsCommand),
}

/// Options shared by every command that touches the pipeline.
#[derive(Parser, Debug)]
pub struct PipelineArgs {
    /// Configuration file; defaults to `crt.toml` in the config directory.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Render backend: `auto`, `gpu`, or `software`.
    #[arg(
        long,
        value_name = "BACKEND",
        value_parser = parse_backend,
        default_value_t = Backend::Auto
    )]
    pub backend: Backend,

    /// Adapter preference for the GPU backend: `low` or `high`.
    #[arg(
        long,
        value_name = "POWER",
        value_parser = parse_gpu_power,
        default_value = "low"
    )]
    pub gpu_power: GpuPowerPreference,
}

#[derive(Parser, Debug)]
pub struct CaptureArgs {
    /// Video frames, fed round-robin until the session completes.
    #[arg(value_name = "FRAME", required = true)]
    pub frames: Vec<PathBuf>,

    /// Exposure mode: `short`, `long`, or `verylong`.
    #[arg(
        long,
        value_name = "MODE",
        value_parser = parse_mode,
        default_value = "short"
    )]
    pub mode: ExposureMode,

    /// Cartridge name used in the output filename; defaults to the first
    /// frame's file stem.
    #[arg(long, value_name = "NAME")]
    pub cartridge: Option<String>,

    /// Extra tag appended to the output filename.
    #[arg(long, value_name = "TEXT")]
    pub suffix: Option<String>,

    /// Directory screenshots are written to (overrides `capture.output_dir`).
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Frames processed before accumulation (overrides `capture.warmup_frames`).
    #[arg(long, value_name = "FRAMES")]
    pub warmup: Option<u32>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Parser, Debug)]
pub struct RenderArgs {
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output image; `.jpg`/`.jpeg` is written at quality 100, anything else
    /// by extension.
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Parser, Debug)]
pub struct DefaultsCommand {
    #[command(subcommand)]
    pub action: DefaultsAction,
}

#[derive(Subcommand, Debug)]
pub enum DefaultsAction {
    /// Print the resolved config directory and file.
    Where,
    /// Print the default configuration as TOML.
    Dump,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backend {
    /// GPU when an adapter is available, software otherwise.
    #[default]
    Auto,
    Gpu,
    Software,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Auto => "auto",
            Backend::Gpu => "gpu",
            Backend::Software => "software",
        })
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_backend(value: &str) -> Result<Backend, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(Backend::Auto),
        "gpu" | "wgpu" => Ok(Backend::Gpu),
        "software" | "cpu" => Ok(Backend::Software),
        other => Err(format!(
            "invalid backend '{other}'; expected auto, gpu, or software"
        )),
    }
}

pub fn parse_gpu_power(value: &str) -> Result<GpuPowerPreference, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "low" => Ok(GpuPowerPreference::Low),
        "high" => Ok(GpuPowerPreference::High),
        other => Err(format!("invalid GPU power '{other}'; expected low or high")),
    }
}

pub fn parse_mode(value: &str) -> Result<ExposureMode, String> {
    value.parse().map_err(|err| format!("{err}"))
}
