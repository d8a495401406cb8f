//! CRT post-processing and multi-frame screenshot capture.
//!
//! The crate is organised leaf to root:
//!
//! ```text
//!   RenderDevice (SoftwareDevice | GpuDevice)
//!          │ draw(target, Program, inputs)
//!          ▼
//!   shaders ──▶ FramebufferSequence ──▶ CrtSequencer
//!                                            │ Exposure / Finalise
//!                                            ▼
//!                              ScreenshotSequencer ──▶ composite ──▶ JpegWriter
//! ```
//!
//! [`CrtSequencer`] owns the persistent phosphor buffer and runs the stage
//! wrappers in [`shaders`] in a fixed order. [`ScreenshotSequencer`] drives it
//! once per video frame while a capture session is in flight, averages the
//! captured frames on a background thread and hands the finished image to the
//! JPEG writer.

mod compile;
mod composite;
mod crt;
mod device;
mod framebuffer;
mod gpu;
mod screenshot;
pub mod shaders;
mod software;
mod types;
mod writer;

pub use composite::{composite, CompositeError};
pub use crt::{CrtMode, CrtSequencer};
pub use device::{EffectsParams, Program, ProgramKind, RenderDevice, RenderError, MAX_BLUR_RADIUS};
pub use framebuffer::FramebufferSequence;
pub use gpu::GpuDevice;
pub use screenshot::{ScreenshotError, ScreenshotSequencer, SessionActivity, SessionPhase};
pub use software::{SoftwareDevice, DEFAULT_MAX_DIMENSION};
pub use types::{CartridgeMetadata, GpuPowerPreference, ShaderEnvironment, TextureId};
pub use writer::{write_jpeg, JpegWriter, WriteError, JPEG_QUALITY};
