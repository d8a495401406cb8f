//! Headless wgpu backend for the CRT pipeline.
//!
//! - `context` owns the wgpu instance, adapter and device.
//! - `pipeline` holds the shared bind group layouts and builds one render
//!   pipeline per stage program.
//! - `uniforms` packs [`Program`](crate::Program) parameters into the uniform
//!   block every program reads.
//! - `state` glues everything together behind [`GpuDevice`].

mod context;
mod pipeline;
mod state;
mod uniforms;

pub use state::GpuDevice;
