use std::fmt;

use crtprefs::CrtPreferences;

use crate::device::{RenderDevice, RenderError};
use crate::framebuffer::FramebufferSequence;
use crate::shaders::{
    BlackCorrectionShader, BlurShader, ColorShader, EffectsShader, GhostingShader,
    PhosphorShader, ShaderStage, SharpenShader,
};
use crate::types::{ShaderEnvironment, TextureId};

const GHOSTING: usize = 0;
const BLOOM: usize = 1;
const PHOSPHOR_A: usize = 2;
const PHOSPHOR_B: usize = 3;
const BLACK: usize = 4;
const SHARPEN: usize = 5;
const OUTPUT: usize = 6;
const SLOT_COUNT: usize = 7;

/// Which part of the pipeline a [`CrtSequencer::process`] call runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrtMode {
    /// Full pipeline for on-screen display.
    Display,
    /// Persistence stages only, finished with a flat copy. Used for frames
    /// that will be composited.
    Exposure,
    /// Sharpen and effects only; phosphor state is left alone.
    Finalise,
}

impl fmt::Display for CrtMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CrtMode::Display => "display",
            CrtMode::Exposure => "exposure",
            CrtMode::Finalise => "finalise",
        })
    }
}

/// Runs the CRT stages in order and carries the phosphor buffer between
/// frames.
///
/// The phosphor buffer ping-pongs between two framebuffer slots so a stage
/// never samples the target it renders into.
#[derive(Debug)]
pub struct CrtSequencer {
    framebuffers: FramebufferSequence,
    phosphor_front: usize,
    pending_flush: bool,
    frame: u32,
}

impl Default for CrtSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl CrtSequencer {
    pub fn new() -> Self {
        Self {
            framebuffers: FramebufferSequence::new(SLOT_COUNT),
            phosphor_front: PHOSPHOR_A,
            pending_flush: true,
            frame: 0,
        }
    }

    /// Forgets accumulated phosphor. Takes effect on the next non-finalising
    /// [`process`](Self::process); calling it repeatedly is the same as once.
    pub fn flush_phosphor(&mut self) {
        self.pending_flush = true;
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Runs one frame through the pipeline and returns the texture holding
    /// the result. The texture stays valid until the next call.
    pub fn process<D>(
        &mut self,
        device: &mut D,
        env: &ShaderEnvironment,
        prefs: &CrtPreferences,
        mode: CrtMode,
    ) -> Result<TextureId, RenderError>
    where
        D: RenderDevice + ?Sized,
    {
        if self.framebuffers.setup(device, env.width, env.height)? {
            self.pending_flush = true;
        }

        let mut env = *env;
        if mode != CrtMode::Finalise {
            if self.pending_flush {
                self.framebuffers.clear(device, PHOSPHOR_A)?;
                self.framebuffers.clear(device, PHOSPHOR_B)?;
                self.phosphor_front = PHOSPHOR_A;
                self.pending_flush = false;
                tracing::debug!("phosphor flushed");
            }
            env = self.persistence(device, env, prefs)?;
        }

        let output = match mode {
            CrtMode::Exposure => self.framebuffers.process(device, OUTPUT, |device, target| {
                ColorShader.set_attributes(device, &env, target)
            })?,
            CrtMode::Display | CrtMode::Finalise => self.finish(device, env, prefs)?,
        };

        self.frame = self.frame.wrapping_add(1);
        Ok(output)
    }

    /// Frees every framebuffer; the next call reallocates them.
    pub fn release<D>(&mut self, device: &mut D)
    where
        D: RenderDevice + ?Sized,
    {
        self.framebuffers.release(device);
        self.pending_flush = true;
    }

    /// Ghosting, phosphor with bloom and black-level correction.
    fn persistence<D>(
        &mut self,
        device: &mut D,
        mut env: ShaderEnvironment,
        prefs: &CrtPreferences,
    ) -> Result<ShaderEnvironment, RenderError>
    where
        D: RenderDevice + ?Sized,
    {
        if prefs.ghosting && prefs.ghosting_amount > 0.0 {
            let stage = GhostingShader {
                amount: prefs.ghosting_amount,
            };
            let src = self.framebuffers.process(device, GHOSTING, |device, target| {
                stage.set_attributes(device, &env, target)
            })?;
            env = env.with_source(src);
        }

        let latency = match (prefs.enabled, prefs.phosphor) {
            (true, true) => prefs.phosphor_latency,
            (true, false) => 0.0,
            (false, _) => prefs.pixel_perfect_fade,
        };
        if latency > 0.0 {
            let mut previous = self.framebuffers.texture(self.phosphor_front)?;
            if prefs.enabled && prefs.phosphor && prefs.phosphor_bloom > 0.0 {
                let stage = BlurShader::for_bloom(prefs.phosphor_bloom);
                let bloom_env = env.with_source(previous);
                previous = self.framebuffers.process(device, BLOOM, |device, target| {
                    stage.set_attributes(device, &bloom_env, target)
                })?;
            }

            let back = if self.phosphor_front == PHOSPHOR_A {
                PHOSPHOR_B
            } else {
                PHOSPHOR_A
            };
            let stage = PhosphorShader { latency, previous };
            let src = self.framebuffers.process(device, back, |device, target| {
                stage.set_attributes(device, &env, target)
            })?;
            self.phosphor_front = back;
            env = env.with_source(src);
        }

        if prefs.enabled && prefs.curve {
            let stage = BlackCorrectionShader {
                level: prefs.black_level,
            };
            let src = self.framebuffers.process(device, BLACK, |device, target| {
                stage.set_attributes(device, &env, target)
            })?;
            env = env.with_source(src);
        }

        Ok(env)
    }

    /// Sharpen and effects with CRT simulation on, a flat copy otherwise.
    fn finish<D>(
        &mut self,
        device: &mut D,
        mut env: ShaderEnvironment,
        prefs: &CrtPreferences,
    ) -> Result<TextureId, RenderError>
    where
        D: RenderDevice + ?Sized,
    {
        if !prefs.enabled {
            return self.framebuffers.process(device, OUTPUT, |device, target| {
                ColorShader.set_attributes(device, &env, target)
            });
        }

        if prefs.sharpness > 0.0 {
            let stage = SharpenShader {
                amount: prefs.sharpness,
            };
            let src = self.framebuffers.process(device, SHARPEN, |device, target| {
                stage.set_attributes(device, &env, target)
            })?;
            env = env.with_source(src);
        }

        let stage = EffectsShader::from_preferences(prefs, self.frame);
        self.framebuffers.process(device, OUTPUT, |device, target| {
            stage.set_attributes(device, &env, target)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwareDevice;
    use image::{Rgba, RgbaImage};

    const W: u32 = 6;
    const H: u32 = 4;

    /// Phosphor without bloom and no other processing between stages.
    fn persistence_only(latency: f32) -> CrtPreferences {
        CrtPreferences {
            phosphor_latency: latency,
            phosphor_bloom: 0.0,
            curve: false,
            ghosting: false,
            ..CrtPreferences::default()
        }
    }

    fn solid(device: &mut SoftwareDevice, value: u8) -> ShaderEnvironment {
        let src = device
            .upload(&RgbaImage::from_pixel(W, H, Rgba([value, value, value, 255])))
            .unwrap();
        ShaderEnvironment::new(W, H, src)
    }

    fn run(
        sequencer: &mut CrtSequencer,
        device: &mut SoftwareDevice,
        value: u8,
        prefs: &CrtPreferences,
        mode: CrtMode,
    ) -> Rgba<u8> {
        let env = solid(device, value);
        let out = sequencer.process(device, &env, prefs, mode).unwrap();
        *device.read_pixels(out).unwrap().get_pixel(2, 2)
    }

    #[test]
    fn phosphor_persists_between_exposures() {
        let mut device = SoftwareDevice::new();
        let mut sequencer = CrtSequencer::new();
        let prefs = persistence_only(0.5);

        run(&mut sequencer, &mut device, 255, &prefs, CrtMode::Exposure);
        let first = run(&mut sequencer, &mut device, 0, &prefs, CrtMode::Exposure);
        let second = run(&mut sequencer, &mut device, 0, &prefs, CrtMode::Exposure);

        assert_eq!(first, Rgba([128, 128, 128, 255]));
        assert_eq!(second, Rgba([64, 64, 64, 255]));
    }

    #[test]
    fn flush_phosphor_is_idempotent() {
        let prefs = persistence_only(0.5);
        let mut once = Vec::new();
        for flushes in [1, 3] {
            let mut device = SoftwareDevice::new();
            let mut sequencer = CrtSequencer::new();
            run(&mut sequencer, &mut device, 255, &prefs, CrtMode::Exposure);
            for _ in 0..flushes {
                sequencer.flush_phosphor();
            }
            once.push(run(&mut sequencer, &mut device, 0, &prefs, CrtMode::Exposure));
        }
        assert_eq!(once[0], Rgba([0, 0, 0, 255]));
        assert_eq!(once[0], once[1]);
    }

    #[test]
    fn finalise_leaves_phosphor_untouched() {
        let mut device = SoftwareDevice::new();
        let mut sequencer = CrtSequencer::new();
        let prefs = persistence_only(0.5);
        let flat = CrtPreferences {
            enabled: false,
            ..prefs.clone()
        };

        run(&mut sequencer, &mut device, 255, &prefs, CrtMode::Exposure);
        sequencer.flush_phosphor();
        let finalised = run(&mut sequencer, &mut device, 10, &flat, CrtMode::Finalise);
        let next = run(&mut sequencer, &mut device, 0, &prefs, CrtMode::Exposure);

        assert_eq!(finalised, Rgba([10, 10, 10, 255]));
        // The flush is still pending, so the white frame is gone.
        assert_eq!(next, Rgba([0, 0, 0, 255]));

        run(&mut sequencer, &mut device, 255, &prefs, CrtMode::Exposure);
        run(&mut sequencer, &mut device, 10, &flat, CrtMode::Finalise);
        let kept = run(&mut sequencer, &mut device, 0, &prefs, CrtMode::Exposure);
        assert_eq!(kept, Rgba([128, 128, 128, 255]));
    }

    #[test]
    fn pixel_perfect_mode_uses_fade_instead_of_latency() {
        let mut device = SoftwareDevice::new();
        let mut sequencer = CrtSequencer::new();
        let prefs = CrtPreferences {
            enabled: false,
            pixel_perfect_fade: 0.4,
            phosphor_latency: 0.9,
            ..CrtPreferences::default()
        };

        run(&mut sequencer, &mut device, 255, &prefs, CrtMode::Display);
        let faded = run(&mut sequencer, &mut device, 0, &prefs, CrtMode::Display);
        assert_eq!(faded, Rgba([102, 102, 102, 255]));
    }

    #[test]
    fn black_correction_runs_only_with_curvature() {
        let mut device = SoftwareDevice::new();
        let mut sequencer = CrtSequencer::new();
        let mut prefs = persistence_only(0.0);
        prefs.black_level = 0.2;

        let plain = run(&mut sequencer, &mut device, 0, &prefs, CrtMode::Exposure);
        prefs.curve = true;
        let lifted = run(&mut sequencer, &mut device, 0, &prefs, CrtMode::Exposure);

        assert_eq!(plain, Rgba([0, 0, 0, 255]));
        assert_eq!(lifted, Rgba([51, 51, 51, 255]));
    }

    #[test]
    fn display_mode_applies_effects() {
        let mut device = SoftwareDevice::new();
        let mut sequencer = CrtSequencer::new();
        let prefs = CrtPreferences {
            phosphor: false,
            curve: false,
            sharpness: 0.0,
            mask: false,
            noise: false,
            fringing: false,
            scanlines: true,
            scanlines_intensity: 1.0,
            ..CrtPreferences::default()
        };

        let env = solid(&mut device, 200);
        let out = sequencer
            .process(&mut device, &env, &prefs, CrtMode::Display)
            .unwrap();
        let pixels = device.read_pixels(out).unwrap();
        assert_eq!(pixels.get_pixel(0, 0), &Rgba([200, 200, 200, 255]));
        assert_eq!(pixels.get_pixel(0, 1), &Rgba([100, 100, 100, 255]));
        assert_eq!(sequencer.frame(), 1);
    }

    #[test]
    fn resize_reallocates_and_flushes() {
        let mut device = SoftwareDevice::new();
        let mut sequencer = CrtSequencer::new();
        let prefs = persistence_only(0.5);

        run(&mut sequencer, &mut device, 255, &prefs, CrtMode::Exposure);
        let src = device
            .upload(&RgbaImage::from_pixel(3, 3, Rgba([0, 0, 0, 255])))
            .unwrap();
        let out = sequencer
            .process(
                &mut device,
                &ShaderEnvironment::new(3, 3, src),
                &prefs,
                CrtMode::Exposure,
            )
            .unwrap();

        let pixels = device.read_pixels(out).unwrap();
        assert_eq!(pixels.dimensions(), (3, 3));
        assert_eq!(pixels.get_pixel(1, 1), &Rgba([0, 0, 0, 255]));

        sequencer.release(&mut device);
        assert_eq!(device.texture_count(), 2);
    }
}
