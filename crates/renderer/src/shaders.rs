//! Thin wrappers binding one fixed program and its uniforms per stage.

use crtprefs::CrtPreferences;

use crate::device::{EffectsParams, Program, RenderDevice, RenderError, MAX_BLUR_RADIUS};
use crate::types::{ShaderEnvironment, TextureId};

/// One stage of the CRT pipeline.
///
/// `set_attributes` binds the stage's program and uniforms and issues a
/// single draw into `target`, sampling `env.src` (plus any extra input the
/// stage carries).
pub trait ShaderStage {
    fn program(&self) -> Program;

    fn inputs(&self, env: &ShaderEnvironment) -> Vec<TextureId> {
        vec![env.src]
    }

    fn set_attributes<D>(
        &self,
        device: &mut D,
        env: &ShaderEnvironment,
        target: TextureId,
    ) -> Result<(), RenderError>
    where
        D: RenderDevice + ?Sized,
        Self: Sized,
    {
        let program = self.program();
        tracing::trace!(program = program.name(), %target, src = %env.src, "stage draw");
        device.draw(target, &program, &self.inputs(env))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ColorShader;

impl ShaderStage for ColorShader {
    fn program(&self) -> Program {
        Program::Color
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GhostingShader {
    pub amount: f32,
}

impl ShaderStage for GhostingShader {
    fn program(&self) -> Program {
        Program::Ghosting {
            amount: self.amount,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BlurShader {
    pub radius: u32,
}

impl BlurShader {
    /// Maps a bloom amount in `0.0..=1.0` onto a blur radius.
    pub fn for_bloom(bloom: f32) -> Self {
        let radius = (bloom.clamp(0.0, 1.0) * MAX_BLUR_RADIUS as f32).round() as u32;
        Self { radius }
    }
}

impl ShaderStage for BlurShader {
    fn program(&self) -> Program {
        Program::Blur {
            radius: self.radius,
        }
    }
}

/// Persistence pass: `max(src, previous * latency)`.
#[derive(Clone, Copy, Debug)]
pub struct PhosphorShader {
    pub latency: f32,
    pub previous: TextureId,
}

impl ShaderStage for PhosphorShader {
    fn program(&self) -> Program {
        Program::Phosphor {
            latency: self.latency,
        }
    }

    fn inputs(&self, env: &ShaderEnvironment) -> Vec<TextureId> {
        vec![env.src, self.previous]
    }
}

/// Mixes the source with `other` by `ratio`.
///
/// Standalone stage: [`CrtSequencer`](crate::CrtSequencer) folds its own
/// mixing into the phosphor and ghosting programs, so this is for hosts
/// composing their own chains.
#[derive(Clone, Copy, Debug)]
pub struct BlendShader {
    pub ratio: f32,
    pub other: TextureId,
}

impl ShaderStage for BlendShader {
    fn program(&self) -> Program {
        Program::Blend { ratio: self.ratio }
    }

    fn inputs(&self, env: &ShaderEnvironment) -> Vec<TextureId> {
        vec![env.src, self.other]
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BlackCorrectionShader {
    pub level: f32,
}

impl ShaderStage for BlackCorrectionShader {
    fn program(&self) -> Program {
        Program::BlackCorrection { level: self.level }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SharpenShader {
    pub amount: f32,
}

impl ShaderStage for SharpenShader {
    fn program(&self) -> Program {
        Program::Sharpen {
            amount: self.amount,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EffectsShader {
    pub params: EffectsParams,
}

impl EffectsShader {
    /// Effect amounts from `prefs`; a disabled toggle contributes zero.
    pub fn from_preferences(prefs: &CrtPreferences, frame: u32) -> Self {
        let gated = |enabled: bool, amount: f32| if enabled { amount } else { 0.0 };
        Self {
            params: EffectsParams {
                curve: gated(prefs.curve, prefs.curve_amount),
                scanlines: gated(prefs.scanlines, prefs.scanlines_intensity),
                mask: gated(prefs.mask, prefs.mask_intensity),
                noise: gated(prefs.noise, prefs.noise_level),
                fringing: gated(prefs.fringing, prefs.fringing_amount),
                frame,
            },
        }
    }
}

impl ShaderStage for EffectsShader {
    fn program(&self) -> Program {
        Program::Effects(self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwareDevice;
    use image::{Rgba, RgbaImage};

    #[test]
    fn bloom_maps_onto_blur_radius() {
        assert_eq!(BlurShader::for_bloom(0.0).radius, 0);
        assert_eq!(BlurShader::for_bloom(0.4).radius, 2);
        assert_eq!(BlurShader::for_bloom(1.0).radius, MAX_BLUR_RADIUS);
        assert_eq!(BlurShader::for_bloom(7.0).radius, MAX_BLUR_RADIUS);
    }

    #[test]
    fn disabled_effects_contribute_nothing() {
        let prefs = CrtPreferences {
            curve: false,
            noise: false,
            ..CrtPreferences::default()
        };
        let params = EffectsShader::from_preferences(&prefs, 9).params;
        assert_eq!(params.curve, 0.0);
        assert_eq!(params.noise, 0.0);
        assert_eq!(params.scanlines, prefs.scanlines_intensity);
        assert_eq!(params.frame, 9);
    }

    #[test]
    fn phosphor_stage_binds_previous_texture() {
        let mut device = SoftwareDevice::new();
        let src = device
            .upload(&RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])))
            .unwrap();
        let previous = device
            .upload(&RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255])))
            .unwrap();
        let target = device.create_target(2, 2).unwrap();
        let env = ShaderEnvironment::new(2, 2, src);

        PhosphorShader {
            latency: 0.5,
            previous,
        }
        .set_attributes(&mut device, &env, target)
        .unwrap();

        let out = device.read_pixels(target).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgba([128, 128, 128, 255]));
    }

    #[test]
    fn blend_stage_mixes_towards_other() {
        let mut device = SoftwareDevice::new();
        let src = device
            .upload(&RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])))
            .unwrap();
        let other = device
            .upload(&RgbaImage::from_pixel(2, 2, Rgba([200, 200, 200, 255])))
            .unwrap();
        let target = device.create_target(2, 2).unwrap();
        let env = ShaderEnvironment::new(2, 2, src);

        BlendShader { ratio: 0.25, other }
            .set_attributes(&mut device, &env, target)
            .unwrap();

        let out = device.read_pixels(target).unwrap();
        assert_eq!(out.get_pixel(1, 1), &Rgba([50, 50, 50, 255]));
    }
}
