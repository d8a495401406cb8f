use bytemuck::{Pod, Zeroable};

use crate::device::Program;

/// Mirrors the `StageParams` uniform block shared by every stage program.
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct StageUniforms {
    /// Target width/height, source width/height.
    pub resolution: [f32; 4],
    pub params0: [f32; 4],
    pub params1: [f32; 4],
}

unsafe impl Zeroable for StageUniforms {}
unsafe impl Pod for StageUniforms {}

impl StageUniforms {
    pub fn new(program: &Program, target: (u32, u32), source: (u32, u32)) -> Self {
        let mut uniforms = Self {
            resolution: [
                target.0 as f32,
                target.1 as f32,
                source.0 as f32,
                source.1 as f32,
            ],
            params0: [0.0; 4],
            params1: [0.0; 4],
        };
        match *program {
            Program::Color => {}
            Program::Ghosting { amount } => uniforms.params0[0] = amount,
            Program::Blur { radius } => uniforms.params0[0] = radius as f32,
            Program::Phosphor { latency } => uniforms.params0[0] = latency,
            Program::Blend { ratio } => uniforms.params0[0] = ratio,
            Program::BlackCorrection { level } => uniforms.params0[0] = level,
            Program::Sharpen { amount } => uniforms.params0[0] = amount,
            Program::Effects(params) => {
                uniforms.params0 = [params.curve, params.scanlines, params.mask, params.noise];
                uniforms.params1[0] = params.fringing;
                // Keep the seed small enough to stay exact in an f32.
                uniforms.params1[1] = (params.frame % 4096) as f32;
            }
        }
        uniforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{EffectsParams, MAX_BLUR_RADIUS};

    #[test]
    fn layout_matches_three_vec4s() {
        assert_eq!(std::mem::size_of::<StageUniforms>(), 48);
        assert_eq!(std::mem::align_of::<StageUniforms>(), 16);
    }

    #[test]
    fn effects_pack_into_both_vectors() {
        let params = EffectsParams {
            curve: 0.5,
            scanlines: 0.3,
            mask: 0.1,
            noise: 0.05,
            fringing: 0.15,
            frame: 4097,
        };
        let uniforms = StageUniforms::new(&Program::Effects(params), (320, 240), (160, 120));
        assert_eq!(uniforms.resolution, [320.0, 240.0, 160.0, 120.0]);
        assert_eq!(uniforms.params0, [0.5, 0.3, 0.1, 0.05]);
        assert_eq!(uniforms.params1, [0.15, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn blur_radius_is_passed_as_float() {
        let uniforms = StageUniforms::new(
            &Program::Blur {
                radius: MAX_BLUR_RADIUS,
            },
            (8, 8),
            (8, 8),
        );
        assert_eq!(uniforms.params0[0], MAX_BLUR_RADIUS as f32);
        assert_eq!(uniforms.params1, [0.0; 4]);
    }
}
