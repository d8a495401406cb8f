use image::RgbaImage;

use crate::types::TextureId;

/// Widest blur the bloom stage will ask for, in pixels either side.
pub const MAX_BLUR_RADIUS: u32 = 4;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to allocate {what} ({width}x{height})")]
    Allocation {
        what: &'static str,
        width: u32,
        height: u32,
    },
    #[error("unknown {0}")]
    UnknownTexture(TextureId),
    #[error("{program} program expects {expected} input texture(s), got {actual}")]
    Binding {
        program: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("framebuffer slot {slot} out of range ({len} slots)")]
    Slot { slot: usize, len: usize },
    #[error("framebuffer sequence has not been set up")]
    NotSetUp,
    #[error("device error: {0}")]
    Device(String),
}

impl RenderError {
    pub fn is_allocation(&self) -> bool {
        matches!(self, RenderError::Allocation { .. })
    }
}

/// Parameters of the final CRT compositing pass.
///
/// Every amount is in `0.0..=1.0`; zero disables that effect.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EffectsParams {
    pub curve: f32,
    pub scanlines: f32,
    pub mask: f32,
    pub noise: f32,
    pub fringing: f32,
    /// Seeds the noise pattern.
    pub frame: u32,
}

/// A fixed GPU program together with its uniform values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Program {
    /// Flat copy of the source.
    Color,
    /// Faint horizontally offset echo of the picture.
    Ghosting { amount: f32 },
    /// Box blur, `radius` pixels either side.
    Blur { radius: u32 },
    /// `max(src, previous * latency)`; inputs are `[src, previous]`.
    Phosphor { latency: f32 },
    /// `mix(a, b, ratio)`; inputs are `[a, b]`.
    Blend { ratio: f32 },
    /// Lifts the black floor to `level`.
    BlackCorrection { level: f32 },
    /// Unsharp mask against the four direct neighbours.
    Sharpen { amount: f32 },
    Effects(EffectsParams),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    Color,
    Ghosting,
    Blur,
    Phosphor,
    Blend,
    BlackCorrection,
    Sharpen,
    Effects,
}

impl Program {
    pub fn kind(&self) -> ProgramKind {
        match self {
            Program::Color => ProgramKind::Color,
            Program::Ghosting { .. } => ProgramKind::Ghosting,
            Program::Blur { .. } => ProgramKind::Blur,
            Program::Phosphor { .. } => ProgramKind::Phosphor,
            Program::Blend { .. } => ProgramKind::Blend,
            Program::BlackCorrection { .. } => ProgramKind::BlackCorrection,
            Program::Sharpen { .. } => ProgramKind::Sharpen,
            Program::Effects(_) => ProgramKind::Effects,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Checks the number of input textures against what the program samples.
    pub fn check_inputs(&self, inputs: &[TextureId]) -> Result<(), RenderError> {
        let expected = self.kind().input_count();
        if inputs.len() != expected {
            return Err(RenderError::Binding {
                program: self.name(),
                expected,
                actual: inputs.len(),
            });
        }
        Ok(())
    }
}

impl ProgramKind {
    pub const ALL: [ProgramKind; 8] = [
        ProgramKind::Color,
        ProgramKind::Ghosting,
        ProgramKind::Blur,
        ProgramKind::Phosphor,
        ProgramKind::Blend,
        ProgramKind::BlackCorrection,
        ProgramKind::Sharpen,
        ProgramKind::Effects,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProgramKind::Color => "color",
            ProgramKind::Ghosting => "ghosting",
            ProgramKind::Blur => "blur",
            ProgramKind::Phosphor => "phosphor",
            ProgramKind::Blend => "blend",
            ProgramKind::BlackCorrection => "black correction",
            ProgramKind::Sharpen => "sharpen",
            ProgramKind::Effects => "effects",
        }
    }

    pub fn input_count(self) -> usize {
        match self {
            ProgramKind::Phosphor | ProgramKind::Blend => 2,
            _ => 1,
        }
    }
}

/// The drawing surface the CRT pipeline renders through.
///
/// Implementations own every texture they hand out. Render targets are
/// created zeroed (transparent black). `draw` renders one full-target pass of
/// `program`, sampling `inputs`, into `target`; a target must never appear in
/// its own input list.
pub trait RenderDevice {
    fn create_target(&mut self, width: u32, height: u32) -> Result<TextureId, RenderError>;

    fn release(&mut self, texture: TextureId);

    fn dimensions(&self, texture: TextureId) -> Option<(u32, u32)>;

    fn clear(&mut self, target: TextureId) -> Result<(), RenderError>;

    fn draw(
        &mut self,
        target: TextureId,
        program: &Program,
        inputs: &[TextureId],
    ) -> Result<(), RenderError>;

    /// Creates a texture holding a copy of `image`.
    fn upload(&mut self, image: &RgbaImage) -> Result<TextureId, RenderError>;

    /// Replaces the contents of `texture`; dimensions must match.
    fn write(&mut self, texture: TextureId, image: &RgbaImage) -> Result<(), RenderError>;

    /// Copies `texture` back into host memory.
    fn read_pixels(&mut self, texture: TextureId) -> Result<RgbaImage, RenderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_input_programs_reject_single_binding() {
        let err = Program::Phosphor { latency: 0.5 }
            .check_inputs(&[TextureId(1)])
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::Binding {
                expected: 2,
                actual: 1,
                ..
            }
        ));
        assert!(Program::Color.check_inputs(&[TextureId(1)]).is_ok());
    }

    #[test]
    fn every_kind_has_a_name() {
        for kind in ProgramKind::ALL {
            assert!(!kind.name().is_empty());
        }
    }
}
