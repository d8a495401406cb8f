//! CPU implementation of [`RenderDevice`].
//!
//! Every program is evaluated per output pixel with nearest-neighbour,
//! clamp-to-edge sampling, mirroring the GLSL programs in `compile`
//! closely enough that the pipeline behaves the same on machines without a
//! usable adapter. Noise is the one effect that differs in detail between the
//! two backends.

use std::collections::HashMap;

use image::RgbaImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::device::{EffectsParams, Program, RenderDevice, RenderError, MAX_BLUR_RADIUS};
use crate::types::TextureId;

/// Matches the smallest `max_texture_dimension_2d` wgpu guarantees.
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

pub struct SoftwareDevice {
    textures: HashMap<TextureId, RgbaImage>,
    next_id: u32,
    max_dimension: u32,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::with_max_dimension(DEFAULT_MAX_DIMENSION)
    }

    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            textures: HashMap::new(),
            next_id: 1,
            max_dimension,
        }
    }

    /// Number of live textures.
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    fn insert(&mut self, image: RgbaImage) -> TextureId {
        let id = TextureId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.textures.insert(id, image);
        id
    }

    fn get(&self, texture: TextureId) -> Result<&RgbaImage, RenderError> {
        self.textures
            .get(&texture)
            .ok_or(RenderError::UnknownTexture(texture))
    }

    fn allocate(
        &self,
        what: &'static str,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, RenderError> {
        let error = RenderError::Allocation {
            what,
            width,
            height,
        };
        if width == 0 || height == 0 || width > self.max_dimension || height > self.max_dimension {
            return Err(error);
        }
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(4));
        let Some(len) = len else {
            return Err(error);
        };
        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            return Err(error);
        }
        data.resize(len, 0);
        RgbaImage::from_raw(width, height, data).ok_or(error)
    }
}

impl RenderDevice for SoftwareDevice {
    fn create_target(&mut self, width: u32, height: u32) -> Result<TextureId, RenderError> {
        let image = self.allocate("render target", width, height)?;
        Ok(self.insert(image))
    }

    fn release(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn dimensions(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures.get(&texture).map(|image| image.dimensions())
    }

    fn clear(&mut self, target: TextureId) -> Result<(), RenderError> {
        let image = self
            .textures
            .get_mut(&target)
            .ok_or(RenderError::UnknownTexture(target))?;
        image.iter_mut().for_each(|byte| *byte = 0);
        Ok(())
    }

    fn draw(
        &mut self,
        target: TextureId,
        program: &Program,
        inputs: &[TextureId],
    ) -> Result<(), RenderError> {
        program.check_inputs(inputs)?;
        if inputs.contains(&target) {
            return Err(RenderError::Device(format!(
                "{target} is both render target and input of the {} program",
                program.name()
            )));
        }

        let mut output = self
            .textures
            .remove(&target)
            .ok_or(RenderError::UnknownTexture(target))?;
        let result = inputs
            .iter()
            .map(|&input| self.get(input))
            .collect::<Result<Vec<_>, _>>()
            .map(|sources| run_program(program, &sources, &mut output));
        self.textures.insert(target, output);
        result
    }

    fn upload(&mut self, image: &RgbaImage) -> Result<TextureId, RenderError> {
        let mut copy = self.allocate("uploaded texture", image.width(), image.height())?;
        copy.copy_from_slice(image.as_raw());
        Ok(self.insert(copy))
    }

    fn write(&mut self, texture: TextureId, image: &RgbaImage) -> Result<(), RenderError> {
        let existing = self
            .textures
            .get_mut(&texture)
            .ok_or(RenderError::UnknownTexture(texture))?;
        if existing.dimensions() != image.dimensions() {
            return Err(RenderError::Device(format!(
                "cannot write {}x{} image into {}x{} {texture}",
                image.width(),
                image.height(),
                existing.width(),
                existing.height()
            )));
        }
        existing.copy_from_slice(image.as_raw());
        Ok(())
    }

    fn read_pixels(&mut self, texture: TextureId) -> Result<RgbaImage, RenderError> {
        let source = self.get(texture)?;
        let mut copy = self.allocate("pixel buffer", source.width(), source.height())?;
        copy.copy_from_slice(source.as_raw());
        Ok(copy)
    }
}

type Rgb = [f32; 3];

fn run_program(program: &Program, sources: &[&RgbaImage], output: &mut RgbaImage) {
    let (width, height) = output.dimensions();
    let texel = (1.0 / width as f32, 1.0 / height as f32);
    let src = sources[0];

    match *program {
        Program::Color => render(output, |_, _, u, v| sample(src, u, v)),
        Program::Ghosting { amount } => render(output, |_, _, u, v| {
            let color = sample(src, u, v);
            let ghost = sample(src, u - 3.0 * texel.0, v);
            map2(color, ghost, |c, g| c.max(g * amount))
        }),
        Program::Blur { radius } => {
            let radius = radius.min(MAX_BLUR_RADIUS) as i32;
            render(output, |_, _, u, v| {
                let mut sum = [0.0; 3];
                let mut count = 0.0;
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        let s = sample(src, u + dx as f32 * texel.0, v + dy as f32 * texel.1);
                        sum = map2(sum, s, |a, b| a + b);
                        count += 1.0;
                    }
                }
                sum.map(|c| c / count)
            })
        }
        Program::Phosphor { latency } => {
            let previous = sources[1];
            render(output, |_, _, u, v| {
                map2(sample(src, u, v), sample(previous, u, v), |c, p| {
                    c.max(p * latency)
                })
            })
        }
        Program::Blend { ratio } => {
            let other = sources[1];
            render(output, |_, _, u, v| {
                map2(sample(src, u, v), sample(other, u, v), |a, b| {
                    a + (b - a) * ratio
                })
            })
        }
        Program::BlackCorrection { level } => render(output, |_, _, u, v| {
            sample(src, u, v).map(|c| level + c * (1.0 - level))
        }),
        Program::Sharpen { amount } => render(output, |_, _, u, v| {
            let center = sample(src, u, v);
            let mut neighbours = [0.0; 3];
            for (dx, dy) in [(-1.0, 0.0), (1.0, 0.0), (0.0, -1.0), (0.0, 1.0)] {
                let s = sample(src, u + dx * texel.0, v + dy * texel.1);
                neighbours = map2(neighbours, s, |a, b| a + b);
            }
            map2(center, neighbours, |c, n| c + amount * (c - n * 0.25))
        }),
        Program::Effects(params) => render_effects(src, &params, output),
    }
}

fn render_effects(src: &RgbaImage, params: &EffectsParams, output: &mut RgbaImage) {
    let width = output.width() as f32;
    let fringe = params.fringing * 2.0 / width;
    let mut rng = StdRng::seed_from_u64(u64::from(params.frame));

    render(output, |x, y, u, v| {
        let (u, v) = barrel(u, v, params.curve);
        if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
            return [0.0; 3];
        }
        let mut color = [
            sample(src, u + fringe, v)[0],
            sample(src, u, v)[1],
            sample(src, u - fringe, v)[2],
        ];
        if y % 2 == 1 {
            let scanline = 1.0 - params.scanlines * 0.5;
            color = color.map(|c| c * scanline);
        }
        if params.mask > 0.0 {
            let dim = 1.0 - params.mask * 0.5;
            let lit = (x % 3) as usize;
            for (channel, value) in color.iter_mut().enumerate() {
                if channel != lit {
                    *value *= dim;
                }
            }
        }
        if params.noise > 0.0 {
            let grain = rng.gen_range(-1.0f32..=1.0) * params.noise * 0.1;
            color = color.map(|c| c + grain);
        }
        color
    });
}

/// Barrel distortion used by the curvature effect.
pub(crate) fn barrel(u: f32, v: f32, amount: f32) -> (f32, f32) {
    let cx = u * 2.0 - 1.0;
    let cy = v * 2.0 - 1.0;
    let bx = cx + cx * cy * cy * amount * 0.25;
    let by = cy + cy * cx * cx * amount * 0.25;
    (bx * 0.5 + 0.5, by * 0.5 + 0.5)
}

fn render<F>(output: &mut RgbaImage, mut shade: F)
where
    F: FnMut(u32, u32, f32, f32) -> Rgb,
{
    let (width, height) = output.dimensions();
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let u = (x as f32 + 0.5) / width as f32;
        let v = (y as f32 + 0.5) / height as f32;
        let [r, g, b] = shade(x, y, u, v);
        pixel.0 = [to_byte(r), to_byte(g), to_byte(b), u8::MAX];
    }
}

fn sample(image: &RgbaImage, u: f32, v: f32) -> Rgb {
    let (width, height) = image.dimensions();
    let x = ((u * width as f32).floor() as i64).clamp(0, i64::from(width) - 1) as u32;
    let y = ((v * height as f32).floor() as i64).clamp(0, i64::from(height) - 1) as u32;
    let [r, g, b, _] = image.get_pixel(x, y).0;
    [r, g, b].map(|c| f32::from(c) / 255.0)
}

fn map2(a: Rgb, b: Rgb, f: impl Fn(f32, f32) -> f32) -> Rgb {
    [f(a[0], b[0]), f(a[1], b[1]), f(a[2], b[2])]
}

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255]))
    }

    fn draw_into(
        device: &mut SoftwareDevice,
        program: Program,
        inputs: &[TextureId],
    ) -> RgbaImage {
        let (width, height) = device.dimensions(inputs[0]).unwrap();
        let target = device.create_target(width, height).unwrap();
        device.draw(target, &program, inputs).unwrap();
        device.read_pixels(target).unwrap()
    }

    #[test]
    fn targets_start_transparent_black() {
        let mut device = SoftwareDevice::new();
        let target = device.create_target(4, 3).unwrap();
        let pixels = device.read_pixels(target).unwrap();
        assert_eq!(pixels.dimensions(), (4, 3));
        assert!(pixels.as_raw().iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_or_empty_targets_fail_to_allocate() {
        let mut device = SoftwareDevice::with_max_dimension(64);
        assert!(device.create_target(65, 10).unwrap_err().is_allocation());
        assert!(device.create_target(0, 10).unwrap_err().is_allocation());
        assert_eq!(device.texture_count(), 0);
    }

    #[test]
    fn color_pass_copies_source() {
        let mut device = SoftwareDevice::new();
        let mut image = solid(5, 4, [10, 20, 30]);
        image.put_pixel(2, 1, Rgba([200, 100, 50, 255]));
        let src = device.upload(&image).unwrap();

        let copy = draw_into(&mut device, Program::Color, &[src]);
        assert_eq!(copy, image);
    }

    #[test]
    fn color_pass_rescales_smaller_source() {
        let mut device = SoftwareDevice::new();
        let mut image = solid(2, 1, [0, 0, 0]);
        image.put_pixel(1, 0, Rgba([255, 255, 255, 255]));
        let src = device.upload(&image).unwrap();
        let target = device.create_target(4, 2).unwrap();
        device.draw(target, &Program::Color, &[src]).unwrap();
        let out = device.read_pixels(target).unwrap();

        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(1, 1).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(2, 0).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(3, 1).0, [255, 255, 255, 255]);
    }

    #[test]
    fn phosphor_keeps_brighter_of_new_and_decayed() {
        let mut device = SoftwareDevice::new();
        let current = device.upload(&solid(2, 2, [100, 0, 0])).unwrap();
        let previous = device.upload(&solid(2, 2, [200, 200, 0])).unwrap();

        let out = draw_into(
            &mut device,
            Program::Phosphor { latency: 0.5 },
            &[current, previous],
        );
        assert_eq!(out.get_pixel(0, 0).0, [100, 100, 0, 255]);
    }

    #[test]
    fn blur_and_sharpen_leave_flat_fields_alone() {
        let mut device = SoftwareDevice::new();
        let src = device.upload(&solid(6, 6, [90, 120, 150])).unwrap();

        let blurred = draw_into(&mut device, Program::Blur { radius: 3 }, &[src]);
        assert!(blurred.pixels().all(|p| p.0 == [90, 120, 150, 255]));

        let sharpened = draw_into(&mut device, Program::Sharpen { amount: 1.0 }, &[src]);
        assert!(sharpened.pixels().all(|p| p.0 == [90, 120, 150, 255]));
    }

    #[test]
    fn blur_spreads_a_single_bright_pixel() {
        let mut device = SoftwareDevice::new();
        let mut image = solid(5, 5, [0, 0, 0]);
        image.put_pixel(2, 2, Rgba([255, 255, 255, 255]));
        let src = device.upload(&image).unwrap();

        let out = draw_into(&mut device, Program::Blur { radius: 1 }, &[src]);
        let center = out.get_pixel(2, 2).0[0];
        let neighbour = out.get_pixel(1, 2).0[0];
        assert!(center < 255);
        assert!(neighbour > 0);
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn blend_mixes_inputs() {
        let mut device = SoftwareDevice::new();
        let a = device.upload(&solid(1, 1, [0, 100, 200])).unwrap();
        let b = device.upload(&solid(1, 1, [200, 100, 0])).unwrap();

        let out = draw_into(&mut device, Program::Blend { ratio: 0.5 }, &[a, b]);
        assert_eq!(out.get_pixel(0, 0).0, [100, 100, 100, 255]);
    }

    #[test]
    fn black_correction_lifts_floor() {
        let mut device = SoftwareDevice::new();
        let src = device.upload(&solid(1, 1, [0, 0, 0])).unwrap();
        let out = draw_into(&mut device, Program::BlackCorrection { level: 0.2 }, &[src]);
        assert_eq!(out.get_pixel(0, 0).0, [51, 51, 51, 255]);
    }

    #[test]
    fn ghosting_echoes_edges_to_the_right() {
        let mut device = SoftwareDevice::new();
        let mut image = solid(8, 1, [0, 0, 0]);
        image.put_pixel(1, 0, Rgba([255, 255, 255, 255]));
        let src = device.upload(&image).unwrap();

        let out = draw_into(&mut device, Program::Ghosting { amount: 0.4 }, &[src]);
        assert_eq!(out.get_pixel(1, 0).0[0], 255);
        assert_eq!(out.get_pixel(4, 0).0[0], 102);
        assert_eq!(out.get_pixel(6, 0).0[0], 0);
    }

    #[test]
    fn neutral_effects_are_identity() {
        let mut device = SoftwareDevice::new();
        let mut image = solid(6, 4, [30, 60, 90]);
        image.put_pixel(3, 2, Rgba([250, 5, 125, 255]));
        let src = device.upload(&image).unwrap();

        let out = draw_into(&mut device, Program::Effects(EffectsParams::default()), &[src]);
        assert_eq!(out, image);
    }

    #[test]
    fn scanlines_darken_odd_rows() {
        let mut device = SoftwareDevice::new();
        let src = device.upload(&solid(4, 4, [200, 200, 200])).unwrap();
        let params = EffectsParams {
            scanlines: 1.0,
            ..EffectsParams::default()
        };

        let out = draw_into(&mut device, Program::Effects(params), &[src]);
        assert_eq!(out.get_pixel(0, 0).0[0], 200);
        assert_eq!(out.get_pixel(0, 1).0[0], 100);
    }

    #[test]
    fn curvature_blackens_corners() {
        let mut device = SoftwareDevice::new();
        let src = device.upload(&solid(32, 32, [255, 255, 255])).unwrap();
        let params = EffectsParams {
            curve: 1.0,
            ..EffectsParams::default()
        };

        let out = draw_into(&mut device, Program::Effects(params), &[src]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(16, 16).0, [255, 255, 255, 255]);
    }

    #[test]
    fn target_cannot_sample_itself() {
        let mut device = SoftwareDevice::new();
        let target = device.create_target(2, 2).unwrap();
        let err = device.draw(target, &Program::Color, &[target]).unwrap_err();
        assert!(matches!(err, RenderError::Device(_)));
        assert!(device.dimensions(target).is_some());
    }

    #[test]
    fn write_rejects_mismatched_dimensions() {
        let mut device = SoftwareDevice::new();
        let target = device.create_target(2, 2).unwrap();
        assert!(device.write(target, &solid(3, 2, [0, 0, 0])).is_err());
        device.write(target, &solid(2, 2, [9, 9, 9])).unwrap();
        assert_eq!(device.read_pixels(target).unwrap().get_pixel(1, 1).0, [9, 9, 9, 255]);
    }
}
