use std::collections::HashMap;

use anyhow::Result;
use image::RgbaImage;
use wgpu::util::DeviceExt;

use crate::device::{Program, ProgramKind, RenderDevice, RenderError};
use crate::types::{GpuPowerPreference, TextureId};

use super::context::GpuContext;
use super::pipeline::{PipelineLayouts, ProgramPipeline, TARGET_FORMAT};
use super::uniforms::StageUniforms;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

/// [`RenderDevice`] backed by a headless wgpu device.
///
/// Stage pipelines are compiled the first time a program is drawn and kept
/// for the lifetime of the device.
pub struct GpuDevice {
    context: GpuContext,
    layouts: PipelineLayouts,
    pipelines: HashMap<ProgramKind, ProgramPipeline>,
    textures: HashMap<TextureId, GpuTexture>,
    next_id: u32,
}

impl GpuDevice {
    pub fn new(gpu_power: GpuPowerPreference) -> Result<Self> {
        let context = GpuContext::new(gpu_power)?;
        let layouts = PipelineLayouts::new(&context.device);
        tracing::info!(adapter = %context.adapter_name, "GPU device ready");
        Ok(Self {
            context,
            layouts,
            pipelines: HashMap::new(),
            textures: HashMap::new(),
            next_id: 1,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.context.adapter_name
    }

    fn texture(&self, id: TextureId) -> Result<&GpuTexture, RenderError> {
        self.textures.get(&id).ok_or(RenderError::UnknownTexture(id))
    }

    fn allocation_error(what: &'static str, width: u32, height: u32) -> RenderError {
        RenderError::Allocation {
            what,
            width,
            height,
        }
    }

    /// Runs `f` inside an error scope, turning a captured wgpu error into a
    /// [`RenderError`].
    fn scoped<T>(
        &self,
        filter: wgpu::ErrorFilter,
        f: impl FnOnce() -> T,
        map: impl FnOnce(wgpu::Error) -> RenderError,
    ) -> Result<T, RenderError> {
        self.context.device.push_error_scope(filter);
        let value = f();
        match pollster::block_on(self.context.device.pop_error_scope()) {
            Some(err) => Err(map(err)),
            None => Ok(value),
        }
    }

    fn encode_pass(
        &self,
        label: &str,
        view: &wgpu::TextureView,
        draw: Option<(&wgpu::RenderPipeline, &wgpu::BindGroup, &wgpu::BindGroup)>,
    ) {
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(label),
                });
        {
            let load = match draw {
                Some(_) => wgpu::LoadOp::Load,
                None => wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            };
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            if let Some((pipeline, uniforms, textures)) = draw {
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(0, uniforms, &[]);
                render_pass.set_bind_group(1, textures, &[]);
                render_pass.draw(0..3, 0..1);
            }
        }
        self.context.queue.submit(Some(encoder.finish()));
    }
}

impl RenderDevice for GpuDevice {
    fn create_target(&mut self, width: u32, height: u32) -> Result<TextureId, RenderError> {
        if !self.context.fits(width, height) {
            return Err(Self::allocation_error("render target", width, height));
        }

        let texture = self.scoped(
            wgpu::ErrorFilter::OutOfMemory,
            || {
                self.context.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("crt render target"),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: TARGET_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC
                        | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                })
            },
            |err| {
                tracing::warn!(%err, width, height, "render target allocation failed");
                Self::allocation_error("render target", width, height)
            },
        )?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = TextureId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                width,
                height,
            },
        );
        Ok(id)
    }

    fn release(&mut self, texture: TextureId) {
        if let Some(entry) = self.textures.remove(&texture) {
            entry.texture.destroy();
        }
    }

    fn dimensions(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures
            .get(&texture)
            .map(|entry| (entry.width, entry.height))
    }

    fn clear(&mut self, target: TextureId) -> Result<(), RenderError> {
        let entry = self.texture(target)?;
        self.encode_pass("clear pass", &entry.view, None);
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
                "{target} is both target and input of the {} program",
                program.name()
            )));
        }

        let kind = program.kind();
        if !self.pipelines.contains_key(&kind) {
            let pipeline = self.scoped(
                wgpu::ErrorFilter::Validation,
                || ProgramPipeline::new(&self.context.device, &self.layouts, kind),
                |err| RenderError::Device(format!("{} program: {err}", kind.name())),
            )?;
            self.pipelines.insert(kind, pipeline);
        }

        let target_entry = self.texture(target)?;
        let first = self.texture(inputs[0])?;
        let second = match inputs.get(1) {
            Some(id) => self.texture(*id)?,
            None => first,
        };

        let uniforms = StageUniforms::new(
            program,
            (target_entry.width, target_entry.height),
            (first.width, first.height),
        );
        let device = &self.context.device;
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("stage uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("stage uniform bind group"),
            layout: &self.layouts.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let texture_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("stage texture bind group"),
            layout: &self.layouts.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&first.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.layouts.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&second.view),
                },
            ],
        });

        let pipeline = &self.pipelines[&kind];
        self.scoped(
            wgpu::ErrorFilter::Validation,
            || {
                self.encode_pass(
                    kind.name(),
                    &target_entry.view,
                    Some((&pipeline.pipeline, &uniform_bind_group, &texture_bind_group)),
                )
            },
            |err| RenderError::Device(format!("{} pass: {err}", kind.name())),
        )
    }

    fn upload(&mut self, image: &RgbaImage) -> Result<TextureId, RenderError> {
        let id = self.create_target(image.width(), image.height())?;
        if let Err(err) = self.write(id, image) {
            self.release(id);
            return Err(err);
        }
        Ok(id)
    }

    fn write(&mut self, texture: TextureId, image: &RgbaImage) -> Result<(), RenderError> {
        let entry = self.texture(texture)?;
        if image.dimensions() != (entry.width, entry.height) {
            return Err(RenderError::Device(format!(
                "cannot write {}x{} image into {texture} ({}x{})",
                image.width(),
                image.height(),
                entry.width,
                entry.height
            )));
        }

        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * entry.width),
                rows_per_image: Some(entry.height),
            },
            wgpu::Extent3d {
                width: entry.width,
                height: entry.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read_pixels(&mut self, texture: TextureId) -> Result<RgbaImage, RenderError> {
        let entry = self.texture(texture)?;
        let (width, height) = (entry.width, entry.height);
        let unpadded = 4 * width;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let buffer = self.scoped(
            wgpu::ErrorFilter::OutOfMemory,
            || {
                self.context.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("readback buffer"),
                    size: u64::from(padded) * u64::from(height),
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            },
            |_| Self::allocation_error("readback buffer", width, height),
        )?;

        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("readback"),
                });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.context
            .device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| RenderError::Device(format!("device poll failed: {err}")))?;
        receiver
            .recv()
            .map_err(|_| RenderError::Device("readback callback dropped".into()))?
            .map_err(|err| RenderError::Device(format!("readback map failed: {err}")))?;

        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(unpadded as usize * height as usize)
            .map_err(|_| Self::allocation_error("pixel buffer", width, height))?;
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded as usize).take(height as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        buffer.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| RenderError::Device("readback size mismatch".into()))
    }
}
