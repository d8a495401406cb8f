use crate::device::{RenderDevice, RenderError};
use crate::types::TextureId;

/// Fixed number of equally sized render targets, addressed by slot index.
///
/// Targets are (re)allocated by [`setup`](Self::setup) whenever the requested
/// dimensions change. A failed setup leaves the sequence empty rather than
/// half allocated.
#[derive(Debug)]
pub struct FramebufferSequence {
    len: usize,
    targets: Vec<TextureId>,
    size: Option<(u32, u32)>,
}

impl FramebufferSequence {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            targets: Vec::new(),
            size: None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_allocated(&self) -> bool {
        self.size.is_some()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.size
    }

    /// Makes sure every slot holds a `width`x`height` target.
    ///
    /// Returns `true` when the targets were (re)allocated, in which case their
    /// contents are cleared.
    pub fn setup<D>(&mut self, device: &mut D, width: u32, height: u32) -> Result<bool, RenderError>
    where
        D: RenderDevice + ?Sized,
    {
        if self.size == Some((width, height)) {
            return Ok(false);
        }

        self.release(device);
        let mut targets = Vec::with_capacity(self.len);
        for _ in 0..self.len {
            match device.create_target(width, height) {
                Ok(id) => targets.push(id),
                Err(err) => {
                    for id in targets {
                        device.release(id);
                    }
                    return Err(err);
                }
            }
        }

        tracing::debug!(slots = self.len, width, height, "allocated framebuffer sequence");
        self.targets = targets;
        self.size = Some((width, height));
        Ok(true)
    }

    pub fn texture(&self, slot: usize) -> Result<TextureId, RenderError> {
        if slot >= self.len {
            return Err(RenderError::Slot {
                slot,
                len: self.len,
            });
        }
        self.targets.get(slot).copied().ok_or(RenderError::NotSetUp)
    }

    /// Renders into `slot` through `render` and returns the slot's texture so
    /// it can feed the next stage.
    pub fn process<D, F>(
        &self,
        device: &mut D,
        slot: usize,
        render: F,
    ) -> Result<TextureId, RenderError>
    where
        D: RenderDevice + ?Sized,
        F: FnOnce(&mut D, TextureId) -> Result<(), RenderError>,
    {
        let target = self.texture(slot)?;
        render(device, target)?;
        Ok(target)
    }

    pub fn clear<D>(&self, device: &mut D, slot: usize) -> Result<(), RenderError>
    where
        D: RenderDevice + ?Sized,
    {
        device.clear(self.texture(slot)?)
    }

    /// Frees every target; the sequence can be set up again afterwards.
    pub fn release<D>(&mut self, device: &mut D)
    where
        D: RenderDevice + ?Sized,
    {
        for id in self.targets.drain(..) {
            device.release(id);
        }
        self.size = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Program;
    use crate::software::SoftwareDevice;
    use image::{Rgba, RgbaImage};

    #[test]
    fn setup_allocates_once_per_size() {
        let mut device = SoftwareDevice::new();
        let mut sequence = FramebufferSequence::new(3);

        assert!(sequence.setup(&mut device, 8, 4).unwrap());
        assert!(!sequence.setup(&mut device, 8, 4).unwrap());
        assert_eq!(device.texture_count(), 3);
        assert_eq!(sequence.dimensions(), Some((8, 4)));

        assert!(sequence.setup(&mut device, 16, 4).unwrap());
        assert_eq!(device.texture_count(), 3);
        let slot = sequence.texture(2).unwrap();
        assert_eq!(device.dimensions(slot), Some((16, 4)));
    }

    #[test]
    fn failed_setup_releases_partial_allocations() {
        let mut device = SoftwareDevice::with_max_dimension(32);
        let mut sequence = FramebufferSequence::new(4);
        sequence.setup(&mut device, 8, 8).unwrap();

        let err = sequence.setup(&mut device, 64, 8).unwrap_err();
        assert!(err.is_allocation());
        assert_eq!(device.texture_count(), 0);
        assert!(!sequence.is_allocated());
        assert!(matches!(sequence.texture(0), Err(RenderError::NotSetUp)));
    }

    #[test]
    fn process_renders_into_the_requested_slot() {
        let mut device = SoftwareDevice::new();
        let mut sequence = FramebufferSequence::new(2);
        sequence.setup(&mut device, 2, 2).unwrap();
        let src = device
            .upload(&RgbaImage::from_pixel(2, 2, Rgba([9, 8, 7, 255])))
            .unwrap();

        let out = sequence
            .process(&mut device, 1, |device, target| {
                device.draw(target, &Program::Color, &[src])
            })
            .unwrap();

        assert_eq!(out, sequence.texture(1).unwrap());
        let pixels = device.read_pixels(out).unwrap();
        assert_eq!(pixels.get_pixel(1, 1), &Rgba([9, 8, 7, 255]));
    }

    #[test]
    fn out_of_range_slot_is_reported() {
        let mut device = SoftwareDevice::new();
        let mut sequence = FramebufferSequence::new(2);
        sequence.setup(&mut device, 2, 2).unwrap();
        assert!(matches!(
            sequence.texture(5),
            Err(RenderError::Slot { slot: 5, len: 2 })
        ));
    }
}
