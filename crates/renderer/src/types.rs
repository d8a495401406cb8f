use std::fmt;

/// Opaque handle to a texture owned by a [`RenderDevice`](crate::RenderDevice).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u32);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}

/// Adapter selection hint for the wgpu backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GpuPowerPreference {
    #[default]
    Low,
    High,
}

/// Per-frame context handed to every shader stage.
///
/// `width`/`height` describe the output the stages render at; `src` is the
/// texture the next stage reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShaderEnvironment {
    pub width: u32,
    pub height: u32,
    pub src: TextureId,
}

impl ShaderEnvironment {
    pub fn new(width: u32, height: u32, src: TextureId) -> Self {
        Self { width, height, src }
    }

    /// Same dimensions, different source texture.
    pub fn with_source(&self, src: TextureId) -> Self {
        Self { src, ..*self }
    }
}

/// Information about the loaded cartridge that ends up in output filenames.
pub trait CartridgeMetadata {
    fn short_name(&self) -> &str;
}

impl CartridgeMetadata for str {
    fn short_name(&self) -> &str {
        self
    }
}

impl CartridgeMetadata for String {
    fn short_name(&self) -> &str {
        self.as_str()
    }
}
