//! Texture types and descriptors.

use bitflags::bitflags;

use super::common::Extent3d;

/// Pixel format of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgba32Float,
    R32Uint,
}

impl TextureFormat {
    /// Size of one texel in bytes.
    pub const fn block_size(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rg8Unorm | Self::R16Float => 2,
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Rg16Float
            | Self::R32Float
            | Self::R32Uint => 4,
            Self::Rgba16Float | Self::Rg32Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    /// Whether `other` can alias storage of this format in a view.
    ///
    /// Formats are view-compatible when their texel sizes match.
    pub fn view_compatible(self, other: TextureFormat) -> bool {
        self.block_size() == other.block_size()
    }
}

/// Shape of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureType {
    /// A single 2D image per mip level.
    #[default]
    D2,
    /// Six 2D faces per mip level.
    Cube,
    /// A fixed number of 2D layers per mip level.
    Array,
    /// Depth slices that halve along the mip chain.
    Volume,
}

bitflags! {
    /// Ways a texture may be used by the pipeline.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Sampled in shaders; the texture has readable image storage.
        const SAMPLED = 1 << 0;
        /// Color attachment of a framebuffer.
        const RENDER_TARGET = 1 << 1;
        /// Written by compute shaders as a storage image.
        const COMPUTE_WRITE = 1 << 2;
    }
}

/// How mipmaps of a texture come to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MipmapsMode {
    /// Only the base level exists.
    #[default]
    None,
    /// The caller uploads every level itself.
    Manual,
    /// Levels below the base are generated from it.
    Auto,
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDescriptor {
    /// Debug label for the texture.
    pub label: Option<String>,
    /// Base level extent. `depth` is only meaningful for volume textures.
    pub size: Extent3d,
    /// Shape of the texture.
    pub texture_type: TextureType,
    /// Pixel format.
    pub format: TextureFormat,
    /// Pipeline usages.
    pub usage: TextureUsage,
    /// Number of mip levels.
    pub mip_level_count: u32,
    /// Number of array layers. Ignored unless `texture_type` is `Array`.
    pub layer_count: u32,
    /// MSAA sample count. Values above 1 only apply to render targets.
    pub sample_count: u32,
    /// Mipmap population policy.
    pub mipmaps: MipmapsMode,
}

impl TextureDescriptor {
    /// Create a 2D texture descriptor with a single mip level.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            size: Extent3d::new_2d(width, height),
            texture_type: TextureType::D2,
            format,
            usage,
            mip_level_count: 1,
            layer_count: 1,
            sample_count: 1,
            mipmaps: MipmapsMode::None,
        }
    }

    /// Create a cube texture descriptor with a single mip level.
    pub fn new_cube(size: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            texture_type: TextureType::Cube,
            ..Self::new_2d(size, size, format, usage)
        }
    }

    /// Create a volume texture descriptor with a single mip level.
    pub fn new_volume(
        width: u32,
        height: u32,
        depth: u32,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            size: Extent3d::new(width, height, depth),
            texture_type: TextureType::Volume,
            ..Self::new_2d(width, height, format, usage)
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the mip level count and the policy that fills the levels.
    pub fn with_mip_levels(mut self, count: u32, mipmaps: MipmapsMode) -> Self {
        self.mip_level_count = count;
        self.mipmaps = mipmaps;
        self
    }

    /// Turn the descriptor into an array texture with the given layer count.
    pub fn with_layers(mut self, count: u32) -> Self {
        self.texture_type = TextureType::Array;
        self.layer_count = count;
        self
    }

    /// Set the MSAA sample count.
    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    /// Number of 2D slices at the given mip level.
    pub fn slice_count(&self, mip: u32) -> u32 {
        match self.texture_type {
            TextureType::D2 => 1,
            TextureType::Cube => 6,
            TextureType::Array => self.layer_count,
            TextureType::Volume => self.size.mip_extent(mip).depth,
        }
    }

    /// Extent of the given mip level.
    pub fn mip_extent(&self, mip: u32) -> Extent3d {
        self.size.mip_extent(mip)
    }

    /// Byte size of one slice at the given mip level.
    pub fn slice_byte_size(&self, mip: u32) -> u64 {
        let extent = self.mip_extent(mip);
        extent.width as u64 * extent.height as u64 * self.format.block_size() as u64
    }
}

/// Descriptor for a texture view aliasing a subrange of another texture.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextureViewDescriptor {
    /// Debug label for the view.
    pub label: Option<String>,
    /// Reinterpreted format, or the base texture's format when `None`.
    pub format: Option<TextureFormat>,
    /// First mip level of the base texture visible through the view.
    pub base_mip: u32,
    /// Number of mip levels, or the rest of the chain when `None`.
    pub mip_count: Option<u32>,
    /// First array layer visible through the view.
    pub base_layer: u32,
    /// Number of layers, or the rest of the layers when `None`.
    pub layer_count: Option<u32>,
}

impl TextureViewDescriptor {
    /// Create a view descriptor covering the whole base texture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Restrict the view to a mip range.
    pub fn with_mip_range(mut self, base_mip: u32, mip_count: u32) -> Self {
        self.base_mip = base_mip;
        self.mip_count = Some(mip_count);
        self
    }

    /// Restrict the view to a layer range.
    pub fn with_layer_range(mut self, base_layer: u32, layer_count: u32) -> Self {
        self.base_layer = base_layer;
        self.layer_count = Some(layer_count);
        self
    }

    /// Reinterpret texels with a different (size-compatible) format.
    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = Some(format);
        self
    }
}
