//! Sampler state attached to textures.

/// Texel filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Texture coordinate wrapping mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

/// Per-texture sampler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerState {
    /// Magnification filter.
    pub mag_filter: FilterMode,
    /// Minification filter.
    pub min_filter: FilterMode,
    /// Filter between mip levels.
    pub mip_filter: FilterMode,
    /// Wrapping for the U coordinate.
    pub wrap_u: WrapMode,
    /// Wrapping for the V coordinate.
    pub wrap_v: WrapMode,
    /// Wrapping for the W coordinate.
    pub wrap_w: WrapMode,
    /// Maximum anisotropy level.
    pub max_anisotropy: u16,
}

impl SamplerState {
    /// Create sampler state with linear filtering.
    pub fn linear() -> Self {
        Self {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mip_filter: FilterMode::Linear,
            ..Default::default()
        }
    }

    /// Set wrapping for all coordinates.
    pub fn with_wrap(mut self, mode: WrapMode) -> Self {
        self.wrap_u = mode;
        self.wrap_v = mode;
        self.wrap_w = mode;
        self
    }

    /// Set the anisotropy level.
    pub fn with_anisotropy(mut self, level: u16) -> Self {
        self.max_anisotropy = level;
        self
    }
}

impl Default for SamplerState {
    fn default() -> Self {
        Self {
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mip_filter: FilterMode::Nearest,
            wrap_u: WrapMode::ClampToEdge,
            wrap_v: WrapMode::ClampToEdge,
            wrap_w: WrapMode::ClampToEdge,
            max_anisotropy: 1,
        }
    }
}
