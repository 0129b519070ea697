//! Buffer types and descriptors.

use bitflags::bitflags;

bitflags! {
    /// Pipeline stages a buffer may be bound to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Vertex attribute source.
        const VERTEX = 1 << 0;
        /// Index source for indexed draws.
        const INDEX = 1 << 1;
        /// Texel buffer bound through a buffer view.
        const TEXEL = 1 << 2;
        /// Shader storage buffer, writable from compute.
        const SHADER_STORAGE = 1 << 3;
        /// Indirect draw/dispatch argument source.
        const INDIRECT_ARGUMENTS = 1 << 4;
    }
}

/// Expected update pattern of a buffer's contents.
///
/// This drives the mapping and orphaning behavior, not where the
/// buffer may be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferDataUsage {
    /// Written once at creation, immutable afterwards.
    Static,
    /// Updated occasionally.
    #[default]
    Dynamic,
    /// Rewritten every frame.
    Stream,
    /// GPU-to-CPU transfer destination, CPU readable.
    Readback,
}

impl BufferDataUsage {
    /// Whether a whole-buffer rewrite may discard the previous native
    /// storage instead of synchronizing with in-flight GPU work.
    pub fn supports_orphaning(self) -> bool {
        matches!(self, Self::Dynamic | Self::Stream)
    }
}

/// How a buffer range is mapped for CPU access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// Read current contents. Only valid for [`BufferDataUsage::Readback`].
    ReadOnly,
    /// Write new contents. The mapped memory is uninitialized; every
    /// byte the caller cares about must be written before unmap.
    WriteInvalidate,
}

/// Scalar/vector format of one buffer element component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFormat {
    Float,
    Float2,
    Float3,
    Float4,
    Int32,
    Int32x2,
    Int32x4,
    Uint32,
    Uint16,
    Uint8x4,
    Unorm8x4,
}

impl DataFormat {
    /// Size of one element of this format in bytes.
    pub const fn size(self) -> u64 {
        match self {
            Self::Float | Self::Int32 | Self::Uint32 | Self::Uint8x4 | Self::Unorm8x4 => 4,
            Self::Float2 | Self::Int32x2 => 8,
            Self::Float3 => 12,
            Self::Float4 | Self::Int32x4 => 16,
            Self::Uint16 => 2,
        }
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Bind points the buffer will be used at.
    pub usage: BufferUsage,
    /// Expected update pattern.
    pub data_usage: BufferDataUsage,
    /// Zero the contents at creation when no initial data is given.
    pub zero_initialize: bool,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage, data_usage: BufferDataUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
            data_usage,
            zero_initialize: false,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Request zeroed contents when no initial data is supplied.
    pub fn with_zero_initialize(mut self) -> Self {
        self.zero_initialize = true;
        self
    }
}
