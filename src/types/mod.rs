//! Shared value types: descriptors, formats, usage flags.

pub mod buffer;
pub mod common;
pub mod sampler;
pub mod texture;

pub use buffer::{BufferDataUsage, BufferDescriptor, BufferUsage, DataFormat, MapMode};
pub use common::{align_up, Extent3d, Rect};
pub use sampler::{FilterMode, SamplerState, WrapMode};
pub use texture::{
    MipmapsMode, TextureDescriptor, TextureFormat, TextureType, TextureUsage,
    TextureViewDescriptor,
};
