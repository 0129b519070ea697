//! GPU resource lifecycle layer.
//!
//! This crate manages the part of a renderer that survives losing the
//! GPU context: buffers and textures are *volatile* objects whose
//! native state can be torn down and rebuilt from CPU-side
//! information, a device facade validates and tracks every resource,
//! and readbacks move GPU data to the CPU either immediately or
//! asynchronously through pooled staging buffers.
//!
//! ```
//! use marigold_graphics::{
//!     BufferDataUsage, BufferDescriptor, BufferUsage, GraphicsInstance, MapMode,
//! };
//!
//! let instance = GraphicsInstance::new();
//! let device = instance.create_device("main");
//!
//! let buffer = device
//!     .create_buffer(
//!         BufferDescriptor::new(1024, BufferUsage::VERTEX, BufferDataUsage::Stream),
//!         &[],
//!         0,
//!         None,
//!     )
//!     .unwrap();
//!
//! if let Some(mut mapped) = buffer.map(MapMode::WriteInvalidate, 0, 1024) {
//!     mapped.fill(0xFF);
//! }
//! buffer.unmap(0, 1024);
//!
//! // Everything survives a context loss.
//! assert!(device.reset_context());
//! ```

pub mod backend;
pub mod device;
pub mod error;
pub mod instance;
pub mod resources;
pub mod types;
pub mod volatile;

pub use backend::{BackendCapabilities, BackendStats, GpuBackend, SoftwareBackend};
pub use device::GraphicsDevice;
pub use error::GraphicsError;
pub use instance::GraphicsInstance;
pub use resources::{Buffer, GraphicsReadback, MappedRange, ReadbackMethod, ReadbackStatus, Texture};
pub use types::{
    BufferDataUsage, BufferDescriptor, BufferUsage, DataFormat, Extent3d, FilterMode, MapMode,
    MipmapsMode, Rect, SamplerState, TextureDescriptor, TextureFormat, TextureType, TextureUsage,
    TextureViewDescriptor, WrapMode,
};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
