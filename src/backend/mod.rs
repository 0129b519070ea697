//! GPU backend abstraction.
//!
//! Resources talk to the hardware through [`GpuBackend`]. Handles are
//! opaque enums so a future hardware backend can slot in alongside the
//! software one without touching resource code.

pub mod software;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub use software::SoftwareBackend;

use crate::error::GraphicsError;
use crate::types::{Rect, SamplerState, TextureDescriptor, TextureFormat, TextureViewDescriptor};

/// Opaque handle to a native buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuBuffer {
    Software(u64),
}

/// Opaque handle to a native texture image (or a view of one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuTexture {
    Software(u64),
}

/// Opaque handle to a native renderbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuRenderbuffer {
    Software(u64),
}

/// Opaque handle to a native framebuffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuFramebuffer {
    Software(u64),
}

/// Handle to a fence inserted into the command stream.
#[derive(Debug, Clone)]
pub enum GpuFence {
    Software { signaled: Arc<AtomicBool> },
}

/// Completeness status of a framebuffer at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    IncompleteAttachment,
    IncompleteDimensions,
    UnsupportedMultisample,
}

impl FramebufferStatus {
    /// Numeric status code reported through device errors.
    pub const fn code(self) -> u32 {
        match self {
            Self::Complete => 0,
            Self::IncompleteAttachment => 1,
            Self::IncompleteDimensions => 2,
            Self::UnsupportedMultisample => 3,
        }
    }
}

/// Color attachment of a framebuffer.
///
/// Exactly one of `texture` or `renderbuffer` should be set; when a
/// multisampled renderbuffer backs a readable texture, the renderbuffer
/// takes the attachment slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct FramebufferAttachment {
    pub texture: Option<GpuTexture>,
    pub renderbuffer: Option<GpuRenderbuffer>,
    /// Array layer or cube face the attachment points at.
    pub layer: u32,
    /// Mip level the attachment points at.
    pub mip: u32,
}

/// Capability and limit flags of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// The backend can zero a buffer range without a host upload.
    pub supports_clear_buffer: bool,
    /// The backend can copy texture texels into a buffer directly;
    /// otherwise readbacks go through a framebuffer rebind.
    pub supports_copy_texture_to_buffer: bool,
    /// After orphaning, the fresh buffer store needs the full contents
    /// uploaded in one call rather than an orphan followed by a write.
    pub needs_full_upload_after_orphan: bool,
    /// Maximum texture dimension in texels.
    pub max_texture_size: u32,
    /// Maximum MSAA sample count; requests above this are clamped.
    pub max_msaa_samples: u32,
    /// Maximum buffer size in bytes.
    pub max_buffer_size: u64,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            supports_clear_buffer: true,
            supports_copy_texture_to_buffer: true,
            needs_full_upload_after_orphan: false,
            max_texture_size: 16384,
            max_msaa_samples: 8,
            max_buffer_size: 1 << 30,
        }
    }
}

/// Live native object counts, for leak checks in tests and shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub buffers: usize,
    pub textures: usize,
    pub renderbuffers: usize,
    pub framebuffers: usize,
}

impl BackendStats {
    /// Total number of live native objects.
    pub fn total(&self) -> usize {
        self.buffers + self.textures + self.renderbuffers + self.framebuffers
    }
}

/// Interface every GPU backend implements.
///
/// All methods take `&self`; backends are internally synchronized.
pub trait GpuBackend: Send + Sync + 'static {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Capabilities and limits of this backend.
    fn capabilities(&self) -> BackendCapabilities;

    /// Live native object counts.
    fn stats(&self) -> BackendStats;

    // --- Buffers ---

    /// Create a buffer, optionally with initial contents covering it.
    fn create_buffer(
        &self,
        size: u64,
        label: Option<&str>,
        initial: Option<&[u8]>,
    ) -> Result<GpuBuffer, GraphicsError>;

    /// Replace the buffer's native store with a fresh one of the same
    /// size, abandoning the old store to in-flight GPU work. When
    /// `contents` is given the fresh store is created with that data in
    /// the same call.
    fn orphan_buffer(&self, buffer: GpuBuffer, contents: Option<&[u8]>);

    /// Write bytes into a buffer range.
    fn write_buffer(&self, buffer: GpuBuffer, offset: u64, data: &[u8]);

    /// Read bytes out of a buffer range.
    fn read_buffer(&self, buffer: GpuBuffer, offset: u64, size: u64) -> Vec<u8>;

    /// Zero a buffer range natively. Returns false when the backend
    /// has no native clear and the caller must fall back to an upload.
    fn clear_buffer(&self, buffer: GpuBuffer, offset: u64, size: u64) -> bool;

    /// Copy a byte range between buffers.
    fn copy_buffer(
        &self,
        src: GpuBuffer,
        dst: GpuBuffer,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    );

    /// Destroy a buffer.
    fn destroy_buffer(&self, buffer: GpuBuffer);

    // --- Textures ---

    /// Allocate image storage for every mip level and slice.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError>;

    /// Create a view aliasing the storage of an existing texture.
    fn create_texture_view(
        &self,
        base: GpuTexture,
        descriptor: &TextureViewDescriptor,
    ) -> Result<GpuTexture, GraphicsError>;

    /// Upload a rectangle of texels into one slice of one mip level.
    /// `source_row_width` is the row stride of `data` in texels; zero
    /// means tightly packed to the rectangle width.
    fn write_texture(
        &self,
        texture: GpuTexture,
        slice: u32,
        mip: u32,
        rect: Rect,
        source_row_width: u32,
        data: &[u8],
    );

    /// Read a rectangle of texels from one slice of one mip level,
    /// tightly packed to the rectangle width.
    fn read_texture(&self, texture: GpuTexture, slice: u32, mip: u32, rect: Rect) -> Vec<u8>;

    /// Read a rectangle from the framebuffer's current color
    /// attachment, tightly packed.
    fn read_framebuffer(&self, framebuffer: GpuFramebuffer, rect: Rect) -> Vec<u8>;

    /// Point the framebuffer's color attachment at a different slice
    /// and mip of its attached texture.
    fn rebind_framebuffer_attachment(
        &self,
        framebuffer: GpuFramebuffer,
        texture: GpuTexture,
        layer: u32,
        mip: u32,
    );

    /// Fill mip levels below the base from the base level.
    fn generate_mipmaps(&self, texture: GpuTexture);

    /// Apply sampler state to a texture.
    fn set_sampler_state(&self, texture: GpuTexture, state: &SamplerState);

    /// Destroy a texture or texture view. Storage shared with live
    /// views stays alive until the last alias is destroyed.
    fn destroy_texture(&self, texture: GpuTexture);

    // --- Renderbuffers and framebuffers ---

    /// Create a (possibly multisampled) renderbuffer.
    fn create_renderbuffer(
        &self,
        width: u32,
        height: u32,
        samples: u32,
        format: TextureFormat,
    ) -> Result<GpuRenderbuffer, GraphicsError>;

    /// Destroy a renderbuffer.
    fn destroy_renderbuffer(&self, renderbuffer: GpuRenderbuffer);

    /// Create a framebuffer and validate its completeness.
    fn create_framebuffer(
        &self,
        attachment: FramebufferAttachment,
    ) -> Result<GpuFramebuffer, FramebufferStatus>;

    /// Destroy a framebuffer.
    fn destroy_framebuffer(&self, framebuffer: GpuFramebuffer);

    // --- Buffer <-> texture transfers ---

    /// Copy texels from a buffer into a texture rectangle.
    /// `src_row_width` is the buffer row stride in texels; zero means
    /// tightly packed.
    #[allow(clippy::too_many_arguments)]
    fn copy_buffer_to_texture(
        &self,
        src: GpuBuffer,
        src_offset: u64,
        src_row_width: u32,
        dst: GpuTexture,
        slice: u32,
        mip: u32,
        rect: Rect,
    );

    /// Copy a texture rectangle into a buffer. `dst_row_width` is the
    /// buffer row stride in texels; zero means tightly packed.
    #[allow(clippy::too_many_arguments)]
    fn copy_texture_to_buffer(
        &self,
        src: GpuTexture,
        slice: u32,
        mip: u32,
        rect: Rect,
        dst: GpuBuffer,
        dst_offset: u64,
        dst_row_width: u32,
    );

    // --- Fences ---

    /// Insert a fence after all previously submitted work.
    fn insert_fence(&self) -> GpuFence;

    /// Whether the fence has been reached without blocking.
    fn is_fence_signaled(&self, fence: &GpuFence) -> bool;

    /// Block until the fence is reached.
    fn wait_fence(&self, fence: &GpuFence);

    /// Signal every outstanding fence. On a real backend this is a
    /// flush-and-wait; the software backend uses it to drive tests.
    fn signal_all_fences(&self);
}

/// Create the default backend.
pub fn create_backend() -> Arc<dyn GpuBackend> {
    let backend = SoftwareBackend::new();
    log::info!("Created graphics backend: {}", backend.name());
    Arc::new(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_backend() {
        let backend = create_backend();
        assert_eq!(backend.name(), "software");
        assert_eq!(backend.stats(), BackendStats::default());
    }

    #[test]
    fn test_framebuffer_status_codes() {
        assert_eq!(FramebufferStatus::Complete.code(), 0);
        assert_ne!(
            FramebufferStatus::IncompleteAttachment.code(),
            FramebufferStatus::UnsupportedMultisample.code()
        );
    }
}
