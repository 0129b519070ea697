//! Graphics device facade.
//!
//! The device is the single entry point for resource creation. It
//! validates descriptors before anything native is allocated, tracks
//! every live resource for context resets and leak checks, and owns
//! two pools: reusable temporary GPU buffers (staging for readbacks)
//! and CPU scratch memory for mapped writes.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use static_assertions::assert_impl_all;

use crate::backend::{BackendCapabilities, BackendStats, GpuBackend};
use crate::error::GraphicsError;
use crate::resources::readback::{GraphicsReadback, ReadbackMethod};
use crate::resources::{Buffer, Texture};
use crate::types::{
    align_up, BufferDataUsage, BufferDescriptor, BufferUsage, DataFormat, Rect,
    TextureDescriptor, TextureType, TextureUsage, TextureViewDescriptor,
};
use crate::volatile::{Volatile, VolatileRegistry};

/// A pooled temporary buffer is dropped after going unused for this
/// many frames.
const MAX_TEMPORARY_UNUSED_FRAMES: i32 = 16;

/// Number of scratch allocations kept around for reuse.
const MAX_POOLED_SCRATCH: usize = 4;

struct TemporaryBuffer {
    buffer: Arc<Buffer>,
    /// -1 while borrowed, otherwise frames since last release.
    frames_since_use: i32,
}

/// Facade over one GPU context.
pub struct GraphicsDevice {
    name: String,
    backend: Arc<dyn GpuBackend>,
    volatile: VolatileRegistry,
    buffers: Mutex<Vec<Weak<Buffer>>>,
    textures: Mutex<Vec<Weak<Texture>>>,
    temporary: Mutex<Vec<TemporaryBuffer>>,
    scratch: Mutex<Vec<Vec<u8>>>,
}

assert_impl_all!(GraphicsDevice: Send, Sync);

impl GraphicsDevice {
    pub(crate) fn new(name: impl Into<String>, backend: Arc<dyn GpuBackend>) -> Arc<Self> {
        let device = Arc::new(Self {
            name: name.into(),
            backend,
            volatile: VolatileRegistry::new(),
            buffers: Mutex::new(Vec::new()),
            textures: Mutex::new(Vec::new()),
            temporary: Mutex::new(Vec::new()),
            scratch: Mutex::new(Vec::new()),
        });
        log::info!(
            "Created graphics device '{}' on {} backend",
            device.name,
            device.backend.name()
        );
        device
    }

    /// Create a device directly on a given backend. Tests use this to
    /// inject configured software backends.
    pub fn with_backend(backend: Arc<dyn GpuBackend>) -> Arc<Self> {
        Self::new("standalone", backend)
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backend this device talks to.
    pub fn backend(&self) -> Arc<dyn GpuBackend> {
        self.backend.clone()
    }

    /// Backend capabilities and limits.
    pub fn capabilities(&self) -> BackendCapabilities {
        self.backend.capabilities()
    }

    /// Live native object counts reported by the backend.
    pub fn backend_stats(&self) -> BackendStats {
        self.backend.stats()
    }

    // --- Resource creation ---

    /// Create a buffer.
    ///
    /// `formats` and `array_length` describe structured contents: when
    /// `array_length` is non-zero the summed format stride times the
    /// array length must equal the descriptor size. An unstructured
    /// buffer passes an empty format list and zero length.
    pub fn create_buffer(
        self: &Arc<Self>,
        descriptor: BufferDescriptor,
        formats: &[DataFormat],
        array_length: u64,
        initial: Option<&[u8]>,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        if descriptor.size == 0 {
            return Err(GraphicsError::Validation(
                "buffer size must be non-zero".to_string(),
            ));
        }
        let capabilities = self.backend.capabilities();
        if descriptor.size > capabilities.max_buffer_size {
            return Err(GraphicsError::Validation(format!(
                "buffer size {} exceeds device limit {}",
                descriptor.size, capabilities.max_buffer_size
            )));
        }
        if descriptor.data_usage == BufferDataUsage::Readback
            && descriptor
                .usage
                .intersects(BufferUsage::SHADER_STORAGE | BufferUsage::INDIRECT_ARGUMENTS)
        {
            return Err(GraphicsError::Validation(
                "Readback buffers cannot be shader-writable or indirect argument sources"
                    .to_string(),
            ));
        }
        if array_length > 0 {
            if formats.is_empty() {
                return Err(GraphicsError::Validation(
                    "structured buffers need at least one element format".to_string(),
                ));
            }
            let stride: u64 = formats.iter().map(|format| format.size()).sum();
            if stride * array_length != descriptor.size {
                return Err(GraphicsError::Validation(format!(
                    "element stride {stride} x array length {array_length} does not match \
                     buffer size {}",
                    descriptor.size
                )));
            }
        }
        if let Some(data) = initial {
            if data.len() as u64 != descriptor.size {
                return Err(GraphicsError::Validation(format!(
                    "initial data length {} does not match buffer size {}",
                    data.len(),
                    descriptor.size
                )));
            }
        }

        let buffer = Arc::new(Buffer::new(
            self.backend.clone(),
            Arc::downgrade(self),
            descriptor,
            formats.to_vec(),
            array_length,
            initial,
        )?);
        buffer.load_now()?;
        self.track_buffer(&buffer);
        Ok(buffer)
    }

    /// Create a texture.
    ///
    /// `base_slices` optionally carries initial texels for every slice
    /// of mip level 0; further levels start zeroed (or generated, for
    /// automatic mipmaps).
    pub fn create_texture(
        self: &Arc<Self>,
        descriptor: TextureDescriptor,
        base_slices: Option<&[Vec<u8>]>,
    ) -> Result<Arc<Texture>, GraphicsError> {
        self.validate_texture_descriptor(&descriptor)?;
        if let Some(slices) = base_slices {
            if slices.len() as u32 != descriptor.slice_count(0) {
                return Err(GraphicsError::Validation(format!(
                    "expected {} base slices, got {}",
                    descriptor.slice_count(0),
                    slices.len()
                )));
            }
            let expected = descriptor.slice_byte_size(0) as usize;
            if slices.iter().any(|slice| slice.len() != expected) {
                return Err(GraphicsError::Validation(format!(
                    "every base slice must be {expected} bytes"
                )));
            }
        }

        let texture = Arc::new(Texture::new(
            self.backend.clone(),
            Arc::downgrade(self),
            descriptor,
            base_slices,
        ));
        texture.load_now()?;
        self.track_texture(&texture);
        Ok(texture)
    }

    /// Create a zero-copy view of `base`.
    ///
    /// The view shares the base's image storage; it owns no native
    /// memory of its own and forces the base to load when it loads.
    pub fn create_texture_view(
        self: &Arc<Self>,
        base: &Arc<Texture>,
        descriptor: TextureViewDescriptor,
    ) -> Result<Arc<Texture>, GraphicsError> {
        let base_descriptor = base.descriptor();
        if !base.is_readable() {
            return Err(GraphicsError::Validation(
                "cannot view a texture without readable image storage".to_string(),
            ));
        }
        if base_descriptor.sample_count > 1 {
            return Err(GraphicsError::Validation(
                "cannot view a multisampled texture".to_string(),
            ));
        }
        if base_descriptor.texture_type == TextureType::Volume {
            return Err(GraphicsError::Validation(
                "cannot view a volume texture".to_string(),
            ));
        }

        let base_layers = base_descriptor.slice_count(0);
        let mip_count = descriptor
            .mip_count
            .unwrap_or(base_descriptor.mip_level_count.saturating_sub(descriptor.base_mip));
        let layer_count = descriptor
            .layer_count
            .unwrap_or(base_layers.saturating_sub(descriptor.base_layer));
        if mip_count == 0
            || descriptor
                .base_mip
                .checked_add(mip_count)
                .is_none_or(|end| end > base_descriptor.mip_level_count)
        {
            return Err(GraphicsError::Validation(format!(
                "view mip range [{}, {}+{mip_count}) exceeds {} levels",
                descriptor.base_mip, descriptor.base_mip, base_descriptor.mip_level_count
            )));
        }
        if layer_count == 0
            || descriptor
                .base_layer
                .checked_add(layer_count)
                .is_none_or(|end| end > base_layers)
        {
            return Err(GraphicsError::Validation(format!(
                "view layer range [{}, {}+{layer_count}) exceeds {base_layers} layers",
                descriptor.base_layer, descriptor.base_layer
            )));
        }
        let format = descriptor.format.unwrap_or(base_descriptor.format);
        if !base_descriptor.format.view_compatible(format) {
            return Err(GraphicsError::Validation(format!(
                "view format {format:?} is not compatible with {:?}",
                base_descriptor.format
            )));
        }

        let texture_type = match base_descriptor.texture_type {
            _ if layer_count == 1 => TextureType::D2,
            TextureType::Cube if layer_count == 6 && descriptor.base_layer == 0 => {
                TextureType::Cube
            }
            _ => TextureType::Array,
        };
        let view_texture_descriptor = TextureDescriptor {
            label: descriptor.label.clone(),
            size: base_descriptor.mip_extent(descriptor.base_mip),
            texture_type,
            format,
            usage: base_descriptor.usage,
            mip_level_count: mip_count,
            layer_count,
            sample_count: 1,
            mipmaps: base_descriptor.mipmaps,
        };
        let resolved = TextureViewDescriptor {
            label: descriptor.label,
            format: Some(format),
            base_mip: descriptor.base_mip,
            mip_count: Some(mip_count),
            base_layer: descriptor.base_layer,
            layer_count: Some(layer_count),
        };

        let view = Arc::new(Texture::new_view(
            self.backend.clone(),
            Arc::downgrade(self),
            view_texture_descriptor,
            base.clone(),
            resolved,
        ));
        view.load_now()?;
        self.track_texture(&view);
        Ok(view)
    }

    fn validate_texture_descriptor(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<(), GraphicsError> {
        if descriptor.usage.is_empty() {
            return Err(GraphicsError::Validation(
                "texture needs at least one usage".to_string(),
            ));
        }
        let size = descriptor.size;
        if size.width == 0 || size.height == 0 || size.depth == 0 {
            return Err(GraphicsError::Validation(
                "texture dimensions must be non-zero".to_string(),
            ));
        }
        let limit = self.backend.capabilities().max_texture_size;
        if size.width > limit || size.height > limit || size.depth > limit {
            return Err(GraphicsError::Validation(format!(
                "texture dimensions {}x{}x{} exceed device limit {limit}",
                size.width, size.height, size.depth
            )));
        }
        if descriptor.texture_type == TextureType::Cube && size.width != size.height {
            return Err(GraphicsError::Validation(
                "cube textures must be square".to_string(),
            ));
        }
        if descriptor.texture_type == TextureType::Array && descriptor.layer_count == 0 {
            return Err(GraphicsError::Validation(
                "array textures need at least one layer".to_string(),
            ));
        }
        let max_mips = size.full_mip_count();
        if descriptor.mip_level_count == 0 || descriptor.mip_level_count > max_mips {
            return Err(GraphicsError::Validation(format!(
                "mip level count {} outside [1, {max_mips}]",
                descriptor.mip_level_count
            )));
        }
        if descriptor.sample_count > 1 {
            if !descriptor.usage.contains(TextureUsage::RENDER_TARGET) {
                return Err(GraphicsError::Validation(
                    "multisampling requires a render target".to_string(),
                ));
            }
            if descriptor.mip_level_count > 1 {
                return Err(GraphicsError::Validation(
                    "multisampled textures cannot have mipmaps".to_string(),
                ));
            }
            if descriptor.texture_type != TextureType::D2 {
                return Err(GraphicsError::Validation(
                    "only 2D textures can be multisampled".to_string(),
                ));
            }
        }
        Ok(())
    }

    // --- Readbacks ---

    /// Read a byte range of a buffer back to the CPU.
    pub fn readback_buffer(
        self: &Arc<Self>,
        source: &Arc<Buffer>,
        method: ReadbackMethod,
        offset: u64,
        size: u64,
    ) -> Result<GraphicsReadback, GraphicsError> {
        GraphicsReadback::from_buffer(self, source, method, offset, size)
    }

    /// Read a slice rectangle of a texture back to the CPU.
    pub fn readback_texture(
        self: &Arc<Self>,
        source: &Arc<Texture>,
        method: ReadbackMethod,
        slice: u32,
        mip: u32,
        rect: Rect,
    ) -> Result<GraphicsReadback, GraphicsError> {
        GraphicsReadback::from_texture(self, source, method, slice, mip, rect)
    }

    // --- Temporary buffer pool ---

    /// Borrow a pooled temporary buffer, creating one when no free
    /// pooled buffer matches the size, element formats, and usage
    /// exactly. Pair with
    /// [`GraphicsDevice::release_temporary_buffer`].
    pub fn acquire_temporary_buffer(
        self: &Arc<Self>,
        size: u64,
        formats: &[DataFormat],
        usage: BufferUsage,
        data_usage: BufferDataUsage,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        {
            let mut temporary = self.temporary.lock();
            for entry in temporary.iter_mut() {
                let descriptor = entry.buffer.descriptor();
                if entry.frames_since_use >= 0
                    && descriptor.size == size
                    && descriptor.usage == usage
                    && descriptor.data_usage == data_usage
                    && entry.buffer.formats() == formats
                {
                    entry.frames_since_use = -1;
                    return Ok(entry.buffer.clone());
                }
            }
        }
        let descriptor =
            BufferDescriptor::new(size, usage, data_usage).with_label("temporary buffer");
        let buffer = self.create_buffer(descriptor, formats, 0, None)?;
        self.temporary.lock().push(TemporaryBuffer {
            buffer: buffer.clone(),
            frames_since_use: -1,
        });
        Ok(buffer)
    }

    /// Staging buffer for readbacks.
    pub(crate) fn acquire_staging_buffer(
        self: &Arc<Self>,
        size: u64,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        self.acquire_temporary_buffer(size, &[], BufferUsage::empty(), BufferDataUsage::Readback)
    }

    /// Return a borrowed temporary buffer to the pool.
    pub fn release_temporary_buffer(&self, buffer: &Arc<Buffer>) {
        let mut temporary = self.temporary.lock();
        for entry in temporary.iter_mut() {
            if Arc::ptr_eq(&entry.buffer, buffer) {
                entry.frames_since_use = 0;
                return;
            }
        }
    }

    /// Age the temporary pool by one frame, dropping buffers that have
    /// gone unused too long. Call once per frame.
    pub fn update_temporary_resources(&self) {
        let mut temporary = self.temporary.lock();
        for entry in temporary.iter_mut() {
            if entry.frames_since_use >= 0 {
                entry.frames_since_use += 1;
            }
        }
        temporary
            .retain(|entry| entry.frames_since_use < MAX_TEMPORARY_UNUSED_FRAMES);
    }

    /// Drop every pooled buffer that is not currently borrowed.
    pub fn clear_temporary_resources(&self) {
        self.temporary
            .lock()
            .retain(|entry| entry.frames_since_use < 0);
    }

    /// Number of buffers in the temporary pool, borrowed or not.
    pub fn temporary_buffer_count(&self) -> usize {
        self.temporary.lock().len()
    }

    // --- CPU scratch pool ---

    pub(crate) fn acquire_scratch(&self, size: usize) -> Vec<u8> {
        // Round requests up so near-miss sizes hit the same pooled
        // allocation.
        let size = align_up(size as u64, 64) as usize;
        let mut scratch = self.scratch.lock();
        if let Some(index) = scratch.iter().position(|buf| buf.capacity() >= size) {
            let mut buf = scratch.swap_remove(index);
            buf.clear();
            buf.resize(size, 0);
            return buf;
        }
        drop(scratch);
        vec![0; size]
    }

    pub(crate) fn release_scratch(&self, scratch: Vec<u8>) {
        let mut pool = self.scratch.lock();
        if pool.len() < MAX_POOLED_SCRATCH {
            pool.push(scratch);
        }
    }

    // --- Context reset and tracking ---

    /// Simulate (or react to) a context loss: destroy the native state
    /// of every live resource, then rebuild all of it in creation
    /// order. Returns false when any resource failed to come back.
    pub fn reset_context(&self) -> bool {
        log::info!("Resetting graphics context of device '{}'", self.name);
        self.volatile.unload_all();
        let restored = self.volatile.load_all();
        if !restored {
            log::warn!(
                "Context reset of device '{}' left resources unloaded",
                self.name
            );
        }
        restored
    }

    /// Number of live buffers created through this device.
    pub fn buffer_count(&self) -> usize {
        self.buffers
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Number of live textures (views included) created through this
    /// device.
    pub fn texture_count(&self) -> usize {
        self.textures
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Drop tracking entries of destroyed resources.
    pub fn cleanup_dead_resources(&self) {
        self.buffers.lock().retain(|weak| weak.strong_count() > 0);
        self.textures.lock().retain(|weak| weak.strong_count() > 0);
        self.volatile.prune();
    }

    fn track_buffer(&self, buffer: &Arc<Buffer>) {
        self.buffers.lock().push(Arc::downgrade(buffer));
        let volatile: Arc<dyn Volatile> = buffer.clone();
        self.volatile.register(Arc::downgrade(&volatile));
    }

    fn track_texture(&self, texture: &Arc<Texture>) {
        self.textures.lock().push(Arc::downgrade(texture));
        let volatile: Arc<dyn Volatile> = texture.clone();
        self.volatile.register(Arc::downgrade(&volatile));
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        self.clear_temporary_resources();
        log::info!("Destroyed graphics device '{}'", self.name);
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .field("buffers", &self.buffer_count())
            .field("textures", &self.texture_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::types::TextureFormat;

    fn device() -> Arc<GraphicsDevice> {
        GraphicsDevice::with_backend(Arc::new(SoftwareBackend::new()))
    }

    #[test]
    fn test_buffer_validation() {
        let device = device();
        let err = device
            .create_buffer(
                BufferDescriptor::new(0, BufferUsage::VERTEX, BufferDataUsage::Static),
                &[],
                0,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, GraphicsError::Validation(_)));

        // Stride 12 x 10 elements != 100 bytes.
        let err = device
            .create_buffer(
                BufferDescriptor::new(100, BufferUsage::VERTEX, BufferDataUsage::Static),
                &[DataFormat::Float3],
                10,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, GraphicsError::Validation(_)));

        let err = device
            .create_buffer(
                BufferDescriptor::new(
                    64,
                    BufferUsage::SHADER_STORAGE,
                    BufferDataUsage::Readback,
                ),
                &[],
                0,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, GraphicsError::Validation(_)));
    }

    #[test]
    fn test_structured_buffer() {
        let device = device();
        let buffer = device
            .create_buffer(
                BufferDescriptor::new(120, BufferUsage::VERTEX, BufferDataUsage::Static),
                &[DataFormat::Float3],
                10,
                None,
            )
            .unwrap();
        assert_eq!(buffer.array_length(), 10);
        assert_eq!(buffer.formats(), &[DataFormat::Float3]);
        assert_eq!(device.buffer_count(), 1);
    }

    #[test]
    fn test_texture_validation() {
        let device = device();
        let err = device
            .create_texture(
                TextureDescriptor::new_2d(0, 8, TextureFormat::Rgba8Unorm, TextureUsage::SAMPLED),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, GraphicsError::Validation(_)));

        // More mips than the extent allows.
        let err = device
            .create_texture(
                TextureDescriptor::new_2d(8, 8, TextureFormat::Rgba8Unorm, TextureUsage::SAMPLED)
                    .with_mip_levels(5, crate::types::MipmapsMode::Manual),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, GraphicsError::Validation(_)));

        // Multisampling without a render target.
        let err = device
            .create_texture(
                TextureDescriptor::new_2d(8, 8, TextureFormat::Rgba8Unorm, TextureUsage::SAMPLED)
                    .with_sample_count(4),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, GraphicsError::Validation(_)));
    }

    #[test]
    fn test_resource_counts_and_cleanup() {
        let device = device();
        let buffer = device
            .create_buffer(
                BufferDescriptor::new(16, BufferUsage::VERTEX, BufferDataUsage::Dynamic),
                &[],
                0,
                None,
            )
            .unwrap();
        let texture = device
            .create_texture(
                TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, TextureUsage::SAMPLED),
                None,
            )
            .unwrap();
        assert_eq!(device.buffer_count(), 1);
        assert_eq!(device.texture_count(), 1);
        assert_eq!(device.backend_stats().buffers, 1);
        assert_eq!(device.backend_stats().textures, 1);

        drop(buffer);
        drop(texture);
        assert_eq!(device.buffer_count(), 0);
        assert_eq!(device.texture_count(), 0);
        assert_eq!(device.backend_stats().total(), 0);
        device.cleanup_dead_resources();
    }

    #[test]
    fn test_temporary_pool_reuse() {
        let device = device();
        let first = device
            .acquire_temporary_buffer(256, &[], BufferUsage::empty(), BufferDataUsage::Readback)
            .unwrap();
        device.release_temporary_buffer(&first);

        // Same parameters: the pooled buffer comes back.
        let second = device
            .acquire_temporary_buffer(256, &[], BufferUsage::empty(), BufferDataUsage::Readback)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(device.temporary_buffer_count(), 1);

        // Different size: a new buffer.
        let third = device
            .acquire_temporary_buffer(128, &[], BufferUsage::empty(), BufferDataUsage::Readback)
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(device.temporary_buffer_count(), 2);

        // A borrowed buffer is never handed out twice.
        let fourth = device
            .acquire_temporary_buffer(256, &[], BufferUsage::empty(), BufferDataUsage::Readback)
            .unwrap();
        assert!(!Arc::ptr_eq(&second, &fourth));
    }

    #[test]
    fn test_temporary_pool_aging() {
        let device = device();
        let buffer = device
            .acquire_temporary_buffer(64, &[], BufferUsage::empty(), BufferDataUsage::Readback)
            .unwrap();
        device.release_temporary_buffer(&buffer);
        drop(buffer);

        for _ in 0..MAX_TEMPORARY_UNUSED_FRAMES {
            device.update_temporary_resources();
        }
        assert_eq!(device.temporary_buffer_count(), 0);
    }

    #[test]
    fn test_borrowed_temporaries_survive_aging_and_clear() {
        let device = device();
        let buffer = device
            .acquire_temporary_buffer(64, &[], BufferUsage::empty(), BufferDataUsage::Readback)
            .unwrap();
        for _ in 0..MAX_TEMPORARY_UNUSED_FRAMES * 2 {
            device.update_temporary_resources();
        }
        device.clear_temporary_resources();
        assert_eq!(device.temporary_buffer_count(), 1);
        device.release_temporary_buffer(&buffer);
        device.clear_temporary_resources();
        assert_eq!(device.temporary_buffer_count(), 0);
    }

    #[test]
    fn test_scratch_pool_roundtrip() {
        let device = device();
        let scratch = device.acquire_scratch(128);
        assert_eq!(scratch.len(), 128);
        device.release_scratch(scratch);
        let again = device.acquire_scratch(64);
        // Reused allocation, resized down and zeroed.
        assert!(again.capacity() >= 128);
        assert!(again.iter().all(|&b| b == 0));
        // Requests are rounded up to the pooling granularity.
        assert_eq!(device.acquire_scratch(60).len(), 64);
    }
}
