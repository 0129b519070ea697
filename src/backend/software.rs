//! Software backend.
//!
//! Keeps every resource in host memory and executes transfers
//! immediately, so resource logic can be exercised byte-for-byte
//! without a GPU. Fences signal at creation by default; manual-fence
//! mode leaves them unsignaled until [`GpuBackend::signal_all_fences`]
//! runs, which lets tests hold asynchronous work in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{
    BackendCapabilities, BackendStats, FramebufferAttachment, FramebufferStatus, GpuBackend,
    GpuBuffer, GpuFence, GpuFramebuffer, GpuRenderbuffer, GpuTexture,
};
use crate::error::GraphicsError;
use crate::types::{Rect, SamplerState, TextureDescriptor, TextureFormat, TextureViewDescriptor};

/// Byte written into a freshly orphaned store. Makes reads of bytes
/// that were never re-uploaded stand out in tests.
const ORPHAN_FILL: u8 = 0xCD;

struct SoftBuffer {
    data: Vec<u8>,
    label: Option<String>,
}

/// Image storage shared by a texture and its views.
struct TexStorage {
    descriptor: TextureDescriptor,
    /// Texel bytes indexed by `[mip][slice]`, tightly packed.
    levels: Vec<Vec<Vec<u8>>>,
    /// Number of `TexView` entries aliasing this storage.
    refs: usize,
}

impl TexStorage {
    fn new(descriptor: &TextureDescriptor) -> Self {
        let mut levels = Vec::with_capacity(descriptor.mip_level_count as usize);
        for mip in 0..descriptor.mip_level_count {
            let slice_size = descriptor.slice_byte_size(mip) as usize;
            let slices = (0..descriptor.slice_count(mip))
                .map(|_| vec![0u8; slice_size])
                .collect();
            levels.push(slices);
        }
        Self {
            descriptor: descriptor.clone(),
            levels,
            refs: 1,
        }
    }
}

/// A texture handle: a window into a `TexStorage`.
struct TexView {
    storage: u64,
    base_mip: u32,
    base_layer: u32,
    sampler: SamplerState,
}

struct SoftRenderbuffer {
    width: u32,
    height: u32,
    #[allow(dead_code)]
    samples: u32,
    #[allow(dead_code)]
    format: TextureFormat,
}

struct SoftFramebuffer {
    attachment: FramebufferAttachment,
}

#[derive(Default)]
struct State {
    next_id: u64,
    buffers: HashMap<u64, SoftBuffer>,
    storages: HashMap<u64, TexStorage>,
    textures: HashMap<u64, TexView>,
    renderbuffers: HashMap<u64, SoftRenderbuffer>,
    framebuffers: HashMap<u64, SoftFramebuffer>,
    pending_fences: Vec<Weak<AtomicBool>>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Host-memory implementation of [`GpuBackend`].
pub struct SoftwareBackend {
    state: Mutex<State>,
    capabilities: BackendCapabilities,
    manual_fences: bool,
    fail_allocations: AtomicBool,
    forced_framebuffer_status: Mutex<Option<FramebufferStatus>>,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    /// Create a software backend with default capabilities.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            capabilities: BackendCapabilities::default(),
            manual_fences: false,
            fail_allocations: AtomicBool::new(false),
            forced_framebuffer_status: Mutex::new(None),
        }
    }

    /// Override the reported capabilities.
    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Leave fences unsignaled until [`GpuBackend::signal_all_fences`].
    pub fn with_manual_fences(mut self) -> Self {
        self.manual_fences = true;
        self
    }

    /// Make every subsequent resource allocation fail. Used to test
    /// recovery paths such as a context restore running out of memory.
    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }

    /// Force the completeness status reported for subsequently created
    /// framebuffers.
    pub fn set_framebuffer_status(&self, status: Option<FramebufferStatus>) {
        *self.forced_framebuffer_status.lock() = status;
    }

    fn check_allocation(&self, what: &str) -> Result<(), GraphicsError> {
        if self.fail_allocations.load(Ordering::SeqCst) {
            Err(GraphicsError::Allocation(format!(
                "software backend: {what} allocation failed"
            )))
        } else {
            Ok(())
        }
    }
}

/// Copy `height` rows of `row_bytes` between two byte slices with
/// independent strides.
fn copy_rows(
    dst: &mut [u8],
    dst_start: usize,
    dst_stride: usize,
    src: &[u8],
    src_start: usize,
    src_stride: usize,
    row_bytes: usize,
    height: usize,
) {
    for row in 0..height {
        let d = dst_start + row * dst_stride;
        let s = src_start + row * src_stride;
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn stats(&self) -> BackendStats {
        let state = self.state.lock();
        BackendStats {
            buffers: state.buffers.len(),
            textures: state.textures.len(),
            renderbuffers: state.renderbuffers.len(),
            framebuffers: state.framebuffers.len(),
        }
    }

    fn create_buffer(
        &self,
        size: u64,
        label: Option<&str>,
        initial: Option<&[u8]>,
    ) -> Result<GpuBuffer, GraphicsError> {
        self.check_allocation("buffer")?;
        if size > self.capabilities.max_buffer_size {
            return Err(GraphicsError::Allocation(format!(
                "buffer size {size} exceeds limit {}",
                self.capabilities.max_buffer_size
            )));
        }
        let data = match initial {
            Some(bytes) => {
                debug_assert_eq!(bytes.len() as u64, size);
                bytes.to_vec()
            }
            None => vec![ORPHAN_FILL; size as usize],
        };
        let mut state = self.state.lock();
        let id = state.next_id();
        state.buffers.insert(
            id,
            SoftBuffer {
                data,
                label: label.map(str::to_owned),
            },
        );
        log::trace!("software: created buffer {id} ({size} bytes, label {label:?})");
        Ok(GpuBuffer::Software(id))
    }

    fn orphan_buffer(&self, buffer: GpuBuffer, contents: Option<&[u8]>) {
        let GpuBuffer::Software(id) = buffer;
        let mut state = self.state.lock();
        if let Some(buf) = state.buffers.get_mut(&id) {
            match contents {
                Some(bytes) => {
                    debug_assert_eq!(bytes.len(), buf.data.len());
                    buf.data.copy_from_slice(bytes);
                }
                None => buf.data.fill(ORPHAN_FILL),
            }
            log::trace!("software: orphaned buffer {id} (label {:?})", buf.label);
        }
    }

    fn write_buffer(&self, buffer: GpuBuffer, offset: u64, data: &[u8]) {
        let GpuBuffer::Software(id) = buffer;
        let mut state = self.state.lock();
        if let Some(buf) = state.buffers.get_mut(&id) {
            let start = offset as usize;
            buf.data[start..start + data.len()].copy_from_slice(data);
        }
    }

    fn read_buffer(&self, buffer: GpuBuffer, offset: u64, size: u64) -> Vec<u8> {
        let GpuBuffer::Software(id) = buffer;
        let state = self.state.lock();
        match state.buffers.get(&id) {
            Some(buf) => {
                let start = offset as usize;
                buf.data[start..start + size as usize].to_vec()
            }
            None => vec![0; size as usize],
        }
    }

    fn clear_buffer(&self, buffer: GpuBuffer, offset: u64, size: u64) -> bool {
        if !self.capabilities.supports_clear_buffer {
            return false;
        }
        let GpuBuffer::Software(id) = buffer;
        let mut state = self.state.lock();
        if let Some(buf) = state.buffers.get_mut(&id) {
            let start = offset as usize;
            buf.data[start..start + size as usize].fill(0);
        }
        true
    }

    fn copy_buffer(
        &self,
        src: GpuBuffer,
        dst: GpuBuffer,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) {
        let GpuBuffer::Software(src_id) = src;
        let GpuBuffer::Software(dst_id) = dst;
        let mut state = self.state.lock();
        let bytes = match state.buffers.get(&src_id) {
            Some(buf) => {
                let start = src_offset as usize;
                buf.data[start..start + size as usize].to_vec()
            }
            None => return,
        };
        if let Some(buf) = state.buffers.get_mut(&dst_id) {
            let start = dst_offset as usize;
            buf.data[start..start + bytes.len()].copy_from_slice(&bytes);
        }
    }

    fn destroy_buffer(&self, buffer: GpuBuffer) {
        let GpuBuffer::Software(id) = buffer;
        let mut state = self.state.lock();
        if state.buffers.remove(&id).is_some() {
            log::trace!("software: destroyed buffer {id}");
        }
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError> {
        self.check_allocation("texture")?;
        let extent = descriptor.size;
        let limit = self.capabilities.max_texture_size;
        if extent.width > limit || extent.height > limit || extent.depth > limit {
            return Err(GraphicsError::Allocation(format!(
                "texture extent {}x{}x{} exceeds limit {limit}",
                extent.width, extent.height, extent.depth
            )));
        }
        let mut state = self.state.lock();
        let storage_id = state.next_id();
        state
            .storages
            .insert(storage_id, TexStorage::new(descriptor));
        let id = state.next_id();
        state.textures.insert(
            id,
            TexView {
                storage: storage_id,
                base_mip: 0,
                base_layer: 0,
                sampler: SamplerState::default(),
            },
        );
        log::trace!(
            "software: created texture {id} ({}x{}x{}, {} mips, label {:?})",
            extent.width,
            extent.height,
            extent.depth,
            descriptor.mip_level_count,
            descriptor.label
        );
        Ok(GpuTexture::Software(id))
    }

    fn create_texture_view(
        &self,
        base: GpuTexture,
        descriptor: &TextureViewDescriptor,
    ) -> Result<GpuTexture, GraphicsError> {
        self.check_allocation("texture view")?;
        let GpuTexture::Software(base_id) = base;
        let mut state = self.state.lock();
        let (storage_id, base_mip, base_layer) = match state.textures.get(&base_id) {
            Some(view) => (view.storage, view.base_mip, view.base_layer),
            None => {
                return Err(GraphicsError::Allocation(
                    "texture view base does not exist".to_string(),
                ))
            }
        };
        if let Some(storage) = state.storages.get_mut(&storage_id) {
            storage.refs += 1;
        }
        let id = state.next_id();
        state.textures.insert(
            id,
            TexView {
                storage: storage_id,
                base_mip: base_mip + descriptor.base_mip,
                base_layer: base_layer + descriptor.base_layer,
                sampler: SamplerState::default(),
            },
        );
        log::trace!("software: created texture view {id} of {base_id}");
        Ok(GpuTexture::Software(id))
    }

    fn write_texture(
        &self,
        texture: GpuTexture,
        slice: u32,
        mip: u32,
        rect: Rect,
        source_row_width: u32,
        data: &[u8],
    ) {
        let GpuTexture::Software(id) = texture;
        let mut state = self.state.lock();
        let Some(view) = state.textures.get(&id) else {
            return;
        };
        let (storage_id, mip, slice) = (view.storage, view.base_mip + mip, view.base_layer + slice);
        let Some(storage) = state.storages.get_mut(&storage_id) else {
            return;
        };
        let bs = storage.descriptor.format.block_size() as usize;
        let mip_width = storage.descriptor.mip_extent(mip).width as usize;
        let src_stride = if source_row_width == 0 {
            rect.width as usize * bs
        } else {
            source_row_width as usize * bs
        };
        let target = &mut storage.levels[mip as usize][slice as usize];
        copy_rows(
            target,
            (rect.y as usize * mip_width + rect.x as usize) * bs,
            mip_width * bs,
            data,
            0,
            src_stride,
            rect.width as usize * bs,
            rect.height as usize,
        );
    }

    fn read_texture(&self, texture: GpuTexture, slice: u32, mip: u32, rect: Rect) -> Vec<u8> {
        let GpuTexture::Software(id) = texture;
        let state = self.state.lock();
        let Some(view) = state.textures.get(&id) else {
            return Vec::new();
        };
        let (mip, slice) = (view.base_mip + mip, view.base_layer + slice);
        let Some(storage) = state.storages.get(&view.storage) else {
            return Vec::new();
        };
        let bs = storage.descriptor.format.block_size() as usize;
        let mip_width = storage.descriptor.mip_extent(mip).width as usize;
        let source = &storage.levels[mip as usize][slice as usize];
        let mut out = vec![0u8; rect.width as usize * rect.height as usize * bs];
        copy_rows(
            &mut out,
            0,
            rect.width as usize * bs,
            source,
            (rect.y as usize * mip_width + rect.x as usize) * bs,
            mip_width * bs,
            rect.width as usize * bs,
            rect.height as usize,
        );
        out
    }

    fn read_framebuffer(&self, framebuffer: GpuFramebuffer, rect: Rect) -> Vec<u8> {
        let GpuFramebuffer::Software(id) = framebuffer;
        let attachment = {
            let state = self.state.lock();
            match state.framebuffers.get(&id) {
                Some(fb) => fb.attachment,
                None => return Vec::new(),
            }
        };
        match attachment.texture {
            Some(texture) => self.read_texture(texture, attachment.layer, attachment.mip, rect),
            // Renderbuffer contents are not observable from the CPU.
            None => Vec::new(),
        }
    }

    fn rebind_framebuffer_attachment(
        &self,
        framebuffer: GpuFramebuffer,
        texture: GpuTexture,
        layer: u32,
        mip: u32,
    ) {
        let GpuFramebuffer::Software(id) = framebuffer;
        let mut state = self.state.lock();
        if let Some(fb) = state.framebuffers.get_mut(&id) {
            fb.attachment.texture = Some(texture);
            fb.attachment.layer = layer;
            fb.attachment.mip = mip;
        }
    }

    fn generate_mipmaps(&self, texture: GpuTexture) {
        let GpuTexture::Software(id) = texture;
        let mut state = self.state.lock();
        let Some(view) = state.textures.get(&id) else {
            return;
        };
        let storage_id = view.storage;
        let Some(storage) = state.storages.get_mut(&storage_id) else {
            return;
        };
        let bs = storage.descriptor.format.block_size() as usize;
        // Nearest-texel downsampling, level by level.
        for mip in 1..storage.descriptor.mip_level_count {
            let src_extent = storage.descriptor.mip_extent(mip - 1);
            let dst_extent = storage.descriptor.mip_extent(mip);
            let src_slices = storage.descriptor.slice_count(mip - 1);
            for slice in 0..storage.descriptor.slice_count(mip) {
                let src_slice = (slice * 2).min(src_slices - 1);
                let src = storage.levels[mip as usize - 1][src_slice as usize].clone();
                let dst = &mut storage.levels[mip as usize][slice as usize];
                for y in 0..dst_extent.height as usize {
                    for x in 0..dst_extent.width as usize {
                        let sx = (x * 2).min(src_extent.width as usize - 1);
                        let sy = (y * 2).min(src_extent.height as usize - 1);
                        let s = (sy * src_extent.width as usize + sx) * bs;
                        let d = (y * dst_extent.width as usize + x) * bs;
                        dst[d..d + bs].copy_from_slice(&src[s..s + bs]);
                    }
                }
            }
        }
    }

    fn set_sampler_state(&self, texture: GpuTexture, sampler: &SamplerState) {
        let GpuTexture::Software(id) = texture;
        let mut state = self.state.lock();
        if let Some(view) = state.textures.get_mut(&id) {
            view.sampler = *sampler;
        }
    }

    fn destroy_texture(&self, texture: GpuTexture) {
        let GpuTexture::Software(id) = texture;
        let mut state = self.state.lock();
        if let Some(view) = state.textures.remove(&id) {
            let drop_storage = match state.storages.get_mut(&view.storage) {
                Some(storage) => {
                    storage.refs -= 1;
                    storage.refs == 0
                }
                None => false,
            };
            if drop_storage {
                state.storages.remove(&view.storage);
            }
            log::trace!("software: destroyed texture {id}");
        }
    }

    fn create_renderbuffer(
        &self,
        width: u32,
        height: u32,
        samples: u32,
        format: TextureFormat,
    ) -> Result<GpuRenderbuffer, GraphicsError> {
        self.check_allocation("renderbuffer")?;
        let mut state = self.state.lock();
        let id = state.next_id();
        state.renderbuffers.insert(
            id,
            SoftRenderbuffer {
                width,
                height,
                samples,
                format,
            },
        );
        log::trace!("software: created renderbuffer {id} ({width}x{height}, {samples} samples)");
        Ok(GpuRenderbuffer::Software(id))
    }

    fn destroy_renderbuffer(&self, renderbuffer: GpuRenderbuffer) {
        let GpuRenderbuffer::Software(id) = renderbuffer;
        let mut state = self.state.lock();
        if state.renderbuffers.remove(&id).is_some() {
            log::trace!("software: destroyed renderbuffer {id}");
        }
    }

    fn create_framebuffer(
        &self,
        attachment: FramebufferAttachment,
    ) -> Result<GpuFramebuffer, FramebufferStatus> {
        if let Some(status) = *self.forced_framebuffer_status.lock() {
            if status != FramebufferStatus::Complete {
                return Err(status);
            }
        }
        let mut state = self.state.lock();
        let mut width = 0;
        let mut height = 0;
        if let Some(GpuRenderbuffer::Software(rb_id)) = attachment.renderbuffer {
            match state.renderbuffers.get(&rb_id) {
                Some(rb) => {
                    width = rb.width;
                    height = rb.height;
                }
                None => return Err(FramebufferStatus::IncompleteAttachment),
            }
        } else if let Some(GpuTexture::Software(tex_id)) = attachment.texture {
            let storage_id = match state.textures.get(&tex_id) {
                Some(view) => view.storage,
                None => return Err(FramebufferStatus::IncompleteAttachment),
            };
            match state.storages.get(&storage_id) {
                Some(storage) => {
                    let extent = storage.descriptor.mip_extent(attachment.mip);
                    width = extent.width;
                    height = extent.height;
                }
                None => return Err(FramebufferStatus::IncompleteAttachment),
            }
        } else {
            return Err(FramebufferStatus::IncompleteAttachment);
        }
        if width == 0 || height == 0 {
            return Err(FramebufferStatus::IncompleteDimensions);
        }
        let id = state.next_id();
        state.framebuffers.insert(id, SoftFramebuffer { attachment });
        log::trace!("software: created framebuffer {id}");
        Ok(GpuFramebuffer::Software(id))
    }

    fn destroy_framebuffer(&self, framebuffer: GpuFramebuffer) {
        let GpuFramebuffer::Software(id) = framebuffer;
        let mut state = self.state.lock();
        if state.framebuffers.remove(&id).is_some() {
            log::trace!("software: destroyed framebuffer {id}");
        }
    }

    fn copy_buffer_to_texture(
        &self,
        src: GpuBuffer,
        src_offset: u64,
        src_row_width: u32,
        dst: GpuTexture,
        slice: u32,
        mip: u32,
        rect: Rect,
    ) {
        let GpuBuffer::Software(src_id) = src;
        let bytes = {
            let state = self.state.lock();
            match state.buffers.get(&src_id) {
                Some(buf) => buf.data.clone(),
                None => return,
            }
        };
        let GpuTexture::Software(dst_id) = dst;
        let mut state = self.state.lock();
        let Some(view) = state.textures.get(&dst_id) else {
            return;
        };
        let (mip, slice) = (view.base_mip + mip, view.base_layer + slice);
        let storage_id = view.storage;
        let Some(storage) = state.storages.get_mut(&storage_id) else {
            return;
        };
        let bs = storage.descriptor.format.block_size() as usize;
        let mip_width = storage.descriptor.mip_extent(mip).width as usize;
        let src_stride = if src_row_width == 0 {
            rect.width as usize * bs
        } else {
            src_row_width as usize * bs
        };
        let target = &mut storage.levels[mip as usize][slice as usize];
        copy_rows(
            target,
            (rect.y as usize * mip_width + rect.x as usize) * bs,
            mip_width * bs,
            &bytes,
            src_offset as usize,
            src_stride,
            rect.width as usize * bs,
            rect.height as usize,
        );
    }

    fn copy_texture_to_buffer(
        &self,
        src: GpuTexture,
        slice: u32,
        mip: u32,
        rect: Rect,
        dst: GpuBuffer,
        dst_offset: u64,
        dst_row_width: u32,
    ) {
        let texels = self.read_texture(src, slice, mip, rect);
        if texels.is_empty() {
            return;
        }
        let GpuTexture::Software(src_id) = src;
        let bs = {
            let state = self.state.lock();
            match state
                .textures
                .get(&src_id)
                .and_then(|view| state.storages.get(&view.storage))
            {
                Some(storage) => storage.descriptor.format.block_size() as usize,
                None => return,
            }
        };
        let GpuBuffer::Software(dst_id) = dst;
        let mut state = self.state.lock();
        let Some(buf) = state.buffers.get_mut(&dst_id) else {
            return;
        };
        let dst_stride = if dst_row_width == 0 {
            rect.width as usize * bs
        } else {
            dst_row_width as usize * bs
        };
        copy_rows(
            &mut buf.data,
            dst_offset as usize,
            dst_stride,
            &texels,
            0,
            rect.width as usize * bs,
            rect.width as usize * bs,
            rect.height as usize,
        );
    }

    fn insert_fence(&self) -> GpuFence {
        let signaled = Arc::new(AtomicBool::new(!self.manual_fences));
        if self.manual_fences {
            self.state
                .lock()
                .pending_fences
                .push(Arc::downgrade(&signaled));
        }
        GpuFence::Software { signaled }
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> bool {
        let GpuFence::Software { signaled } = fence;
        signaled.load(Ordering::Acquire)
    }

    fn wait_fence(&self, fence: &GpuFence) {
        let GpuFence::Software { signaled } = fence;
        while !signaled.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
    }

    fn signal_all_fences(&self) {
        let mut state = self.state.lock();
        for fence in state.pending_fences.drain(..) {
            if let Some(signaled) = fence.upgrade() {
                signaled.store(true, Ordering::Release);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextureUsage;

    fn backend() -> SoftwareBackend {
        SoftwareBackend::new()
    }

    #[test]
    fn test_buffer_roundtrip() {
        let backend = backend();
        let buffer = backend.create_buffer(16, Some("test"), None).unwrap();
        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]);
        assert_eq!(backend.read_buffer(buffer, 4, 4), vec![1, 2, 3, 4]);
        assert_eq!(backend.stats().buffers, 1);
        backend.destroy_buffer(buffer);
        assert_eq!(backend.stats().buffers, 0);
    }

    #[test]
    fn test_orphan_discards_contents() {
        let backend = backend();
        let buffer = backend.create_buffer(4, None, Some(&[1, 2, 3, 4])).unwrap();
        backend.orphan_buffer(buffer, None);
        assert_eq!(backend.read_buffer(buffer, 0, 4), vec![ORPHAN_FILL; 4]);
        backend.orphan_buffer(buffer, Some(&[9, 9, 9, 9]));
        assert_eq!(backend.read_buffer(buffer, 0, 4), vec![9, 9, 9, 9]);
    }

    #[test]
    fn test_buffer_size_limit() {
        let backend = SoftwareBackend::new().with_capabilities(BackendCapabilities {
            max_buffer_size: 64,
            ..Default::default()
        });
        assert!(backend.create_buffer(64, None, None).is_ok());
        assert!(matches!(
            backend.create_buffer(65, None, None),
            Err(GraphicsError::Allocation(_))
        ));
    }

    #[test]
    fn test_texture_write_read_with_stride() {
        let backend = backend();
        let desc = TextureDescriptor::new_2d(4, 4, TextureFormat::R8Unorm, TextureUsage::SAMPLED);
        let texture = backend.create_texture(&desc).unwrap();
        // Source rows are 3 texels wide inside a stride-4 image.
        let data = [1, 2, 3, 0, 4, 5, 6, 0];
        backend.write_texture(texture, 0, 0, Rect::new(1, 1, 3, 2), 4, &data);
        let out = backend.read_texture(texture, 0, 0, Rect::new(0, 0, 4, 4));
        assert_eq!(
            out,
            vec![0, 0, 0, 0, 0, 1, 2, 3, 0, 4, 5, 6, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_texture_view_aliases_storage() {
        let backend = backend();
        let desc = TextureDescriptor::new_2d(4, 4, TextureFormat::R8Unorm, TextureUsage::SAMPLED)
            .with_mip_levels(3, crate::types::MipmapsMode::Manual);
        let texture = backend.create_texture(&desc).unwrap();
        let view = backend
            .create_texture_view(texture, &TextureViewDescriptor::new().with_mip_range(1, 1))
            .unwrap();
        backend.write_texture(view, 0, 0, Rect::new(0, 0, 2, 2), 0, &[7, 7, 7, 7]);
        // The write through the view lands in mip 1 of the base.
        let out = backend.read_texture(texture, 0, 1, Rect::new(0, 0, 2, 2));
        assert_eq!(out, vec![7, 7, 7, 7]);

        // Storage survives base destruction while the view lives.
        backend.destroy_texture(texture);
        let out = backend.read_texture(view, 0, 0, Rect::new(0, 0, 2, 2));
        assert_eq!(out, vec![7, 7, 7, 7]);
        backend.destroy_texture(view);
        assert_eq!(backend.stats().textures, 0);
    }

    #[test]
    fn test_framebuffer_completeness() {
        let backend = backend();
        assert_eq!(
            backend
                .create_framebuffer(FramebufferAttachment::default())
                .unwrap_err(),
            FramebufferStatus::IncompleteAttachment
        );

        let desc = TextureDescriptor::new_2d(
            8,
            8,
            TextureFormat::Rgba8Unorm,
            TextureUsage::SAMPLED | TextureUsage::RENDER_TARGET,
        );
        let texture = backend.create_texture(&desc).unwrap();
        let framebuffer = backend
            .create_framebuffer(FramebufferAttachment {
                texture: Some(texture),
                ..Default::default()
            })
            .unwrap();
        backend.destroy_framebuffer(framebuffer);
        backend.destroy_texture(texture);
    }

    #[test]
    fn test_forced_framebuffer_status() {
        let backend = backend();
        backend.set_framebuffer_status(Some(FramebufferStatus::UnsupportedMultisample));
        let desc = TextureDescriptor::new_2d(
            8,
            8,
            TextureFormat::Rgba8Unorm,
            TextureUsage::SAMPLED | TextureUsage::RENDER_TARGET,
        );
        let texture = backend.create_texture(&desc).unwrap();
        assert_eq!(
            backend
                .create_framebuffer(FramebufferAttachment {
                    texture: Some(texture),
                    ..Default::default()
                })
                .unwrap_err(),
            FramebufferStatus::UnsupportedMultisample
        );
    }

    #[test]
    fn test_manual_fences() {
        let backend = SoftwareBackend::new().with_manual_fences();
        let fence = backend.insert_fence();
        assert!(!backend.is_fence_signaled(&fence));
        backend.signal_all_fences();
        assert!(backend.is_fence_signaled(&fence));
    }

    #[test]
    fn test_auto_fences_signal_at_creation() {
        let backend = backend();
        let fence = backend.insert_fence();
        assert!(backend.is_fence_signaled(&fence));
        backend.wait_fence(&fence);
    }

    #[test]
    fn test_copy_texture_to_buffer_with_stride() {
        let backend = backend();
        let desc = TextureDescriptor::new_2d(2, 2, TextureFormat::R8Unorm, TextureUsage::SAMPLED);
        let texture = backend.create_texture(&desc).unwrap();
        backend.write_texture(texture, 0, 0, Rect::new(0, 0, 2, 2), 0, &[1, 2, 3, 4]);
        let buffer = backend.create_buffer(16, None, None).unwrap();
        backend.clear_buffer(buffer, 0, 16);
        // Destination rows are 4 texels apart.
        backend.copy_texture_to_buffer(texture, 0, 0, Rect::new(0, 0, 2, 2), buffer, 1, 4);
        assert_eq!(
            backend.read_buffer(buffer, 0, 16),
            vec![0, 1, 2, 0, 0, 3, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_fail_allocations() {
        let backend = backend();
        backend.set_fail_allocations(true);
        assert!(backend.create_buffer(4, None, None).is_err());
        backend.set_fail_allocations(false);
        assert!(backend.create_buffer(4, None, None).is_ok());
    }
}
