//! GPU texture resource.
//!
//! A texture owns up to three native objects: the image storage (when
//! the texture is readable), a renderbuffer (for render targets that
//! are multisampled or not readable), and a framebuffer (for render
//! targets). Teardown runs in the opposite order of creation:
//! framebuffer, then renderbuffer, then image.
//!
//! Views alias the storage of another texture without owning any of
//! it; loading a view forces its base to load first.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use static_assertions::assert_impl_all;

use super::buffer::Buffer;
use super::try_zeroed;
use crate::backend::{FramebufferAttachment, GpuBackend, GpuTexture};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{
    MipmapsMode, Rect, SamplerState, TextureDescriptor, TextureUsage, TextureViewDescriptor,
};
use crate::volatile::Volatile;

struct ParentView {
    base: Arc<Texture>,
    /// View ranges resolved against the base (no `None` fields left).
    descriptor: TextureViewDescriptor,
}

struct TextureState {
    handle: Option<GpuTexture>,
    renderbuffer: Option<crate::backend::GpuRenderbuffer>,
    framebuffer: Option<crate::backend::GpuFramebuffer>,
    /// Sample count after clamping to the backend limit.
    actual_samples: u32,
    sampler: SamplerState,
}

/// A GPU texture or texture view.
pub struct Texture {
    backend: Arc<dyn GpuBackend>,
    #[allow(dead_code)]
    device: Weak<GraphicsDevice>,
    descriptor: TextureDescriptor,
    parent: Option<ParentView>,
    /// Retained slice contents, indexed `[mip][slice]`. Slices with
    /// retained bytes are re-uploaded when the texture reloads after a
    /// context reset; the rest are zero-filled.
    retained: Mutex<Vec<Vec<Option<Vec<u8>>>>>,
    state: Mutex<TextureState>,
}

assert_impl_all!(Texture: Send, Sync);

impl Texture {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        device: Weak<GraphicsDevice>,
        descriptor: TextureDescriptor,
        base_slices: Option<&[Vec<u8>]>,
    ) -> Self {
        let mut retained: Vec<Vec<Option<Vec<u8>>>> = (0..descriptor.mip_level_count)
            .map(|mip| vec![None; descriptor.slice_count(mip) as usize])
            .collect();
        if let Some(slices) = base_slices {
            for (slot, data) in retained[0].iter_mut().zip(slices) {
                *slot = Some(data.clone());
            }
        }
        Self {
            backend,
            device,
            descriptor,
            parent: None,
            retained: Mutex::new(retained),
            state: Mutex::new(TextureState {
                handle: None,
                renderbuffer: None,
                framebuffer: None,
                actual_samples: 1,
                sampler: SamplerState::default(),
            }),
        }
    }

    pub(crate) fn new_view(
        backend: Arc<dyn GpuBackend>,
        device: Weak<GraphicsDevice>,
        descriptor: TextureDescriptor,
        base: Arc<Texture>,
        view_descriptor: TextureViewDescriptor,
    ) -> Self {
        Self {
            backend,
            device,
            descriptor,
            parent: Some(ParentView {
                base,
                descriptor: view_descriptor,
            }),
            retained: Mutex::new(Vec::new()),
            state: Mutex::new(TextureState {
                handle: None,
                renderbuffer: None,
                framebuffer: None,
                actual_samples: 1,
                sampler: SamplerState::default(),
            }),
        }
    }

    /// Creation descriptor. For views this describes the view's window,
    /// not the base texture.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    /// Debug label.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Base texture when this is a view.
    pub fn parent(&self) -> Option<&Arc<Texture>> {
        self.parent.as_ref().map(|view| &view.base)
    }

    /// Whether shaders can sample this texture.
    pub fn is_readable(&self) -> bool {
        self.descriptor.usage.contains(TextureUsage::SAMPLED)
    }

    /// Whether this texture can be a framebuffer attachment.
    pub fn is_render_target(&self) -> bool {
        self.descriptor.usage.contains(TextureUsage::RENDER_TARGET)
    }

    /// Sample count after clamping to the backend limit. Meaningful
    /// once loaded.
    pub fn sample_count(&self) -> u32 {
        self.state.lock().actual_samples
    }

    /// Whether the native objects currently exist.
    pub fn is_loaded(&self) -> bool {
        let state = self.state.lock();
        state.handle.is_some() || state.renderbuffer.is_some()
    }

    pub(crate) fn handle(&self) -> Option<GpuTexture> {
        self.state.lock().handle
    }

    /// Create the native objects. No-op when already loaded. Any
    /// failure unwinds partially created objects before returning.
    pub(crate) fn load_now(&self) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if state.handle.is_some() || state.renderbuffer.is_some() {
            return Ok(());
        }
        if let Some(parent) = &self.parent {
            // Views carry no storage of their own; the base must exist
            // before the alias can.
            parent.base.load_now()?;
            let base_handle = parent.base.handle().ok_or_else(|| {
                GraphicsError::Allocation("texture view base has no native image".to_string())
            })?;
            let handle = self
                .backend
                .create_texture_view(base_handle, &parent.descriptor)?;
            self.backend.set_sampler_state(handle, &state.sampler);
            state.handle = Some(handle);
            return Ok(());
        }

        let requested = self.descriptor.sample_count.max(1);
        let actual_samples = requested.min(self.backend.capabilities().max_msaa_samples.max(1));
        if actual_samples != requested {
            log::debug!(
                "Clamped sample count of texture {:?} from {requested} to {actual_samples}",
                self.descriptor.label
            );
        }
        state.actual_samples = actual_samples;
        if let Err(err) = self.create_native(&mut state, actual_samples) {
            self.unload_locked(&mut state);
            return Err(err);
        }
        log::trace!(
            "Loaded texture {:?} ({}x{}x{})",
            self.descriptor.label,
            self.descriptor.size.width,
            self.descriptor.size.height,
            self.descriptor.size.depth
        );
        Ok(())
    }

    fn create_native(
        &self,
        state: &mut TextureState,
        actual_samples: u32,
    ) -> Result<(), GraphicsError> {
        if self.is_readable() {
            let handle = self.backend.create_texture(&self.descriptor)?;
            state.handle = Some(handle);
            self.backend.set_sampler_state(handle, &state.sampler);
            self.initialize_contents(handle)?;
        }

        if self.is_render_target() && (!self.is_readable() || actual_samples > 1) {
            let renderbuffer = self.backend.create_renderbuffer(
                self.descriptor.size.width,
                self.descriptor.size.height,
                actual_samples,
                self.descriptor.format,
            )?;
            state.renderbuffer = Some(renderbuffer);
        }

        if self.is_render_target() {
            // A multisampled renderbuffer takes the attachment slot
            // even when readable image storage exists.
            let attachment = if state.renderbuffer.is_some() {
                FramebufferAttachment {
                    renderbuffer: state.renderbuffer,
                    ..Default::default()
                }
            } else {
                FramebufferAttachment {
                    texture: state.handle,
                    ..Default::default()
                }
            };
            match self.backend.create_framebuffer(attachment) {
                Ok(framebuffer) => state.framebuffer = Some(framebuffer),
                Err(status) => {
                    return Err(GraphicsError::Device {
                        status: status.code(),
                        message: format!(
                            "framebuffer incomplete for texture {:?}",
                            self.descriptor.label
                        ),
                    })
                }
            }
        }
        Ok(())
    }

    /// Upload retained contents, zero-filling every slice without
    /// retained bytes so no level reads back uninitialized memory.
    /// Runs from the smallest mip level up and the last slice down so
    /// restore order is deterministic.
    fn initialize_contents(&self, handle: GpuTexture) -> Result<(), GraphicsError> {
        let retained = self.retained.lock();
        for mip in (0..self.descriptor.mip_level_count).rev() {
            let extent = self.descriptor.mip_extent(mip);
            let rect = Rect::new(0, 0, extent.width, extent.height);
            let mut zeros: Option<Vec<u8>> = None;
            for slice in (0..self.descriptor.slice_count(mip)).rev() {
                let data = retained
                    .get(mip as usize)
                    .and_then(|slices| slices.get(slice as usize))
                    .and_then(Option::as_ref);
                match data {
                    Some(bytes) => {
                        self.backend.write_texture(handle, slice, mip, rect, 0, bytes)
                    }
                    None => {
                        if zeros.is_none() {
                            zeros = Some(try_zeroed(self.descriptor.slice_byte_size(mip) as usize)?);
                        }
                        if let Some(zeros) = zeros.as_ref() {
                            self.backend.write_texture(handle, slice, mip, rect, 0, zeros);
                        }
                    }
                }
            }
        }
        drop(retained);
        if self.descriptor.mipmaps == MipmapsMode::Auto && self.descriptor.mip_level_count > 1 {
            self.backend.generate_mipmaps(handle);
        }
        Ok(())
    }

    fn unload_locked(&self, state: &mut TextureState) {
        if let Some(framebuffer) = state.framebuffer.take() {
            self.backend.destroy_framebuffer(framebuffer);
        }
        if let Some(renderbuffer) = state.renderbuffer.take() {
            self.backend.destroy_renderbuffer(renderbuffer);
        }
        if let Some(handle) = state.handle.take() {
            self.backend.destroy_texture(handle);
        }
    }

    /// Upload texels into a slice rectangle of one mip level.
    ///
    /// When the rectangle covers the whole slice the bytes are also
    /// retained, so a context reset restores them.
    pub fn replace_pixels(
        &self,
        slice: u32,
        mip: u32,
        rect: Rect,
        source_row_width: u32,
        data: &[u8],
    ) -> bool {
        if !self.is_readable() || mip >= self.descriptor.mip_level_count {
            return false;
        }
        let extent = self.descriptor.mip_extent(mip);
        if slice >= self.descriptor.slice_count(mip) || !rect.fits_within(extent.width, extent.height)
        {
            return false;
        }
        let bs = self.descriptor.format.block_size() as usize;
        let row_texels = if source_row_width == 0 {
            rect.width as usize
        } else {
            source_row_width as usize
        };
        if row_texels < rect.width as usize {
            return false;
        }
        let required = ((rect.height as usize - 1) * row_texels + rect.width as usize) * bs;
        if data.len() < required {
            return false;
        }

        let whole_slice = rect.x == 0
            && rect.y == 0
            && rect.width == extent.width
            && rect.height == extent.height;
        if self.parent.is_none() && whole_slice && source_row_width == 0 {
            let mut retained = self.retained.lock();
            retained[mip as usize][slice as usize] = Some(data.to_vec());
        }

        let state = self.state.lock();
        if let Some(handle) = state.handle {
            self.backend
                .write_texture(handle, slice, mip, rect, source_row_width, data);
            true
        } else {
            // Unloaded; retained bytes (when whole-slice) are uploaded
            // by the next load.
            self.parent.is_none() && whole_slice && source_row_width == 0
        }
    }

    /// Regenerate mip levels below the base from the base level.
    pub fn generate_mipmaps(&self) -> bool {
        if !self.is_readable()
            || self.descriptor.mip_level_count < 2
            || self.descriptor.mipmaps == MipmapsMode::None
        {
            return false;
        }
        let state = self.state.lock();
        match state.handle {
            Some(handle) => {
                self.backend.generate_mipmaps(handle);
                true
            }
            None => false,
        }
    }

    /// Update the sampler state, applying it to the native image when
    /// loaded.
    pub fn set_sampler_state(&self, sampler: SamplerState) {
        let mut state = self.state.lock();
        state.sampler = sampler;
        if let Some(handle) = state.handle {
            self.backend.set_sampler_state(handle, &sampler);
        }
    }

    /// Current sampler state.
    pub fn sampler_state(&self) -> SamplerState {
        self.state.lock().sampler
    }

    /// Copy texels from a buffer into a slice rectangle.
    pub fn copy_from_buffer(
        &self,
        source: &Buffer,
        src_offset: u64,
        src_row_width: u32,
        slice: u32,
        mip: u32,
        rect: Rect,
    ) -> bool {
        if !self.is_readable() || mip >= self.descriptor.mip_level_count {
            return false;
        }
        let extent = self.descriptor.mip_extent(mip);
        if slice >= self.descriptor.slice_count(mip) || !rect.fits_within(extent.width, extent.height)
        {
            return false;
        }
        let bs = self.descriptor.format.block_size() as u64;
        let row_texels = if src_row_width == 0 {
            rect.width as u64
        } else {
            src_row_width as u64
        };
        if row_texels < rect.width as u64 {
            return false;
        }
        let required = ((rect.height as u64 - 1) * row_texels + rect.width as u64) * bs;
        if src_offset.checked_add(required).is_none()
            || src_offset + required > source.size()
        {
            return false;
        }
        let (Some(texture), Some(buffer)) = (self.handle(), source.handle()) else {
            return false;
        };
        self.backend
            .copy_buffer_to_texture(buffer, src_offset, src_row_width, texture, slice, mip, rect);
        true
    }

    /// Copy a slice rectangle into a buffer.
    pub fn copy_to_buffer(
        &self,
        dest: &Buffer,
        dst_offset: u64,
        dst_row_width: u32,
        slice: u32,
        mip: u32,
        rect: Rect,
    ) -> bool {
        if !self.is_readable() || mip >= self.descriptor.mip_level_count {
            return false;
        }
        let extent = self.descriptor.mip_extent(mip);
        if slice >= self.descriptor.slice_count(mip) || !rect.fits_within(extent.width, extent.height)
        {
            return false;
        }
        let bs = self.descriptor.format.block_size() as u64;
        let row_texels = if dst_row_width == 0 {
            rect.width as u64
        } else {
            dst_row_width as u64
        };
        if row_texels < rect.width as u64 {
            return false;
        }
        let required = ((rect.height as u64 - 1) * row_texels + rect.width as u64) * bs;
        if dst_offset.checked_add(required).is_none() || dst_offset + required > dest.size() {
            return false;
        }
        let (Some(texture), Some(buffer)) = (self.handle(), dest.handle()) else {
            return false;
        };
        self.backend
            .copy_texture_to_buffer(texture, slice, mip, rect, buffer, dst_offset, dst_row_width);
        true
    }

    /// Read texels of a slice rectangle into `dest`, laid out with a
    /// row stride of `dest_row_width` texels (zero for tightly packed).
    ///
    /// Range validation happens at the readback layer; this only
    /// refuses textures without readable image storage. When the
    /// backend cannot download texels directly, the read goes through
    /// a framebuffer attachment instead, borrowing the texture's own
    /// framebuffer or a temporary one.
    pub(crate) fn readback_into(
        &self,
        slice: u32,
        mip: u32,
        rect: Rect,
        dest_row_width: u32,
        dest: &mut [u8],
    ) -> bool {
        let state = self.state.lock();
        let Some(handle) = state.handle else {
            return false;
        };
        let bs = self.descriptor.format.block_size() as usize;
        let packed = if self.backend.capabilities().supports_copy_texture_to_buffer {
            self.backend.read_texture(handle, slice, mip, rect)
        } else if let Some(framebuffer) = state.framebuffer {
            self.backend
                .rebind_framebuffer_attachment(framebuffer, handle, slice, mip);
            let data = self.backend.read_framebuffer(framebuffer, rect);
            self.backend
                .rebind_framebuffer_attachment(framebuffer, handle, 0, 0);
            data
        } else {
            // Not a render target: route the read through a throwaway
            // framebuffer.
            let attachment = FramebufferAttachment {
                texture: Some(handle),
                layer: slice,
                mip,
                ..Default::default()
            };
            match self.backend.create_framebuffer(attachment) {
                Ok(framebuffer) => {
                    let data = self.backend.read_framebuffer(framebuffer, rect);
                    self.backend.destroy_framebuffer(framebuffer);
                    data
                }
                Err(status) => {
                    log::warn!(
                        "Texture readback framebuffer incomplete (status {})",
                        status.code()
                    );
                    return false;
                }
            }
        };
        let packed_stride = rect.width as usize * bs;
        if packed.len() < packed_stride * rect.height as usize {
            return false;
        }
        let dst_stride = if dest_row_width == 0 {
            packed_stride
        } else {
            dest_row_width as usize * bs
        };
        for row in 0..rect.height as usize {
            let d = row * dst_stride;
            let s = row * packed_stride;
            dest[d..d + packed_stride].copy_from_slice(&packed[s..s + packed_stride]);
        }
        true
    }
}

impl Volatile for Texture {
    fn load_volatile(&self) -> bool {
        match self.load_now() {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Failed to load texture {:?}: {err}", self.descriptor.label);
                false
            }
        }
    }

    fn unload_volatile(&self) {
        let mut state = self.state.lock();
        if state.handle.is_some() || state.renderbuffer.is_some() {
            self.unload_locked(&mut state);
            log::trace!("Unloaded texture {:?}", self.descriptor.label);
        }
    }

    fn volatile_label(&self) -> String {
        self.descriptor.label.clone().unwrap_or_default()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.unload_volatile();
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("label", &self.descriptor.label)
            .field("size", &self.descriptor.size)
            .field("format", &self.descriptor.format)
            .field("usage", &self.descriptor.usage)
            .field("view", &self.parent.is_some())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
