//! GPU-to-CPU readback.
//!
//! A readback either completes immediately or goes asynchronous: the
//! source is copied into a staging buffer borrowed from the device's
//! temporary pool, a fence marks when the copy is done, and polling
//! [`GraphicsReadback::update`] moves the result into CPU memory once
//! the fence signals. An immediate readback of a Readback-usage buffer
//! skips the staging copy entirely and maps the source directly.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use static_assertions::assert_impl_all;

use super::buffer::Buffer;
use super::texture::Texture;
use super::try_zeroed;
use crate::backend::{GpuBackend, GpuFence};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{BufferDataUsage, Rect};

/// When a readback delivers its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadbackMethod {
    /// Block until the data is on the CPU before the constructor returns.
    Immediate,
    /// Return right away; the data arrives once the GPU catches up.
    Async,
}

/// Lifecycle state of a readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadbackStatus {
    /// The GPU copy has not finished yet.
    Waiting,
    /// The data is available through [`GraphicsReadback::data`].
    Complete,
    /// The readback failed and will never deliver data.
    Error,
}

struct ReadbackState {
    status: ReadbackStatus,
    staging: Option<Arc<Buffer>>,
    fence: Option<GpuFence>,
    data: Vec<u8>,
    size: u64,
}

/// An in-flight or finished GPU-to-CPU transfer.
pub struct GraphicsReadback {
    backend: Arc<dyn GpuBackend>,
    device: Weak<GraphicsDevice>,
    state: Mutex<ReadbackState>,
}

assert_impl_all!(GraphicsReadback: Send, Sync);

impl GraphicsReadback {
    pub(crate) fn from_buffer(
        device: &Arc<GraphicsDevice>,
        source: &Arc<Buffer>,
        method: ReadbackMethod,
        offset: u64,
        size: u64,
    ) -> Result<Self, GraphicsError> {
        if size == 0 {
            return Err(GraphicsError::Validation(
                "readback size must be non-zero".to_string(),
            ));
        }
        if offset
            .checked_add(size)
            .is_none_or(|end| end > source.size())
        {
            return Err(GraphicsError::Validation(format!(
                "readback range [{offset}, {offset}+{size}) exceeds buffer size {}",
                source.size()
            )));
        }

        let backend = device.backend();
        // A Readback-usage source is CPU-mappable already; an immediate
        // read needs no staging copy.
        if method == ReadbackMethod::Immediate
            && source.data_usage() == BufferDataUsage::Readback
        {
            let (status, data) = match source.read_bytes(offset, size) {
                Some(data) => (ReadbackStatus::Complete, data),
                None => (ReadbackStatus::Error, Vec::new()),
            };
            return Ok(Self {
                backend,
                device: Arc::downgrade(device),
                state: Mutex::new(ReadbackState {
                    status,
                    staging: None,
                    fence: None,
                    data,
                    size,
                }),
            });
        }

        let staging = device.acquire_staging_buffer(size)?;
        if !source.copy_to(&staging, offset, 0, size) {
            device.release_temporary_buffer(&staging);
            return Ok(Self::failed(backend, device, size));
        }
        Self::finish_or_wait(backend, device, staging, method, size)
    }

    pub(crate) fn from_texture(
        device: &Arc<GraphicsDevice>,
        source: &Arc<Texture>,
        method: ReadbackMethod,
        slice: u32,
        mip: u32,
        rect: Rect,
    ) -> Result<Self, GraphicsError> {
        if !source.is_readable() {
            return Err(GraphicsError::Validation(
                "cannot read back a texture without readable image storage".to_string(),
            ));
        }
        let descriptor = source.descriptor();
        if mip >= descriptor.mip_level_count || slice >= descriptor.slice_count(mip) {
            return Err(GraphicsError::Validation(format!(
                "readback slice {slice} / mip {mip} out of range"
            )));
        }
        let extent = descriptor.mip_extent(mip);
        if !rect.fits_within(extent.width, extent.height) {
            return Err(GraphicsError::Validation(format!(
                "readback rectangle out of bounds for {}x{} mip level",
                extent.width, extent.height
            )));
        }
        let size =
            rect.width as u64 * rect.height as u64 * descriptor.format.block_size() as u64;
        let backend = device.backend();

        if method == ReadbackMethod::Immediate {
            let mut data = try_zeroed(size as usize)?;
            let status = if source.readback_into(slice, mip, rect, 0, &mut data) {
                ReadbackStatus::Complete
            } else {
                data.clear();
                ReadbackStatus::Error
            };
            return Ok(Self {
                backend,
                device: Arc::downgrade(device),
                state: Mutex::new(ReadbackState {
                    status,
                    staging: None,
                    fence: None,
                    data,
                    size,
                }),
            });
        }

        let staging = device.acquire_staging_buffer(size)?;
        if !source.copy_to_buffer(&staging, 0, 0, slice, mip, rect) {
            device.release_temporary_buffer(&staging);
            return Ok(Self::failed(backend, device, size));
        }
        Self::finish_or_wait(backend, device, staging, ReadbackMethod::Async, size)
    }

    fn failed(backend: Arc<dyn GpuBackend>, device: &Arc<GraphicsDevice>, size: u64) -> Self {
        Self {
            backend,
            device: Arc::downgrade(device),
            state: Mutex::new(ReadbackState {
                status: ReadbackStatus::Error,
                staging: None,
                fence: None,
                data: Vec::new(),
                size,
            }),
        }
    }

    fn finish_or_wait(
        backend: Arc<dyn GpuBackend>,
        device: &Arc<GraphicsDevice>,
        staging: Arc<Buffer>,
        method: ReadbackMethod,
        size: u64,
    ) -> Result<Self, GraphicsError> {
        match method {
            ReadbackMethod::Immediate => {
                // The copy just executed; drain the staging buffer now.
                let (status, data) = match staging.read_bytes(0, size) {
                    Some(data) => (ReadbackStatus::Complete, data),
                    None => (ReadbackStatus::Error, Vec::new()),
                };
                device.release_temporary_buffer(&staging);
                Ok(Self {
                    backend,
                    device: Arc::downgrade(device),
                    state: Mutex::new(ReadbackState {
                        status,
                        staging: None,
                        fence: None,
                        data,
                        size,
                    }),
                })
            }
            ReadbackMethod::Async => {
                let fence = backend.insert_fence();
                Ok(Self {
                    backend,
                    device: Arc::downgrade(device),
                    state: Mutex::new(ReadbackState {
                        status: ReadbackStatus::Waiting,
                        staging: Some(staging),
                        fence: Some(fence),
                        data: Vec::new(),
                        size,
                    }),
                })
            }
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ReadbackStatus {
        self.state.lock().status
    }

    /// Whether the data is available.
    pub fn is_complete(&self) -> bool {
        self.status() == ReadbackStatus::Complete
    }

    /// Whether the readback failed for good.
    pub fn has_error(&self) -> bool {
        self.status() == ReadbackStatus::Error
    }

    /// Poll the fence; when it has signaled, drain the staging buffer
    /// and return it to the device pool. No-op unless waiting.
    pub fn update(&self) {
        let mut state = self.state.lock();
        if state.status != ReadbackStatus::Waiting {
            return;
        }
        let signaled = state
            .fence
            .as_ref()
            .is_some_and(|fence| self.backend.is_fence_signaled(fence));
        if signaled {
            self.finish(&mut state);
        }
    }

    /// Block until the data is available (or the readback fails).
    pub fn wait(&self) {
        let mut state = self.state.lock();
        if state.status != ReadbackStatus::Waiting {
            return;
        }
        if let Some(fence) = state.fence.as_ref() {
            self.backend.wait_fence(fence);
        }
        self.finish(&mut state);
    }

    fn finish(&self, state: &mut ReadbackState) {
        state.fence = None;
        match state.staging.take() {
            Some(staging) => {
                match staging.read_bytes(0, state.size) {
                    Some(data) => {
                        state.data = data;
                        state.status = ReadbackStatus::Complete;
                    }
                    None => state.status = ReadbackStatus::Error,
                }
                if let Some(device) = self.device.upgrade() {
                    device.release_temporary_buffer(&staging);
                }
            }
            None => state.status = ReadbackStatus::Error,
        }
    }

    /// The transferred bytes, once complete.
    pub fn data(&self) -> Option<Vec<u8>> {
        let state = self.state.lock();
        match state.status {
            ReadbackStatus::Complete => Some(state.data.clone()),
            _ => None,
        }
    }

    /// Size of the transfer in bytes.
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }
}

impl Drop for GraphicsReadback {
    fn drop(&mut self) {
        // An abandoned readback still has to hand its staging buffer
        // back to the pool.
        let mut state = self.state.lock();
        if let Some(staging) = state.staging.take() {
            if let Some(device) = self.device.upgrade() {
                device.release_temporary_buffer(&staging);
            }
        }
    }
}

impl std::fmt::Debug for GraphicsReadback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("GraphicsReadback")
            .field("status", &state.status)
            .field("size", &state.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::types::{BufferDescriptor, BufferUsage, TextureDescriptor, TextureFormat, TextureUsage};
    use crate::volatile::Volatile;

    fn device_with(backend: SoftwareBackend) -> Arc<GraphicsDevice> {
        GraphicsDevice::with_backend(Arc::new(backend))
    }

    fn source_buffer(device: &Arc<GraphicsDevice>, contents: &[u8]) -> Arc<Buffer> {
        device
            .create_buffer(
                BufferDescriptor::new(
                    contents.len() as u64,
                    BufferUsage::VERTEX,
                    BufferDataUsage::Static,
                ),
                &[],
                0,
                Some(contents),
            )
            .unwrap()
    }

    #[test]
    fn test_immediate_buffer_readback() {
        let device = device_with(SoftwareBackend::new());
        let source = source_buffer(&device, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let readback = device
            .readback_buffer(&source, ReadbackMethod::Immediate, 2, 4)
            .unwrap();
        assert_eq!(readback.status(), ReadbackStatus::Complete);
        assert_eq!(readback.data().unwrap(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_immediate_readback_of_readback_buffer_skips_staging() {
        let device = device_with(SoftwareBackend::new());
        let source = source_buffer(&device, &[7, 7, 7, 7]);
        let buffer = device
            .create_buffer(
                BufferDescriptor::new(4, BufferUsage::empty(), BufferDataUsage::Readback),
                &[],
                0,
                None,
            )
            .unwrap();
        assert!(source.copy_to(&buffer, 0, 0, 4));
        let readback = device
            .readback_buffer(&buffer, ReadbackMethod::Immediate, 0, 4)
            .unwrap();
        assert_eq!(readback.data().unwrap(), vec![7; 4]);
        // No staging buffer was borrowed.
        assert_eq!(device.temporary_buffer_count(), 0);
    }

    #[test]
    fn test_async_readback_waits_for_fence() {
        let device = device_with(SoftwareBackend::new().with_manual_fences());
        let source = source_buffer(&device, &[9, 8, 7, 6]);
        let readback = device
            .readback_buffer(&source, ReadbackMethod::Async, 0, 4)
            .unwrap();
        assert_eq!(readback.status(), ReadbackStatus::Waiting);
        assert!(readback.data().is_none());

        // Polling before the fence signals changes nothing.
        readback.update();
        assert_eq!(readback.status(), ReadbackStatus::Waiting);

        device.backend().signal_all_fences();
        readback.update();
        assert_eq!(readback.status(), ReadbackStatus::Complete);
        assert_eq!(readback.data().unwrap(), vec![9, 8, 7, 6]);

        // The staging buffer went back to the pool and gets reused.
        assert_eq!(device.temporary_buffer_count(), 1);
        let staging = device.acquire_staging_buffer(4).unwrap();
        assert_eq!(device.temporary_buffer_count(), 1);
        device.release_temporary_buffer(&staging);
    }

    #[test]
    fn test_wait_blocks_until_complete() {
        let device = device_with(SoftwareBackend::new());
        let source = source_buffer(&device, &[1, 1, 2, 2]);
        let readback = device
            .readback_buffer(&source, ReadbackMethod::Async, 0, 4)
            .unwrap();
        readback.wait();
        assert_eq!(readback.status(), ReadbackStatus::Complete);
        assert_eq!(readback.data().unwrap(), vec![1, 1, 2, 2]);
    }

    #[test]
    fn test_range_validation() {
        let device = device_with(SoftwareBackend::new());
        let source = source_buffer(&device, &[0; 8]);
        assert!(matches!(
            device.readback_buffer(&source, ReadbackMethod::Immediate, 0, 0),
            Err(GraphicsError::Validation(_))
        ));
        assert!(matches!(
            device.readback_buffer(&source, ReadbackMethod::Immediate, 4, 8),
            Err(GraphicsError::Validation(_))
        ));
        assert!(matches!(
            device.readback_buffer(&source, ReadbackMethod::Immediate, u64::MAX, 2),
            Err(GraphicsError::Validation(_))
        ));
    }

    #[test]
    fn test_texture_readback() {
        let device = device_with(SoftwareBackend::new());
        let texture = device
            .create_texture(
                TextureDescriptor::new_2d(2, 2, TextureFormat::R8Unorm, TextureUsage::SAMPLED),
                None,
            )
            .unwrap();
        assert!(texture.replace_pixels(0, 0, Rect::new(0, 0, 2, 2), 0, &[1, 2, 3, 4]));

        let readback = device
            .readback_texture(&texture, ReadbackMethod::Immediate, 0, 0, Rect::new(0, 0, 2, 2))
            .unwrap();
        assert_eq!(readback.data().unwrap(), vec![1, 2, 3, 4]);

        let readback = device
            .readback_texture(&texture, ReadbackMethod::Async, 0, 0, Rect::new(1, 0, 1, 2))
            .unwrap();
        readback.wait();
        assert_eq!(readback.data().unwrap(), vec![2, 4]);
    }

    #[test]
    fn test_texture_readback_validation() {
        let device = device_with(SoftwareBackend::new());
        let target = device
            .create_texture(
                TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, TextureUsage::RENDER_TARGET),
                None,
            )
            .unwrap();
        // No readable image storage.
        assert!(matches!(
            device.readback_texture(&target, ReadbackMethod::Immediate, 0, 0, Rect::new(0, 0, 4, 4)),
            Err(GraphicsError::Validation(_))
        ));

        let texture = device
            .create_texture(
                TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, TextureUsage::SAMPLED),
                None,
            )
            .unwrap();
        assert!(matches!(
            device.readback_texture(&texture, ReadbackMethod::Immediate, 1, 0, Rect::new(0, 0, 4, 4)),
            Err(GraphicsError::Validation(_))
        ));
        assert!(matches!(
            device.readback_texture(&texture, ReadbackMethod::Immediate, 0, 0, Rect::new(2, 2, 4, 4)),
            Err(GraphicsError::Validation(_))
        ));
    }

    #[test]
    fn test_dropped_readback_returns_staging_to_pool() {
        let device = device_with(SoftwareBackend::new().with_manual_fences());
        let source = source_buffer(&device, &[0; 16]);
        let readback = device
            .readback_buffer(&source, ReadbackMethod::Async, 0, 16)
            .unwrap();
        assert_eq!(readback.status(), ReadbackStatus::Waiting);
        drop(readback);

        // The abandoned staging buffer is free for the next borrower.
        let staging = device.acquire_staging_buffer(16).unwrap();
        assert_eq!(device.temporary_buffer_count(), 1);
        device.release_temporary_buffer(&staging);
    }

    #[test]
    fn test_readback_of_unloaded_buffer_errors() {
        let device = device_with(SoftwareBackend::new());
        let source = source_buffer(&device, &[0; 4]);
        source.unload_volatile();
        let readback = device
            .readback_buffer(&source, ReadbackMethod::Immediate, 0, 4)
            .unwrap();
        assert_eq!(readback.status(), ReadbackStatus::Error);
        assert!(readback.has_error());
        assert!(readback.data().is_none());
    }
}
