//! GPU buffer resource.
//!
//! A buffer owns a native store through the backend plus optional
//! CPU-side shadow memory. Stream buffers always carry a shadow sized
//! to the whole resource; other buffers keep one when they were
//! created with initial contents or written to while unloaded, so a
//! context reset can restore what the application uploaded.
//!
//! Whole-buffer rewrites of Stream and Dynamic buffers go through
//! orphaning: the old native store is abandoned to in-flight GPU work
//! and the new contents land in a fresh store, so the CPU never stalls
//! waiting for a frame that still reads the old data.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use bytemuck::Pod;
use parking_lot::{Mutex, MutexGuard};
use static_assertions::assert_impl_all;

use super::try_zeroed;
use crate::backend::{GpuBackend, GpuBuffer};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{BufferDataUsage, BufferDescriptor, DataFormat, MapMode};
use crate::volatile::Volatile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapState {
    Unmapped,
    Read,
    Write { offset: u64, size: u64 },
}

struct BufferState {
    handle: Option<GpuBuffer>,
    map: MapState,
    /// Whole-resource CPU copy used for mapping Stream buffers and for
    /// restoring contents after a context reset.
    shadow: Option<Vec<u8>>,
    /// Pool memory borrowed from the device for a write map.
    scratch: Option<Vec<u8>>,
    /// GPU snapshot backing a read map.
    read_cache: Option<Vec<u8>>,
}

/// A GPU buffer.
pub struct Buffer {
    backend: Arc<dyn GpuBackend>,
    device: Weak<GraphicsDevice>,
    descriptor: BufferDescriptor,
    formats: Vec<DataFormat>,
    array_length: u64,
    state: Mutex<BufferState>,
}

assert_impl_all!(Buffer: Send, Sync);

impl Buffer {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        device: Weak<GraphicsDevice>,
        descriptor: BufferDescriptor,
        formats: Vec<DataFormat>,
        array_length: u64,
        initial: Option<&[u8]>,
    ) -> Result<Self, GraphicsError> {
        let size = descriptor.size as usize;
        let shadow = match (descriptor.data_usage, initial) {
            // Stream buffers always own whole-resource shadow memory.
            (BufferDataUsage::Stream, Some(data)) => {
                let mut shadow = try_zeroed(size)?;
                shadow.copy_from_slice(data);
                Some(shadow)
            }
            (BufferDataUsage::Stream, None) => Some(try_zeroed(size)?),
            (_, Some(data)) => {
                let mut shadow = try_zeroed(size)?;
                shadow.copy_from_slice(data);
                Some(shadow)
            }
            (_, None) => None,
        };
        Ok(Self {
            backend,
            device,
            descriptor,
            formats,
            array_length,
            state: Mutex::new(BufferState {
                handle: None,
                map: MapState::Unmapped,
                shadow,
                scratch: None,
                read_cache: None,
            }),
        })
    }

    /// Create the native store, uploading shadow contents or zeroing
    /// as the descriptor asks. No-op when already loaded.
    pub(crate) fn load_now(&self) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if state.handle.is_some() {
            return Ok(());
        }
        let handle = self.backend.create_buffer(
            self.descriptor.size,
            self.descriptor.label.as_deref(),
            state.shadow.as_deref(),
        )?;
        if state.shadow.is_none() && self.descriptor.zero_initialize {
            if !self
                .backend
                .clear_buffer(handle, 0, self.descriptor.size)
            {
                match try_zeroed(self.descriptor.size as usize) {
                    Ok(zeros) => self.backend.write_buffer(handle, 0, &zeros),
                    Err(err) => {
                        self.backend.destroy_buffer(handle);
                        return Err(err);
                    }
                }
            }
        }
        log::trace!(
            "Loaded buffer {:?} ({} bytes)",
            self.descriptor.label,
            self.descriptor.size
        );
        state.handle = Some(handle);
        Ok(())
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Expected update pattern.
    pub fn data_usage(&self) -> BufferDataUsage {
        self.descriptor.data_usage
    }

    /// Creation descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Debug label.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Element formats of one array element, empty for unstructured buffers.
    pub fn formats(&self) -> &[DataFormat] {
        &self.formats
    }

    /// Number of array elements, zero for unstructured buffers.
    pub fn array_length(&self) -> u64 {
        self.array_length
    }

    /// Whether the native store currently exists.
    pub fn is_loaded(&self) -> bool {
        self.state.lock().handle.is_some()
    }

    /// Whether a map is currently outstanding.
    pub fn is_mapped(&self) -> bool {
        self.state.lock().map != MapState::Unmapped
    }

    pub(crate) fn handle(&self) -> Option<GpuBuffer> {
        self.state.lock().handle
    }

    /// Map a byte range for CPU access.
    ///
    /// Returns `None` instead of failing loudly when the range is
    /// empty or out of bounds, when the mode does not match the
    /// buffer's data usage (writes to immutable or Readback buffers,
    /// reads from anything but Readback buffers), or when a map is
    /// already outstanding.
    ///
    /// With [`MapMode::WriteInvalidate`] the mapped memory contents
    /// are unspecified; the caller must write every byte it then
    /// names in [`Buffer::unmap`].
    pub fn map(&self, mode: MapMode, offset: u64, size: u64) -> Option<MappedRange<'_>> {
        if size == 0 {
            return None;
        }
        match mode {
            MapMode::ReadOnly if self.descriptor.data_usage != BufferDataUsage::Readback => {
                return None
            }
            MapMode::WriteInvalidate
                if matches!(
                    self.descriptor.data_usage,
                    BufferDataUsage::Static | BufferDataUsage::Readback
                ) =>
            {
                return None
            }
            _ => {}
        }
        let end = offset.checked_add(size)?;
        if end > self.descriptor.size {
            return None;
        }

        let mut state = self.state.lock();
        if state.map != MapState::Unmapped {
            return None;
        }
        let target = match mode {
            MapMode::ReadOnly => {
                let handle = state.handle?;
                state.read_cache = Some(self.backend.read_buffer(handle, offset, size));
                state.map = MapState::Read;
                MapTarget::ReadCache
            }
            MapMode::WriteInvalidate => {
                if self.descriptor.data_usage == BufferDataUsage::Stream {
                    state.shadow.as_ref()?;
                    state.map = MapState::Write { offset, size };
                    MapTarget::Shadow
                } else {
                    state.scratch = Some(self.acquire_scratch(size as usize)?);
                    state.map = MapState::Write { offset, size };
                    MapTarget::Scratch
                }
            }
        };
        let start = match target {
            MapTarget::Shadow => offset as usize,
            MapTarget::Scratch | MapTarget::ReadCache => 0,
        };
        Some(MappedRange {
            guard: state,
            target,
            start,
            len: size as usize,
        })
    }

    /// Finish an outstanding map, uploading `[used_offset, used_offset
    /// + used_size)` for write maps.
    ///
    /// A no-op when no map is outstanding. When the used range is not
    /// contained in the mapped range nothing is uploaded and the
    /// buffer contents stay untouched.
    ///
    /// A write map that covered the whole buffer of a Stream or
    /// Dynamic resource and is fully used orphans the native store
    /// instead of writing in place.
    pub fn unmap(&self, used_offset: u64, used_size: u64) {
        let mut state = self.state.lock();
        match state.map {
            MapState::Unmapped => {}
            MapState::Read => {
                state.read_cache = None;
                state.map = MapState::Unmapped;
            }
            MapState::Write { offset, size } => {
                state.map = MapState::Unmapped;
                let range_ok = used_offset >= offset
                    && used_offset
                        .checked_add(used_size)
                        .is_some_and(|end| end <= offset + size);
                if range_ok && used_size > 0 {
                    self.flush_write(&mut state, offset, size, used_offset, used_size);
                }
                if let Some(scratch) = state.scratch.take() {
                    self.release_scratch(scratch);
                }
            }
        }
    }

    /// Upload the used part of a finished write map.
    fn flush_write(
        &self,
        state: &mut BufferState,
        map_offset: u64,
        map_size: u64,
        used_offset: u64,
        used_size: u64,
    ) {
        let whole = self.descriptor.data_usage.supports_orphaning()
            && map_offset == 0
            && map_size == self.descriptor.size
            && used_offset == 0
            && used_size == map_size;
        if self.descriptor.data_usage == BufferDataUsage::Stream {
            let Some(shadow) = state.shadow.as_ref() else {
                return;
            };
            let Some(handle) = state.handle else {
                // Unloaded; the shadow already has the new contents and
                // the next load uploads them.
                return;
            };
            if whole {
                self.upload_orphaned(handle, shadow);
            } else {
                let start = used_offset as usize;
                self.backend
                    .write_buffer(handle, used_offset, &shadow[start..start + used_size as usize]);
            }
        } else {
            let Some(scratch) = state.scratch.as_ref() else {
                return;
            };
            let rel = (used_offset - map_offset) as usize;
            let bytes = &scratch[rel..rel + used_size as usize];
            if let Some(handle) = state.handle {
                if whole {
                    self.upload_orphaned(handle, bytes);
                } else {
                    self.backend.write_buffer(handle, used_offset, bytes);
                }
            }
            if let Some(shadow) = state.shadow.as_mut() {
                let start = used_offset as usize;
                shadow[start..start + used_size as usize].copy_from_slice(bytes);
            }
        }
    }

    /// Replace a byte range of the contents. Fails (returning false)
    /// for immutable and Readback buffers, while a map is outstanding,
    /// or when the range is empty or out of bounds.
    ///
    /// Note that a fill during a map never merges into the mapped
    /// bytes; it simply fails, and the caller must finish the map
    /// first. Some GPU APIs instead fold such writes into the mapped
    /// range, but here the mapped memory belongs to the outstanding
    /// [`MappedRange`] guard until [`Buffer::unmap`].
    ///
    /// A full-range fill of a Stream or Dynamic buffer orphans the
    /// native store exactly like a full-range mapped write.
    pub fn fill(&self, offset: u64, data: &[u8]) -> bool {
        let size = data.len() as u64;
        if size == 0 || !self.is_cpu_writable() {
            return false;
        }
        let Some(end) = offset.checked_add(size) else {
            return false;
        };
        if end > self.descriptor.size {
            return false;
        }
        let mut state = self.state.lock();
        if state.map != MapState::Unmapped {
            return false;
        }
        if let Some(shadow) = state.shadow.as_mut() {
            shadow[offset as usize..end as usize].copy_from_slice(data);
        } else if state.handle.is_none() {
            // No native store to receive the write; materialize a
            // shadow so it survives until the next load.
            let mut shadow = match try_zeroed(self.descriptor.size as usize) {
                Ok(shadow) => shadow,
                Err(_) => return false,
            };
            shadow[offset as usize..end as usize].copy_from_slice(data);
            state.shadow = Some(shadow);
        }
        if let Some(handle) = state.handle {
            let whole = self.descriptor.data_usage.supports_orphaning()
                && offset == 0
                && size == self.descriptor.size;
            if whole {
                self.upload_orphaned(handle, data);
            } else {
                self.backend.write_buffer(handle, offset, data);
            }
        }
        true
    }

    /// Typed [`Buffer::fill`].
    pub fn fill_slice<T: Pod>(&self, offset: u64, items: &[T]) -> bool {
        self.fill(offset, bytemuck::cast_slice(items))
    }

    /// Zero a byte range. Same failure rules as [`Buffer::fill`].
    ///
    /// Uses the backend's native clear when available. Without one the
    /// fallback uploads a zeroed host copy of the whole resource, so
    /// the entire buffer ends up zeroed, not just the requested range.
    pub fn clear(&self, offset: u64, size: u64) -> bool {
        if size == 0 || !self.is_cpu_writable() {
            return false;
        }
        let Some(end) = offset.checked_add(size) else {
            return false;
        };
        if end > self.descriptor.size {
            return false;
        }
        {
            let mut state = self.state.lock();
            if state.map != MapState::Unmapped {
                return false;
            }
            if let Some(handle) = state.handle {
                if self.backend.clear_buffer(handle, offset, size) {
                    if let Some(shadow) = state.shadow.as_mut() {
                        shadow[offset as usize..end as usize].fill(0);
                    }
                    return true;
                }
            } else {
                match state.shadow.as_mut() {
                    Some(shadow) => shadow[offset as usize..end as usize].fill(0),
                    // Unloaded with nothing retained; a zeroed shadow
                    // keeps the clear visible after the next load.
                    None => match try_zeroed(self.descriptor.size as usize) {
                        Ok(shadow) => state.shadow = Some(shadow),
                        Err(_) => return false,
                    },
                }
                return true;
            }
        }
        // No native clear; replace the whole contents with zeros.
        match try_zeroed(self.descriptor.size as usize) {
            Ok(zeros) => self.fill(0, &zeros),
            Err(_) => false,
        }
    }

    fn is_cpu_writable(&self) -> bool {
        !matches!(
            self.descriptor.data_usage,
            BufferDataUsage::Static | BufferDataUsage::Readback
        )
    }

    /// GPU-side copy of a byte range into another buffer.
    pub fn copy_to(&self, dst: &Buffer, src_offset: u64, dst_offset: u64, size: u64) -> bool {
        if size == 0 {
            return false;
        }
        let src_ok = src_offset
            .checked_add(size)
            .is_some_and(|end| end <= self.descriptor.size);
        let dst_ok = dst_offset
            .checked_add(size)
            .is_some_and(|end| end <= dst.descriptor.size);
        if !src_ok || !dst_ok {
            return false;
        }
        let (Some(src_handle), Some(dst_handle)) = (self.handle(), dst.handle()) else {
            return false;
        };
        self.backend
            .copy_buffer(src_handle, dst_handle, src_offset, dst_offset, size);
        true
    }

    /// Read a byte range through the mapping protocol. Only valid for
    /// Readback-usage buffers.
    pub(crate) fn read_bytes(&self, offset: u64, size: u64) -> Option<Vec<u8>> {
        let bytes = self.map(MapMode::ReadOnly, offset, size)?.to_vec();
        self.unmap(offset, size);
        Some(bytes)
    }

    fn upload_orphaned(&self, handle: GpuBuffer, contents: &[u8]) {
        log::trace!("Orphaning buffer {:?}", self.descriptor.label);
        if self.backend.capabilities().needs_full_upload_after_orphan {
            self.backend.orphan_buffer(handle, Some(contents));
        } else {
            self.backend.orphan_buffer(handle, None);
            self.backend.write_buffer(handle, 0, contents);
        }
    }

    fn acquire_scratch(&self, size: usize) -> Option<Vec<u8>> {
        match self.device.upgrade() {
            Some(device) => Some(device.acquire_scratch(size)),
            None => try_zeroed(size).ok(),
        }
    }

    fn release_scratch(&self, scratch: Vec<u8>) {
        if let Some(device) = self.device.upgrade() {
            device.release_scratch(scratch);
        }
    }
}

impl Volatile for Buffer {
    fn load_volatile(&self) -> bool {
        match self.load_now() {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Failed to load buffer {:?}: {err}", self.descriptor.label);
                false
            }
        }
    }

    fn unload_volatile(&self) {
        let mut state = self.state.lock();
        if let Some(handle) = state.handle.take() {
            self.backend.destroy_buffer(handle);
            log::trace!("Unloaded buffer {:?}", self.descriptor.label);
        }
        state.map = MapState::Unmapped;
        state.read_cache = None;
        if let Some(scratch) = state.scratch.take() {
            drop(state);
            self.release_scratch(scratch);
        }
    }

    fn volatile_label(&self) -> String {
        self.descriptor.label.clone().unwrap_or_default()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.unload_volatile();
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("label", &self.descriptor.label)
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("data_usage", &self.descriptor.data_usage)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[derive(Clone, Copy)]
enum MapTarget {
    Shadow,
    Scratch,
    ReadCache,
}

/// CPU-visible window into a mapped buffer range.
///
/// Holds the buffer's internal lock; drop it before calling
/// [`Buffer::unmap`].
pub struct MappedRange<'a> {
    guard: MutexGuard<'a, BufferState>,
    target: MapTarget,
    start: usize,
    len: usize,
}

impl MappedRange<'_> {
    fn storage(&self) -> &Vec<u8> {
        match self.target {
            MapTarget::Shadow => self.guard.shadow.as_ref(),
            MapTarget::Scratch => self.guard.scratch.as_ref(),
            MapTarget::ReadCache => self.guard.read_cache.as_ref(),
        }
        .expect("map target storage missing")
    }

    fn storage_mut(&mut self) -> &mut Vec<u8> {
        match self.target {
            MapTarget::Shadow => self.guard.shadow.as_mut(),
            MapTarget::Scratch => self.guard.scratch.as_mut(),
            MapTarget::ReadCache => self.guard.read_cache.as_mut(),
        }
        .expect("map target storage missing")
    }
}

impl Deref for MappedRange<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.storage()[self.start..self.start + self.len]
    }
}

impl DerefMut for MappedRange<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        let (start, len) = (self.start, self.len);
        &mut self.storage_mut()[start..start + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCapabilities, SoftwareBackend};
    use crate::types::BufferUsage;

    fn device_with(backend: SoftwareBackend) -> Arc<GraphicsDevice> {
        GraphicsDevice::with_backend(Arc::new(backend))
    }

    fn make_buffer(
        device: &Arc<GraphicsDevice>,
        size: u64,
        data_usage: BufferDataUsage,
        initial: Option<&[u8]>,
    ) -> Arc<Buffer> {
        device
            .create_buffer(
                BufferDescriptor::new(size, BufferUsage::VERTEX, data_usage),
                &[],
                0,
                initial,
            )
            .unwrap()
    }

    fn native_contents(buffer: &Buffer) -> Vec<u8> {
        let handle = buffer.handle().unwrap();
        buffer.backend.read_buffer(handle, 0, buffer.size())
    }

    #[test]
    fn test_map_rejects_invalid_requests() {
        let device = device_with(SoftwareBackend::new());
        let stream = make_buffer(&device, 64, BufferDataUsage::Stream, None);

        assert!(stream.map(MapMode::WriteInvalidate, 0, 0).is_none());
        assert!(stream.map(MapMode::WriteInvalidate, 32, 33).is_none());
        assert!(stream.map(MapMode::WriteInvalidate, u64::MAX, 2).is_none());
        // Reads need Readback usage.
        assert!(stream.map(MapMode::ReadOnly, 0, 16).is_none());

        let immutable = make_buffer(&device, 64, BufferDataUsage::Static, Some(&[0; 64]));
        assert!(immutable.map(MapMode::WriteInvalidate, 0, 64).is_none());

        let readback = make_buffer(&device, 64, BufferDataUsage::Readback, None);
        assert!(readback.map(MapMode::WriteInvalidate, 0, 64).is_none());
        assert!(readback.map(MapMode::ReadOnly, 0, 64).is_some());
    }

    #[test]
    fn test_full_stream_unmap_orphans_and_uploads() {
        let device = device_with(SoftwareBackend::new());
        let buffer = make_buffer(&device, 8, BufferDataUsage::Stream, None);
        {
            let mut mapped = buffer.map(MapMode::WriteInvalidate, 0, 8).unwrap();
            mapped.copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        }
        buffer.unmap(0, 8);
        assert!(!buffer.is_mapped());
        assert_eq!(native_contents(&buffer), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_partial_unmap_writes_in_place() {
        let device = device_with(SoftwareBackend::new());
        let buffer = make_buffer(&device, 8, BufferDataUsage::Dynamic, Some(&[9; 8]));
        {
            let mut mapped = buffer.map(MapMode::WriteInvalidate, 2, 4).unwrap();
            mapped.copy_from_slice(&[1, 2, 3, 4]);
        }
        // Only half of the mapped range was actually used.
        buffer.unmap(2, 2);
        assert_eq!(native_contents(&buffer), vec![9, 9, 1, 2, 9, 9, 9, 9]);
    }

    #[test]
    fn test_unmap_with_bad_range_leaves_contents() {
        let device = device_with(SoftwareBackend::new());
        let buffer = make_buffer(&device, 8, BufferDataUsage::Dynamic, Some(&[7; 8]));
        {
            let mut mapped = buffer.map(MapMode::WriteInvalidate, 0, 4).unwrap();
            mapped.copy_from_slice(&[1, 2, 3, 4]);
        }
        // The used range pokes outside the mapped range.
        buffer.unmap(2, 4);
        assert_eq!(native_contents(&buffer), vec![7; 8]);
        assert!(!buffer.is_mapped());
        // The map was released, so mapping again works.
        assert!(buffer.map(MapMode::WriteInvalidate, 0, 4).is_some());
    }

    #[test]
    fn test_map_while_mapped_fails() {
        let device = device_with(SoftwareBackend::new());
        let buffer = make_buffer(&device, 8, BufferDataUsage::Stream, None);
        let mapped = buffer.map(MapMode::WriteInvalidate, 0, 4).unwrap();
        drop(mapped);
        // Still mapped until unmap runs.
        assert!(buffer.map(MapMode::WriteInvalidate, 4, 4).is_none());
        buffer.unmap(0, 4);
        assert!(buffer.map(MapMode::WriteInvalidate, 4, 4).is_some());
    }

    #[test]
    fn test_full_fill_uses_single_upload_when_required() {
        let backend = SoftwareBackend::new().with_capabilities(BackendCapabilities {
            needs_full_upload_after_orphan: true,
            ..Default::default()
        });
        let device = device_with(backend);
        let buffer = make_buffer(&device, 8, BufferDataUsage::Dynamic, Some(&[0; 8]));
        assert!(buffer.fill(0, &[5; 8]));
        // Every byte must come from the fill, none from the orphaned store.
        assert_eq!(native_contents(&buffer), vec![5; 8]);
    }

    #[test]
    fn test_fill_rules() {
        let device = device_with(SoftwareBackend::new());
        let immutable = make_buffer(&device, 8, BufferDataUsage::Static, Some(&[1; 8]));
        assert!(!immutable.fill(0, &[2; 8]));
        assert_eq!(native_contents(&immutable), vec![1; 8]);

        // Readback buffers only change through GPU copies.
        let readback = make_buffer(&device, 8, BufferDataUsage::Readback, None);
        assert!(!readback.fill(0, &[2; 8]));
        assert!(!readback.clear(0, 8));

        let buffer = make_buffer(&device, 8, BufferDataUsage::Dynamic, None);
        assert!(!buffer.fill(0, &[]));
        assert!(!buffer.fill(6, &[0; 4]));
        assert!(buffer.fill(2, &[3; 4]));
        assert_eq!(&native_contents(&buffer)[2..6], &[3; 4]);
    }

    #[test]
    fn test_fill_slice_typed() {
        let device = device_with(SoftwareBackend::new());
        let buffer = make_buffer(&device, 8, BufferDataUsage::Dynamic, None);
        assert!(buffer.fill_slice(0, &[1.0f32, 2.0f32]));
        assert_eq!(
            native_contents(&buffer),
            [1.0f32.to_le_bytes(), 2.0f32.to_le_bytes()].concat()
        );
    }

    #[test]
    fn test_clear_native_and_fallback() {
        let device = device_with(SoftwareBackend::new());
        let buffer = make_buffer(&device, 8, BufferDataUsage::Dynamic, Some(&[9; 8]));
        assert!(buffer.clear(2, 4));
        assert_eq!(native_contents(&buffer), vec![9, 9, 0, 0, 0, 0, 9, 9]);

        // Backend without a native clear: the fallback zeroes the
        // whole resource, not just the requested range.
        let backend = SoftwareBackend::new().with_capabilities(BackendCapabilities {
            supports_clear_buffer: false,
            ..Default::default()
        });
        let device = device_with(backend);
        let buffer = make_buffer(&device, 8, BufferDataUsage::Dynamic, Some(&[9; 8]));
        assert!(buffer.clear(2, 4));
        assert_eq!(native_contents(&buffer), vec![0; 8]);

        let immutable = make_buffer(&device, 8, BufferDataUsage::Static, Some(&[9; 8]));
        assert!(!immutable.clear(0, 8));
    }

    #[test]
    fn test_copy_to() {
        let device = device_with(SoftwareBackend::new());
        let src = make_buffer(&device, 8, BufferDataUsage::Static, Some(&[1, 2, 3, 4, 5, 6, 7, 8]));
        let dst = make_buffer(&device, 8, BufferDataUsage::Dynamic, Some(&[0; 8]));
        assert!(src.copy_to(&dst, 2, 4, 4));
        assert_eq!(native_contents(&dst), vec![0, 0, 0, 0, 3, 4, 5, 6]);

        assert!(!src.copy_to(&dst, 6, 0, 4));
        assert!(!src.copy_to(&dst, 0, 6, 4));
        assert!(!src.copy_to(&dst, 0, 0, 0));
    }

    #[test]
    fn test_read_map_sees_gpu_contents() {
        let device = device_with(SoftwareBackend::new());
        let src = make_buffer(&device, 4, BufferDataUsage::Static, Some(&[1, 2, 3, 4]));
        let readback = make_buffer(&device, 4, BufferDataUsage::Readback, None);
        assert!(src.copy_to(&readback, 0, 0, 4));
        let mapped = readback.map(MapMode::ReadOnly, 1, 2).unwrap();
        assert_eq!(&*mapped, &[2, 3]);
        drop(mapped);
        readback.unmap(0, 0);
        assert!(!readback.is_mapped());
    }

    #[test]
    fn test_unload_and_reload_restores_shadow() {
        let device = device_with(SoftwareBackend::new());
        let buffer = make_buffer(&device, 4, BufferDataUsage::Stream, Some(&[4, 3, 2, 1]));
        buffer.unload_volatile();
        // Repeat unloads are harmless.
        buffer.unload_volatile();
        assert!(!buffer.is_loaded());
        assert!(buffer.load_volatile());
        assert_eq!(native_contents(&buffer), vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_writes_while_unloaded_survive_reload() {
        let device = device_with(SoftwareBackend::new());
        let buffer = make_buffer(&device, 8, BufferDataUsage::Dynamic, None);
        buffer.unload_volatile();

        // With no native store and no retained copy, a fill
        // materializes a shadow so the bytes show up after reload.
        assert!(buffer.fill(2, &[7; 4]));
        assert!(buffer.load_volatile());
        assert_eq!(native_contents(&buffer), vec![0, 0, 7, 7, 7, 7, 0, 0]);

        // Same for a clear on a buffer that never had a shadow.
        let other = make_buffer(&device, 8, BufferDataUsage::Dynamic, None);
        other.unload_volatile();
        assert!(other.clear(2, 4));
        assert!(other.load_volatile());
        assert_eq!(native_contents(&other), vec![0; 8]);
    }

    #[test]
    fn test_zero_initialize_without_native_clear() {
        let backend = SoftwareBackend::new().with_capabilities(BackendCapabilities {
            supports_clear_buffer: false,
            ..Default::default()
        });
        let device = device_with(backend);
        let buffer = device
            .create_buffer(
                BufferDescriptor::new(16, BufferUsage::VERTEX, BufferDataUsage::Dynamic)
                    .with_zero_initialize(),
                &[],
                0,
                None,
            )
            .unwrap();
        assert_eq!(native_contents(&buffer), vec![0; 16]);
    }
}
