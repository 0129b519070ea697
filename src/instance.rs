//! Graphics instance: backend selection and device creation.

use std::sync::Arc;

use parking_lot::Mutex;
use static_assertions::assert_impl_all;

use crate::backend::{create_backend, GpuBackend};
use crate::device::GraphicsDevice;

/// Entry point of the graphics system. Owns the backend and every
/// device created from it.
pub struct GraphicsInstance {
    backend: Arc<dyn GpuBackend>,
    devices: Mutex<Vec<Arc<GraphicsDevice>>>,
}

assert_impl_all!(GraphicsInstance: Send, Sync);

impl GraphicsInstance {
    /// Create an instance on the default backend.
    pub fn new() -> Arc<Self> {
        Self::with_backend(create_backend())
    }

    /// Create an instance on a specific backend.
    pub fn with_backend(backend: Arc<dyn GpuBackend>) -> Arc<Self> {
        log::info!("Created graphics instance on {} backend", backend.name());
        Arc::new(Self {
            backend,
            devices: Mutex::new(Vec::new()),
        })
    }

    /// The backend this instance runs on.
    pub fn backend(&self) -> Arc<dyn GpuBackend> {
        self.backend.clone()
    }

    /// Create a device.
    pub fn create_device(&self, name: impl Into<String>) -> Arc<GraphicsDevice> {
        let device = GraphicsDevice::new(name, self.backend.clone());
        self.devices.lock().push(device.clone());
        device
    }

    /// Number of devices created through this instance.
    pub fn device_count(&self) -> usize {
        self.devices.lock().len()
    }
}

impl std::fmt::Debug for GraphicsInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsInstance")
            .field("backend", &self.backend.name())
            .field("devices", &self.device_count())
            .finish()
    }
}
