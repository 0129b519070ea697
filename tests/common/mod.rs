//! Shared helpers for integration tests.

use std::sync::Arc;

use marigold_graphics::{
    BackendCapabilities, BufferDataUsage, BufferDescriptor, BufferUsage, GraphicsDevice,
    ReadbackMethod, SoftwareBackend,
};

/// Initialize logging once per test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Build a device on a software backend with the given capabilities,
/// keeping the concrete backend handle for test hooks.
pub fn device_with_caps(
    capabilities: BackendCapabilities,
) -> (Arc<GraphicsDevice>, Arc<SoftwareBackend>) {
    init_logging();
    let backend = Arc::new(SoftwareBackend::new().with_capabilities(capabilities));
    let device = GraphicsDevice::with_backend(backend.clone());
    (device, backend)
}

/// Build a device whose fences only signal on demand.
pub fn device_with_manual_fences() -> (Arc<GraphicsDevice>, Arc<SoftwareBackend>) {
    init_logging();
    let backend = Arc::new(SoftwareBackend::new().with_manual_fences());
    let device = GraphicsDevice::with_backend(backend.clone());
    (device, backend)
}

/// Read the current contents of any buffer by copying it through a
/// Readback-usage buffer, the way an application would.
pub fn snapshot_buffer(
    device: &Arc<GraphicsDevice>,
    buffer: &Arc<marigold_graphics::Buffer>,
) -> Vec<u8> {
    let staging = device
        .create_buffer(
            BufferDescriptor::new(buffer.size(), BufferUsage::empty(), BufferDataUsage::Readback),
            &[],
            0,
            None,
        )
        .expect("snapshot staging buffer");
    assert!(buffer.copy_to(&staging, 0, 0, buffer.size()));
    let readback = device
        .readback_buffer(&staging, ReadbackMethod::Immediate, 0, buffer.size())
        .expect("snapshot readback");
    readback.data().expect("snapshot data")
}
