//! GPU resources: buffers, textures, readbacks.

pub mod buffer;
pub mod readback;
pub mod texture;

pub use buffer::{Buffer, MappedRange};
pub use readback::{GraphicsReadback, ReadbackMethod, ReadbackStatus};
pub use texture::Texture;

use crate::error::GraphicsError;

/// Allocate a zeroed host buffer, reporting failure instead of aborting.
pub(crate) fn try_zeroed(size: usize) -> Result<Vec<u8>, GraphicsError> {
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(size)
        .map_err(|_| GraphicsError::OutOfMemory)?;
    bytes.resize(size, 0);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_zeroed() {
        let bytes = try_zeroed(64).unwrap();
        assert_eq!(bytes.len(), 64);
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
