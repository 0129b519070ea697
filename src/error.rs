//! Graphics error types.

use thiserror::Error;

/// Errors that can occur while creating or operating on graphics resources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphicsError {
    /// The backend failed to allocate a native resource.
    #[error("resource allocation failed: {0}")]
    Allocation(String),
    /// A host-side allocation (shadow or staging memory) failed.
    #[error("out of memory")]
    OutOfMemory,
    /// A descriptor or argument failed validation.
    #[error("validation failed: {0}")]
    Validation(String),
    /// A device-level object ended up in an unusable state.
    #[error("device error (status {status}): {message}")]
    Device {
        /// Backend-specific status code, e.g. a framebuffer completeness code.
        status: u32,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::Validation("size must be non-zero".to_string());
        assert_eq!(err.to_string(), "validation failed: size must be non-zero");

        let err = GraphicsError::Device {
            status: 3,
            message: "framebuffer incomplete".to_string(),
        };
        assert!(err.to_string().contains("status 3"));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(GraphicsError::OutOfMemory, GraphicsError::OutOfMemory);
        assert_ne!(
            GraphicsError::OutOfMemory,
            GraphicsError::Allocation("x".to_string())
        );
    }
}
