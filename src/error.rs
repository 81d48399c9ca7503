//! Crate-wide error type
//!
//! Every fallible construction call in the GPU layer returns
//! [`GraphicsResult`]. Variants carry named fields so log lines and test
//! assertions can match on the failing object rather than on strings.

use std::path::Path;

use crate::gpu::descriptor::HeapKind;

/// Errors produced by the GPU resource and command layer
#[derive(Debug, thiserror::Error)]
pub enum GraphicsError {
    /// A fence wait exceeded the hard timeout. The device is gone.
    #[error("Device lost: fence value {value} not reached within {timeout_ms}ms")]
    DeviceLost { value: u64, timeout_ms: u64 },

    /// Creating a device-level object (queue, heap, swapchain, signature, pipeline) failed
    #[error("Failed to create {object}: {reason}")]
    DeviceCreation { object: String, reason: String },

    #[error("Descriptor heap exhausted: {kind} heap has no free slot out of {capacity}")]
    DescriptorHeapExhausted { kind: HeapKind, capacity: u32 },

    #[error("Out of GPU memory allocating '{resource}' ({requested} bytes)")]
    OutOfMemory { resource: String, requested: u64 },

    #[error("Shader compilation failed: {path}: {message}")]
    ShaderCompile { path: String, message: String },

    #[error("IO error at {path}: {error}")]
    IoError {
        path: String,
        #[source]
        error: std::io::Error,
    },

    #[error("Cache file {path} is corrupted: {reason}")]
    CacheCorrupted { path: String, reason: String },

    #[error("Invalid state for {operation}: {reason}")]
    InvalidState { operation: String, reason: String },

    #[error("Configuration error in {path}: {error}")]
    ConfigError { path: String, error: String },

    #[error("Failed to load asset {path}: {error}")]
    AssetLoad { path: String, error: String },
}

/// Result type used throughout the crate
pub type GraphicsResult<T> = Result<T, GraphicsError>;

impl GraphicsError {
    /// Device loss and device-object creation failures cannot be recovered
    /// from inside the frame loop; the caller is expected to shut down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GraphicsError::DeviceLost { .. } | GraphicsError::DeviceCreation { .. }
        )
    }

    pub fn invalid_state(operation: &str, reason: impl std::fmt::Display) -> Self {
        GraphicsError::InvalidState {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl AsRef<Path>, error: std::io::Error) -> Self {
        GraphicsError::IoError {
            path: path.as_ref().display().to_string(),
            error,
        }
    }
}
