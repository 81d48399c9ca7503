//! GPU subsystem error handling
//!
//! Helpers for mapping backend API failures onto [`GraphicsError`] without
//! `unwrap()` at the call sites.

use crate::error::{GraphicsError, GraphicsResult};

/// Helper trait for device object creation contexts
pub trait GpuErrorContext<T> {
    fn gpu_context(self, object: &str) -> GraphicsResult<T>;
}

impl<T, E> GpuErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn gpu_context(self, object: &str) -> GraphicsResult<T> {
        self.map_err(|e| device_error(object, e))
    }
}

/// Create a device object creation error
pub fn device_error(object: &str, reason: impl std::fmt::Display) -> GraphicsError {
    GraphicsError::DeviceCreation {
        object: object.to_string(),
        reason: reason.to_string(),
    }
}

/// Create an out of memory error
pub fn out_of_memory_error(resource: &str, requested: u64) -> GraphicsError {
    GraphicsError::OutOfMemory {
        resource: resource.to_string(),
        requested,
    }
}
