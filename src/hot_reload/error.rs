//! Hot reload error handling
//!
//! Helpers that map filesystem and compiler failures onto
//! [`GraphicsError`] with the offending path attached.

use std::path::Path;

use crate::error::{GraphicsError, GraphicsResult};

/// Attach a path to IO failures
pub trait HotReloadErrorContext<T> {
    fn io_context(self, path: &Path) -> GraphicsResult<T>;
}

impl<T> HotReloadErrorContext<T> for Result<T, std::io::Error> {
    fn io_context(self, path: &Path) -> GraphicsResult<T> {
        self.map_err(|e| GraphicsError::io(path, e))
    }
}

/// Create a shader compile error
pub fn shader_compile_error(path: &str, message: impl std::fmt::Display) -> GraphicsError {
    GraphicsError::ShaderCompile {
        path: path.to_string(),
        message: message.to_string(),
    }
}

/// Create a corrupted cache error
pub fn cache_corrupted_error(path: &Path, reason: impl std::fmt::Display) -> GraphicsError {
    GraphicsError::CacheCorrupted {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}
