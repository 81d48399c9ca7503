//! GPU layer configuration
//!
//! Loaded from a TOML file. Every field has a default, so a partial file (or
//! no file at all) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::constants::{
    DEFAULT_CACHE_DIR, DSV_HEAP_CAPACITY, FENCE_TIMEOUT_MS, RTV_HEAP_CAPACITY,
    SAMPLER_HEAP_CAPACITY, SHADER_HEAP_CAPACITY, SHADER_POLL_INTERVAL_SECS,
};

/// Which device implementation drives the GPU layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Deterministic simulated device, no GPU required
    Headless,
    /// Real GPU through wgpu
    Wgpu,
}

/// Descriptor heap capacities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    pub render_targets: u32,
    pub depth_targets: u32,
    pub shader_resources: u32,
    pub samplers: u32,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            render_targets: RTV_HEAP_CAPACITY,
            depth_targets: DSV_HEAP_CAPACITY,
            shader_resources: SHADER_HEAP_CAPACITY,
            samplers: SAMPLER_HEAP_CAPACITY,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    pub backend: BackendKind,

    /// Enable API validation / debug labels
    pub validation: bool,

    /// Present with vertical sync
    pub vsync: bool,

    pub width: u32,
    pub height: u32,
    pub title: String,

    pub heaps: HeapConfig,

    /// Fence waits longer than this are treated as device loss (ms)
    pub fence_timeout_ms: u64,

    /// Minimum time between shader file modification checks (seconds)
    pub shader_poll_interval: f64,

    /// Directory holding the shader bytecode and texture caches
    pub cache_dir: PathBuf,

    /// Extra directories searched by `#include` in shaders
    pub include_paths: Vec<PathBuf>,

    /// Memory budget of the headless device in bytes (0 = unlimited)
    pub headless_memory_budget: u64,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Headless,
            validation: cfg!(debug_assertions),
            vsync: true,
            width: 1280,
            height: 720,
            title: "Earth GPU".to_string(),
            heaps: HeapConfig::default(),
            fence_timeout_ms: FENCE_TIMEOUT_MS,
            shader_poll_interval: SHADER_POLL_INTERVAL_SECS,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            include_paths: vec![PathBuf::from("shaders")],
            headless_memory_budget: 0,
        }
    }
}

impl GpuConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> GraphicsResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| GraphicsError::io(path, e))?;
        let config = Self::from_toml_str(&raw).map_err(|e| match e {
            GraphicsError::ConfigError { error, .. } => GraphicsError::ConfigError {
                path: path.display().to_string(),
                error,
            },
            other => other,
        })?;
        log::info!("[GpuConfig::load] Loaded {} (backend {:?})", path.display(), config.backend);
        Ok(config)
    }

    /// Load from `path` when it exists, defaults otherwise
    pub fn load_or_default(path: impl AsRef<Path>) -> GraphicsResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            log::info!("[GpuConfig::load_or_default] {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(raw: &str) -> GraphicsResult<Self> {
        let config: GpuConfig = toml::from_str(raw).map_err(|e| GraphicsError::ConfigError {
            path: "<inline>".to_string(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> GraphicsResult<String> {
        toml::to_string_pretty(self).map_err(|e| GraphicsError::ConfigError {
            path: "<inline>".to_string(),
            error: e.to_string(),
        })
    }

    fn validate(&self) -> GraphicsResult<()> {
        let invalid = |error: &str| GraphicsError::ConfigError {
            path: "<inline>".to_string(),
            error: error.to_string(),
        };
        if self.heaps.render_targets == 0
            || self.heaps.depth_targets == 0
            || self.heaps.shader_resources == 0
            || self.heaps.samplers == 0
        {
            return Err(invalid("descriptor heap capacities must be non-zero"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(invalid("window size must be non-zero"));
        }
        if !(self.shader_poll_interval >= 0.0) {
            return Err(invalid("shader_poll_interval must be a non-negative number"));
        }
        Ok(())
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.shader_poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = GpuConfig::default();
        assert_eq!(config.heaps.render_targets, 2048);
        assert_eq!(config.heaps.shader_resources, 1_000_000);
        assert_eq!(config.fence_timeout_ms, 10_000_000);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.cache_dir, PathBuf::from(".cache"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = GpuConfig::from_toml_str(
            r#"
            backend = "wgpu"
            vsync = false

            [heaps]
            render_targets = 16
            "#,
        )
        .expect("parse");
        assert_eq!(config.backend, BackendKind::Wgpu);
        assert!(!config.vsync);
        assert_eq!(config.heaps.render_targets, 16);
        assert_eq!(config.heaps.samplers, 1024);
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = GpuConfig::from_toml_str("[heaps]\nsamplers = 0\n").unwrap_err();
        assert!(matches!(err, GraphicsError::ConfigError { .. }));
    }

    #[test]
    fn toml_round_trip() {
        let mut config = GpuConfig::default();
        config.title = "round trip".to_string();
        let raw = config.to_toml_string().expect("serialize");
        assert_eq!(GpuConfig::from_toml_str(&raw).expect("parse"), config);
    }
}
