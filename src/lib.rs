//! Earth GPU
//!
//! The GPU resource and command-submission layer of a real-time 3D runtime:
//! descriptor heap allocation, resource state tracking, reference-counted
//! view caching, fence-based double-buffered frame pacing and hot-reloadable
//! shader pipelines, over a pluggable device backend.

pub mod assets;
pub mod backend;
pub mod config;
pub mod error;
pub mod gpu;
pub mod hot_reload;
pub mod utils;
pub mod video;

pub use backend::{GpuBackend, HeadlessBackend, HeadlessProbe, WgpuBackend};
pub use config::{BackendKind, GpuConfig};
pub use error::{GraphicsError, GraphicsResult};
pub use gpu::{GraphicsContext, FRAMES_IN_FLIGHT};
pub use hot_reload::{HotPipeline, ShaderStage};
pub use video::{VideoDevice, VideoFrame};
