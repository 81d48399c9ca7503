/// Hot-Reload System
///
/// Live shader iteration for the GPU layer: shader files are polled for
/// modification, recompiled through an on-disk bytecode cache, and the
/// pipelines built from them are swapped atomically.
///
/// Key features:
/// - WGSL compilation with `#include` support
/// - Bytecode cache keyed by source path and modification time
/// - Pipelines that keep working when an edit fails to compile

pub mod compiler;
pub mod error;
pub mod hot_pipeline;
pub mod shader_cache;

pub use compiler::{CompiledShader, NagaCompiler, ShaderCompiler, ShaderStage};
pub use error::{cache_corrupted_error, shader_compile_error, HotReloadErrorContext};
pub use hot_pipeline::HotPipeline;
pub use shader_cache::{ShaderCache, ShaderCacheHeader, SHADER_CACHE_HEADER_SIZE};

#[cfg(test)]
mod tests;
