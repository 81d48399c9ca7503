//! The graphics context
//!
//! One explicit object owns the backend, the descriptor heaps, the resource
//! tracker, the view cache, the graphics queue and the shader cache. It is
//! created once and passed by `&mut` to everything that touches the GPU, so
//! the single-writer contract of the heaps and caches is enforced by the
//! borrow checker.

use std::path::Path;

use crate::backend::GpuBackend;
use crate::config::GpuConfig;
use crate::error::GraphicsResult;
use crate::gpu::command::{CommandBuffer, QueueType};
use crate::gpu::descriptor::{Descriptor, DescriptorHeap, DescriptorHeaps, HeapKind};
use crate::gpu::queue::CommandQueue;
use crate::gpu::resource::ResourceTracker;
use crate::gpu::texture::{MipSelector, Texture};
use crate::gpu::view::{TextureView, ViewKind};
use crate::gpu::view_cache::{ViewCache, ViewHandle, ViewKey};
use crate::hot_reload::{CompiledShader, NagaCompiler, ShaderCache, ShaderCompiler, ShaderStage};

pub struct GraphicsContext {
    pub(crate) backend: Box<dyn GpuBackend>,
    pub(crate) heaps: DescriptorHeaps,
    pub(crate) tracker: ResourceTracker,
    pub(crate) views: ViewCache,
    pub(crate) queue: CommandQueue,
    pub(crate) shader_cache: ShaderCache,
    pub(crate) compiler: Box<dyn ShaderCompiler>,
    config: GpuConfig,
}

impl GraphicsContext {
    /// Create the context with the WGSL compiler
    pub fn new(backend: Box<dyn GpuBackend>, config: GpuConfig) -> GraphicsResult<Self> {
        let compiler = NagaCompiler::new(config.include_paths.clone());
        Self::with_compiler(backend, config, Box::new(compiler))
    }

    pub fn with_compiler(
        mut backend: Box<dyn GpuBackend>,
        config: GpuConfig,
        compiler: Box<dyn ShaderCompiler>,
    ) -> GraphicsResult<Self> {
        log::info!("[GraphicsContext::new] Initializing on {} backend", backend.name());

        let heaps = DescriptorHeaps {
            render_targets: Self::create_heap(backend.as_mut(), HeapKind::RenderTarget, config.heaps.render_targets)?,
            depth_targets: Self::create_heap(backend.as_mut(), HeapKind::DepthStencil, config.heaps.depth_targets)?,
            shader_resources: Self::create_heap(
                backend.as_mut(),
                HeapKind::ShaderResource,
                config.heaps.shader_resources,
            )?,
            samplers: Self::create_heap(backend.as_mut(), HeapKind::Sampler, config.heaps.samplers)?,
        };
        let queue = CommandQueue::new(backend.as_mut(), QueueType::Graphics, config.fence_timeout())?;
        let shader_cache = ShaderCache::new(&config.cache_dir);

        Ok(Self {
            backend,
            heaps,
            tracker: ResourceTracker::new(),
            views: ViewCache::new(),
            queue,
            shader_cache,
            compiler,
            config,
        })
    }

    fn create_heap(backend: &mut dyn GpuBackend, kind: HeapKind, capacity: u32) -> GraphicsResult<DescriptorHeap> {
        let (id, addresses) = backend.create_descriptor_heap(kind, capacity)?;
        Ok(DescriptorHeap::new(id, kind, capacity, addresses))
    }

    pub fn backend(&self) -> &dyn GpuBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn GpuBackend {
        self.backend.as_mut()
    }

    pub fn config(&self) -> &GpuConfig {
        &self.config
    }

    pub fn heaps(&self) -> &DescriptorHeaps {
        &self.heaps
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    pub fn view_cache(&self) -> &ViewCache {
        &self.views
    }

    pub fn shader_cache(&self) -> &ShaderCache {
        &self.shader_cache
    }

    pub fn alloc_descriptor(&mut self, kind: HeapKind) -> GraphicsResult<Descriptor> {
        self.heaps.alloc(kind)
    }

    pub fn free_descriptor(&mut self, descriptor: &mut Descriptor) {
        self.heaps.free(descriptor);
    }

    /// Submit closed command buffers to the graphics queue
    pub fn submit(&mut self, buffers: &[&CommandBuffer]) -> GraphicsResult<()> {
        self.queue.submit(self.backend.as_mut(), buffers)
    }

    pub fn signal(&mut self) -> GraphicsResult<u64> {
        self.queue.signal(self.backend.as_mut())
    }

    pub fn wait(&mut self, value: u64) -> GraphicsResult<()> {
        self.queue.wait(self.backend.as_mut(), value)
    }

    pub fn completed_value(&mut self) -> u64 {
        self.queue.completed_value(self.backend.as_mut())
    }

    /// Signal and wait for everything submitted so far
    pub fn flush(&mut self) -> GraphicsResult<u64> {
        self.queue.flush(self.backend.as_mut())
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Cached view of `texture`; creates it on first request
    pub fn view_get(&mut self, texture: &Texture, kind: ViewKind, mip: MipSelector) -> GraphicsResult<ViewHandle> {
        let key = ViewKey {
            texture: texture.uuid(),
            kind,
            mip,
        };
        let backend = self.backend.as_mut();
        let heaps = &mut self.heaps;
        self.views
            .get_or_create(key, || TextureView::create(backend, heaps, texture, kind, mip))
    }

    /// Give back one reference to a cached view, destroying it at zero.
    /// The handle is consumed, so a reference can only be released once:
    ///
    /// ```compile_fail
    /// fn release_twice(ctx: &mut earth_gpu::GraphicsContext, view: earth_gpu::gpu::ViewHandle) {
    ///     ctx.view_release(view);
    ///     ctx.view_release(view);
    /// }
    /// ```
    pub fn view_release(&mut self, view: ViewHandle) {
        if let Some(view) = self.views.release(&view.key) {
            view.destroy(self.backend.as_mut(), &mut self.heaps);
        }
    }

    pub(crate) fn release_texture_views(&mut self, texture: u64, name: &str) {
        for (view, refs) in self.views.remove_texture(texture) {
            log::warn!(
                "[GraphicsContext] '{}' freed while its {:?} view still has {} references",
                name,
                view.key().kind,
                refs
            );
            view.destroy(self.backend.as_mut(), &mut self.heaps);
        }
    }

    /// Compile a shader through the on-disk bytecode cache
    pub fn compile_shader(&mut self, path: &Path, stage: ShaderStage) -> GraphicsResult<CompiledShader> {
        self.shader_cache.compile(self.compiler.as_mut(), path, stage)
    }

    /// Drain the GPU, destroy cached views and report leaked resources.
    /// Returns the number of leaks.
    pub fn shutdown(mut self) -> GraphicsResult<usize> {
        self.flush()?;
        for (view, refs) in self.views.drain() {
            log::warn!("[GraphicsContext::shutdown] View {:?} still had {} references", view.key(), refs);
            view.destroy(self.backend.as_mut(), &mut self.heaps);
        }
        let leaks = self.tracker.report();
        log::info!("[GraphicsContext::shutdown] Shut down {} backend", self.backend.name());
        Ok(leaks)
    }
}
