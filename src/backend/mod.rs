//! Device backends
//!
//! [`GpuBackend`] is the explicit-API surface the GPU layer drives: heaps,
//! resources, views, pipelines, command execution, fences and the
//! presentation engine. Everything above it (allocators, state tracking,
//! caches, frame pacing) is backend independent.

use std::time::Duration;

use crate::error::GraphicsResult;
use crate::gpu::buffer::BufferDesc;
use crate::gpu::command::{Command, QueueType};
use crate::gpu::descriptor::{DescriptorBinding, HeapAddresses, HeapId, HeapKind};
use crate::gpu::fence::FenceHandle;
use crate::gpu::pipeline::{GraphicsPipelineDesc, PipelineHandle, SignatureDesc, SignatureHandle};
use crate::gpu::resource::ResourceHandle;
use crate::gpu::sampler::SamplerDesc;
use crate::gpu::swapchain::SwapchainDesc;
use crate::gpu::texture::TextureDesc;
use crate::gpu::view::ViewDesc;
use crate::hot_reload::CompiledShader;

pub mod headless;
pub mod wgpu_backend;

pub use headless::{HeadlessBackend, HeadlessProbe, HeadlessStats};
pub use wgpu_backend::WgpuBackend;

pub trait GpuBackend {
    fn name(&self) -> &'static str;

    // Descriptor heaps
    fn create_descriptor_heap(&mut self, kind: HeapKind, capacity: u32) -> GraphicsResult<(HeapId, HeapAddresses)>;

    // Resources
    fn create_buffer(&mut self, desc: &BufferDesc) -> GraphicsResult<ResourceHandle>;
    fn create_texture(&mut self, desc: &TextureDesc) -> GraphicsResult<ResourceHandle>;
    fn destroy_resource(&mut self, resource: ResourceHandle);
    fn write_buffer(&mut self, buffer: ResourceHandle, offset: u64, data: &[u8]) -> GraphicsResult<()>;
    fn read_buffer(&mut self, buffer: ResourceHandle, offset: u64, out: &mut [u8]) -> GraphicsResult<()>;

    // Views live in descriptor slots
    fn create_view(&mut self, slot: DescriptorBinding, desc: &ViewDesc) -> GraphicsResult<()>;
    fn create_sampler(&mut self, slot: DescriptorBinding, desc: &SamplerDesc) -> GraphicsResult<()>;
    fn destroy_view(&mut self, slot: DescriptorBinding);

    // Pipelines
    fn create_signature(&mut self, desc: &SignatureDesc) -> GraphicsResult<SignatureHandle>;
    fn destroy_signature(&mut self, signature: SignatureHandle);
    fn create_graphics_pipeline(
        &mut self,
        signature: SignatureHandle,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> GraphicsResult<PipelineHandle>;
    fn create_compute_pipeline(
        &mut self,
        signature: SignatureHandle,
        shader: &CompiledShader,
    ) -> GraphicsResult<PipelineHandle>;
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    // Submission and synchronization
    fn execute(&mut self, queue: QueueType, commands: &[Command]) -> GraphicsResult<()>;
    fn create_fence(&mut self) -> GraphicsResult<FenceHandle>;
    /// Enqueue a signal of `value` behind all work submitted so far
    fn signal(&mut self, queue: QueueType, fence: FenceHandle, value: u64) -> GraphicsResult<()>;
    fn completed_value(&mut self, fence: FenceHandle) -> u64;
    /// Block until `fence` reaches `value`. Returns false on timeout.
    fn wait(&mut self, fence: FenceHandle, value: u64, timeout: Duration) -> GraphicsResult<bool>;

    // Presentation
    /// Create the swapchain and return its backbuffer resources
    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> GraphicsResult<Vec<ResourceHandle>>;
    fn release_swapchain_buffers(&mut self);
    /// Resize after the buffers were released and return the new ones
    fn resize_swapchain(&mut self, width: u32, height: u32) -> GraphicsResult<Vec<ResourceHandle>>;
    /// Index of the backbuffer the next frame renders into
    fn acquire_backbuffer(&mut self) -> GraphicsResult<usize>;
    fn present(&mut self, vsync: bool) -> GraphicsResult<()>;
}
