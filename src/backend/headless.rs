//! Headless backend: a deterministic simulated device.
//!
//! Work executes at submission time (copies really move bytes), but fence
//! signals queue up on a simulated GPU timeline and only retire, in
//! submission order, when a wait needs them or when the timeline is advanced
//! through [`HeadlessProbe::advance`]. A stalled timeline never retires, which
//! turns every wait into a timeout.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::backend::GpuBackend;
use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::barrier::Barrier;
use crate::gpu::buffer::BufferDesc;
use crate::gpu::command::{Command, QueueType};
use crate::gpu::descriptor::{DescriptorBinding, HeapAddresses, HeapId, HeapKind};
use crate::gpu::error::{device_error, out_of_memory_error};
use crate::gpu::fence::FenceHandle;
use crate::gpu::pipeline::{GraphicsPipelineDesc, PipelineHandle, SignatureDesc, SignatureHandle};
use crate::gpu::resource::{ResourceHandle, ResourceKind};
use crate::gpu::sampler::SamplerDesc;
use crate::gpu::swapchain::SwapchainDesc;
use crate::gpu::texture::{copyable_footprints, TextureDesc};
use crate::gpu::view::ViewDesc;
use crate::hot_reload::CompiledShader;

const DESCRIPTOR_INCREMENT: u64 = 32;

#[derive(Debug)]
struct SimResource {
    name: String,
    kind: ResourceKind,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
enum SlotContent {
    View(ViewDesc),
    Sampler(SamplerDesc),
}

#[derive(Debug, Clone)]
struct SimPipeline {
    signature: SignatureHandle,
    bytecode: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct SimSwapchain {
    buffers: Vec<ResourceHandle>,
    desc: SwapchainDesc,
    current: usize,
}

/// Counters of executed work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub submissions: u64,
    pub commands: u64,
    pub transitions: u64,
    pub storage_barriers: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub copies: u64,
    pub presents: u64,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_handle: u64,
    heaps: Vec<(HeapKind, u32)>,
    resources: FxHashMap<ResourceHandle, SimResource>,
    slots: FxHashMap<(HeapId, u32), SlotContent>,
    signatures: FxHashMap<SignatureHandle, SignatureDesc>,
    pipelines: FxHashMap<PipelineHandle, SimPipeline>,
    fences: FxHashMap<FenceHandle, u64>,
    /// Signals not yet reached by the simulated GPU, in submission order
    pending: VecDeque<(FenceHandle, u64)>,
    swapchain: Option<SimSwapchain>,
    memory_used: u64,
    memory_budget: u64,
    stalled: bool,
    fail_pipelines: bool,
    last_submission: Vec<Command>,
    stats: HeadlessStats,
}

impl HeadlessState {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn allocate(&mut self, name: &str, kind: ResourceKind, bytes: u64) -> GraphicsResult<ResourceHandle> {
        if self.memory_budget > 0 && self.memory_used + bytes > self.memory_budget {
            log::error!(
                "[HeadlessBackend] '{}' needs {} bytes, {} of {} in use",
                name,
                bytes,
                self.memory_used,
                self.memory_budget
            );
            return Err(out_of_memory_error(name, bytes));
        }
        let handle = ResourceHandle(self.next_handle());
        self.memory_used += bytes;
        self.resources.insert(
            handle,
            SimResource {
                name: name.to_string(),
                kind,
                data: vec![0; bytes as usize],
            },
        );
        Ok(handle)
    }

    fn release(&mut self, handle: ResourceHandle) {
        if let Some(res) = self.resources.remove(&handle) {
            self.memory_used -= res.data.len() as u64;
        }
    }

    fn check_resource(&self, handle: ResourceHandle, operation: &str) -> GraphicsResult<()> {
        if self.resources.contains_key(&handle) {
            Ok(())
        } else {
            Err(GraphicsError::invalid_state(
                operation,
                format!("resource {:?} does not exist", handle),
            ))
        }
    }

    fn copy(&mut self, dst: ResourceHandle, src: ResourceHandle, size: Option<u64>) -> GraphicsResult<()> {
        self.check_resource(dst, "copy")?;
        self.check_resource(src, "copy")?;
        let data = match self.resources.get(&src) {
            Some(res) => res.data.clone(),
            None => return Ok(()),
        };
        if let Some(target) = self.resources.get_mut(&dst) {
            let len = size
                .map(|s| s as usize)
                .unwrap_or(usize::MAX)
                .min(data.len())
                .min(target.data.len());
            target.data[..len].copy_from_slice(&data[..len]);
        }
        self.stats.copies += 1;
        Ok(())
    }

    fn run(&mut self, command: &Command) -> GraphicsResult<()> {
        match command {
            Command::Barrier(Barrier::Transition { resource, .. }) => {
                self.check_resource(*resource, "barrier")?;
                self.stats.transitions += 1;
            }
            Command::Barrier(Barrier::Storage { resource }) => {
                self.check_resource(*resource, "barrier")?;
                self.stats.storage_barriers += 1;
            }
            Command::SetPipeline { pipeline, .. } => {
                if !self.pipelines.contains_key(pipeline) {
                    return Err(GraphicsError::invalid_state(
                        "set_pipeline",
                        format!("pipeline {:?} does not exist", pipeline),
                    ));
                }
            }
            Command::Draw { .. } | Command::DrawIndexed { .. } => self.stats.draws += 1,
            Command::Dispatch { .. } => self.stats.dispatches += 1,
            Command::CopyTextureToTexture { dst, src } => self.copy(*dst, *src, None)?,
            Command::CopyBufferToBuffer { dst, src, size } => self.copy(*dst, *src, Some(*size))?,
            Command::CopyBufferToTexture { dst, src, .. } => self.copy(*dst, *src, None)?,
            _ => {}
        }
        Ok(())
    }

    /// Retire queued signals until `fence` reaches `value` or the queue is empty
    fn retire_until(&mut self, fence: FenceHandle, value: u64) {
        if self.stalled {
            return;
        }
        while self.fences.get(&fence).copied().unwrap_or(0) < value {
            let Some((f, v)) = self.pending.pop_front() else {
                break;
            };
            self.fences.insert(f, v);
        }
    }

    fn retire_all(&mut self) {
        if self.stalled {
            return;
        }
        while let Some((f, v)) = self.pending.pop_front() {
            self.fences.insert(f, v);
        }
    }

    fn create_backbuffers(&mut self, desc: &SwapchainDesc) -> GraphicsResult<Vec<ResourceHandle>> {
        let (_, bytes) = copyable_footprints(desc.width, desc.height, desc.format, 1);
        (0..desc.buffer_count)
            .map(|i| self.allocate(&format!("Backbuffer {}", i), ResourceKind::Texture, bytes))
            .collect()
    }
}

/// Simulated device
pub struct HeadlessBackend {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HeadlessState::default())),
        }
    }

    /// Device that reports out of memory beyond `bytes` of live allocations
    pub fn with_memory_budget(bytes: u64) -> Self {
        let backend = Self::new();
        backend.state.lock().memory_budget = bytes;
        backend
    }

    /// Handle for observing and steering the simulated GPU after the backend
    /// has been moved into a context
    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn create_descriptor_heap(&mut self, kind: HeapKind, capacity: u32) -> GraphicsResult<(HeapId, HeapAddresses)> {
        let mut state = self.state.lock();
        let id = HeapId(state.heaps.len() as u32);
        state.heaps.push((kind, capacity));

        let cpu_base = (id.0 as u64 + 1) << 40;
        Ok((
            id,
            HeapAddresses {
                cpu_base,
                gpu_base: kind.is_shader_visible().then_some(cpu_base | (1 << 39)),
                increment: DESCRIPTOR_INCREMENT,
            },
        ))
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> GraphicsResult<ResourceHandle> {
        self.state.lock().allocate(&desc.name, ResourceKind::Buffer, desc.size)
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> GraphicsResult<ResourceHandle> {
        let (_, bytes) = copyable_footprints(desc.width, desc.height, desc.format, desc.levels);
        self.state.lock().allocate(&desc.name, ResourceKind::Texture, bytes)
    }

    fn destroy_resource(&mut self, resource: ResourceHandle) {
        self.state.lock().release(resource);
    }

    fn write_buffer(&mut self, buffer: ResourceHandle, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let res = state
            .resources
            .get_mut(&buffer)
            .ok_or_else(|| GraphicsError::invalid_state("buffer_write", format!("{:?} does not exist", buffer)))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > res.data.len() {
            return Err(GraphicsError::invalid_state("buffer_write", format!("write past end of '{}'", res.name)));
        }
        res.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: ResourceHandle, offset: u64, out: &mut [u8]) -> GraphicsResult<()> {
        let state = self.state.lock();
        let res = state
            .resources
            .get(&buffer)
            .ok_or_else(|| GraphicsError::invalid_state("buffer_read", format!("{:?} does not exist", buffer)))?;
        let start = offset as usize;
        let end = start + out.len();
        if end > res.data.len() {
            return Err(GraphicsError::invalid_state("buffer_read", format!("read past end of '{}'", res.name)));
        }
        out.copy_from_slice(&res.data[start..end]);
        Ok(())
    }

    fn create_view(&mut self, slot: DescriptorBinding, desc: &ViewDesc) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let resource = match desc {
            ViewDesc::Texture { resource, .. }
            | ViewDesc::ConstantBuffer { resource, .. }
            | ViewDesc::StorageBuffer { resource, .. }
            | ViewDesc::ShaderResourceBuffer { resource, .. } => *resource,
        };
        state.check_resource(resource, "create_view")?;
        state.slots.insert((slot.heap, slot.index), SlotContent::View(*desc));
        Ok(())
    }

    fn create_sampler(&mut self, slot: DescriptorBinding, desc: &SamplerDesc) -> GraphicsResult<()> {
        self.state
            .lock()
            .slots
            .insert((slot.heap, slot.index), SlotContent::Sampler(*desc));
        Ok(())
    }

    fn destroy_view(&mut self, slot: DescriptorBinding) {
        self.state.lock().slots.remove(&(slot.heap, slot.index));
    }

    fn create_signature(&mut self, desc: &SignatureDesc) -> GraphicsResult<SignatureHandle> {
        let mut state = self.state.lock();
        let handle = SignatureHandle(state.next_handle());
        state.signatures.insert(handle, desc.clone());
        Ok(handle)
    }

    fn destroy_signature(&mut self, signature: SignatureHandle) {
        self.state.lock().signatures.remove(&signature);
    }

    fn create_graphics_pipeline(
        &mut self,
        signature: SignatureHandle,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> GraphicsResult<PipelineHandle> {
        let bytecode = vec![desc.vertex.bytecode.clone(), desc.pixel.bytecode.clone()];
        self.state.lock().create_pipeline(signature, bytecode)
    }

    fn create_compute_pipeline(
        &mut self,
        signature: SignatureHandle,
        shader: &CompiledShader,
    ) -> GraphicsResult<PipelineHandle> {
        self.state.lock().create_pipeline(signature, vec![shader.bytecode.clone()])
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.state.lock().pipelines.remove(&pipeline);
    }

    fn execute(&mut self, _queue: QueueType, commands: &[Command]) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        for command in commands {
            state.run(command)?;
        }
        state.stats.submissions += 1;
        state.stats.commands += commands.len() as u64;
        state.last_submission = commands.to_vec();
        Ok(())
    }

    fn create_fence(&mut self) -> GraphicsResult<FenceHandle> {
        let mut state = self.state.lock();
        let handle = FenceHandle(state.next_handle());
        state.fences.insert(handle, 0);
        Ok(handle)
    }

    fn signal(&mut self, _queue: QueueType, fence: FenceHandle, value: u64) -> GraphicsResult<()> {
        self.state.lock().pending.push_back((fence, value));
        Ok(())
    }

    fn completed_value(&mut self, fence: FenceHandle) -> u64 {
        self.state.lock().fences.get(&fence).copied().unwrap_or(0)
    }

    fn wait(&mut self, fence: FenceHandle, value: u64, timeout: Duration) -> GraphicsResult<bool> {
        let mut state = self.state.lock();
        state.retire_until(fence, value);
        let reached = state.fences.get(&fence).copied().unwrap_or(0) >= value;
        if !reached {
            log::warn!("[HeadlessBackend::wait] Fence {:?} stuck below {} ({:?})", fence, value, timeout);
        }
        Ok(reached)
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> GraphicsResult<Vec<ResourceHandle>> {
        let mut state = self.state.lock();
        let buffers = state.create_backbuffers(desc)?;
        state.swapchain = Some(SimSwapchain {
            buffers: buffers.clone(),
            desc: *desc,
            current: 0,
        });
        Ok(buffers)
    }

    fn release_swapchain_buffers(&mut self) {
        let mut state = self.state.lock();
        let buffers = state
            .swapchain
            .as_mut()
            .map(|s| std::mem::take(&mut s.buffers))
            .unwrap_or_default();
        for buffer in buffers {
            state.release(buffer);
        }
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> GraphicsResult<Vec<ResourceHandle>> {
        let mut state = self.state.lock();
        let Some(mut desc) = state.swapchain.as_ref().map(|s| s.desc) else {
            return Err(GraphicsError::invalid_state("swapchain_resize", "no swapchain"));
        };
        desc.width = width;
        desc.height = height;
        let buffers = state.create_backbuffers(&desc)?;
        state.swapchain = Some(SimSwapchain {
            buffers: buffers.clone(),
            desc,
            current: 0,
        });
        Ok(buffers)
    }

    fn acquire_backbuffer(&mut self) -> GraphicsResult<usize> {
        self.state
            .lock()
            .swapchain
            .as_ref()
            .map(|s| s.current)
            .ok_or_else(|| GraphicsError::invalid_state("acquire_backbuffer", "no swapchain"))
    }

    fn present(&mut self, _vsync: bool) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let Some(swapchain) = state.swapchain.as_mut() else {
            return Err(GraphicsError::invalid_state("present", "no swapchain"));
        };
        swapchain.current = (swapchain.current + 1) % swapchain.desc.buffer_count;
        state.stats.presents += 1;
        Ok(())
    }
}

impl HeadlessState {
    fn create_pipeline(&mut self, signature: SignatureHandle, bytecode: Vec<Vec<u8>>) -> GraphicsResult<PipelineHandle> {
        if self.fail_pipelines {
            return Err(device_error("pipeline", "pipeline creation disabled on headless device"));
        }
        if !self.signatures.contains_key(&signature) {
            return Err(device_error("pipeline", format!("signature {:?} does not exist", signature)));
        }
        let handle = PipelineHandle(self.next_handle());
        self.pipelines.insert(handle, SimPipeline { signature, bytecode });
        Ok(handle)
    }
}

/// Shared view into a [`HeadlessBackend`]
#[derive(Clone)]
pub struct HeadlessProbe {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessProbe {
    /// Let the simulated GPU finish everything queued so far
    pub fn advance(&self) {
        self.state.lock().retire_all();
    }

    /// Number of fence signals the GPU has not reached yet
    pub fn pending_signals(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn completed_value(&self, fence: FenceHandle) -> u64 {
        self.state.lock().fences.get(&fence).copied().unwrap_or(0)
    }

    /// A stalled GPU never completes work; every wait times out
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }

    pub fn set_fail_pipelines(&self, fail: bool) {
        self.state.lock().fail_pipelines = fail;
    }

    pub fn set_memory_budget(&self, bytes: u64) {
        self.state.lock().memory_budget = bytes;
    }

    pub fn memory_used(&self) -> u64 {
        self.state.lock().memory_used
    }

    pub fn resource_count(&self) -> usize {
        self.state.lock().resources.len()
    }

    pub fn resource_exists(&self, resource: ResourceHandle) -> bool {
        self.state.lock().resources.contains_key(&resource)
    }

    pub fn resource_kind(&self, resource: ResourceHandle) -> Option<ResourceKind> {
        self.state.lock().resources.get(&resource).map(|r| r.kind)
    }

    pub fn resource_data(&self, resource: ResourceHandle) -> Option<Vec<u8>> {
        self.state.lock().resources.get(&resource).map(|r| r.data.clone())
    }

    /// Views and samplers currently written into descriptor slots
    pub fn view_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn view_at(&self, slot: DescriptorBinding) -> Option<ViewDesc> {
        match self.state.lock().slots.get(&(slot.heap, slot.index)) {
            Some(SlotContent::View(desc)) => Some(*desc),
            _ => None,
        }
    }

    pub fn pipeline_count(&self) -> usize {
        self.state.lock().pipelines.len()
    }

    pub fn pipeline_exists(&self, pipeline: PipelineHandle) -> bool {
        self.state.lock().pipelines.contains_key(&pipeline)
    }

    /// Bytecode each stage of `pipeline` was built from
    pub fn pipeline_bytecode(&self, pipeline: PipelineHandle) -> Option<Vec<Vec<u8>>> {
        self.state.lock().pipelines.get(&pipeline).map(|p| p.bytecode.clone())
    }

    pub fn pipeline_signature(&self, pipeline: PipelineHandle) -> Option<SignatureHandle> {
        self.state.lock().pipelines.get(&pipeline).map(|p| p.signature)
    }

    pub fn signature_count(&self) -> usize {
        self.state.lock().signatures.len()
    }

    pub fn stats(&self) -> HeadlessStats {
        self.state.lock().stats
    }

    pub fn last_submission(&self) -> Vec<Command> {
        self.state.lock().last_submission.clone()
    }
}
