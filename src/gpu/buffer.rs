//! GPU buffers and their constant / storage / shader-resource views

use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::constants::{align_up, CONSTANT_BUFFER_ALIGNMENT};
use crate::gpu::context::GraphicsContext;
use crate::gpu::descriptor::{Descriptor, DescriptorBinding, HeapKind};
use crate::gpu::resource::{ResourceHandle, ResourceKind, ResourceState};
use crate::gpu::view::ViewDesc;
use crate::utils::next_uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    Vertex,
    Index,
    Constant,
    Storage,
    /// Staging memory for uploads
    Copy,
    AccelerationStructure,
}

impl BufferType {
    pub fn initial_state(self) -> ResourceState {
        match self {
            BufferType::Constant => ResourceState::GenericRead,
            BufferType::AccelerationStructure => ResourceState::AccelerationStructure,
            _ => ResourceState::Common,
        }
    }

    /// Constant and copy buffers live in CPU-writable memory
    pub fn is_host_visible(self) -> bool {
        matches!(self, BufferType::Constant | BufferType::Copy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub stride: u32,
    pub ty: BufferType,
    /// Allocate in readback memory so the CPU can read results
    pub readback: bool,
    pub name: String,
}

impl BufferDesc {
    pub fn new(size: u64, stride: u32, ty: BufferType) -> Self {
        Self {
            size,
            stride,
            ty,
            readback: false,
            name: "Buffer".to_string(),
        }
    }

    pub fn with_readback(mut self) -> Self {
        self.readback = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Debug)]
pub struct Buffer {
    handle: ResourceHandle,
    uuid: u64,
    name: String,
    size: u64,
    stride: u32,
    ty: BufferType,
    readback: bool,
    pub(crate) state: ResourceState,
    cbv: Descriptor,
    srv: Descriptor,
    uav: Descriptor,
}

impl Buffer {
    pub fn new(ctx: &mut GraphicsContext, desc: BufferDesc) -> GraphicsResult<Self> {
        if desc.size == 0 {
            return Err(GraphicsError::invalid_state(
                "buffer_init",
                format!("'{}' has zero size", desc.name),
            ));
        }

        let handle = ctx.backend.create_buffer(&desc)?;
        let uuid = next_uuid();
        ctx.tracker.track(uuid, &desc.name, ResourceKind::Buffer, desc.size);
        log::debug!("[Buffer::new] '{}' {:?} {} bytes", desc.name, desc.ty, desc.size);

        Ok(Self {
            handle,
            uuid,
            state: desc.ty.initial_state(),
            name: desc.name,
            size: desc.size,
            stride: desc.stride,
            ty: desc.ty,
            readback: desc.readback,
            cbv: Descriptor::invalid(),
            srv: Descriptor::invalid(),
            uav: Descriptor::invalid(),
        })
    }

    /// Write the constant buffer view, allocating its descriptor on first use
    pub fn build_constant(&mut self, ctx: &mut GraphicsContext) -> GraphicsResult<()> {
        let desc = ViewDesc::ConstantBuffer {
            resource: self.handle,
            size: align_up(self.size, CONSTANT_BUFFER_ALIGNMENT),
        };
        Self::write_view(ctx, &mut self.cbv, &desc)
    }

    /// Write the unordered access view, allocating its descriptor on first use
    pub fn build_storage(&mut self, ctx: &mut GraphicsContext) -> GraphicsResult<()> {
        let desc = ViewDesc::StorageBuffer {
            resource: self.handle,
            size: self.size,
            stride: self.stride,
        };
        Self::write_view(ctx, &mut self.uav, &desc)
    }

    /// Write the structured shader resource view, allocating its descriptor on first use
    pub fn build_shader_resource(&mut self, ctx: &mut GraphicsContext) -> GraphicsResult<()> {
        let desc = ViewDesc::ShaderResourceBuffer {
            resource: self.handle,
            size: self.size,
            stride: self.stride,
        };
        Self::write_view(ctx, &mut self.srv, &desc)
    }

    fn write_view(
        ctx: &mut GraphicsContext,
        descriptor: &mut Descriptor,
        desc: &ViewDesc,
    ) -> GraphicsResult<()> {
        if !descriptor.is_valid() {
            *descriptor = ctx.heaps.alloc(HeapKind::ShaderResource)?;
        }
        match descriptor.binding() {
            Some(binding) => ctx.backend.create_view(binding, desc),
            None => Err(GraphicsError::invalid_state("buffer_build_view", "descriptor is invalid")),
        }
    }

    /// Copy `data` into the buffer at `offset`
    pub fn write(&self, ctx: &mut GraphicsContext, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        if !self.ty.is_host_visible() {
            return Err(GraphicsError::invalid_state(
                "buffer_write",
                format!("'{}' ({:?}) is not CPU writable, stage it through a copy buffer", self.name, self.ty),
            ));
        }
        self.check_range("buffer_write", offset, data.len())?;
        ctx.backend.write_buffer(self.handle, offset, data)
    }

    /// Read back `out.len()` bytes starting at `offset`
    pub fn read(&self, ctx: &mut GraphicsContext, offset: u64, out: &mut [u8]) -> GraphicsResult<()> {
        if !self.readback && !self.ty.is_host_visible() {
            return Err(GraphicsError::invalid_state(
                "buffer_read",
                format!("'{}' was not created for readback", self.name),
            ));
        }
        self.check_range("buffer_read", offset, out.len())?;
        ctx.backend.read_buffer(self.handle, offset, out)
    }

    fn check_range(&self, operation: &str, offset: u64, len: usize) -> GraphicsResult<()> {
        if offset.saturating_add(len as u64) > self.size {
            return Err(GraphicsError::invalid_state(
                operation,
                format!("range {}+{} exceeds '{}' ({} bytes)", offset, len, self.name, self.size),
            ));
        }
        Ok(())
    }

    /// Release all views, then the allocation
    pub fn free(mut self, ctx: &mut GraphicsContext) {
        for descriptor in [&mut self.cbv, &mut self.srv, &mut self.uav] {
            if let Some(binding) = descriptor.binding() {
                ctx.backend.destroy_view(binding);
            }
            ctx.heaps.free(descriptor);
        }
        ctx.backend.destroy_resource(self.handle);
        ctx.tracker.untrack(self.uuid);
    }

    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn uuid(&self) -> u64 {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn ty(&self) -> BufferType {
        self.ty
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn cbv(&self) -> Option<DescriptorBinding> {
        self.cbv.binding()
    }

    pub fn srv(&self) -> Option<DescriptorBinding> {
        self.srv.binding()
    }

    pub fn uav(&self) -> Option<DescriptorBinding> {
        self.uav.binding()
    }
}
