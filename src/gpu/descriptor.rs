//! Descriptor heaps
//!
//! A heap is a fixed array of descriptor slots tracked by a bitset
//! (`false` = free). Allocation is first-fit, never grows, and reports
//! exhaustion as an error. Heaps are single-writer: the render thread owns
//! them through the graphics context.

use std::fmt;

use bit_vec::BitVec;

use crate::error::{GraphicsError, GraphicsResult};

/// The four heap types of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    RenderTarget,
    DepthStencil,
    /// CBV / SRV / UAV
    ShaderResource,
    Sampler,
}

impl HeapKind {
    /// Shader-visible heaps also expose GPU addresses
    pub fn is_shader_visible(self) -> bool {
        matches!(self, HeapKind::ShaderResource | HeapKind::Sampler)
    }

    pub fn label(self) -> &'static str {
        match self {
            HeapKind::RenderTarget => "render target",
            HeapKind::DepthStencil => "depth stencil",
            HeapKind::ShaderResource => "shader resource",
            HeapKind::Sampler => "sampler",
        }
    }
}

impl fmt::Display for HeapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Backend identity of a heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(pub u32);

/// Address layout of a heap as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapAddresses {
    pub cpu_base: u64,
    /// Present only for shader-visible heaps
    pub gpu_base: Option<u64>,
    pub increment: u64,
}

/// Copyable reference to an allocated slot, used when recording commands
/// and when writing views into the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    pub heap: HeapId,
    pub kind: HeapKind,
    pub index: u32,
    pub cpu: u64,
    pub gpu: Option<u64>,
}

/// Owning handle to one descriptor slot.
///
/// Not `Clone`: a valid descriptor occupies its slot until it is passed back
/// to [`DescriptorHeap::free`], which invalidates it.
#[derive(Debug, PartialEq, Eq)]
pub struct Descriptor {
    valid: bool,
    heap: HeapId,
    kind: HeapKind,
    index: u32,
    cpu: u64,
    gpu: Option<u64>,
}

impl Descriptor {
    /// A handle that refers to no slot
    pub fn invalid() -> Self {
        Self {
            valid: false,
            heap: HeapId(u32::MAX),
            kind: HeapKind::ShaderResource,
            index: 0,
            cpu: 0,
            gpu: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn heap(&self) -> HeapId {
        self.heap
    }

    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    pub fn cpu_address(&self) -> u64 {
        self.cpu
    }

    pub fn gpu_address(&self) -> Option<u64> {
        self.gpu
    }

    /// `None` for invalid handles
    pub fn binding(&self) -> Option<DescriptorBinding> {
        self.valid.then_some(DescriptorBinding {
            heap: self.heap,
            kind: self.kind,
            index: self.index,
            cpu: self.cpu,
            gpu: self.gpu,
        })
    }
}

impl Default for Descriptor {
    fn default() -> Self {
        Self::invalid()
    }
}

/// Fixed-capacity, bitset-backed descriptor allocator
pub struct DescriptorHeap {
    id: HeapId,
    kind: HeapKind,
    slots: BitVec,
    addresses: HeapAddresses,
    live: u32,
    /// Lowest index that may be free; every slot below it is occupied
    search_start: usize,
}

impl DescriptorHeap {
    pub fn new(id: HeapId, kind: HeapKind, capacity: u32, addresses: HeapAddresses) -> Self {
        log::info!(
            "[DescriptorHeap::new] Created {} heap {:?} with {} slots",
            kind,
            id,
            capacity
        );
        Self {
            id,
            kind,
            slots: BitVec::from_elem(capacity as usize, false),
            addresses,
            live: 0,
            search_start: 0,
        }
    }

    /// Allocate the first free slot
    pub fn alloc(&mut self) -> GraphicsResult<Descriptor> {
        let found = (self.search_start..self.slots.len())
            .find(|&i| !self.slots.get(i).unwrap_or(true));

        let Some(index) = found else {
            self.search_start = self.slots.len();
            log::error!(
                "[DescriptorHeap::alloc] {} heap exhausted ({} slots)",
                self.kind,
                self.capacity()
            );
            return Err(GraphicsError::DescriptorHeapExhausted {
                kind: self.kind,
                capacity: self.capacity(),
            });
        };

        self.slots.set(index, true);
        self.search_start = index + 1;
        self.live += 1;

        let offset = index as u64 * self.addresses.increment;
        Ok(Descriptor {
            valid: true,
            heap: self.id,
            kind: self.kind,
            index: index as u32,
            cpu: self.addresses.cpu_base + offset,
            gpu: self.addresses.gpu_base.map(|base| base + offset),
        })
    }

    /// Release the slot held by `descriptor` and invalidate it.
    /// Freeing an invalid handle is a no-op.
    pub fn free(&mut self, descriptor: &mut Descriptor) {
        if !descriptor.valid {
            return;
        }
        if descriptor.heap != self.id {
            log::warn!(
                "[DescriptorHeap::free] Descriptor of heap {:?} passed to heap {:?}, ignoring",
                descriptor.heap,
                self.id
            );
            return;
        }

        let index = descriptor.index as usize;
        if self.slots.get(index) == Some(true) {
            self.slots.set(index, false);
            self.live -= 1;
            self.search_start = self.search_start.min(index);
        }
        descriptor.valid = false;
    }

    pub fn id(&self) -> HeapId {
        self.id
    }

    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Number of occupied slots
    pub fn live_count(&self) -> u32 {
        self.live
    }

    pub fn is_occupied(&self, index: u32) -> bool {
        self.slots.get(index as usize).unwrap_or(false)
    }

    pub fn addresses(&self) -> HeapAddresses {
        self.addresses
    }
}

/// The four heaps of a device, routed by kind
pub struct DescriptorHeaps {
    pub render_targets: DescriptorHeap,
    pub depth_targets: DescriptorHeap,
    pub shader_resources: DescriptorHeap,
    pub samplers: DescriptorHeap,
}

impl DescriptorHeaps {
    pub fn heap(&self, kind: HeapKind) -> &DescriptorHeap {
        match kind {
            HeapKind::RenderTarget => &self.render_targets,
            HeapKind::DepthStencil => &self.depth_targets,
            HeapKind::ShaderResource => &self.shader_resources,
            HeapKind::Sampler => &self.samplers,
        }
    }

    pub fn heap_mut(&mut self, kind: HeapKind) -> &mut DescriptorHeap {
        match kind {
            HeapKind::RenderTarget => &mut self.render_targets,
            HeapKind::DepthStencil => &mut self.depth_targets,
            HeapKind::ShaderResource => &mut self.shader_resources,
            HeapKind::Sampler => &mut self.samplers,
        }
    }

    pub fn alloc(&mut self, kind: HeapKind) -> GraphicsResult<Descriptor> {
        self.heap_mut(kind).alloc()
    }

    /// Free into whichever heap the descriptor came from
    pub fn free(&mut self, descriptor: &mut Descriptor) {
        if descriptor.is_valid() {
            self.heap_mut(descriptor.kind()).free(descriptor);
        }
    }
}
