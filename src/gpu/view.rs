//! Views: descriptors written into a heap slot that describe how a resource
//! is accessed.

use crate::backend::GpuBackend;
use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::descriptor::{Descriptor, DescriptorBinding, DescriptorHeaps, HeapKind};
use crate::gpu::resource::ResourceHandle;
use crate::gpu::texture::{Format, MipSelector, Texture};
use crate::gpu::view_cache::{ViewHandle, ViewKey};

/// Texture view types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    RenderTarget,
    Depth,
    ShaderResource,
    Storage,
}

impl ViewKind {
    pub fn heap_kind(self) -> HeapKind {
        match self {
            ViewKind::RenderTarget => HeapKind::RenderTarget,
            ViewKind::Depth => HeapKind::DepthStencil,
            ViewKind::ShaderResource | ViewKind::Storage => HeapKind::ShaderResource,
        }
    }
}

/// What the backend writes into a descriptor slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewDesc {
    Texture {
        resource: ResourceHandle,
        kind: ViewKind,
        format: Format,
        mip: MipSelector,
        levels: u32,
    },
    ConstantBuffer {
        resource: ResourceHandle,
        size: u64,
    },
    StorageBuffer {
        resource: ResourceHandle,
        size: u64,
        stride: u32,
    },
    ShaderResourceBuffer {
        resource: ResourceHandle,
        size: u64,
        stride: u32,
    },
}

/// A texture view and the descriptor slot it lives in
#[derive(Debug)]
pub struct TextureView {
    key: ViewKey,
    resource: ResourceHandle,
    descriptor: Descriptor,
    binding: DescriptorBinding,
    width: u32,
    height: u32,
    format: Format,
}

impl TextureView {
    pub(crate) fn create(
        backend: &mut dyn GpuBackend,
        heaps: &mut DescriptorHeaps,
        texture: &Texture,
        kind: ViewKind,
        mip: MipSelector,
    ) -> GraphicsResult<Self> {
        let usage = texture.usage();
        let allowed = match kind {
            ViewKind::RenderTarget => usage.render_target,
            ViewKind::Depth => usage.depth,
            ViewKind::Storage => usage.storage,
            ViewKind::ShaderResource => true,
        };
        if !allowed {
            return Err(GraphicsError::invalid_state(
                "texture_view_init",
                format!("'{}' was not created with {:?} usage", texture.name(), kind),
            ));
        }
        if let MipSelector::Level(level) = mip {
            if level >= texture.levels() {
                return Err(GraphicsError::invalid_state(
                    "texture_view_init",
                    format!("'{}' has no mip {}", texture.name(), level),
                ));
            }
        }

        let mut descriptor = heaps.alloc(kind.heap_kind())?;
        let binding = match descriptor.binding() {
            Some(binding) => binding,
            None => return Err(GraphicsError::invalid_state("texture_view_init", "fresh descriptor is invalid")),
        };

        let desc = ViewDesc::Texture {
            resource: texture.handle(),
            kind,
            format: texture.format(),
            mip,
            levels: texture.levels(),
        };
        if let Err(e) = backend.create_view(binding, &desc) {
            heaps.free(&mut descriptor);
            return Err(e);
        }

        let (width, height) = match mip {
            MipSelector::All => (texture.width(), texture.height()),
            MipSelector::Level(level) => texture.size(level),
        };

        Ok(Self {
            key: ViewKey {
                texture: texture.uuid(),
                kind,
                mip,
            },
            resource: texture.handle(),
            descriptor,
            binding,
            width,
            height,
            format: texture.format(),
        })
    }

    pub(crate) fn destroy(mut self, backend: &mut dyn GpuBackend, heaps: &mut DescriptorHeaps) {
        backend.destroy_view(self.binding);
        heaps.free(&mut self.descriptor);
    }

    pub fn key(&self) -> ViewKey {
        self.key
    }

    pub fn binding(&self) -> DescriptorBinding {
        self.binding
    }

    pub fn resource(&self) -> ResourceHandle {
        self.resource
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Counted reference handed out by the view cache
    pub(crate) fn handle(&self) -> ViewHandle {
        ViewHandle {
            key: self.key,
            binding: self.binding,
            resource: self.resource,
            width: self.width,
            height: self.height,
            format: self.format,
        }
    }
}
