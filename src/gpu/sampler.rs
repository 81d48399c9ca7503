//! Samplers allocated from the shader-visible sampler heap

use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::context::GraphicsContext;
use crate::gpu::descriptor::{Descriptor, DescriptorBinding, HeapKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Mirror,
    Clamp,
    Border,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Linear,
    Nearest,
    Anisotropic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub address: AddressMode,
    pub filter: Filter,
    /// Sample between mip levels
    pub mips: bool,
}

impl SamplerDesc {
    pub fn new(address: AddressMode, filter: Filter) -> Self {
        Self {
            address,
            filter,
            mips: false,
        }
    }

    pub fn with_mips(mut self) -> Self {
        self.mips = true;
        self
    }
}

#[derive(Debug)]
pub struct Sampler {
    desc: SamplerDesc,
    descriptor: Descriptor,
}

impl Sampler {
    pub fn new(ctx: &mut GraphicsContext, desc: SamplerDesc) -> GraphicsResult<Self> {
        let mut descriptor = ctx.heaps.alloc(HeapKind::Sampler)?;
        let Some(binding) = descriptor.binding() else {
            return Err(GraphicsError::invalid_state("sampler_init", "fresh descriptor is invalid"));
        };
        if let Err(e) = ctx.backend.create_sampler(binding, &desc) {
            ctx.heaps.free(&mut descriptor);
            return Err(e);
        }
        log::debug!("[Sampler::new] {:?} {:?} (mips: {})", desc.address, desc.filter, desc.mips);
        Ok(Self { desc, descriptor })
    }

    pub fn free(mut self, ctx: &mut GraphicsContext) {
        if let Some(binding) = self.descriptor.binding() {
            ctx.backend.destroy_view(binding);
        }
        ctx.heaps.free(&mut self.descriptor);
    }

    pub fn desc(&self) -> SamplerDesc {
        self.desc
    }

    pub fn binding(&self) -> Option<DescriptorBinding> {
        self.descriptor.binding()
    }
}
