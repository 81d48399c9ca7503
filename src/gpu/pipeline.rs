//! Root signatures and graphics / compute pipelines

use crate::error::GraphicsResult;
use crate::gpu::context::GraphicsContext;
use crate::gpu::texture::Format;
use crate::hot_reload::CompiledShader;

/// One slot of a root signature. Binding slot `i` refers to `entries[i]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureEntry {
    PushConstants,
    Cbv,
    Srv,
    Uav,
    Sampler,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignatureDesc {
    pub entries: Vec<SignatureEntry>,
    /// Size in bytes of the push constant block
    pub push_constant_size: u32,
    /// Shaders index the shader-visible heaps directly
    pub bindless: bool,
}

impl SignatureDesc {
    pub fn new(entries: Vec<SignatureEntry>, push_constant_size: u32) -> Self {
        Self {
            entries,
            push_constant_size,
            bindless: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthOp {
    Less,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    TriangleList,
    LineList,
    PointList,
}

/// Fixed-function state of a graphics pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDesc {
    /// Render target formats, in binding order
    pub formats: Vec<Format>,
    pub depth: bool,
    pub depth_format: Format,
    pub op: DepthOp,
    pub wireframe: bool,
    /// Line topology instead of triangles
    pub line: bool,
}

impl Default for PipelineDesc {
    fn default() -> Self {
        Self {
            formats: vec![Format::Rgba8Unorm],
            depth: false,
            depth_format: Format::Depth32Float,
            op: DepthOp::Less,
            wireframe: false,
            line: false,
        }
    }
}

/// Everything the backend needs to build a graphics pipeline
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineDesc<'a> {
    pub vertex: &'a CompiledShader,
    pub pixel: &'a CompiledShader,
    pub state: &'a PipelineDesc,
}

#[derive(Debug)]
pub struct Signature {
    handle: SignatureHandle,
    desc: SignatureDesc,
}

impl Signature {
    pub fn new(ctx: &mut GraphicsContext, desc: SignatureDesc) -> GraphicsResult<Self> {
        let handle = ctx.backend.create_signature(&desc)?;
        log::debug!(
            "[Signature::new] {} entries, {} push constant bytes",
            desc.entries.len(),
            desc.push_constant_size
        );
        Ok(Self { handle, desc })
    }

    pub fn free(self, ctx: &mut GraphicsContext) {
        ctx.backend.destroy_signature(self.handle);
    }

    pub fn handle(&self) -> SignatureHandle {
        self.handle
    }

    pub fn desc(&self) -> &SignatureDesc {
        &self.desc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Pipeline {
    handle: PipelineHandle,
    signature: SignatureHandle,
    kind: PipelineKind,
}

impl Pipeline {
    pub fn graphics(
        ctx: &mut GraphicsContext,
        signature: &Signature,
        vertex: &CompiledShader,
        pixel: &CompiledShader,
        state: &PipelineDesc,
    ) -> GraphicsResult<Self> {
        let desc = GraphicsPipelineDesc { vertex, pixel, state };
        let handle = ctx.backend.create_graphics_pipeline(signature.handle(), &desc)?;
        Ok(Self {
            handle,
            signature: signature.handle(),
            kind: PipelineKind::Graphics,
        })
    }

    pub fn compute(
        ctx: &mut GraphicsContext,
        signature: &Signature,
        shader: &CompiledShader,
    ) -> GraphicsResult<Self> {
        let handle = ctx.backend.create_compute_pipeline(signature.handle(), shader)?;
        Ok(Self {
            handle,
            signature: signature.handle(),
            kind: PipelineKind::Compute,
        })
    }

    pub fn free(self, ctx: &mut GraphicsContext) {
        ctx.backend.destroy_pipeline(self.handle);
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }

    pub fn signature(&self) -> SignatureHandle {
        self.signature
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }
}
