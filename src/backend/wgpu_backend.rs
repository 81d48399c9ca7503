//! wgpu backend
//!
//! Maps the explicit-API surface onto wgpu:
//! - descriptor slots hold view descriptions that are resolved to wgpu views
//!   when commands execute
//! - signature slot `i` is `@group(0) @binding(i)`; pipelines use wgpu's
//!   automatic layout and the bindings a shader declares are found by
//!   reflecting its WGSL with naga
//! - push constants are uploaded into a small uniform buffer per draw
//! - barriers are recorded for tracking only, wgpu inserts its own
//! - fences complete through `Queue::on_submitted_work_done`

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::backend::GpuBackend;
use crate::config::GpuConfig;
use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::buffer::{BufferDesc, BufferType};
use crate::gpu::command::{BindPoint, Command, QueueType, ScissorRect, Viewport};
use crate::gpu::constants::{align_up, FRAMES_IN_FLIGHT};
use crate::gpu::descriptor::{DescriptorBinding, HeapAddresses, HeapId, HeapKind};
use crate::gpu::error::{device_error, out_of_memory_error, GpuErrorContext};
use crate::gpu::fence::FenceHandle;
use crate::gpu::pipeline::{
    DepthOp, GraphicsPipelineDesc, PipelineHandle, SignatureDesc, SignatureHandle, Topology,
};
use crate::gpu::resource::ResourceHandle;
use crate::gpu::sampler::{AddressMode, Filter, SamplerDesc};
use crate::gpu::swapchain::SwapchainDesc;
use crate::gpu::texture::{Format, MipSelector, SubresourceFootprint, TextureDesc};
use crate::gpu::view::{ViewDesc, ViewKind};
use crate::hot_reload::{shader_compile_error, CompiledShader, ShaderStage};

const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;
const PUSH_CONSTANT_ALIGNMENT: u64 = 16;

fn texture_format(format: Format) -> wgpu::TextureFormat {
    match format {
        Format::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        Format::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        Format::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        Format::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        Format::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        Format::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        Format::R32Uint => wgpu::TextureFormat::R32Uint,
        Format::R32Float => wgpu::TextureFormat::R32Float,
        Format::Depth32Float => wgpu::TextureFormat::Depth32Float,
        Format::Bc7Unorm => wgpu::TextureFormat::Bc7RgbaUnorm,
    }
}

fn supports_storage(format: Format) -> bool {
    matches!(
        format,
        Format::Rgba8Unorm | Format::Rgba16Float | Format::Rgba32Float | Format::R32Uint | Format::R32Float
    )
}

fn buffer_usage(desc: &BufferDesc) -> wgpu::BufferUsages {
    use wgpu::BufferUsages as U;
    if desc.readback {
        return U::MAP_READ | U::COPY_DST;
    }
    match desc.ty {
        BufferType::Vertex => U::VERTEX | U::STORAGE | U::COPY_DST | U::COPY_SRC,
        BufferType::Index => U::INDEX | U::STORAGE | U::COPY_DST | U::COPY_SRC,
        BufferType::Constant => U::UNIFORM | U::COPY_DST,
        BufferType::Storage | BufferType::AccelerationStructure => U::STORAGE | U::COPY_DST | U::COPY_SRC,
        BufferType::Copy => U::COPY_SRC | U::COPY_DST,
    }
}

fn address_mode(mode: AddressMode, border: bool) -> wgpu::AddressMode {
    match mode {
        AddressMode::Wrap => wgpu::AddressMode::Repeat,
        AddressMode::Mirror => wgpu::AddressMode::MirrorRepeat,
        AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
        AddressMode::Border if border => wgpu::AddressMode::ClampToBorder,
        AddressMode::Border => wgpu::AddressMode::ClampToEdge,
    }
}

/// Shader interface found by reflection
#[derive(Debug, Default)]
struct Reflection {
    /// `@group(0)` bindings the shader declares
    bindings: BTreeSet<u32>,
    /// Vertex inputs by location, tightly packed into buffer slot 0
    attributes: Vec<wgpu::VertexAttribute>,
    stride: u64,
}

fn vertex_format(inner: &naga::TypeInner) -> Option<wgpu::VertexFormat> {
    use naga::ScalarKind as K;
    use wgpu::VertexFormat as V;

    let (scalar, size) = match inner {
        naga::TypeInner::Scalar(scalar) => (*scalar, 1),
        naga::TypeInner::Vector { size, scalar } => (*scalar, *size as u8),
        _ => return None,
    };
    if scalar.width != 4 {
        return None;
    }
    Some(match (scalar.kind, size) {
        (K::Float, 1) => V::Float32,
        (K::Float, 2) => V::Float32x2,
        (K::Float, 3) => V::Float32x3,
        (K::Float, 4) => V::Float32x4,
        (K::Sint, 1) => V::Sint32,
        (K::Sint, 2) => V::Sint32x2,
        (K::Sint, 3) => V::Sint32x3,
        (K::Sint, 4) => V::Sint32x4,
        (K::Uint, 1) => V::Uint32,
        (K::Uint, 2) => V::Uint32x2,
        (K::Uint, 3) => V::Uint32x3,
        (K::Uint, 4) => V::Uint32x4,
        _ => return None,
    })
}

fn collect_inputs(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&naga::Binding>,
    out: &mut Vec<(u32, wgpu::VertexFormat)>,
) {
    match (binding, &module.types[ty].inner) {
        (Some(naga::Binding::Location { location, .. }), inner) => {
            if let Some(format) = vertex_format(inner) {
                out.push((*location, format));
            }
        }
        (None, naga::TypeInner::Struct { members, .. }) => {
            for member in members {
                collect_inputs(module, member.ty, member.binding.as_ref(), out);
            }
        }
        _ => {}
    }
}

fn reflect(shader: &CompiledShader) -> GraphicsResult<Reflection> {
    let source = shader.source()?;
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| shader_compile_error(&format!("{:?} shader", shader.stage), e.emit_to_string(source)))?;

    let Some(ep) = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == shader.stage.naga_stage() && ep.name == shader.entry_point)
    else {
        return Err(shader_compile_error(
            &format!("{:?} shader", shader.stage),
            format!("no entry point '{}'", shader.entry_point),
        ));
    };

    // Automatic layouts only contain globals the entry point can reach
    let used: BTreeSet<naga::Handle<naga::GlobalVariable>> = ep
        .function
        .expressions
        .iter()
        .chain(module.functions.iter().flat_map(|(_, f)| f.expressions.iter()))
        .filter_map(|(_, expr)| match expr {
            naga::Expression::GlobalVariable(handle) => Some(*handle),
            _ => None,
        })
        .collect();

    let mut reflection = Reflection::default();
    for (handle, var) in module.global_variables.iter() {
        match &var.binding {
            Some(rb) if rb.group == 0 && used.contains(&handle) => {
                reflection.bindings.insert(rb.binding);
            }
            Some(rb) if rb.group != 0 => log::warn!(
                "[WgpuBackend::reflect] Binding {} in group {} is outside the signature",
                rb.binding,
                rb.group
            ),
            _ => {}
        }
    }

    if shader.stage == ShaderStage::Vertex {
        let mut inputs = Vec::new();
        for arg in &ep.function.arguments {
            collect_inputs(&module, arg.ty, arg.binding.as_ref(), &mut inputs);
        }
        inputs.sort_by_key(|(location, _)| *location);
        for (location, format) in inputs {
            reflection.attributes.push(wgpu::VertexAttribute {
                format,
                offset: reflection.stride,
                shader_location: location,
            });
            reflection.stride += format.size();
        }
    }

    Ok(reflection)
}

enum WgpuResource {
    Buffer {
        buffer: wgpu::Buffer,
        /// CPU copy of host-visible buffers, which wgpu cannot map for reading
        shadow: Option<Vec<u8>>,
    },
    Texture(wgpu::Texture),
    /// Resolved to the acquired surface texture
    Backbuffer,
}

enum Slot {
    View(ViewDesc),
    Sampler(wgpu::Sampler),
}

enum PipelineObject {
    Render(wgpu::RenderPipeline),
    Compute(wgpu::ComputePipeline),
}

struct WgpuPipeline {
    object: PipelineObject,
    bindings: BTreeSet<u32>,
    /// Zero when the vertex shader pulls its own data
    vertex_stride: u64,
}

#[derive(Debug, Clone)]
enum Bound {
    Descriptor(DescriptorBinding),
    Constants(Vec<u8>),
}

/// Resource resolved for one bind group entry
enum Resolved<'a> {
    View(wgpu::TextureView),
    Buffer(&'a wgpu::Buffer),
    Constants(wgpu::Buffer),
    Sampler(&'a wgpu::Sampler),
}

#[derive(Default)]
struct DrawState {
    colors: Vec<DescriptorBinding>,
    depth: Option<DescriptorBinding>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    vertex: Option<ResourceHandle>,
    index: Option<ResourceHandle>,
    graphics: Option<PipelineHandle>,
    compute: Option<PipelineHandle>,
    graphics_bindings: FxHashMap<u32, Bound>,
    compute_bindings: FxHashMap<u32, Bound>,
}

impl DrawState {
    fn bindings_mut(&mut self, bind_point: BindPoint) -> &mut FxHashMap<u32, Bound> {
        match bind_point {
            BindPoint::Graphics => &mut self.graphics_bindings,
            BindPoint::Compute => &mut self.compute_bindings,
        }
    }
}

enum DrawCall {
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
    },
    Indexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
    },
}

pub struct WgpuBackend {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Option<wgpu::Surface<'static>>,
    surface_config: Option<wgpu::SurfaceConfiguration>,
    frame: Option<wgpu::SurfaceTexture>,
    frame_index: usize,
    backbuffers: Vec<ResourceHandle>,
    vsync: bool,
    next_handle: u64,
    heap_count: u32,
    resources: FxHashMap<ResourceHandle, WgpuResource>,
    slots: FxHashMap<(HeapId, u32), Slot>,
    signatures: FxHashMap<SignatureHandle, SignatureDesc>,
    pipelines: FxHashMap<PipelineHandle, WgpuPipeline>,
    fences: FxHashMap<FenceHandle, Arc<AtomicU64>>,
}

impl WgpuBackend {
    /// Create the device, optionally presenting to `window`
    pub fn new(config: &GpuConfig, window: Option<Arc<Window>>) -> GraphicsResult<Self> {
        pollster::block_on(Self::new_async(config, window))
    }

    async fn new_async(config: &GpuConfig, window: Option<Arc<Window>>) -> GraphicsResult<Self> {
        let start = Instant::now();
        let flags = if config.validation {
            wgpu::InstanceFlags::VALIDATION | wgpu::InstanceFlags::DEBUG
        } else {
            wgpu::InstanceFlags::empty()
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags,
            ..Default::default()
        });

        let surface = match window {
            Some(window) => Some(instance.create_surface(window).gpu_context("surface")?),
            None => None,
        };

        let mut options = wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface.as_ref(),
            force_fallback_adapter: false,
        };
        let adapter = match instance.request_adapter(&options).await {
            Some(adapter) => adapter,
            None => {
                log::warn!("[WgpuBackend::new] No high-performance adapter found, trying fallback...");
                options.power_preference = wgpu::PowerPreference::LowPower;
                options.force_fallback_adapter = true;
                instance
                    .request_adapter(&options)
                    .await
                    .ok_or_else(|| device_error("adapter", "no suitable GPU adapter found"))?
            }
        };
        let info = adapter.get_info();
        log::info!("[WgpuBackend::new] Adapter: {} ({:?}, {:?})", info.name, info.device_type, info.backend);

        let wanted = wgpu::Features::TEXTURE_COMPRESSION_BC
            | wgpu::Features::POLYGON_MODE_LINE
            | wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER;
        let features = adapter.features() & wanted;
        let hardware_limits = adapter.limits();

        let mut result = Self::request_device(
            &adapter,
            features,
            wgpu::Limits::default().using_resolution(hardware_limits.clone()),
        )
        .await;
        if let Err(e) = &result {
            log::warn!("[WgpuBackend::new] Default limits rejected ({}), using downlevel limits", e);
            result = Self::request_device(
                &adapter,
                features,
                wgpu::Limits::downlevel_defaults().using_resolution(hardware_limits),
            )
            .await;
        }
        let (device, queue) = result.gpu_context("device")?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("[GPU] Uncaptured device error: {}", error);
        }));

        log::info!(
            "[WgpuBackend::new] Device ready in {:?} (features: {:?})",
            start.elapsed(),
            features
        );

        Ok(Self {
            adapter,
            device,
            queue,
            surface,
            surface_config: None,
            frame: None,
            frame_index: 0,
            backbuffers: Vec::new(),
            vsync: config.vsync,
            next_handle: 0,
            heap_count: 0,
            resources: FxHashMap::default(),
            slots: FxHashMap::default(),
            signatures: FxHashMap::default(),
            pipelines: FxHashMap::default(),
            fences: FxHashMap::default(),
        })
    }

    async fn request_device(
        adapter: &wgpu::Adapter,
        features: wgpu::Features,
        limits: wgpu::Limits,
    ) -> Result<(wgpu::Device, wgpu::Queue), wgpu::RequestDeviceError> {
        adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Earth GPU Device"),
                    required_features: features,
                    required_limits: limits,
                },
                None,
            )
            .await
    }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Run `create` inside a validation error scope
    fn scoped<T>(&self, object: &str, create: impl FnOnce(&wgpu::Device) -> T) -> GraphicsResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(error) = memory {
            log::error!("[WgpuBackend] {}: {}", object, error);
            return Err(out_of_memory_error(object, 0));
        }
        match validation {
            Some(error) => Err(device_error(object, error)),
            None => Ok(value),
        }
    }

    fn buffer(&self, handle: ResourceHandle) -> GraphicsResult<&wgpu::Buffer> {
        match self.resources.get(&handle) {
            Some(WgpuResource::Buffer { buffer, .. }) => Ok(buffer),
            _ => Err(GraphicsError::invalid_state("buffer", format!("{:?} is not a buffer", handle))),
        }
    }

    fn texture(&self, handle: ResourceHandle) -> GraphicsResult<&wgpu::Texture> {
        match self.resources.get(&handle) {
            Some(WgpuResource::Texture(texture)) => Ok(texture),
            Some(WgpuResource::Backbuffer) => self
                .frame
                .as_ref()
                .map(|frame| &frame.texture)
                .ok_or_else(|| GraphicsError::invalid_state("backbuffer", "no backbuffer acquired")),
            _ => Err(GraphicsError::invalid_state("texture", format!("{:?} is not a texture", handle))),
        }
    }

    fn texture_view(&self, desc: &ViewDesc) -> GraphicsResult<wgpu::TextureView> {
        let ViewDesc::Texture { resource, kind, mip, .. } = desc else {
            return Err(GraphicsError::invalid_state("texture_view", "slot holds a buffer view"));
        };
        let texture = self.texture(*resource)?;
        let (base_mip_level, mip_level_count) = match (mip, kind) {
            (MipSelector::Level(level), _) => (*level, Some(1)),
            (MipSelector::All, ViewKind::ShaderResource) => (0, None),
            // Attachments and storage views address a single mip
            (MipSelector::All, _) => (0, Some(1)),
        };
        Ok(texture.create_view(&wgpu::TextureViewDescriptor {
            base_mip_level,
            mip_level_count,
            ..Default::default()
        }))
    }

    fn target_view(&self, binding: DescriptorBinding) -> GraphicsResult<wgpu::TextureView> {
        match self.slots.get(&(binding.heap, binding.index)) {
            Some(Slot::View(desc)) => self.texture_view(desc),
            _ => Err(GraphicsError::invalid_state(
                "render_target",
                format!("descriptor {} holds no texture view", binding.index),
            )),
        }
    }

    fn resolve(&self, binding: u32, bound: Option<&Bound>) -> GraphicsResult<Resolved<'_>> {
        let descriptor = match bound {
            Some(Bound::Descriptor(descriptor)) => descriptor,
            Some(Bound::Constants(data)) => {
                let mut contents = data.clone();
                contents.resize(align_up(data.len() as u64, PUSH_CONSTANT_ALIGNMENT) as usize, 0);
                let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Push Constants"),
                    contents: &contents,
                    usage: wgpu::BufferUsages::UNIFORM,
                });
                return Ok(Resolved::Constants(buffer));
            }
            None => {
                return Err(GraphicsError::invalid_state(
                    "bind",
                    format!("shader binding {} has nothing bound", binding),
                ))
            }
        };

        match self.slots.get(&(descriptor.heap, descriptor.index)) {
            Some(Slot::Sampler(sampler)) => Ok(Resolved::Sampler(sampler)),
            Some(Slot::View(desc @ ViewDesc::Texture { .. })) => Ok(Resolved::View(self.texture_view(desc)?)),
            Some(Slot::View(
                ViewDesc::ConstantBuffer { resource, .. }
                | ViewDesc::StorageBuffer { resource, .. }
                | ViewDesc::ShaderResourceBuffer { resource, .. },
            )) => Ok(Resolved::Buffer(self.buffer(*resource)?)),
            None => Err(GraphicsError::invalid_state(
                "bind",
                format!("descriptor {} in heap {:?} is empty", descriptor.index, descriptor.heap),
            )),
        }
    }

    fn bind_group(
        &self,
        pipeline: &WgpuPipeline,
        bindings: &FxHashMap<u32, Bound>,
    ) -> GraphicsResult<Option<wgpu::BindGroup>> {
        if pipeline.bindings.is_empty() {
            return Ok(None);
        }

        let resolved = pipeline
            .bindings
            .iter()
            .map(|&binding| -> GraphicsResult<_> { Ok((binding, self.resolve(binding, bindings.get(&binding))?)) })
            .collect::<GraphicsResult<Vec<_>>>()?;
        let entries: Vec<wgpu::BindGroupEntry> = resolved
            .iter()
            .map(|(binding, resource)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: match resource {
                    Resolved::View(view) => wgpu::BindingResource::TextureView(view),
                    Resolved::Buffer(buffer) => buffer.as_entire_binding(),
                    Resolved::Constants(buffer) => buffer.as_entire_binding(),
                    Resolved::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                },
            })
            .collect();

        let layout = match &pipeline.object {
            PipelineObject::Render(p) => p.get_bind_group_layout(0),
            PipelineObject::Compute(p) => p.get_bind_group_layout(0),
        };
        Ok(Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &layout,
            entries: &entries,
        })))
    }

    fn pipeline(&self, handle: Option<PipelineHandle>, operation: &str) -> GraphicsResult<&WgpuPipeline> {
        handle
            .and_then(|h| self.pipelines.get(&h))
            .ok_or_else(|| GraphicsError::invalid_state(operation, "no pipeline bound"))
    }

    fn clear(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: DescriptorBinding,
        color: Option<[f32; 4]>,
        depth: f32,
    ) -> GraphicsResult<()> {
        let view = self.target_view(target)?;
        let color_attachment = color.map(|[r, g, b, a]| wgpu::RenderPassColorAttachment {
            view: &view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                }),
                store: wgpu::StoreOp::Store,
            },
        });
        let depth_attachment = color.is_none().then(|| wgpu::RenderPassDepthStencilAttachment {
            view: &view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(depth),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        });
        let colors: Vec<_> = color_attachment.into_iter().map(Some).collect();
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear"),
            color_attachments: &colors,
            depth_stencil_attachment: depth_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        Ok(())
    }

    fn draw(&self, encoder: &mut wgpu::CommandEncoder, state: &DrawState, call: DrawCall) -> GraphicsResult<()> {
        let pipeline = self.pipeline(state.graphics, "draw")?;
        let PipelineObject::Render(render) = &pipeline.object else {
            return Err(GraphicsError::invalid_state("draw", "bound pipeline is not a graphics pipeline"));
        };

        let color_views = state
            .colors
            .iter()
            .map(|&binding| self.target_view(binding))
            .collect::<GraphicsResult<Vec<_>>>()?;
        let depth_view = state.depth.map(|binding| self.target_view(binding)).transpose()?;
        let bind_group = self.bind_group(pipeline, &state.graphics_bindings)?;
        let vertex = match state.vertex {
            Some(handle) if pipeline.vertex_stride > 0 => Some(self.buffer(handle)?),
            _ => None,
        };
        let index = match (&call, state.index) {
            (DrawCall::Indexed { .. }, Some(handle)) => Some(self.buffer(handle)?),
            (DrawCall::Indexed { .. }, None) => {
                return Err(GraphicsError::invalid_state("draw_indexed", "no index buffer bound"))
            }
            _ => None,
        };

        let color_attachments: Vec<_> = color_views
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Draw"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth_view.as_ref().map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(render);
        if let Some(bind_group) = &bind_group {
            pass.set_bind_group(0, bind_group, &[]);
        }
        if let Some(vp) = state.viewport {
            pass.set_viewport(vp.x, vp.y, vp.width, vp.height, 0.0, 1.0);
        }
        if let Some(rect) = state.scissor {
            pass.set_scissor_rect(rect.x, rect.y, rect.width, rect.height);
        }
        if let Some(buffer) = vertex {
            pass.set_vertex_buffer(0, buffer.slice(..));
        }
        match call {
            DrawCall::Draw {
                vertex_count,
                instance_count,
                first_vertex,
            } => pass.draw(first_vertex..first_vertex + vertex_count, 0..instance_count),
            DrawCall::Indexed {
                index_count,
                instance_count,
                first_index,
            } => {
                if let Some(buffer) = index {
                    pass.set_index_buffer(buffer.slice(..), wgpu::IndexFormat::Uint32);
                }
                pass.draw_indexed(first_index..first_index + index_count, 0, 0..instance_count);
            }
        }
        Ok(())
    }

    fn dispatch(&self, encoder: &mut wgpu::CommandEncoder, state: &DrawState, groups: [u32; 3]) -> GraphicsResult<()> {
        let pipeline = self.pipeline(state.compute, "dispatch")?;
        let PipelineObject::Compute(compute) = &pipeline.object else {
            return Err(GraphicsError::invalid_state("dispatch", "bound pipeline is not a compute pipeline"));
        };
        let bind_group = self.bind_group(pipeline, &state.compute_bindings)?;

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Dispatch"),
            timestamp_writes: None,
        });
        pass.set_pipeline(compute);
        if let Some(bind_group) = &bind_group {
            pass.set_bind_group(0, bind_group, &[]);
        }
        pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        Ok(())
    }

    fn copy_buffer_to_texture(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        dst: ResourceHandle,
        src: ResourceHandle,
        footprints: &[SubresourceFootprint],
    ) -> GraphicsResult<()> {
        let buffer = self.buffer(src)?;
        let texture = self.texture(dst)?;
        let (block, _) = texture.format().block_dimensions();
        for footprint in footprints {
            encoder.copy_buffer_to_texture(
                wgpu::ImageCopyBuffer {
                    buffer,
                    layout: wgpu::ImageDataLayout {
                        offset: footprint.offset,
                        bytes_per_row: Some(footprint.row_pitch),
                        rows_per_image: Some(footprint.rows),
                    },
                },
                wgpu::ImageCopyTexture {
                    texture,
                    mip_level: footprint.mip,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: footprint.width.div_ceil(block) * block,
                    height: footprint.height.div_ceil(block) * block,
                    depth_or_array_layers: 1,
                },
            );
        }
        Ok(())
    }

    fn copy_texture_to_texture(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        dst: ResourceHandle,
        src: ResourceHandle,
    ) -> GraphicsResult<()> {
        let src = self.texture(src)?;
        let dst = self.texture(dst)?;
        let levels = src.mip_level_count().min(dst.mip_level_count());
        for mip in 0..levels {
            let size = src.size().mip_level_size(mip, wgpu::TextureDimension::D2);
            encoder.copy_texture_to_texture(
                wgpu::ImageCopyTexture {
                    texture: src,
                    mip_level: mip,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyTexture {
                    texture: dst,
                    mip_level: mip,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                size,
            );
        }
        Ok(())
    }

    fn configure_surface(&mut self, width: u32, height: u32, format: Format) -> GraphicsResult<()> {
        let Some(surface) = self.surface.as_ref() else {
            return Err(device_error("swapchain", "backend was created without a window"));
        };

        let caps = surface.get_capabilities(&self.adapter);
        let wanted = texture_format(format);
        let surface_format = if caps.formats.contains(&wanted) {
            wanted
        } else {
            let fallback = caps
                .formats
                .first()
                .copied()
                .ok_or_else(|| device_error("swapchain", "surface supports no formats"))?;
            log::warn!(
                "[WgpuBackend::configure_surface] {:?} unsupported, presenting as {:?}",
                wanted,
                fallback
            );
            fallback
        };
        let present_mode = if self.vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_DST,
            format: surface_format,
            width: width.max(1),
            height: height.max(1),
            present_mode,
            desired_maximum_frame_latency: FRAMES_IN_FLIGHT as u32,
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&self.device, &config);
        self.surface_config = Some(config);
        Ok(())
    }

    fn wrap_backbuffers(&mut self, count: usize) -> Vec<ResourceHandle> {
        self.backbuffers = (0..count)
            .map(|_| {
                let handle = ResourceHandle(self.next_handle());
                self.resources.insert(handle, WgpuResource::Backbuffer);
                handle
            })
            .collect();
        self.frame_index = 0;
        self.backbuffers.clone()
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_descriptor_heap(&mut self, kind: HeapKind, capacity: u32) -> GraphicsResult<(HeapId, HeapAddresses)> {
        let id = HeapId(self.heap_count);
        self.heap_count += 1;
        log::debug!("[WgpuBackend] {} heap with {} slots", kind, capacity);

        // wgpu has no descriptor memory; addresses are virtual
        let cpu_base = (id.0 as u64 + 1) << 40;
        Ok((
            id,
            HeapAddresses {
                cpu_base,
                gpu_base: kind.is_shader_visible().then_some(cpu_base | (1 << 39)),
                increment: 1,
            },
        ))
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> GraphicsResult<ResourceHandle> {
        let size = align_up(desc.size, COPY_ALIGNMENT);
        let buffer = self.scoped(&desc.name, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&desc.name),
                size,
                usage: buffer_usage(desc),
                mapped_at_creation: false,
            })
        })?;
        let shadow = (desc.ty.is_host_visible() && !desc.readback).then(|| vec![0u8; size as usize]);

        let handle = ResourceHandle(self.next_handle());
        self.resources.insert(handle, WgpuResource::Buffer { buffer, shadow });
        Ok(handle)
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> GraphicsResult<ResourceHandle> {
        let mut usage =
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC;
        if desc.usage.render_target || desc.usage.depth {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        if desc.usage.storage && supports_storage(desc.format) {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }

        let texture = self.scoped(&desc.name, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&desc.name),
                size: wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: desc.levels,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format(desc.format),
                usage,
                view_formats: &[],
            })
        })?;

        let handle = ResourceHandle(self.next_handle());
        self.resources.insert(handle, WgpuResource::Texture(texture));
        Ok(handle)
    }

    fn destroy_resource(&mut self, resource: ResourceHandle) {
        match self.resources.remove(&resource) {
            Some(WgpuResource::Buffer { buffer, .. }) => buffer.destroy(),
            Some(WgpuResource::Texture(texture)) => texture.destroy(),
            Some(WgpuResource::Backbuffer) | None => {}
        }
    }

    fn write_buffer(&mut self, handle: ResourceHandle, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        let Some(WgpuResource::Buffer { buffer, shadow }) = self.resources.get_mut(&handle) else {
            return Err(GraphicsError::invalid_state("buffer_write", format!("{:?} is not a buffer", handle)));
        };
        if let Some(shadow) = shadow.as_mut() {
            let start = offset as usize;
            shadow[start..start + data.len()].copy_from_slice(data);
        }

        // Offset and size must both be multiples of four
        if offset % COPY_ALIGNMENT == 0 && data.len() as u64 % COPY_ALIGNMENT == 0 {
            self.queue.write_buffer(buffer, offset, data);
        } else {
            let start = offset - offset % COPY_ALIGNMENT;
            let end = align_up(offset + data.len() as u64, COPY_ALIGNMENT).min(buffer.size());
            match shadow.as_deref() {
                Some(shadow) => self.queue.write_buffer(buffer, start, &shadow[start as usize..end as usize]),
                None => {
                    return Err(GraphicsError::invalid_state(
                        "buffer_write",
                        "unaligned write into a buffer without CPU copy",
                    ))
                }
            }
        }
        Ok(())
    }

    fn read_buffer(&mut self, handle: ResourceHandle, offset: u64, out: &mut [u8]) -> GraphicsResult<()> {
        let Some(WgpuResource::Buffer { buffer, shadow }) = self.resources.get(&handle) else {
            return Err(GraphicsError::invalid_state("buffer_read", format!("{:?} is not a buffer", handle)));
        };
        let start = offset as usize;
        if let Some(shadow) = shadow {
            out.copy_from_slice(&shadow[start..start + out.len()]);
            return Ok(());
        }

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(device_error("buffer map", e)),
            Err(e) => return Err(device_error("buffer map", e)),
        }

        {
            let mapped = slice.get_mapped_range();
            out.copy_from_slice(&mapped[start..start + out.len()]);
        }
        buffer.unmap();
        Ok(())
    }

    fn create_view(&mut self, slot: DescriptorBinding, desc: &ViewDesc) -> GraphicsResult<()> {
        let resource = match desc {
            ViewDesc::Texture { resource, .. }
            | ViewDesc::ConstantBuffer { resource, .. }
            | ViewDesc::StorageBuffer { resource, .. }
            | ViewDesc::ShaderResourceBuffer { resource, .. } => *resource,
        };
        if !self.resources.contains_key(&resource) {
            return Err(GraphicsError::invalid_state(
                "create_view",
                format!("resource {:?} does not exist", resource),
            ));
        }
        self.slots.insert((slot.heap, slot.index), Slot::View(*desc));
        Ok(())
    }

    fn create_sampler(&mut self, slot: DescriptorBinding, desc: &SamplerDesc) -> GraphicsResult<()> {
        let border = self.device.features().contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER);
        let address = address_mode(desc.address, border);
        let filter = match desc.filter {
            Filter::Nearest => wgpu::FilterMode::Nearest,
            Filter::Linear | Filter::Anisotropic => wgpu::FilterMode::Linear,
        };
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Sampler"),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: if desc.mips { filter } else { wgpu::FilterMode::Nearest },
            anisotropy_clamp: if desc.filter == Filter::Anisotropic && desc.mips { 16 } else { 1 },
            border_color: (address == wgpu::AddressMode::ClampToBorder)
                .then_some(wgpu::SamplerBorderColor::TransparentBlack),
            ..Default::default()
        });
        self.slots.insert((slot.heap, slot.index), Slot::Sampler(sampler));
        Ok(())
    }

    fn destroy_view(&mut self, slot: DescriptorBinding) {
        self.slots.remove(&(slot.heap, slot.index));
    }

    fn create_signature(&mut self, desc: &SignatureDesc) -> GraphicsResult<SignatureHandle> {
        let handle = SignatureHandle(self.next_handle());
        self.signatures.insert(handle, desc.clone());
        Ok(handle)
    }

    fn destroy_signature(&mut self, signature: SignatureHandle) {
        self.signatures.remove(&signature);
    }

    fn create_graphics_pipeline(
        &mut self,
        signature: SignatureHandle,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> GraphicsResult<PipelineHandle> {
        if !self.signatures.contains_key(&signature) {
            return Err(device_error("pipeline", format!("signature {:?} does not exist", signature)));
        }
        let vertex = reflect(desc.vertex)?;
        let pixel = reflect(desc.pixel)?;
        let state = desc.state;

        let buffers = [wgpu::VertexBufferLayout {
            array_stride: vertex.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &vertex.attributes,
        }];
        let targets: Vec<_> = state
            .formats
            .iter()
            .map(|&format| {
                Some(wgpu::ColorTargetState {
                    format: texture_format(format),
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();
        let topology = if state.line {
            wgpu::PrimitiveTopology::LineList
        } else {
            wgpu::PrimitiveTopology::TriangleList
        };
        let polygon_mode = if state.wireframe && self.device.features().contains(wgpu::Features::POLYGON_MODE_LINE) {
            wgpu::PolygonMode::Line
        } else {
            wgpu::PolygonMode::Fill
        };
        let depth_stencil = state.depth.then(|| wgpu::DepthStencilState {
            format: texture_format(state.depth_format),
            depth_write_enabled: state.op == DepthOp::Less,
            depth_compare: match state.op {
                DepthOp::Less => wgpu::CompareFunction::Less,
                DepthOp::None => wgpu::CompareFunction::Always,
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = self.scoped("graphics pipeline", |device| {
            let vs = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Vertex Shader"),
                source: wgpu::ShaderSource::Wgsl(String::from_utf8_lossy(&desc.vertex.bytecode)),
            });
            let ps = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Pixel Shader"),
                source: wgpu::ShaderSource::Wgsl(String::from_utf8_lossy(&desc.pixel.bytecode)),
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Graphics Pipeline"),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &vs,
                    entry_point: &desc.vertex.entry_point,
                    buffers: if vertex.stride > 0 { &buffers } else { &[] },
                },
                primitive: wgpu::PrimitiveState {
                    topology,
                    polygon_mode,
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &ps,
                    entry_point: &desc.pixel.entry_point,
                    targets: &targets,
                }),
                multiview: None,
            })
        })?;

        let handle = PipelineHandle(self.next_handle());
        self.pipelines.insert(
            handle,
            WgpuPipeline {
                object: PipelineObject::Render(pipeline),
                bindings: vertex.bindings.union(&pixel.bindings).copied().collect(),
                vertex_stride: vertex.stride,
            },
        );
        Ok(handle)
    }

    fn create_compute_pipeline(
        &mut self,
        signature: SignatureHandle,
        shader: &CompiledShader,
    ) -> GraphicsResult<PipelineHandle> {
        if !self.signatures.contains_key(&signature) {
            return Err(device_error("pipeline", format!("signature {:?} does not exist", signature)));
        }
        let reflection = reflect(shader)?;

        let pipeline = self.scoped("compute pipeline", |device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Compute Shader"),
                source: wgpu::ShaderSource::Wgsl(String::from_utf8_lossy(&shader.bytecode)),
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Compute Pipeline"),
                layout: None,
                module: &module,
                entry_point: &shader.entry_point,
            })
        })?;

        let handle = PipelineHandle(self.next_handle());
        self.pipelines.insert(
            handle,
            WgpuPipeline {
                object: PipelineObject::Compute(pipeline),
                bindings: reflection.bindings,
                vertex_stride: 0,
            },
        );
        Ok(handle)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(&pipeline);
    }

    fn execute(&mut self, queue: QueueType, commands: &[Command]) -> GraphicsResult<()> {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(match queue {
                QueueType::Graphics => "Graphics Commands",
                QueueType::Compute => "Compute Commands",
                QueueType::Copy => "Copy Commands",
            }),
        });
        let mut state = DrawState::default();

        for command in commands {
            match command {
                Command::Barrier(_) => {}
                Command::SetViewport(viewport) => state.viewport = Some(*viewport),
                Command::SetScissor(rect) => state.scissor = Some(*rect),
                Command::SetRenderTargets { colors, depth } => {
                    state.colors = colors.clone();
                    state.depth = *depth;
                }
                Command::ClearRenderTarget { target, color } => self.clear(&mut encoder, *target, Some(*color), 1.0)?,
                Command::ClearDepthTarget { target, depth } => self.clear(&mut encoder, *target, None, *depth)?,
                Command::SetVertexBuffer { buffer, .. } => state.vertex = Some(*buffer),
                Command::SetIndexBuffer { buffer, .. } => state.index = Some(*buffer),
                // Topology is baked into wgpu pipelines
                Command::SetTopology(topology) => {
                    if *topology == Topology::PointList {
                        log::debug!("[WgpuBackend::execute] Point topology follows the pipeline's primitive state");
                    }
                }
                Command::SetPipeline { bind_point, pipeline } => match bind_point {
                    BindPoint::Graphics => state.graphics = Some(*pipeline),
                    BindPoint::Compute => state.compute = Some(*pipeline),
                },
                Command::SetBinding {
                    bind_point,
                    slot,
                    binding,
                } => {
                    state.bindings_mut(*bind_point).insert(*slot, Bound::Descriptor(*binding));
                }
                Command::PushConstants { bind_point, slot, data } => {
                    state.bindings_mut(*bind_point).insert(*slot, Bound::Constants(data.clone()));
                }
                Command::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                } => self.draw(
                    &mut encoder,
                    &state,
                    DrawCall::Draw {
                        vertex_count: *vertex_count,
                        instance_count: *instance_count,
                        first_vertex: *first_vertex,
                    },
                )?,
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                } => self.draw(
                    &mut encoder,
                    &state,
                    DrawCall::Indexed {
                        index_count: *index_count,
                        instance_count: *instance_count,
                        first_index: *first_index,
                    },
                )?,
                Command::Dispatch { x, y, z } => self.dispatch(&mut encoder, &state, [*x, *y, *z])?,
                Command::CopyTextureToTexture { dst, src } => self.copy_texture_to_texture(&mut encoder, *dst, *src)?,
                Command::CopyBufferToTexture { dst, src, footprints } => {
                    self.copy_buffer_to_texture(&mut encoder, *dst, *src, footprints)?
                }
                Command::CopyBufferToBuffer { dst, src, size } => {
                    let src = self.buffer(*src)?;
                    let dst = self.buffer(*dst)?;
                    let size = align_up(*size, COPY_ALIGNMENT).min(src.size()).min(dst.size());
                    encoder.copy_buffer_to_buffer(src, 0, dst, 0, size);
                }
            }
        }

        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn create_fence(&mut self) -> GraphicsResult<FenceHandle> {
        let handle = FenceHandle(self.next_handle());
        self.fences.insert(handle, Arc::new(AtomicU64::new(0)));
        Ok(handle)
    }

    fn signal(&mut self, _queue: QueueType, fence: FenceHandle, value: u64) -> GraphicsResult<()> {
        let completed = self
            .fences
            .get(&fence)
            .cloned()
            .ok_or_else(|| GraphicsError::invalid_state("fence_signal", format!("{:?} does not exist", fence)))?;
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(value, Ordering::AcqRel);
        });
        Ok(())
    }

    fn completed_value(&mut self, fence: FenceHandle) -> u64 {
        self.device.poll(wgpu::Maintain::Poll);
        self.fences
            .get(&fence)
            .map_or(0, |completed| completed.load(Ordering::Acquire))
    }

    fn wait(&mut self, fence: FenceHandle, value: u64, timeout: Duration) -> GraphicsResult<bool> {
        let Some(completed) = self.fences.get(&fence).cloned() else {
            return Err(GraphicsError::invalid_state("fence_wait", format!("{:?} does not exist", fence)));
        };
        let deadline = Instant::now() + timeout;
        while completed.load(Ordering::Acquire) < value {
            if Instant::now() >= deadline {
                return Ok(false);
            }
            self.device.poll(wgpu::Maintain::Wait);
            if completed.load(Ordering::Acquire) < value {
                std::thread::sleep(Duration::from_micros(100));
            }
        }
        Ok(true)
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> GraphicsResult<Vec<ResourceHandle>> {
        self.configure_surface(desc.width, desc.height, desc.format)?;
        Ok(self.wrap_backbuffers(desc.buffer_count))
    }

    fn release_swapchain_buffers(&mut self) {
        self.frame = None;
        for handle in std::mem::take(&mut self.backbuffers) {
            self.resources.remove(&handle);
        }
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> GraphicsResult<Vec<ResourceHandle>> {
        let Some(config) = self.surface_config.as_mut() else {
            return Err(GraphicsError::invalid_state("swapchain_resize", "no swapchain"));
        };
        config.width = width.max(1);
        config.height = height.max(1);
        if let Some(surface) = self.surface.as_ref() {
            surface.configure(&self.device, config);
        }
        Ok(self.wrap_backbuffers(FRAMES_IN_FLIGHT))
    }

    fn acquire_backbuffer(&mut self) -> GraphicsResult<usize> {
        if self.frame.is_some() {
            return Ok(self.frame_index);
        }
        let (Some(surface), Some(config)) = (self.surface.as_ref(), self.surface_config.as_ref()) else {
            return Err(GraphicsError::invalid_state("acquire_backbuffer", "no swapchain"));
        };

        let frame = match surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("[WgpuBackend::acquire_backbuffer] Surface lost, reconfiguring");
                surface.configure(&self.device, config);
                surface.get_current_texture().gpu_context("backbuffer")?
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(out_of_memory_error("backbuffer", 0)),
            Err(e) => return Err(device_error("backbuffer", e)),
        };
        self.frame = Some(frame);
        Ok(self.frame_index)
    }

    fn present(&mut self, vsync: bool) -> GraphicsResult<()> {
        let Some(frame) = self.frame.take() else {
            return Err(GraphicsError::invalid_state("present", "no backbuffer acquired"));
        };
        frame.present();
        self.frame_index = (self.frame_index + 1) % self.backbuffers.len().max(1);

        if vsync != self.vsync {
            self.vsync = vsync;
            if let (Some(surface), Some(config)) = (self.surface.as_ref(), self.surface_config.as_mut()) {
                config.present_mode = if vsync {
                    wgpu::PresentMode::AutoVsync
                } else {
                    wgpu::PresentMode::AutoNoVsync
                };
                surface.configure(&self.device, config);
            }
        }
        Ok(())
    }
}
