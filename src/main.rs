//! Earth GPU demo
//!
//! A compute pass fills an image with an animated gradient, a fullscreen
//! pass composites it into the backbuffer. Both pipelines are hot-reloaded
//! from `shaders/` while the demo runs.
//!
//! Usage: `earth-gpu [--headless [frames]] [--config path]`

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use winit::{
    dpi::LogicalSize,
    event::{Event, WindowEvent},
    event_loop::EventLoop,
    window::WindowBuilder,
};

use earth_gpu::gpu::{
    AddressMode, BindPoint, Filter, MipSelector, PipelineDesc, ResourceState, Sampler, SamplerDesc,
    SignatureDesc, SignatureEntry, SwapchainDesc, Texture, TextureDesc, TextureUsage, ViewHandle, ViewKind,
};
use earth_gpu::gpu::texture::Format;
use earth_gpu::{
    BackendKind, GpuBackend, GpuConfig, GraphicsContext, HeadlessBackend, HotPipeline, ShaderStage, VideoDevice,
    WgpuBackend,
};

const CONFIG_PATH: &str = "earth-gpu.toml";
const DEFAULT_HEADLESS_FRAMES: u64 = 120;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FrameConstants {
    tint: [f32; 4],
    time: f32,
    width: u32,
    height: u32,
    _pad: u32,
}

struct Demo {
    gradient: HotPipeline,
    composite: HotPipeline,
    image: Texture,
    storage: ViewHandle,
    sampled: ViewHandle,
    sampler: Sampler,
    start: Instant,
}

impl Demo {
    fn new(ctx: &mut GraphicsContext, width: u32, height: u32, format: Format) -> Result<Self> {
        let mut gradient = HotPipeline::new(
            "gradient",
            SignatureDesc::new(vec![SignatureEntry::Uav, SignatureEntry::PushConstants], 32),
            PipelineDesc::default(),
        );
        gradient.add_shader(ctx, "shaders/gradient.wgsl", ShaderStage::Compute)?;
        gradient.build(ctx)?;

        let mut composite = HotPipeline::new(
            "composite",
            SignatureDesc::new(
                vec![SignatureEntry::Srv, SignatureEntry::Sampler, SignatureEntry::PushConstants],
                32,
            ),
            PipelineDesc {
                formats: vec![format],
                ..Default::default()
            },
        );
        composite.add_shader(ctx, "shaders/fullscreen.wgsl", ShaderStage::Vertex)?;
        composite.add_shader(ctx, "shaders/composite.wgsl", ShaderStage::Pixel)?;
        composite.build(ctx)?;

        let image = Texture::new(
            ctx,
            TextureDesc::new(width, height, Format::Rgba8Unorm)
                .with_usage(TextureUsage::STORAGE)
                .named("Gradient"),
        )?;
        let storage = ctx.view_get(&image, ViewKind::Storage, MipSelector::Level(0))?;
        let sampled = ctx.view_get(&image, ViewKind::ShaderResource, MipSelector::All)?;
        let sampler = Sampler::new(ctx, SamplerDesc::new(AddressMode::Clamp, Filter::Linear))?;

        Ok(Self {
            gradient,
            composite,
            image,
            storage,
            sampled,
            sampler,
            start: Instant::now(),
        })
    }

    fn frame(&mut self, video: &mut VideoDevice, vsync: bool) -> Result<()> {
        {
            let ctx = video.context_mut();
            self.gradient.rebuild(ctx)?;
            self.composite.rebuild(ctx)?;
        }

        let time = self.start.elapsed().as_secs_f32();
        let tint = Vec4::new(1.0, 0.9 + 0.1 * time.sin(), 1.0, 1.0);
        let constants = FrameConstants {
            tint: tint.to_array(),
            time,
            width: self.image.width(),
            height: self.image.height(),
            _pad: 0,
        };

        let mut frame = video.begin()?;
        let target = frame.backbuffer_view();
        let (width, height) = (frame.width(), frame.height());
        let cmd = &mut frame.cmd;

        cmd.image_barrier(&mut self.image, ResourceState::Storage, MipSelector::All);
        if let Some(pipeline) = self.gradient.pipeline() {
            cmd.set_compute_pipeline(pipeline);
            cmd.bind_descriptor(BindPoint::Compute, 0, self.storage.binding);
            cmd.push_constants(BindPoint::Compute, 1, &constants);
            cmd.dispatch(constants.width.div_ceil(8), constants.height.div_ceil(8), 1);
        }
        cmd.image_barrier(&mut self.image, ResourceState::ShaderResource, MipSelector::All);

        cmd.image_barrier(&mut frame.backbuffer.texture, ResourceState::RenderTarget, MipSelector::All);
        cmd.set_render_targets(&[target], None);
        cmd.clear_render_target(target, 0.02, 0.02, 0.05);
        cmd.set_viewport(0.0, 0.0, width as f32, height as f32);
        cmd.set_scissor(0, 0, width, height);
        if let (Some(pipeline), Some(sampler)) = (self.composite.pipeline(), self.sampler.binding()) {
            cmd.set_graphics_pipeline(pipeline);
            cmd.bind_descriptor(BindPoint::Graphics, 0, self.sampled.binding);
            cmd.bind_descriptor(BindPoint::Graphics, 1, sampler);
            cmd.push_constants(BindPoint::Graphics, 2, &constants);
            cmd.draw(3, 1, 0);
        }
        cmd.image_barrier(&mut frame.backbuffer.texture, ResourceState::Present, MipSelector::All);

        video.end(frame)?;
        video.present(vsync)?;
        Ok(())
    }

    fn free(self, ctx: &mut GraphicsContext) {
        ctx.view_release(self.storage);
        ctx.view_release(self.sampled);
        self.image.free(ctx);
        self.sampler.free(ctx);
        self.gradient.free(ctx);
        self.composite.free(ctx);
    }
}

struct Args {
    headless: Option<u64>,
    config: String,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        headless: None,
        config: CONFIG_PATH.to_string(),
    };
    let mut iter = std::env::args().skip(1).peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--headless" => {
                let frames = match iter.peek().map(|next| next.parse::<u64>()) {
                    Some(Ok(frames)) => {
                        iter.next();
                        frames
                    }
                    _ => DEFAULT_HEADLESS_FRAMES,
                };
                args.headless = Some(frames);
            }
            "--config" => args.config = iter.next().context("--config needs a path")?,
            other => anyhow::bail!("unknown argument '{}'", other),
        }
    }
    Ok(args)
}

fn run_headless(config: GpuConfig, frames: u64) -> Result<()> {
    let backend = HeadlessBackend::with_memory_budget(config.headless_memory_budget);
    let probe = backend.probe();
    let (width, height, vsync) = (config.width, config.height, config.vsync);

    let ctx = GraphicsContext::new(Box::new(backend), config)?;
    let mut video = VideoDevice::new(ctx, SwapchainDesc::new(width, height))?;
    let format = video.swapchain().format();
    let mut demo = Demo::new(video.context_mut(), width, height, format)?;

    for _ in 0..frames {
        demo.frame(&mut video, vsync)?;
    }
    video.wait()?;

    let stats = probe.stats();
    log::info!(
        "[main] {} frames: {} submissions, {} dispatches, {} draws, {} barriers",
        video.frame_count(),
        stats.submissions,
        stats.dispatches,
        stats.draws,
        stats.transitions + stats.storage_barriers
    );

    demo.free(video.context_mut());
    let leaks = video.shutdown()?;
    if leaks > 0 {
        anyhow::bail!("{} GPU resources leaked", leaks);
    }
    Ok(())
}

fn run_windowed(config: GpuConfig) -> Result<()> {
    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(&config.title)
            .with_inner_size(LogicalSize::new(config.width, config.height))
            .build(&event_loop)
            .context("Failed to create window")?,
    );
    let size = window.inner_size();
    let (width, height) = (size.width.max(1), size.height.max(1));
    let vsync = config.vsync;

    let backend: Box<dyn GpuBackend> = Box::new(WgpuBackend::new(&config, Some(window.clone()))?);
    let ctx = GraphicsContext::new(backend, config)?;
    // Every desktop surface supports BGRA
    let desc = SwapchainDesc {
        format: Format::Bgra8Unorm,
        ..SwapchainDesc::new(width, height)
    };
    let mut device = VideoDevice::new(ctx, desc)?;
    let format = device.swapchain().format();
    let mut demo = Some(Demo::new(device.context_mut(), width, height, format)?);
    let mut video = Some(device);

    event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { event, .. } => match event {
            WindowEvent::CloseRequested => {
                if let (Some(mut device), Some(demo)) = (video.take(), demo.take()) {
                    if let Err(e) = device.wait() {
                        log::error!("[main] Failed to drain GPU: {}", e);
                    }
                    demo.free(device.context_mut());
                    match device.shutdown() {
                        Ok(0) => log::info!("[main] Clean shutdown"),
                        Ok(leaks) => log::warn!("[main] {} GPU resources leaked", leaks),
                        Err(e) => log::error!("[main] Shutdown failed: {}", e),
                    }
                }
                elwt.exit();
            }
            WindowEvent::Resized(size) if size.width > 0 && size.height > 0 => {
                if let Some(device) = video.as_mut() {
                    if let Err(e) = device.resize(size.width, size.height) {
                        log::error!("[main] Resize failed: {}", e);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if let (Some(device), Some(demo)) = (video.as_mut(), demo.as_mut()) {
                    if let Err(e) = demo.frame(device, vsync) {
                        log::error!("[main] Frame failed: {:#}", e);
                        elwt.exit();
                    }
                }
            }
            _ => {}
        },
        Event::AboutToWait => window.request_redraw(),
        _ => {}
    })?;
    Ok(())
}

fn main() -> Result<()> {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();

    let args = parse_args()?;
    let mut config = GpuConfig::load_or_default(&args.config)?;
    if let Some(frames) = args.headless {
        config.backend = BackendKind::Headless;
        return run_headless(config, frames);
    }

    match config.backend {
        BackendKind::Headless => run_headless(config, DEFAULT_HEADLESS_FRAMES),
        BackendKind::Wgpu => run_windowed(config),
    }
}
