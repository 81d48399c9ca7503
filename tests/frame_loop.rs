//! End-to-end frame loop on the headless device with the shipped shaders

use bytemuck::{Pod, Zeroable};
use tempfile::TempDir;

use earth_gpu::assets::{ResourceCache, TextureCache};
use earth_gpu::gpu::{
    AddressMode, BindPoint, Filter, Format, MipSelector, PipelineDesc, ResourceState, Sampler, SamplerDesc,
    SignatureDesc, SignatureEntry, SwapchainDesc, Texture, TextureDesc, TextureUsage, ViewKind,
};
use earth_gpu::{GpuConfig, GraphicsContext, HeadlessBackend, HotPipeline, ShaderStage, VideoDevice};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FrameConstants {
    tint: [f32; 4],
    time: f32,
    width: u32,
    height: u32,
    _pad: u32,
}

fn config(cache: &TempDir) -> GpuConfig {
    GpuConfig {
        cache_dir: cache.path().to_path_buf(),
        ..GpuConfig::default()
    }
}

#[test]
fn gradient_and_composite_frames_run_without_leaks() {
    let _ = env_logger::builder().is_test(true).try_init();
    let cache = TempDir::new().expect("tempdir");
    let backend = HeadlessBackend::new();
    let probe = backend.probe();
    let ctx = GraphicsContext::new(Box::new(backend), config(&cache)).expect("context");
    let mut video = VideoDevice::new(ctx, SwapchainDesc::new(64, 48)).expect("video");
    let format = video.swapchain().format();

    let ctx = video.context_mut();
    let mut gradient = HotPipeline::new(
        "gradient",
        SignatureDesc::new(vec![SignatureEntry::Uav, SignatureEntry::PushConstants], 32),
        PipelineDesc::default(),
    );
    gradient
        .add_shader(ctx, "shaders/gradient.wgsl", ShaderStage::Compute)
        .expect("gradient shader");
    gradient.build(ctx).expect("gradient pipeline");

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
    composite
        .add_shader(ctx, "shaders/fullscreen.wgsl", ShaderStage::Vertex)
        .expect("vertex shader");
    composite
        .add_shader(ctx, "shaders/composite.wgsl", ShaderStage::Pixel)
        .expect("pixel shader");
    composite.build(ctx).expect("composite pipeline");

    let mut image = Texture::new(
        ctx,
        TextureDesc::new(64, 48, Format::Rgba8Unorm)
            .with_usage(TextureUsage::STORAGE)
            .named("Gradient"),
    )
    .expect("image");
    let storage = ctx.view_get(&image, ViewKind::Storage, MipSelector::Level(0)).expect("uav");
    let sampled = ctx.view_get(&image, ViewKind::ShaderResource, MipSelector::All).expect("srv");
    let sampler = Sampler::new(ctx, SamplerDesc::new(AddressMode::Clamp, Filter::Linear)).expect("sampler");
    let sampler_binding = sampler.binding().expect("sampler binding");

    let constants = FrameConstants {
        tint: [1.0; 4],
        time: 0.0,
        width: 64,
        height: 48,
        _pad: 0,
    };

    for _ in 0..4 {
        let mut frame = video.begin().expect("begin");
        let target = frame.backbuffer_view();
        let cmd = &mut frame.cmd;

        cmd.image_barrier(&mut image, ResourceState::Storage, MipSelector::All);
        cmd.set_compute_pipeline(gradient.pipeline().expect("gradient"));
        cmd.bind_descriptor(BindPoint::Compute, 0, storage.binding);
        cmd.push_constants(BindPoint::Compute, 1, &constants);
        cmd.dispatch(8, 6, 1);
        cmd.image_barrier(&mut image, ResourceState::ShaderResource, MipSelector::All);

        cmd.image_barrier(&mut frame.backbuffer.texture, ResourceState::RenderTarget, MipSelector::All);
        cmd.set_render_targets(&[target], None);
        cmd.set_graphics_pipeline(composite.pipeline().expect("composite"));
        cmd.bind_descriptor(BindPoint::Graphics, 0, sampled.binding);
        cmd.bind_descriptor(BindPoint::Graphics, 1, sampler_binding);
        cmd.push_constants(BindPoint::Graphics, 2, &constants);
        cmd.draw(3, 1, 0);
        cmd.image_barrier(&mut frame.backbuffer.texture, ResourceState::Present, MipSelector::All);

        video.end(frame).expect("end");
        video.present(false).expect("present");
    }
    video.wait().expect("wait");

    let stats = probe.stats();
    assert_eq!(stats.dispatches, 4);
    assert_eq!(stats.draws, 4);
    assert_eq!(stats.presents, 4);
    // Common -> Storage once, then Storage <-> ShaderResource every frame
    assert_eq!(stats.transitions, 1 + 1 + 3 * 2 + 4 * 2);

    let ctx = video.context_mut();
    ctx.view_release(storage);
    ctx.view_release(sampled);
    image.free(ctx);
    sampler.free(ctx);
    gradient.free(ctx);
    composite.free(ctx);
    assert_eq!(video.shutdown().expect("shutdown"), 0);
    assert_eq!(probe.resource_count(), 0);
    assert_eq!(probe.view_count(), 0);
}

#[test]
fn shader_cache_survives_a_new_context() {
    let cache = TempDir::new().expect("tempdir");
    let path = std::path::Path::new("shaders/composite.wgsl");

    let mut first =
        GraphicsContext::new(Box::new(HeadlessBackend::new()), config(&cache)).expect("first context");
    let compiled = first.compile_shader(path, ShaderStage::Pixel).expect("compile");
    assert_eq!(first.shader_cache().misses(), 1);
    assert_eq!(first.shutdown().expect("shutdown"), 0);

    let mut second =
        GraphicsContext::new(Box::new(HeadlessBackend::new()), config(&cache)).expect("second context");
    let cached = second.compile_shader(path, ShaderStage::Pixel).expect("cached");
    assert_eq!(second.shader_cache().hits(), 1);
    assert_eq!(second.shader_cache().misses(), 0);
    assert_eq!(cached, compiled);
    assert!(cached.source().expect("utf8").contains("struct FrameConstants"));
}

#[test]
fn image_files_upload_through_the_resource_cache() {
    let dir = TempDir::new().expect("tempdir");
    let png = dir.path().join("stone.png");
    image::RgbaImage::from_pixel(32, 32, image::Rgba([90, 90, 90, 255]))
        .save(&png)
        .expect("save png");
    let png = png.to_string_lossy().into_owned();

    let mut ctx = GraphicsContext::new(Box::new(HeadlessBackend::new()), config(&dir)).expect("context");
    let mut cache = ResourceCache::new(TextureCache::new(dir.path().join("textures")));
    cache.request(&png).expect("request");
    cache.request(&png).expect("request");
    assert!(cache.texture(&png).is_none());

    cache.flush(&mut ctx).expect("flush");
    let texture = cache.texture(&png).expect("uploaded");
    assert_eq!((texture.width(), texture.height()), (32, 32));
    assert_eq!(texture.format(), Format::Rgba8UnormSrgb);
    assert_eq!(cache.ref_count(&png), 2);

    let view = ctx
        .view_get(texture, ViewKind::ShaderResource, MipSelector::All)
        .expect("view");
    ctx.view_release(view);

    assert!(!cache.give_back(&mut ctx, &png));
    assert!(cache.give_back(&mut ctx, &png));
    cache.free(&mut ctx);
    assert_eq!(ctx.shutdown().expect("shutdown"), 0);
}
