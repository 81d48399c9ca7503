use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::backend::{HeadlessBackend, HeadlessProbe};
use crate::config::GpuConfig;
use crate::error::GraphicsError;
use crate::gpu::descriptor::{HeapAddresses, HeapId};
use crate::gpu::texture::copyable_footprints;
use crate::hot_reload::{CompiledShader, ShaderStage};

fn context() -> (GraphicsContext, HeadlessProbe) {
    context_with(GpuConfig::default())
}

fn context_with(config: GpuConfig) -> (GraphicsContext, HeadlessProbe) {
    let backend = HeadlessBackend::new();
    let probe = backend.probe();
    let ctx = GraphicsContext::new(Box::new(backend), config).expect("context");
    (ctx, probe)
}

fn small_heap(kind: HeapKind, capacity: u32) -> DescriptorHeap {
    let addresses = HeapAddresses {
        cpu_base: 0x1000,
        gpu_base: kind.is_shader_visible().then_some(0x8000),
        increment: 32,
    };
    DescriptorHeap::new(HeapId(0), kind, capacity, addresses)
}

fn first_free(heap: &DescriptorHeap) -> Option<u32> {
    (0..heap.capacity()).find(|&i| !heap.is_occupied(i))
}

#[test]
fn heap_allocation_is_first_fit_under_random_churn() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut heap = small_heap(HeapKind::ShaderResource, 64);
    let mut held: Vec<Descriptor> = Vec::new();

    for _ in 0..5000 {
        if held.is_empty() || (held.len() < 64 && rng.gen_bool(0.55)) {
            let expected = first_free(&heap);
            let descriptor = heap.alloc().expect("free slot available");
            assert_eq!(Some(descriptor.index()), expected);
            held.push(descriptor);
        } else {
            let victim = rng.gen_range(0..held.len());
            let mut descriptor = held.swap_remove(victim);
            let index = descriptor.index();
            heap.free(&mut descriptor);
            assert!(!descriptor.is_valid());
            assert!(!heap.is_occupied(index));
        }

        assert_eq!(heap.live_count() as usize, held.len());
        assert!(held.iter().all(|d| heap.is_occupied(d.index())));
    }

    let mut indices: Vec<u32> = held.iter().map(Descriptor::index).collect();
    indices.sort_unstable();
    indices.dedup();
    assert_eq!(indices.len(), held.len());
}

#[test]
fn descriptor_addresses_follow_the_increment() {
    let mut heap = small_heap(HeapKind::Sampler, 4);
    let _first = heap.alloc().expect("alloc");
    let second = heap.alloc().expect("alloc");
    assert_eq!(second.cpu_address(), 0x1000 + 32);
    assert_eq!(second.gpu_address(), Some(0x8000 + 32));

    let mut rtv = small_heap(HeapKind::RenderTarget, 4);
    let descriptor = rtv.alloc().expect("alloc");
    assert_eq!(descriptor.gpu_address(), None);
    assert_eq!(descriptor.binding().map(|b| b.kind), Some(HeapKind::RenderTarget));
}

#[test]
fn freeing_twice_or_freeing_invalid_is_a_no_op() {
    let mut heap = small_heap(HeapKind::DepthStencil, 2);
    let mut descriptor = heap.alloc().expect("alloc");
    heap.free(&mut descriptor);
    heap.free(&mut descriptor);
    assert_eq!(heap.live_count(), 0);

    let mut invalid = Descriptor::invalid();
    heap.free(&mut invalid);
    assert_eq!(heap.live_count(), 0);
    assert!(invalid.binding().is_none());
}

#[test]
fn render_target_heap_exhausts_at_capacity() {
    let (mut ctx, _probe) = context();
    let mut held: Vec<Descriptor> = (0..2048)
        .map(|_| ctx.alloc_descriptor(HeapKind::RenderTarget).expect("alloc"))
        .collect();

    let err = ctx.alloc_descriptor(HeapKind::RenderTarget).unwrap_err();
    assert!(matches!(
        err,
        GraphicsError::DescriptorHeapExhausted {
            kind: HeapKind::RenderTarget,
            capacity: 2048
        }
    ));
    assert!(!err.is_fatal());

    // A freed slot in the middle is handed out again
    let mut middle = held.swap_remove(1000);
    ctx.free_descriptor(&mut middle);
    let again = ctx.alloc_descriptor(HeapKind::RenderTarget).expect("alloc after free");
    assert_eq!(again.index(), 1000);
    assert_eq!(ctx.heaps().render_targets.live_count(), 2048);
}

#[test]
fn barriers_are_elided_for_unchanged_state() {
    let (mut ctx, probe) = context();
    let mut texture = Texture::new(
        &mut ctx,
        TextureDesc::new(16, 16, Format::Rgba8Unorm)
            .with_usage(TextureUsage::STORAGE)
            .named("Target"),
    )
    .expect("texture");
    assert_eq!(texture.state(), ResourceState::Common);

    let mut cmd = CommandBuffer::new(QueueType::Graphics);
    cmd.begin();
    cmd.image_barrier(&mut texture, ResourceState::ShaderResource, MipSelector::All);
    cmd.image_barrier(&mut texture, ResourceState::ShaderResource, MipSelector::All);
    cmd.image_barrier(&mut texture, ResourceState::Storage, MipSelector::All);
    cmd.image_barrier(&mut texture, ResourceState::Storage, MipSelector::All);
    cmd.end().expect("end");

    assert_eq!(
        cmd.commands(),
        &[
            Command::Barrier(Barrier::Transition {
                resource: texture.handle(),
                before: ResourceState::Common,
                after: ResourceState::ShaderResource,
                subresource: MipSelector::All,
            }),
            Command::Barrier(Barrier::Transition {
                resource: texture.handle(),
                before: ResourceState::ShaderResource,
                after: ResourceState::Storage,
                subresource: MipSelector::All,
            }),
            Command::Barrier(Barrier::Storage {
                resource: texture.handle()
            }),
        ]
    );
    assert_eq!(texture.state(), ResourceState::Storage);

    ctx.submit(&[&cmd]).expect("submit");
    let stats = probe.stats();
    assert_eq!(stats.transitions, 2);
    assert_eq!(stats.storage_barriers, 1);

    texture.free(&mut ctx);
}

#[test]
fn barrier_outside_recording_leaves_state_alone() {
    let (mut ctx, _probe) = context();
    let mut texture = Texture::new(&mut ctx, TextureDesc::new(4, 4, Format::Rgba8Unorm)).expect("texture");

    let mut cmd = CommandBuffer::new(QueueType::Graphics);
    cmd.image_barrier(&mut texture, ResourceState::CopyDest, MipSelector::All);
    assert!(cmd.commands().is_empty());
    assert_eq!(texture.state(), ResourceState::Common);

    texture.free(&mut ctx);
}

#[test]
fn view_cache_shares_views_and_counts_references() {
    let (mut ctx, probe) = context();
    let texture = Texture::new(
        &mut ctx,
        TextureDesc::new(64, 64, Format::Rgba8Unorm)
            .with_levels(3)
            .named("Albedo"),
    )
    .expect("texture");
    let slots_before = ctx.heaps().shader_resources.live_count();

    let a = ctx.view_get(&texture, ViewKind::ShaderResource, MipSelector::All).expect("view");
    let b = ctx.view_get(&texture, ViewKind::ShaderResource, MipSelector::All).expect("view");
    assert_eq!(a, b);
    assert_eq!(ctx.view_cache().ref_count(&a.key), 2);
    assert_eq!(ctx.heaps().shader_resources.live_count(), slots_before + 1);

    let mip = ctx.view_get(&texture, ViewKind::ShaderResource, MipSelector::Level(2)).expect("mip view");
    assert_ne!(mip.binding, a.binding);
    assert_eq!((mip.width, mip.height), (16, 16));
    assert_eq!(ctx.view_cache().len(), 2);

    let (key, binding) = (a.key, a.binding);
    ctx.view_release(a);
    assert_eq!(ctx.view_cache().ref_count(&key), 1);
    assert!(probe.view_at(binding).is_some());
    // The remaining holder still owns a live view
    assert_eq!(b.binding, binding);

    ctx.view_release(b);
    assert_eq!(ctx.view_cache().ref_count(&key), 0);
    assert!(probe.view_at(binding).is_none());

    // Freeing the texture takes its remaining views with it
    texture.free(&mut ctx);
    assert!(ctx.view_cache().is_empty());
    assert_eq!(ctx.heaps().shader_resources.live_count(), slots_before);
    assert_eq!(ctx.shutdown().expect("shutdown"), 0);
}

#[test]
fn views_require_matching_usage_and_mip() {
    let (mut ctx, _probe) = context();
    let texture = Texture::new(&mut ctx, TextureDesc::new(8, 8, Format::Rgba8Unorm)).expect("texture");

    let err = ctx.view_get(&texture, ViewKind::Storage, MipSelector::All).unwrap_err();
    assert!(matches!(err, GraphicsError::InvalidState { .. }));
    let err = ctx.view_get(&texture, ViewKind::ShaderResource, MipSelector::Level(1)).unwrap_err();
    assert!(matches!(err, GraphicsError::InvalidState { .. }));
    assert!(ctx.view_cache().is_empty());

    texture.free(&mut ctx);
}

#[test]
fn allocations_beyond_the_budget_are_out_of_memory() {
    let backend = HeadlessBackend::with_memory_budget(1024);
    let mut ctx = GraphicsContext::new(Box::new(backend), GpuConfig::default()).expect("context");

    let err = Buffer::new(&mut ctx, BufferDesc::new(4096, 0, BufferType::Storage).named("Big")).unwrap_err();
    assert!(matches!(err, GraphicsError::OutOfMemory { requested: 4096, .. }));

    let err = Texture::new(&mut ctx, TextureDesc::new(64, 64, Format::Rgba8Unorm)).unwrap_err();
    assert!(matches!(err, GraphicsError::OutOfMemory { .. }));
    assert_eq!(ctx.tracker().live_count(), 0);
}

#[test]
fn invalid_texture_descriptions_are_rejected() {
    let (mut ctx, _probe) = context();
    let err = Texture::new(&mut ctx, TextureDesc::new(0, 4, Format::Rgba8Unorm)).unwrap_err();
    assert!(matches!(err, GraphicsError::InvalidState { .. }));

    // 8x8 has 4 mips at most
    let err = Texture::new(&mut ctx, TextureDesc::new(8, 8, Format::Rgba8Unorm).with_levels(5)).unwrap_err();
    assert!(matches!(err, GraphicsError::InvalidState { .. }));
}

#[test]
fn footprints_pad_rows_and_align_mips() {
    let (footprints, total) = copyable_footprints(4, 4, Format::Rgba8Unorm, 3);
    let layout: Vec<_> = footprints
        .iter()
        .map(|f| (f.offset, f.row_pitch, f.rows, f.row_size))
        .collect();
    assert_eq!(layout, vec![(0, 256, 4, 16), (1024, 256, 2, 8), (1536, 256, 1, 4)]);
    assert_eq!(total, 1540);

    let (bc7, _) = copyable_footprints(8, 8, Format::Bc7Unorm, 1);
    assert_eq!((bc7[0].rows, bc7[0].row_size), (2, 32));
}

#[test]
fn buffers_copy_through_the_queue_and_read_back() {
    let (mut ctx, _probe) = context();
    let staging = Buffer::new(&mut ctx, BufferDesc::new(16, 4, BufferType::Copy).named("Staging")).expect("staging");
    let mut storage = Buffer::new(
        &mut ctx,
        BufferDesc::new(16, 4, BufferType::Storage)
            .with_readback()
            .named("Results"),
    )
    .expect("storage");

    let data: Vec<u8> = (1..=16).collect();
    staging.write(&mut ctx, 0, &data).expect("write");
    let err = storage.write(&mut ctx, 0, &data).unwrap_err();
    assert!(matches!(err, GraphicsError::InvalidState { .. }));

    let mut cmd = CommandBuffer::new(QueueType::Graphics);
    cmd.begin();
    cmd.buffer_barrier(&mut storage, ResourceState::CopyDest);
    cmd.copy_buffer_to_buffer(&storage, &staging);
    cmd.buffer_barrier(&mut storage, ResourceState::Common);
    cmd.end().expect("end");
    ctx.submit(&[&cmd]).expect("submit");
    ctx.flush().expect("flush");

    let mut out = [0u8; 16];
    storage.read(&mut ctx, 0, &mut out).expect("read");
    assert_eq!(out.as_slice(), data.as_slice());
    assert!(storage.read(&mut ctx, 8, &mut out).is_err());

    storage.build_storage(&mut ctx).expect("uav");
    assert!(storage.uav().is_some());

    staging.free(&mut ctx);
    storage.free(&mut ctx);
    assert_eq!(ctx.shutdown().expect("shutdown"), 0);
}

#[test]
fn fence_values_are_monotonic_and_complete_on_wait() {
    let (mut ctx, probe) = context();
    let first = ctx.signal().expect("signal");
    let second = ctx.signal().expect("signal");
    assert!(second > first);
    assert_eq!(ctx.completed_value(), 0);
    assert_eq!(probe.pending_signals(), 2);

    ctx.wait(first).expect("wait");
    assert_eq!(ctx.completed_value(), first);
    probe.advance();
    assert_eq!(ctx.completed_value(), second);
}

#[test]
fn stalled_fence_wait_is_device_loss() {
    let config = GpuConfig {
        fence_timeout_ms: 5,
        ..GpuConfig::default()
    };
    let (mut ctx, probe) = context_with(config);
    probe.set_stalled(true);

    let value = ctx.signal().expect("signal");
    let err = ctx.wait(value).unwrap_err();
    assert!(matches!(err, GraphicsError::DeviceLost { timeout_ms: 5, .. }));
    assert!(err.is_fatal());
}

#[test]
fn submit_rejects_open_or_mismatched_buffers() {
    let (mut ctx, probe) = context();
    let mut open = CommandBuffer::new(QueueType::Graphics);
    open.begin();
    open.dispatch(1, 1, 1);
    let err = ctx.submit(&[&open]).unwrap_err();
    assert!(matches!(err, GraphicsError::InvalidState { .. }));

    let mut compute = CommandBuffer::new(QueueType::Compute);
    compute.begin();
    compute.end().expect("end");
    assert!(ctx.submit(&[&compute]).is_err());
    assert_eq!(probe.stats().submissions, 0);

    let mut never_begun = CommandBuffer::new(QueueType::Graphics);
    assert!(never_begun.end().is_err());
}

#[test]
fn pipelines_bind_only_at_their_own_bind_point() {
    let (mut ctx, probe) = context();
    let signature = Signature::new(&mut ctx, SignatureDesc::new(vec![SignatureEntry::Uav], 0)).expect("signature");
    let shader = CompiledShader::new(ShaderStage::Compute, b"compute".to_vec());
    let pipeline = Pipeline::compute(&mut ctx, &signature, &shader).expect("pipeline");
    assert_eq!(probe.pipeline_bytecode(pipeline.handle()), Some(vec![b"compute".to_vec()]));

    let mut cmd = CommandBuffer::new(QueueType::Graphics);
    cmd.begin();
    cmd.set_graphics_pipeline(&pipeline);
    assert!(cmd.commands().is_empty());
    cmd.set_compute_pipeline(&pipeline);
    cmd.dispatch(2, 2, 1);
    cmd.end().expect("end");
    ctx.submit(&[&cmd]).expect("submit");
    assert_eq!(probe.stats().dispatches, 1);

    pipeline.free(&mut ctx);
    signature.free(&mut ctx);
    assert_eq!(probe.pipeline_count(), 0);
    assert_eq!(probe.signature_count(), 0);
}

#[test]
fn shutdown_reports_leaked_resources() {
    let (mut ctx, _probe) = context();
    let _leaked = Buffer::new(&mut ctx, BufferDesc::new(64, 0, BufferType::Vertex).named("Forgotten")).expect("buffer");
    let sampler = Sampler::new(&mut ctx, SamplerDesc::new(AddressMode::Wrap, Filter::Linear)).expect("sampler");
    sampler.free(&mut ctx);
    assert_eq!(ctx.shutdown().expect("shutdown"), 1);
}
