use super::*;
use crate::backend::{HeadlessBackend, HeadlessProbe};
use crate::config::GpuConfig;
use crate::gpu::command::Command;
use crate::gpu::resource::ResourceState;
use crate::gpu::texture::MipSelector;

fn device() -> (VideoDevice, HeadlessProbe) {
    device_with(GpuConfig::default())
}

fn device_with(config: GpuConfig) -> (VideoDevice, HeadlessProbe) {
    let backend = HeadlessBackend::new();
    let probe = backend.probe();
    let ctx = GraphicsContext::new(Box::new(backend), config).expect("context");
    let video = VideoDevice::new(ctx, SwapchainDesc::new(128, 96)).expect("video device");
    (video, probe)
}

/// Clear the backbuffer and hand it back for presentation
fn record_clear(frame: &mut VideoFrame) {
    let target = frame.backbuffer_view();
    frame
        .cmd
        .image_barrier(&mut frame.backbuffer.texture, ResourceState::RenderTarget, MipSelector::All);
    frame.cmd.set_render_targets(&[target], None);
    frame.cmd.clear_render_target(target, 0.1, 0.2, 0.3);
    frame
        .cmd
        .image_barrier(&mut frame.backbuffer.texture, ResourceState::Present, MipSelector::All);
}

fn run_frame(video: &mut VideoDevice) -> usize {
    let mut frame = video.begin().expect("begin");
    let index = frame.index;
    record_clear(&mut frame);
    video.end(frame).expect("end");
    video.present(true).expect("present");
    index
}

#[test]
fn frames_alternate_slots_and_wait_on_reuse() {
    let (mut video, probe) = device();

    assert_eq!(run_frame(&mut video), 0);
    assert_eq!(video.frame_value(0), 1);
    // Slot 1 was never used, so nothing had to retire
    assert_eq!(probe.pending_signals(), 1);

    assert_eq!(run_frame(&mut video), 1);
    assert_eq!(video.frame_value(1), 2);
    // Ending slot 1 waited for slot 0's submission
    assert!(video.context_mut().completed_value() >= video.frame_value(0));

    assert_eq!(run_frame(&mut video), 0);
    assert_eq!(video.frame_value(0), 3);
    assert!(video.context_mut().completed_value() >= video.frame_value(1));
    assert_eq!(video.frame_count(), 3);
    assert_eq!(probe.stats().presents, 3);

    video.wait().expect("wait");
    assert_eq!(probe.pending_signals(), 0);
    assert_eq!(video.shutdown().expect("shutdown"), 0);
    assert_eq!(probe.resource_count(), 0);
}

#[test]
fn frame_commands_reach_the_device() {
    let (mut video, probe) = device();
    let mut frame = video.begin().expect("begin");
    let target = frame.backbuffer_view();
    assert_eq!((frame.width(), frame.height()), (128, 96));
    record_clear(&mut frame);
    video.end(frame).expect("end");

    let submitted = probe.last_submission();
    assert!(submitted.contains(&Command::ClearRenderTarget {
        target,
        color: [0.1, 0.2, 0.3, 1.0],
    }));
    assert_eq!(probe.stats().transitions, 2);
    assert_eq!(
        video.swapchain().backbuffer(0).map(|b| b.texture.state()),
        Some(ResourceState::Present)
    );
}

#[test]
fn begin_twice_is_rejected() {
    let (mut video, _probe) = device();
    let frame = video.begin().expect("begin");
    let err = video.begin().unwrap_err();
    assert!(matches!(err, GraphicsError::InvalidState { .. }));
    video.end(frame).expect("end");
}

#[test]
fn ending_a_frame_that_was_not_begun_is_rejected() {
    let (mut video, _probe) = device();
    let frame = video.begin().expect("begin");

    let forged = VideoFrame {
        index: 1,
        cmd: CommandBuffer::new(QueueType::Graphics),
        backbuffer: video.swapchain.take(1).expect("backbuffer 1"),
    };
    let err = video.end(forged).unwrap_err();
    assert!(matches!(err, GraphicsError::InvalidState { .. }));
    assert_eq!(video.frame_count(), 0);

    // The real frame is still open and ends normally
    video.end(frame).expect("end");
    assert_eq!(video.frame_count(), 1);
}

#[test]
fn resize_recreates_backbuffers() {
    let (mut video, probe) = device();
    run_frame(&mut video);

    let frame = video.begin().expect("begin");
    let err = video.resize(320, 240).unwrap_err();
    assert!(matches!(err, GraphicsError::InvalidState { .. }));
    video.end(frame).expect("end");
    video.present(true).expect("present");

    video.resize(320, 240).expect("resize");
    assert_eq!(probe.pending_signals(), 0);
    assert_eq!((video.swapchain().width(), video.swapchain().height()), (320, 240));
    assert_eq!(video.swapchain().buffer_count(), FRAMES_IN_FLIGHT);

    let frame = video.begin().expect("begin after resize");
    assert_eq!((frame.width(), frame.height()), (320, 240));
    video.end(frame).expect("end");

    assert!(video.resize(0, 240).is_err());
    assert_eq!(video.shutdown().expect("shutdown"), 0);
}

#[test]
fn stalled_gpu_surfaces_as_device_loss() {
    let config = GpuConfig {
        fence_timeout_ms: 5,
        ..GpuConfig::default()
    };
    let (mut video, probe) = device_with(config);
    run_frame(&mut video);

    probe.set_stalled(true);
    let frame = video.begin().expect("begin");
    // Ending slot 1 has to wait for slot 0, which never completes
    let err = video.end(frame).unwrap_err();
    assert!(matches!(err, GraphicsError::DeviceLost { .. }));
    assert!(err.is_fatal());
}
