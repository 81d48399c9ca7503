//! Video device: the frame orchestrator
//!
//! Drives the begin / record / end / present cycle with `FRAMES_IN_FLIGHT`
//! frames in flight. Each frame slot owns a command buffer and a
//! backbuffer; `frame_values[i]` is the fence value signaled by the last
//! submission of slot `i`, and a slot is never handed out again before the
//! GPU has reached it.

use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::command::{CommandBuffer, QueueType};
use crate::gpu::constants::FRAMES_IN_FLIGHT;
use crate::gpu::context::GraphicsContext;
use crate::gpu::descriptor::DescriptorBinding;
use crate::gpu::swapchain::{Backbuffer, Swapchain, SwapchainDesc};

/// A frame being recorded. Hand it back through [`VideoDevice::end`].
#[derive(Debug)]
pub struct VideoFrame {
    pub index: usize,
    pub cmd: CommandBuffer,
    pub backbuffer: Backbuffer,
}

impl VideoFrame {
    /// Render target view of the backbuffer
    pub fn backbuffer_view(&self) -> DescriptorBinding {
        self.backbuffer.view.binding()
    }

    pub fn width(&self) -> u32 {
        self.backbuffer.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.backbuffer.texture.height()
    }
}

pub struct VideoDevice {
    ctx: GraphicsContext,
    swapchain: Swapchain,
    command_buffers: [Option<CommandBuffer>; FRAMES_IN_FLIGHT],
    frame_values: [u64; FRAMES_IN_FLIGHT],
    /// Slot of the frame currently being recorded
    recording: Option<usize>,
    frame_count: u64,
}

impl VideoDevice {
    pub fn new(mut ctx: GraphicsContext, desc: SwapchainDesc) -> GraphicsResult<Self> {
        let swapchain = Swapchain::new(&mut ctx, desc)?;
        log::info!(
            "[video] Initialized {}x{} with {} frames in flight",
            desc.width,
            desc.height,
            FRAMES_IN_FLIGHT
        );
        Ok(Self {
            ctx,
            swapchain,
            command_buffers: std::array::from_fn(|_| Some(CommandBuffer::new(QueueType::Graphics))),
            frame_values: [0; FRAMES_IN_FLIGHT],
            recording: None,
            frame_count: 0,
        })
    }

    pub fn context(&self) -> &GraphicsContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut GraphicsContext {
        &mut self.ctx
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Pick the backbuffer the presentation engine hands out and open its
    /// slot's command buffer
    pub fn begin(&mut self) -> GraphicsResult<VideoFrame> {
        if let Some(index) = self.recording {
            return Err(GraphicsError::invalid_state(
                "video_begin",
                format!("frame {} is still being recorded", index),
            ));
        }

        let index = self.ctx.backend.acquire_backbuffer()?;
        if index >= FRAMES_IN_FLIGHT {
            return Err(GraphicsError::invalid_state(
                "video_begin",
                format!("backbuffer index {} out of range", index),
            ));
        }

        // Normally already satisfied by the wait in `end`
        self.wait_for_slot(index)?;

        let Some(mut cmd) = self.command_buffers[index].take() else {
            return Err(GraphicsError::invalid_state(
                "video_begin",
                format!("command buffer {} is lent out", index),
            ));
        };
        let backbuffer = match self.swapchain.take(index) {
            Ok(backbuffer) => backbuffer,
            Err(e) => {
                self.command_buffers[index] = Some(cmd);
                return Err(e);
            }
        };

        cmd.begin();
        self.recording = Some(index);
        Ok(VideoFrame { index, cmd, backbuffer })
    }

    /// Close and submit the frame, signal the fence, then block until the
    /// slot the next frame will use is free again
    pub fn end(&mut self, mut frame: VideoFrame) -> GraphicsResult<()> {
        let index = frame.index;
        if self.recording != Some(index) {
            return Err(GraphicsError::invalid_state(
                "video_end",
                format!("frame {} was not begun", index),
            ));
        }
        self.recording = None;

        let submitted = frame.cmd.end().and_then(|_| self.ctx.submit(&[&frame.cmd]));
        self.command_buffers[index] = Some(frame.cmd);
        self.swapchain.restore(index, frame.backbuffer);
        submitted?;

        let value = self.ctx.signal()?;
        self.frame_values[index] = value;
        self.frame_count += 1;

        // Flip-model swapchains hand out backbuffers in rotation
        self.wait_for_slot((index + 1) % FRAMES_IN_FLIGHT)?;

        log::debug!("[video] Frame {} ended on slot {} (fence {})", self.frame_count, index, value);
        Ok(())
    }

    fn wait_for_slot(&mut self, index: usize) -> GraphicsResult<()> {
        let target = self.frame_values[index];
        if self.ctx.completed_value() < target {
            self.ctx.wait(target)?;
        }
        Ok(())
    }

    pub fn present(&mut self, vsync: bool) -> GraphicsResult<()> {
        self.ctx.backend.present(vsync)
    }

    /// Block until the GPU has finished all submitted work
    pub fn wait(&mut self) -> GraphicsResult<()> {
        let value = self.ctx.flush()?;
        log::debug!("[video] Drained GPU at fence {}", value);
        Ok(())
    }

    /// Drain the GPU, then resize every backbuffer
    pub fn resize(&mut self, width: u32, height: u32) -> GraphicsResult<()> {
        if self.recording.is_some() {
            return Err(GraphicsError::invalid_state("video_resize", "resize during frame recording"));
        }
        self.wait()?;
        self.swapchain.resize(&mut self.ctx, width, height)
    }

    /// Fence value signaled by the last submission of slot `index`
    pub fn frame_value(&self, index: usize) -> u64 {
        self.frame_values.get(index).copied().unwrap_or(0)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Drain the GPU, release the swapchain and shut down the context.
    /// Returns the number of leaked resources.
    pub fn shutdown(mut self) -> GraphicsResult<usize> {
        self.wait()?;
        self.swapchain.free(&mut self.ctx);
        self.ctx.shutdown()
    }
}

#[cfg(test)]
mod tests;
