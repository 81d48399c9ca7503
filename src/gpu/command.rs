//! Command buffers
//!
//! A command buffer records an ordered list of [`Command`]s between `begin`
//! and `end`. Every barrier goes through [`CommandBuffer::buffer_barrier`] or
//! [`CommandBuffer::image_barrier`] so the tracked resource state always
//! matches what the recorded commands leave on the GPU.

use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::barrier::{plan_transition, Barrier};
use crate::gpu::buffer::Buffer;
use crate::gpu::descriptor::DescriptorBinding;
use crate::gpu::pipeline::{Pipeline, PipelineHandle, PipelineKind, Topology};
use crate::gpu::resource::{ResourceHandle, ResourceState};
use crate::gpu::texture::{MipSelector, SubresourceFootprint, Texture};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    /// Freshly created, never recorded
    Initial,
    Recording,
    /// Ready for submission
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindPoint {
    Graphics,
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A recorded GPU command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier(Barrier),
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetRenderTargets {
        colors: Vec<DescriptorBinding>,
        depth: Option<DescriptorBinding>,
    },
    ClearRenderTarget {
        target: DescriptorBinding,
        color: [f32; 4],
    },
    ClearDepthTarget {
        target: DescriptorBinding,
        depth: f32,
    },
    SetVertexBuffer {
        buffer: ResourceHandle,
        size: u64,
        stride: u32,
    },
    /// Indices are always 32-bit
    SetIndexBuffer {
        buffer: ResourceHandle,
        size: u64,
    },
    SetTopology(Topology),
    SetPipeline {
        bind_point: BindPoint,
        pipeline: PipelineHandle,
    },
    SetBinding {
        bind_point: BindPoint,
        slot: u32,
        binding: DescriptorBinding,
    },
    PushConstants {
        bind_point: BindPoint,
        slot: u32,
        data: Vec<u8>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyTextureToTexture {
        dst: ResourceHandle,
        src: ResourceHandle,
    },
    CopyBufferToTexture {
        dst: ResourceHandle,
        src: ResourceHandle,
        footprints: Vec<SubresourceFootprint>,
    },
    CopyBufferToBuffer {
        dst: ResourceHandle,
        src: ResourceHandle,
        size: u64,
    },
}

#[derive(Debug)]
pub struct CommandBuffer {
    queue_type: QueueType,
    state: CommandBufferState,
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn new(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            state: CommandBufferState::Initial,
            commands: Vec::new(),
        }
    }

    /// Reset and open for recording. The caller guarantees the previous
    /// submission of this buffer has completed.
    pub fn begin(&mut self) {
        if self.state == CommandBufferState::Recording {
            log::warn!("[CommandBuffer::begin] Buffer was still recording, discarding {} commands", self.commands.len());
        }
        self.commands.clear();
        self.state = CommandBufferState::Recording;
    }

    /// Close the buffer so it can be submitted
    pub fn end(&mut self) -> GraphicsResult<()> {
        if self.state != CommandBufferState::Recording {
            return Err(GraphicsError::invalid_state(
                "command_buffer_end",
                format!("buffer is {:?}, not recording", self.state),
            ));
        }
        self.state = CommandBufferState::Closed;
        Ok(())
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == CommandBufferState::Recording
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    fn record(&mut self, command: Command) -> bool {
        if !self.is_recording() {
            log::warn!("[CommandBuffer::record] Dropping {:?}: buffer is {:?}", command, self.state);
            return false;
        }
        self.commands.push(command);
        true
    }

    /// Transition a buffer to `state`
    pub fn buffer_barrier(&mut self, buffer: &mut Buffer, state: ResourceState) {
        if let Some(barrier) = plan_transition(buffer.handle(), buffer.state, state, MipSelector::All) {
            if self.record(Command::Barrier(barrier)) {
                buffer.state = state;
            }
        }
    }

    /// Transition a texture (or one of its mips) to `state`
    pub fn image_barrier(&mut self, texture: &mut Texture, state: ResourceState, mip: MipSelector) {
        if let Some(barrier) = plan_transition(texture.handle(), texture.state, state, mip) {
            if self.record(Command::Barrier(barrier)) {
                texture.state = state;
            }
        }
    }

    pub fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.record(Command::SetViewport(Viewport { x, y, width, height }));
    }

    pub fn set_scissor(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.record(Command::SetScissor(ScissorRect { x, y, width, height }));
    }

    pub fn set_render_targets(&mut self, colors: &[DescriptorBinding], depth: Option<DescriptorBinding>) {
        self.record(Command::SetRenderTargets {
            colors: colors.to_vec(),
            depth,
        });
    }

    pub fn clear_render_target(&mut self, target: DescriptorBinding, r: f32, g: f32, b: f32) {
        self.record(Command::ClearRenderTarget {
            target,
            color: [r, g, b, 1.0],
        });
    }

    pub fn clear_depth_target(&mut self, target: DescriptorBinding) {
        self.record(Command::ClearDepthTarget { target, depth: 1.0 });
    }

    pub fn set_vertex_buffer(&mut self, buffer: &Buffer) {
        self.record(Command::SetVertexBuffer {
            buffer: buffer.handle(),
            size: buffer.size(),
            stride: buffer.stride(),
        });
    }

    pub fn set_index_buffer(&mut self, buffer: &Buffer) {
        self.record(Command::SetIndexBuffer {
            buffer: buffer.handle(),
            size: buffer.size(),
        });
    }

    pub fn set_topology(&mut self, topology: Topology) {
        self.record(Command::SetTopology(topology));
    }

    pub fn set_graphics_pipeline(&mut self, pipeline: &Pipeline) {
        self.set_pipeline(BindPoint::Graphics, PipelineKind::Graphics, pipeline);
    }

    pub fn set_compute_pipeline(&mut self, pipeline: &Pipeline) {
        self.set_pipeline(BindPoint::Compute, PipelineKind::Compute, pipeline);
    }

    fn set_pipeline(&mut self, bind_point: BindPoint, expected: PipelineKind, pipeline: &Pipeline) {
        if pipeline.kind() != expected {
            log::warn!(
                "[CommandBuffer::set_pipeline] {:?} pipeline bound to the {:?} bind point",
                pipeline.kind(),
                bind_point
            );
            return;
        }
        self.record(Command::SetPipeline {
            bind_point,
            pipeline: pipeline.handle(),
        });
    }

    /// Bind a CBV / SRV / UAV / sampler descriptor to signature slot `slot`
    pub fn bind_descriptor(&mut self, bind_point: BindPoint, slot: u32, binding: DescriptorBinding) {
        self.record(Command::SetBinding {
            bind_point,
            slot,
            binding,
        });
    }

    pub fn push_constants<T: bytemuck::Pod>(&mut self, bind_point: BindPoint, slot: u32, data: &T) {
        self.record(Command::PushConstants {
            bind_point,
            slot,
            data: bytemuck::bytes_of(data).to_vec(),
        });
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32) {
        self.record(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
        });
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32) {
        self.record(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
        });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.record(Command::Dispatch { x, y, z });
    }

    pub fn copy_texture_to_texture(&mut self, dst: &Texture, src: &Texture) {
        self.record(Command::CopyTextureToTexture {
            dst: dst.handle(),
            src: src.handle(),
        });
    }

    /// Copy the first `levels` mips laid out by [`Texture::footprints`]
    pub fn copy_buffer_to_texture(&mut self, dst: &Texture, src: &Buffer, levels: u32) {
        let (mut footprints, _) = dst.footprints();
        footprints.truncate(levels as usize);
        self.record(Command::CopyBufferToTexture {
            dst: dst.handle(),
            src: src.handle(),
            footprints,
        });
    }

    pub fn copy_buffer_to_buffer(&mut self, dst: &Buffer, src: &Buffer) {
        self.record(Command::CopyBufferToBuffer {
            dst: dst.handle(),
            src: src.handle(),
            size: dst.size().min(src.size()),
        });
    }
}
