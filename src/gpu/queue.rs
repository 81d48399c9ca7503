//! Command queue: ordered submission plus the fence that tracks it

use std::time::Duration;

use crate::backend::GpuBackend;
use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::command::{CommandBuffer, CommandBufferState, QueueType};
use crate::gpu::fence::Fence;

#[derive(Debug)]
pub struct CommandQueue {
    queue_type: QueueType,
    fence: Fence,
    submissions: u64,
}

impl CommandQueue {
    pub fn new(backend: &mut dyn GpuBackend, queue_type: QueueType, timeout: Duration) -> GraphicsResult<Self> {
        let fence = Fence::new(backend, timeout)?;
        log::info!("[CommandQueue::new] Created {:?} queue on {}", queue_type, backend.name());
        Ok(Self {
            queue_type,
            fence,
            submissions: 0,
        })
    }

    /// Execute closed command buffers in order
    pub fn submit(&mut self, backend: &mut dyn GpuBackend, buffers: &[&CommandBuffer]) -> GraphicsResult<()> {
        for buffer in buffers {
            if buffer.state() != CommandBufferState::Closed {
                return Err(GraphicsError::invalid_state(
                    "command_queue_submit",
                    format!("command buffer is {:?}, end() it before submitting", buffer.state()),
                ));
            }
            if buffer.queue_type() != self.queue_type {
                return Err(GraphicsError::invalid_state(
                    "command_queue_submit",
                    format!("{:?} buffer submitted to {:?} queue", buffer.queue_type(), self.queue_type),
                ));
            }
        }

        for buffer in buffers {
            backend.execute(self.queue_type, buffer.commands())?;
            self.submissions += 1;
        }
        Ok(())
    }

    pub fn signal(&mut self, backend: &mut dyn GpuBackend) -> GraphicsResult<u64> {
        self.fence.signal(backend, self.queue_type)
    }

    pub fn wait(&self, backend: &mut dyn GpuBackend, value: u64) -> GraphicsResult<()> {
        self.fence.wait(backend, value)
    }

    /// Signal and block until everything submitted so far has finished
    pub fn flush(&mut self, backend: &mut dyn GpuBackend) -> GraphicsResult<u64> {
        let value = self.signal(backend)?;
        self.wait(backend, value)?;
        Ok(value)
    }

    pub fn completed_value(&self, backend: &mut dyn GpuBackend) -> u64 {
        self.fence.completed(backend)
    }

    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn submissions(&self) -> u64 {
        self.submissions
    }
}
